use std::fs;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use tokenizers::Tokenizer;
use tracing::info;

use crate::backend::{AcousticModel, Vocabulary};
use crate::mel::{MelSpectrogram, N_FRAMES};
use crate::{Error, Result};

/// Multilingual checkpoints have one more token than English-only ones.
const MULTILINGUAL_VOCAB: usize = 51865;

/// A Whisper checkpoint loaded with candle.
///
/// Files are read from `<models_dir>/<name>/`:
/// - `config.json`
/// - `tokenizer.json`
/// - `model.safetensors`
pub struct CandleWhisper {
    model: m::model::Whisper,
    tokenizer: Tokenizer,
    device: Device,
    vocab: Vocabulary,
    n_mels: usize,
}

/// Map a device name (`cpu`, `cuda`, `metal`) to a candle device.
pub fn device_from_name(name: &str) -> Result<Device> {
    match name {
        "cpu" => Ok(Device::Cpu),
        "cuda" => Device::new_cuda(0).map_err(Error::model),
        "metal" => Device::new_metal(0).map_err(Error::model),
        other => Err(Error::invalid_input(format!("unknown device '{other}'"))),
    }
}

impl CandleWhisper {
    /// Load model `name` and build its start sequence for `language` (e.g. `"ja"`).
    pub fn load(models_dir: &Path, name: &str, language: &str, device: Device) -> Result<Self> {
        let dir = models_dir.join(name);
        let path = |file: &str| -> PathBuf { dir.join(file) };

        let config: Config = serde_json::from_str(&fs::read_to_string(path("config.json"))?)?;
        let tokenizer = Tokenizer::from_file(path("tokenizer.json")).map_err(Error::model)?;

        // SAFETY: the weights file is only read, and must not be modified while mapped.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[path("model.safetensors")], DType::F32, &device)
                .map_err(Error::model)?
        };
        let model = m::model::Whisper::load(&vb, config.clone()).map_err(Error::model)?;

        let vocab = build_vocabulary(&tokenizer, &config, language)?;
        info!(
            model = name,
            vocab_size = vocab.vocab_size,
            n_mels = config.num_mel_bins,
            "loaded whisper checkpoint"
        );

        Ok(Self {
            model,
            tokenizer,
            device,
            vocab,
            n_mels: config.num_mel_bins,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| Error::model(format!("token '{token}' not found in vocabulary")))
}

fn build_vocabulary(tokenizer: &Tokenizer, config: &Config, language: &str) -> Result<Vocabulary> {
    let sot = token_id(tokenizer, m::SOT_TOKEN)?;

    let sot_sequence = if config.vocab_size >= MULTILINGUAL_VOCAB {
        let lang = tokenizer
            .token_to_id(&format!("<|{language}|>"))
            .ok_or_else(|| Error::invalid_input(format!("unsupported language '{language}'")))?;
        vec![sot, lang, token_id(tokenizer, m::TRANSCRIBE_TOKEN)?]
    } else {
        vec![sot]
    };

    Ok(Vocabulary {
        sot_sequence,
        eot: token_id(tokenizer, m::EOT_TOKEN)?,
        timestamp_begin: token_id(tokenizer, m::NO_TIMESTAMPS_TOKEN)? + 1,
        vocab_size: config.vocab_size,
        text_context: config.max_target_positions,
    })
}

impl AcousticModel for CandleWhisper {
    type Features = Tensor;

    fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    fn n_mels(&self) -> usize {
        self.n_mels
    }

    fn encode(&mut self, mels: &[MelSpectrogram]) -> Result<Vec<Tensor>> {
        let inputs = mels
            .iter()
            .map(|mel| Tensor::from_slice(mel.data(), (1, mel.n_mels(), N_FRAMES), &self.device))
            .collect::<candle_core::Result<Vec<_>>>()
            .map_err(Error::model)?;
        let batch = Tensor::cat(&inputs, 0).map_err(Error::model)?;

        let features = self
            .model
            .encoder
            .forward(&batch, true)
            .map_err(Error::model)?;

        (0..mels.len())
            .map(|k| features.i(k..k + 1).map_err(Error::model))
            .collect()
    }

    fn decode_step(
        &mut self,
        tokens: &[Vec<u32>],
        features: &[Tensor],
        reset_cache: bool,
    ) -> Result<Vec<Vec<f32>>> {
        let rows = tokens.len();
        let len = tokens.first().map_or(0, Vec::len);
        if rows == 0 || len == 0 {
            return Ok(Vec::new());
        }
        if tokens.iter().any(|t| t.len() != len) {
            return Err(Error::model("decoder rows must have equal length"));
        }

        let flat: Vec<u32> = tokens.iter().flatten().copied().collect();
        let run = || -> candle_core::Result<Vec<Vec<f32>>> {
            let tokens = Tensor::from_vec(flat, (rows, len), &self.device)?;
            let audio = Tensor::cat(features, 0)?;
            let hidden = self.model.decoder.forward(&tokens, &audio, reset_cache)?;
            let last = hidden.i((.., len - 1..len))?;
            self.model
                .decoder
                .final_linear(&last)?
                .squeeze(1)?
                .to_dtype(DType::F32)?
                .to_vec2::<f32>()
        };
        run().map_err(Error::model)
    }

    fn detokenize(&self, tokens: &[u32]) -> Result<String> {
        self.tokenizer.decode(tokens, true).map_err(Error::model)
    }
}
