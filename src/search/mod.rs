//! Token search over an [`AcousticModel`].
//!
//! [`ModelTranscriber`] is the bridge between the windowed decoder and a concrete network:
//! it turns each window into a log-mel spectrogram, encodes a whole group in one call, and
//! then runs greedy or beam search depending on [`DecodeOpts::beams`].

mod beam;
mod greedy;

use tracing::debug;

use crate::backend::{AcousticModel, AudioWindow, DecodeResult, Transcriber, Vocabulary};
use crate::mel::log_mel_spectrogram;
use crate::opts::DecodeOpts;
use crate::{Error, Result};

/// A [`Transcriber`] backed by any [`AcousticModel`].
pub struct ModelTranscriber<M: AcousticModel> {
    model: M,
}

impl<M: AcousticModel> ModelTranscriber<M> {
    pub fn new(model: M) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn into_inner(self) -> M {
        self.model
    }
}

impl<M: AcousticModel> Transcriber for ModelTranscriber<M> {
    fn vocabulary(&self) -> &Vocabulary {
        self.model.vocabulary()
    }

    fn transcribe(&mut self, windows: &[AudioWindow], opts: &DecodeOpts) -> Result<Vec<DecodeResult>> {
        if windows.is_empty() {
            return Ok(Vec::new());
        }

        let n_mels = self.model.n_mels();
        let mels: Vec<_> = windows
            .iter()
            .map(|w| log_mel_spectrogram(&w.samples, n_mels))
            .collect();

        let features = self.model.encode(&mels)?;
        if features.len() != windows.len() {
            return Err(Error::model(format!(
                "encoder returned {} outputs for {} windows",
                features.len(),
                windows.len()
            )));
        }

        debug!(windows = windows.len(), beams = opts.beams, "decoding window group");

        if opts.beams > 1 {
            beam::beam_search(&mut self.model, &features, opts)
        } else {
            greedy::greedy_search(&mut self.model, &features, opts)
        }
    }

    fn detokenize(&self, tokens: &[u32]) -> Result<String> {
        self.model.detokenize(tokens)
    }
}

/// Ask the model for one step and check it answered every row.
fn step<M: AcousticModel>(
    model: &mut M,
    rows: &[Vec<u32>],
    features: &[M::Features],
    reset_cache: bool,
) -> Result<Vec<Vec<f32>>> {
    let logits = model.decode_step(rows, features, reset_cache)?;
    if logits.len() != rows.len() {
        return Err(Error::model(format!(
            "decoder returned {} logit rows for {} token rows",
            logits.len(),
            rows.len()
        )));
    }
    Ok(logits)
}

fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![f32::NEG_INFINITY; logits.len()];
    }
    let lse = max + logits.iter().map(|x| (x - max).exp()).sum::<f32>().ln();
    logits.iter().map(|x| x - lse).collect()
}

fn softmax(logits: &[f32]) -> Vec<f32> {
    log_softmax(logits).into_iter().map(f32::exp).collect()
}

/// Index of the largest value; the first one wins ties.
fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, v) in values.iter().enumerate().skip(1) {
        if *v > values[best] {
            best = i;
        }
    }
    best
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;

    use crate::Result;
    use crate::backend::{AcousticModel, Vocabulary};
    use crate::mel::MelSpectrogram;

    pub const SOT: u32 = 90;
    pub const EOT: u32 = 91;
    pub const TS_BEGIN: u32 = 100;

    pub fn vocab() -> Vocabulary {
        Vocabulary {
            sot_sequence: vec![SOT, 92, 93],
            eot: EOT,
            timestamp_begin: TS_BEGIN,
            vocab_size: 200,
            text_context: 64,
        }
    }

    /// Scores `(token, logit)` for the next step of window `w` given its generated tokens.
    pub type Policy = Box<dyn Fn(usize, &[u32]) -> Vec<(u32, f32)>>;

    /// A model whose "features" are just window indices.
    pub struct ScriptedModel {
        pub vocab: Vocabulary,
        pub policy: Policy,
        pub resets: Vec<bool>,
        pub row_counts: Vec<usize>,
    }

    impl ScriptedModel {
        pub fn new(policy: Policy) -> Self {
            Self {
                vocab: vocab(),
                policy,
                resets: Vec::new(),
                row_counts: Vec::new(),
            }
        }

        /// Window `w` says `scripts[w]` and then stops.
        pub fn reading(scripts: Vec<Vec<u32>>) -> Self {
            Self::new(Box::new(move |w, generated| {
                let next = scripts[w].get(generated.len()).copied().unwrap_or(EOT);
                vec![(next, 10.0)]
            }))
        }
    }

    impl AcousticModel for ScriptedModel {
        type Features = usize;

        fn vocabulary(&self) -> &Vocabulary {
            &self.vocab
        }

        fn n_mels(&self) -> usize {
            80
        }

        fn encode(&mut self, mels: &[MelSpectrogram]) -> Result<Vec<usize>> {
            Ok((0..mels.len()).collect())
        }

        fn decode_step(
            &mut self,
            tokens: &[Vec<u32>],
            features: &[usize],
            reset_cache: bool,
        ) -> Result<Vec<Vec<f32>>> {
            self.resets.push(reset_cache);
            self.row_counts.push(tokens.len());
            let sot_len = self.vocab.sot_sequence.len();
            Ok(tokens
                .iter()
                .zip(features)
                .map(|(row, &w)| {
                    let mut logits = vec![-10.0; self.vocab.vocab_size];
                    let scored: HashMap<u32, f32> =
                        (self.policy)(w, &row[sot_len..]).into_iter().collect();
                    for (token, logit) in scored {
                        logits[token as usize] = logit;
                    }
                    logits
                })
                .collect())
        }

        fn detokenize(&self, tokens: &[u32]) -> Result<String> {
            Ok(tokens
                .iter()
                .map(|t| format!("t{t}"))
                .collect::<Vec<_>>()
                .join(" "))
        }
    }
}
