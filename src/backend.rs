//! The seams between the windowed decoder and the speech model.
//!
//! Two layers:
//! - [`AcousticModel`] is the opaque network: `encode(mel) -> features` and
//!   `decode_step(tokens, features) -> logits`, plus its token layout.
//! - [`Transcriber`] turns a batch of audio windows into token sequences. The windowed decoder
//!   depends only on this trait; [`crate::search::ModelTranscriber`] implements it for any
//!   `AcousticModel` with greedy or beam search.

use crate::Result;
use crate::opts::DecodeOpts;

/// Seconds represented by one timestamp token step.
pub const TIMESTAMP_STEP_SECONDS: f64 = 0.02;

/// Special-token layout of a Whisper-style vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    /// Start-of-transcript prefix (e.g. `<|startoftranscript|><|ja|><|transcribe|>`).
    pub sot_sequence: Vec<u32>,
    /// End-of-text token.
    pub eot: u32,
    /// First timestamp token (`<|0.00|>`); every id above it is a later timestamp.
    pub timestamp_begin: u32,
    /// Total logits per decode step.
    pub vocab_size: usize,
    /// Maximum decoder sequence length.
    pub text_context: usize,
}

impl Vocabulary {
    /// Number of leading "text" ids: everything below `<|notimestamps|>`.
    pub fn text_len(&self) -> usize {
        (self.timestamp_begin as usize).saturating_sub(1)
    }

    pub fn is_timestamp(&self, token: u32) -> bool {
        token >= self.timestamp_begin
    }

    /// Seconds (relative to the window start) encoded by a timestamp token.
    pub fn timestamp_seconds(&self, token: u32) -> f64 {
        f64::from(token.saturating_sub(self.timestamp_begin)) * TIMESTAMP_STEP_SECONDS
    }
}

/// A slice of mono 16 kHz audio fed to the model as one input.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioWindow {
    /// Start of this window relative to the chapter start.
    pub offset_seconds: f64,
    /// Real audio only; the last window of a chapter may be shorter than the nominal length.
    pub samples: Vec<f32>,
}

/// The decode of one window.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DecodeResult {
    /// Full row: start-of-transcript sequence, generated tokens (timestamps interleaved),
    /// and the end token when one was emitted.
    pub tokens: Vec<u32>,
    pub cumulative_log_prob: f32,
    /// `trace[k]` is the text-token probability distribution at the step that produced
    /// generated token `k` (end token excluded). Empty when the search doesn't capture one.
    pub trace: Vec<Vec<f32>>,
}

/// The opaque encoder/decoder network.
pub trait AcousticModel {
    /// Encoder output for one window. Cheap to clone (typically a reference-counted tensor).
    type Features: Clone;

    fn vocabulary(&self) -> &Vocabulary;

    /// Mel bins the encoder expects (80 or 128).
    fn n_mels(&self) -> usize;

    /// Encode a batch of `(n_mels, 3000)` spectrograms, one output per window.
    fn encode(&mut self, mels: &[crate::mel::MelSpectrogram]) -> Result<Vec<Self::Features>>;

    /// Next-token logits for each row. `features[i]` is the encoder output row `i` attends to.
    ///
    /// `reset_cache` is true on the first step of a new decode; implementations that cache
    /// cross-attention state must drop it then.
    fn decode_step(
        &mut self,
        tokens: &[Vec<u32>],
        features: &[Self::Features],
        reset_cache: bool,
    ) -> Result<Vec<Vec<f32>>>;

    /// Plain text for a run of non-timestamp tokens.
    fn detokenize(&self, tokens: &[u32]) -> Result<String>;
}

/// Transcribes batches of audio windows.
pub trait Transcriber {
    fn vocabulary(&self) -> &Vocabulary;

    /// Decode every window of one group; returns one result per window, in order.
    fn transcribe(&mut self, windows: &[AudioWindow], opts: &DecodeOpts) -> Result<Vec<DecodeResult>>;

    /// Plain text for a run of non-timestamp tokens.
    fn detokenize(&self, tokens: &[u32]) -> Result<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vocab() -> Vocabulary {
        Vocabulary {
            sot_sequence: vec![50258, 50266, 50359],
            eot: 50257,
            timestamp_begin: 50364,
            vocab_size: 51865,
            text_context: 448,
        }
    }

    #[test]
    fn text_tokens_stop_below_no_timestamps() {
        let v = vocab();
        assert_eq!(v.text_len(), 50363);
        assert!(!v.is_timestamp(50363));
        assert!(v.is_timestamp(50364));
    }

    #[test]
    fn timestamp_tokens_step_by_twenty_millis() {
        let v = vocab();
        assert_eq!(v.timestamp_seconds(50364), 0.0);
        assert!((v.timestamp_seconds(50364 + 150) - 3.0).abs() < 1e-9);
    }
}
