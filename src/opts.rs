use std::path::PathBuf;

use crate::cache::OverwritePolicy;
use crate::{Error, Result};

/// Options that control a whole alignment run.
///
/// This struct represents *library-level configuration*, not CLI flags directly.
/// The CLI is responsible for mapping user input into this type so that:
/// - the library remains reusable outside of a CLI context
/// - other frontends (tests, batch jobs) can construct options programmatically
#[derive(Debug, Clone)]
pub struct Opts {
    /// Model identity. Part of every cache key, so changing models never reuses transcripts.
    pub model_name: String,

    /// Language hint (e.g. `"ja"`, `"en"`) used to build the start-of-transcript sequence.
    pub language: String,

    pub decode: DecodeOpts,

    pub cache: CacheOpts,

    /// Where subtitle files are written.
    pub output_dir: PathBuf,
}

impl Default for Opts {
    fn default() -> Self {
        Self {
            model_name: "tiny".to_owned(),
            language: "ja".to_owned(),
            decode: DecodeOpts::default(),
            cache: CacheOpts::default(),
            output_dir: PathBuf::from("."),
        }
    }
}

/// How the windowed decoder cuts, decodes and stitches audio.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeOpts {
    /// Nominal window length in seconds.
    pub window_seconds: u32,

    /// Seconds each window shares with its predecessor. Windows start every
    /// `window_seconds - overlap_seconds`.
    pub overlap_seconds: u32,

    /// Windows sent through the encoder together.
    pub batches: usize,

    /// 1 = greedy decoding, >1 = beam search with this many hypotheses per window.
    pub beams: usize,

    /// Beam search keeps `round(beams * patience)` finished candidates per window.
    pub patience: f32,

    /// Greedy decoding stops once a row (start sequence included) reaches this length.
    pub max_greedy_tokens: usize,

    pub stitch: StitchStrategy,

    /// Below this best trace agreement, adjacent windows are kept verbatim.
    pub min_overlap_similarity: f32,

    /// `CommonRun` only splices on shared runs at least this long.
    pub min_common_run: usize,
}

impl Default for DecodeOpts {
    fn default() -> Self {
        Self {
            window_seconds: 30,
            overlap_seconds: 20,
            batches: 2,
            beams: 1,
            patience: 1.0,
            max_greedy_tokens: 60,
            stitch: StitchStrategy::LogitTrace,
            min_overlap_similarity: 0.1,
            min_common_run: 3,
        }
    }
}

impl DecodeOpts {
    /// Seconds between consecutive window starts.
    pub fn stride_seconds(&self) -> u32 {
        self.window_seconds.saturating_sub(self.overlap_seconds)
    }

    /// Share of a window covered by the overlap with its neighbour.
    pub fn overlap_fraction(&self) -> f64 {
        f64::from(self.overlap_seconds) / f64::from(self.window_seconds.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_seconds == 0 {
            return Err(Error::invalid_input("window length must be positive"));
        }
        if self.overlap_seconds >= self.window_seconds {
            return Err(Error::invalid_input(format!(
                "overlap ({}s) must be shorter than the window ({}s)",
                self.overlap_seconds, self.window_seconds
            )));
        }
        if self.batches == 0 {
            return Err(Error::invalid_input("batches must be at least 1"));
        }
        if self.beams == 0 {
            return Err(Error::invalid_input("beams must be at least 1"));
        }
        if !(self.patience > 0.0) {
            return Err(Error::invalid_input("patience must be positive"));
        }
        // Beam search records no traces, so trace stitching would never cut.
        if self.beams > 1 && self.stitch == StitchStrategy::LogitTrace {
            return Err(Error::invalid_input(
                "beam search needs the common-run stitch strategy",
            ));
        }
        Ok(())
    }
}

/// How duplicated speech in overlapping windows is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StitchStrategy {
    /// Align the per-step probability traces of both windows (greedy decoding only).
    LogitTrace,
    /// Splice on the longest shared token run (works with beam search).
    CommonRun,
}

/// Transcript cache settings.
#[derive(Debug, Clone)]
pub struct CacheOpts {
    pub enabled: bool,
    pub dir: PathBuf,
    /// What to do when an entry already exists.
    pub overwrite: OverwritePolicy,
}

impl Default for CacheOpts {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from("AudiobookTextSyncCache"),
            overwrite: OverwritePolicy::Ask,
        }
    }
}
