//! `scriptsync` aligns audiobook narration with its script.
//!
//! This crate provides:
//! - Chapter extraction and audio decoding (mono 16 kHz)
//! - Overlapping-window Whisper transcription with overlap stitching
//! - A persistent transcript cache
//! - Fuzzy matching of script files to audio chapters
//! - WebVTT output
//!
//! Most consumers should start with [`ScriptSync`]. The model sits behind the
//! [`backend::Transcriber`] and [`backend::AcousticModel`] traits, so the windowing and
//! stitching logic can be driven by any implementation (the `candle` feature ships one).

mod error;
pub use error::{Error, Result};

// High-level API (most consumers should start here).
pub mod opts;
pub mod scriptsync;

// Audio input.
pub mod audio_pipeline;
pub mod chapters;
pub mod media;

// Model seams, features and search.
pub mod backend;
pub mod backends;
pub mod mel;
pub mod search;

// Windowed decoding and overlap resolution.
pub mod stitch;
pub mod windowed;

// Transcript storage and script matching.
pub mod cache;
pub mod matcher;

// Segment data structures and output encoders.
pub mod segment_encoder;
pub mod segments;
pub mod timestamp;
pub mod vtt_encoder;

// Logging configuration and control.
#[cfg(feature = "logging")]
pub mod logging;

pub use scriptsync::{RunEvent, RunReport, RunRequest, ScriptSync};
pub use segments::Segment;
