//! Media probing and decoding on top of Symphonia.
//!
//! Responsibilities:
//! - Probe a file and select a default audio track
//! - Expose container cue points (chapter markers) and track timing
//! - Decode a time range into mono 16 kHz `f32` via [`AudioPipeline`]
//!
//! Error handling policy while decoding:
//! - `DecodeError` → skip the bad packet (common with some codecs)
//! - `IoError`     → end of stream
//! - anything else → [`Error::MediaRead`] for this file

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use symphonia::core::codecs::{CODEC_TYPE_NULL, Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{Cue, FormatOptions, FormatReader, SeekMode, SeekTo, Track};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::debug;

use crate::audio_pipeline::{AudioPipeline, TARGET_SAMPLE_RATE};
use crate::{Error, Result};

/// An opened, probed media file with its default audio track selected.
pub struct MediaFile {
    path: PathBuf,
    format: Box<dyn FormatReader>,
    track: Track,
}

impl MediaFile {
    /// Open and probe `path`.
    ///
    /// Track selection policy: the first track with a real codec and a known sample rate.
    /// Any failure here is a [`Error::MediaRead`] for this file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| Error::media_read(path, e))?;

        let mss = MediaSourceStream::new(
            Box::new(file),
            MediaSourceStreamOptions {
                // Symphonia expects a power-of-two buffer > 32KiB for good probing behavior.
                buffer_len: 256 * 1024,
            },
        );

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::media_read(path, e))?;

        let format = probed.format;
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL && t.codec_params.sample_rate.is_some())
            .cloned()
            .ok_or_else(|| Error::media_read(path, "no audio track found"))?;

        Ok(Self {
            path: path.to_path_buf(),
            format,
            track,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Container cue points, in the order the container lists them.
    pub fn cues(&self) -> &[Cue] {
        self.format.cues()
    }

    /// Total track duration, when the container reports a frame count.
    pub fn duration_seconds(&self) -> Option<f64> {
        let n_frames = self.track.codec_params.n_frames?;
        let start = self.track.codec_params.start_ts;
        Some(self.ts_to_seconds(start + n_frames) - self.ts_to_seconds(start))
    }

    /// Convert a timestamp in the track's time base to seconds.
    ///
    /// Falls back to treating `ts` as a frame index when the container has no time base.
    pub fn ts_to_seconds(&self, ts: u64) -> f64 {
        match self.track.codec_params.time_base {
            Some(tb) => {
                let t = tb.calc_time(ts);
                t.seconds as f64 + t.frac
            }
            None => {
                let rate = self.track.codec_params.sample_rate.unwrap_or(TARGET_SAMPLE_RATE);
                ts as f64 / rate as f64
            }
        }
    }

    /// Decode `[start_seconds, end_seconds)` into mono 16 kHz samples.
    ///
    /// `end_seconds = None` decodes to the end of the track. Decoding stops as soon as the
    /// range is filled, so later chapters of a long file are not decoded for early ones.
    pub fn decode_range(mut self, start_seconds: f64, end_seconds: Option<f64>) -> Result<Vec<f32>> {
        let rate = TARGET_SAMPLE_RATE as f64;
        let mut decoder = make_decoder(&self.path, &self.track)?;

        // Position (in seconds) of the next sample the pipeline emits.
        let mut cursor = 0.0;
        if start_seconds > 0.0 {
            cursor = self.seek(start_seconds);
            decoder.reset();
        }

        let first = ((start_seconds - cursor) * rate).round().max(0.0) as usize;
        let last = end_seconds.map(|end| ((end - cursor) * rate).round().max(0.0) as usize);

        let mut out = Vec::new();
        let mut seen = 0usize;
        let mut collect = |chunk: &[f32]| -> anyhow::Result<bool> {
            let chunk_start = seen;
            seen += chunk.len();

            let lo = first.saturating_sub(chunk_start).min(chunk.len());
            let hi = match last {
                Some(last) => last.saturating_sub(chunk_start).min(chunk.len()),
                None => chunk.len(),
            };
            if lo < hi {
                out.extend_from_slice(&chunk[lo..hi]);
            }

            Ok(last.is_none_or(|last| seen < last))
        };

        let mut pipeline = AudioPipeline::new();
        let track_id = self.track.id;
        let mut filled = false;

        while !filled {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(_)) => break,
                Err(e) => return Err(Error::media_read(&self.path, format!("failed reading packet: {e}"))),
            };

            if packet.track_id() != track_id {
                continue;
            }

            let keep_going = match decoder.decode(&packet) {
                Ok(buf) => pipeline
                    .push(&buf, &mut collect)
                    .context("audio pipeline failed while processing decoded samples")?,
                Err(SymphoniaError::DecodeError(_)) => true,
                Err(SymphoniaError::IoError(_)) => break,
                Err(e) => return Err(Error::media_read(&self.path, format!("decoder failure: {e}"))),
            };

            filled = !keep_going;
        }

        if !filled {
            pipeline
                .finalize(&mut collect)
                .context("audio pipeline failed during finalize")?;
        }

        Ok(out)
    }

    /// Seek close to `seconds` and return where decoding will actually resume.
    ///
    /// Formats that can't seek decode from the beginning instead.
    fn seek(&mut self, seconds: f64) -> f64 {
        let to = SeekTo::Time {
            time: Time::new(seconds.trunc() as u64, seconds.fract()),
            track_id: Some(self.track.id),
        };

        match self.format.seek(SeekMode::Accurate, to) {
            Ok(seeked) => self.ts_to_seconds(seeked.actual_ts),
            Err(err) => {
                debug!(path = %self.path.display(), error = %err, "seek failed; decoding from start");
                0.0
            }
        }
    }
}

/// An unsupported codec only shows up here, after probing succeeded; it is still a
/// [`Error::MediaRead`] for this file.
fn make_decoder(path: &Path, track: &Track) -> Result<Box<dyn Decoder>> {
    symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| Error::media_read(path, format!("failed to create decoder for audio track: {e}")))
}
