//! Overlapping-window decoding of a whole chapter.
//!
//! A chapter is cut into windows of `window_seconds` that start every
//! `window_seconds - overlap_seconds`. Windows are decoded `batches` at a time, and every
//! consecutive pair (inside a group or across a group boundary) is stitched so that speech
//! heard by both windows is attributed to exactly one of them. Each window then becomes a
//! single [`Segment`].

use tracing::{debug, trace};

use crate::Result;
use crate::audio_pipeline::TARGET_SAMPLE_RATE;
use crate::backend::{AudioWindow, DecodeResult, Transcriber};
use crate::opts::{DecodeOpts, StitchStrategy};
use crate::segments::Segment;
use crate::stitch::{Cut, common_run_cut, trace_cut};

/// Decodes chapters with a [`Transcriber`].
pub struct WindowedDecoder<T: Transcriber> {
    transcriber: T,
    opts: DecodeOpts,
}

/// One decoded window waiting for its successor before it can be finalized.
///
/// Tokens and trace stay whole so the overlap with the next window is measured on the full
/// decode; `start` records how much of the head the previous window already claimed.
struct PendingWindow {
    offset_seconds: f64,
    /// Generated tokens only: start sequence and end token removed.
    tokens: Vec<u32>,
    trace: Vec<Vec<f32>>,
    start: usize,
}

impl<T: Transcriber> WindowedDecoder<T> {
    /// Fails with [`crate::Error::InvalidInput`] if `opts` is inconsistent.
    pub fn new(transcriber: T, opts: DecodeOpts) -> Result<Self> {
        opts.validate()?;
        Ok(Self { transcriber, opts })
    }

    pub fn opts(&self) -> &DecodeOpts {
        &self.opts
    }

    pub fn transcriber(&self) -> &T {
        &self.transcriber
    }

    /// Transcribe mono 16 kHz samples into segments ordered by start time.
    ///
    /// Segment times are relative to the first sample. Empty input yields no segments.
    pub fn decode(&mut self, samples: &[f32]) -> Result<Vec<Segment>> {
        let rate = TARGET_SAMPLE_RATE as usize;
        let duration = samples.len() as f64 / rate as f64;
        let window_len = self.opts.window_seconds as usize * rate;
        let stride = self.opts.stride_seconds() as usize * rate;

        let starts: Vec<usize> = (0..samples.len()).step_by(stride).collect();

        let mut segments = Vec::with_capacity(starts.len());
        let mut pending: Option<PendingWindow> = None;

        for (group_idx, group) in starts.chunks(self.opts.batches).enumerate() {
            let windows: Vec<AudioWindow> = group
                .iter()
                .map(|&start| AudioWindow {
                    offset_seconds: start as f64 / rate as f64,
                    samples: samples[start..(start + window_len).min(samples.len())].to_vec(),
                })
                .collect();

            debug!(
                group = group_idx,
                windows = windows.len(),
                offset = windows.first().map_or(0.0, |w| w.offset_seconds),
                "decoding window group"
            );

            let results = self.transcriber.transcribe(&windows, &self.opts)?;
            if results.len() != windows.len() {
                return Err(crate::Error::model(format!(
                    "transcriber returned {} results for {} windows",
                    results.len(),
                    windows.len()
                )));
            }

            for (window, result) in windows.iter().zip(results) {
                let mut next = self.pending_window(window.offset_seconds, result);

                if let Some(prev) = pending.take() {
                    let mut keep = prev.tokens.len();
                    let mut end = self.nominal_end(prev.offset_seconds, duration);

                    if let Some(cut) = self.find_cut(&prev, &next) {
                        trace!(
                            prev = prev.offset_seconds,
                            next = next.offset_seconds,
                            prev_end = cut.prev_end,
                            next_start = cut.next_start,
                            "stitching overlap"
                        );
                        keep = cut.prev_end.max(prev.start);
                        next.start = cut.next_start.min(next.tokens.len());

                        // Proportion of the next window's real span, which is short at the end.
                        let span = self.nominal_end(next.offset_seconds, duration)
                            - next.offset_seconds;
                        let ratio = cut.next_start as f64 / next.tokens.len().max(1) as f64;
                        let refined = next.offset_seconds + span * ratio;
                        end = refined.clamp(next.offset_seconds.min(end), end);
                    }

                    segments.push(self.render(&prev, keep, end)?);
                }

                pending = Some(next);
            }
        }

        if let Some(last) = pending {
            let end = self.nominal_end(last.offset_seconds, duration);
            segments.push(self.render(&last, last.tokens.len(), end)?);
        }

        Ok(segments)
    }

    fn pending_window(&self, offset_seconds: f64, result: DecodeResult) -> PendingWindow {
        let vocab = self.transcriber.vocabulary();
        let mut tokens = result.tokens;

        let sot_len = vocab.sot_sequence.len().min(tokens.len());
        tokens.drain(..sot_len);
        if let Some(pos) = tokens.iter().position(|&t| t == vocab.eot) {
            tokens.truncate(pos);
        }

        // A trace that doesn't line up token for token can't be used to cut.
        let trace = if result.trace.len() == tokens.len() {
            result.trace
        } else {
            if !result.trace.is_empty() {
                debug!(
                    tokens = tokens.len(),
                    trace = result.trace.len(),
                    "trace length mismatch; stitching disabled for window"
                );
            }
            Vec::new()
        };

        PendingWindow {
            offset_seconds,
            tokens,
            trace,
            start: 0,
        }
    }

    fn find_cut(&self, prev: &PendingWindow, next: &PendingWindow) -> Option<Cut> {
        let fraction = self.opts.overlap_fraction();
        match self.opts.stitch {
            StitchStrategy::LogitTrace => trace_cut(
                &prev.trace,
                &next.trace,
                fraction,
                self.opts.min_overlap_similarity,
            ),
            StitchStrategy::CommonRun => {
                let vocab = self.transcriber.vocabulary();
                common_run_cut(
                    &prev.tokens,
                    &next.tokens,
                    fraction,
                    self.opts.min_common_run,
                    |t| vocab.is_timestamp(t),
                )
            }
        }
    }

    fn nominal_end(&self, start: f64, duration: f64) -> f64 {
        (start + f64::from(self.opts.window_seconds)).min(duration).max(start)
    }

    /// Segment for `window.tokens[window.start..keep]`.
    fn render(&self, window: &PendingWindow, keep: usize, end: f64) -> Result<Segment> {
        let tokens = &window.tokens[window.start.min(keep)..keep];
        let text = render_text(&self.transcriber, tokens, window.offset_seconds)?;
        Segment::new(text, window.offset_seconds, end.max(window.offset_seconds))
    }
}

/// Text for generated tokens; timestamps render as `<|S.SS|>` in chapter time.
fn render_text<T: Transcriber>(transcriber: &T, tokens: &[u32], offset_seconds: f64) -> Result<String> {
    let vocab = transcriber.vocabulary();
    let mut out = String::new();
    let mut run: Vec<u32> = Vec::new();

    for &token in tokens {
        if vocab.is_timestamp(token) {
            if !run.is_empty() {
                out.push_str(&transcriber.detokenize(&run)?);
                run.clear();
            }
            let seconds = offset_seconds + vocab.timestamp_seconds(token);
            out.push_str(&format!("<|{seconds:.2}|>"));
        } else {
            run.push(token);
        }
    }
    if !run.is_empty() {
        out.push_str(&transcriber.detokenize(&run)?);
    }

    Ok(out)
}
