//! Audio normalization pipeline.
//!
//! Responsibilities:
//! - Convert Symphonia-decoded PCM into interleaved `f32`
//! - Downmix to mono
//! - Resample to the model's 16 kHz input rate (when needed)
//! - Hand blocks to a callback that can ask us to stop
//!
//! `finalize()` should be called at end-of-stream to flush any remaining resampler input.

use anyhow::{Context, Result, anyhow, bail};
use rubato::{Resampler, SincFixedIn, WindowFunction};
use symphonia::core::audio::{AudioBufferRef, SampleBuffer};

/// Target mono sample rate (Hz) for everything downstream of decoding.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Source frames fed to rubato per `process()` call.
const RESAMPLER_CHUNK_FRAMES: usize = 2048;

/// Converts decoded audio into mono 16 kHz `f32` blocks.
pub struct AudioPipeline {
    // Scratch buffer used to copy decoded PCM into an interleaved `Vec<f32>`.
    sample_buf: Option<SampleBuffer<f32>>,

    // Lazily initialized; only needed when the source rate differs from the target.
    resampler: Option<SincFixedIn<f32>>,

    // Mono source samples waiting for a full rubato input block.
    pending: Vec<f32>,
}

impl Default for AudioPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioPipeline {
    pub fn new() -> Self {
        Self {
            sample_buf: None,
            resampler: None,
            pending: Vec::new(),
        }
    }

    /// Push a decoded Symphonia buffer through the pipeline.
    ///
    /// `emit` receives mono 16 kHz samples and returns `Ok(false)` to stop early.
    /// The return value mirrors that: `Ok(false)` means a callback asked us to stop.
    pub fn push(
        &mut self,
        decoded: &AudioBufferRef<'_>,
        mut emit: impl FnMut(&[f32]) -> Result<bool>,
    ) -> Result<bool> {
        let (interleaved, src_rate, channels) = self.to_interleaved(decoded)?;
        let mono = downmix_to_mono(&interleaved, channels);

        if src_rate == TARGET_SAMPLE_RATE {
            return emit(&mono);
        }

        self.ensure_resampler(src_rate)?;
        self.pending.extend_from_slice(&mono);

        let in_max = self.input_block_len()?;
        while self.pending.len() >= in_max {
            let block: Vec<f32> = self.pending.drain(..in_max).collect();
            let out = self.resample_block(block)?;
            if !emit(&out)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Flush buffered resampler input at end-of-stream (zero-padded to a full block).
    ///
    /// No-op if resampling was never needed.
    pub fn finalize(&mut self, mut emit: impl FnMut(&[f32]) -> Result<bool>) -> Result<()> {
        if self.resampler.is_none() || self.pending.is_empty() {
            return Ok(());
        }

        let in_max = self.input_block_len()?;
        let mut block = std::mem::take(&mut self.pending);
        block.resize(in_max, 0.0);

        let out = self.resample_block(block)?;
        emit(&out)?;
        Ok(())
    }

    fn to_interleaved(&mut self, decoded: &AudioBufferRef<'_>) -> Result<(Vec<f32>, u32, usize)> {
        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if channels == 0 {
            bail!("decoded audio had zero channels");
        }

        // Packets can grow (e.g. variable frame sizes), so re-allocate when capacity is short.
        let needs_alloc = self
            .sample_buf
            .as_ref()
            .is_none_or(|buf| buf.capacity() < decoded.capacity() * channels);
        if needs_alloc {
            self.sample_buf = Some(SampleBuffer::<f32>::new(decoded.capacity() as u64, spec));
        }

        let buf = self
            .sample_buf
            .as_mut()
            .ok_or_else(|| anyhow!("sample buffer not initialized"))?;
        buf.copy_interleaved_ref(decoded.clone());

        Ok((buf.samples().to_vec(), spec.rate, channels))
    }

    fn ensure_resampler(&mut self, src_rate: u32) -> Result<()> {
        if self.resampler.is_some() {
            return Ok(());
        }

        let rs = SincFixedIn::<f32>::new(
            TARGET_SAMPLE_RATE as f64 / src_rate as f64,
            2.0,
            rubato::SincInterpolationParameters {
                sinc_len: 256,
                f_cutoff: 0.95,
                interpolation: rubato::SincInterpolationType::Linear,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
            RESAMPLER_CHUNK_FRAMES,
            1, // mono
        )
        .map_err(|e| anyhow!(e))
        .context("failed to init resampler")?;

        self.resampler = Some(rs);
        Ok(())
    }

    fn input_block_len(&self) -> Result<usize> {
        self.resampler
            .as_ref()
            .map(|rs| rs.input_frames_max())
            .ok_or_else(|| anyhow!("resampler not initialized"))
    }

    fn resample_block(&mut self, block: Vec<f32>) -> Result<Vec<f32>> {
        let rs = self
            .resampler
            .as_mut()
            .ok_or_else(|| anyhow!("resampler not initialized"))?;

        let mut out = rs
            .process(&[block], None)
            .map_err(|e| anyhow!(e))
            .context("resampler process failed")?;

        if out.len() != 1 {
            bail!("expected mono output from resampler");
        }
        Ok(out.swap_remove(0))
    }
}

/// Downmix interleaved samples into mono by averaging channels.
fn downmix_to_mono(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }

    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}
