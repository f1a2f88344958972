//! Whisper-compatible log-mel spectrograms.
//!
//! Pipeline for one 30 s window:
//! 1. Pad (with silence) or truncate the samples to exactly 30 s
//! 2. Center-pad with reflection
//! 3. STFT power spectrum (periodic Hann window, 400-point FFT, hop 160)
//! 4. Slaney mel filterbank
//! 5. `log10`, clamp to `max - 8`, then scale with `(x + 4) / 4`
//!
//! The last STFT frame is dropped, giving exactly [`N_FRAMES`] frames.

use std::sync::{Arc, Mutex, OnceLock};

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};

use crate::audio_pipeline::TARGET_SAMPLE_RATE;

const SAMPLE_RATE: usize = TARGET_SAMPLE_RATE as usize;
const N_FFT: usize = 400;
const HOP: usize = 160;
const N_FREQ: usize = N_FFT / 2 + 1;

/// Seconds of audio in one model input.
pub const CHUNK_SECONDS: usize = 30;

/// Samples in one model input.
pub const N_SAMPLES: usize = CHUNK_SECONDS * SAMPLE_RATE;

/// Frames in one model input (10 ms per frame).
pub const N_FRAMES: usize = N_SAMPLES / HOP;

/// A `(n_mels, N_FRAMES)` log-mel spectrogram, row-major by mel bin.
#[derive(Debug, Clone, PartialEq)]
pub struct MelSpectrogram {
    n_mels: usize,
    data: Vec<f32>,
}

impl MelSpectrogram {
    pub fn n_mels(&self) -> usize {
        self.n_mels
    }

    pub fn n_frames(&self) -> usize {
        N_FRAMES
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }
}

struct Plan {
    hann: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
}

fn plan() -> &'static Plan {
    static PLAN: OnceLock<Plan> = OnceLock::new();
    PLAN.get_or_init(|| Plan {
        hann: hann_window(N_FFT),
        fft: FftPlanner::<f64>::new().plan_fft_forward(N_FFT),
    })
}

/// Filterbanks are per mel count (80 for most Whisper sizes, 128 for large-v3).
fn mel_filters(n_mels: usize) -> Arc<Vec<Vec<f64>>> {
    static FILTERS: OnceLock<Mutex<Vec<(usize, Arc<Vec<Vec<f64>>>)>>> = OnceLock::new();
    let cache = FILTERS.get_or_init(|| Mutex::new(Vec::new()));

    // A poisoned lock only means another thread panicked mid-insert; the data is still usable.
    let mut cache = cache.lock().unwrap_or_else(|e| e.into_inner());
    if let Some((_, f)) = cache.iter().find(|(n, _)| *n == n_mels) {
        return Arc::clone(f);
    }

    let filters = Arc::new(mel_filter_bank_slaney(
        N_FREQ,
        n_mels,
        SAMPLE_RATE,
        0.0,
        SAMPLE_RATE as f64 / 2.0,
    ));
    cache.push((n_mels, Arc::clone(&filters)));
    filters
}

/// Compute the log-mel spectrogram of one window of mono 16 kHz audio.
///
/// Shorter input is padded with silence; longer input is truncated.
pub fn log_mel_spectrogram(samples: &[f32], n_mels: usize) -> MelSpectrogram {
    let audio = pad_or_trim(samples, N_SAMPLES);
    let padded = reflect_pad(&audio, N_FFT / 2);

    let plan = plan();
    let filters = mel_filters(n_mels);

    let mut log_mel = vec![0.0f32; n_mels * N_FRAMES];
    let mut frame: Vec<Complex<f64>> = vec![Complex { re: 0.0, im: 0.0 }; N_FFT];
    let mut power = [0.0f64; N_FREQ];

    for frame_idx in 0..N_FRAMES {
        let start = frame_idx * HOP;
        let window = &padded[start..start + N_FFT];

        for (out, (sample, w)) in frame.iter_mut().zip(window.iter().zip(plan.hann.iter())) {
            out.re = f64::from(*sample) * w;
            out.im = 0.0;
        }

        plan.fft.process(&mut frame);

        for (p, c) in power.iter_mut().zip(frame.iter()) {
            *p = c.re * c.re + c.im * c.im;
        }

        for m in 0..n_mels {
            let energy: f64 = (0..N_FREQ).map(|k| filters[k][m] * power[k]).sum();
            log_mel[m * N_FRAMES + frame_idx] = energy.max(1e-10).log10() as f32;
        }
    }

    let max_val = log_mel.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let floor = max_val - 8.0;
    for v in log_mel.iter_mut() {
        *v = (v.max(floor) + 4.0) / 4.0;
    }

    MelSpectrogram {
        n_mels,
        data: log_mel,
    }
}

fn pad_or_trim(samples: &[f32], len: usize) -> Vec<f32> {
    let mut out = samples[..samples.len().min(len)].to_vec();
    out.resize(len, 0.0);
    out
}

fn reflect_pad(x: &[f32], pad: usize) -> Vec<f32> {
    if x.len() <= pad {
        let mut out = vec![0.0; pad];
        out.extend_from_slice(x);
        out.resize(x.len() + 2 * pad, 0.0);
        return out;
    }

    let mut out = Vec::with_capacity(x.len() + 2 * pad);
    out.extend((1..=pad).rev().map(|i| x[i]));
    out.extend_from_slice(x);
    out.extend((0..pad).map(|i| x[x.len() - 2 - i]));
    out
}

/// Periodic Hann window (matches `torch.hann_window(n)`).
fn hann_window(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * ((2.0 * std::f64::consts::PI * i as f64) / n as f64).cos())
        .collect()
}

fn hertz_to_mel_slaney(freq: f64) -> f64 {
    const MIN_LOG_HERTZ: f64 = 1000.0;
    const MIN_LOG_MEL: f64 = 15.0;
    if freq < MIN_LOG_HERTZ {
        return 3.0 * freq / 200.0;
    }
    let logstep = 27.0 / 6.4_f64.ln();
    MIN_LOG_MEL + (freq / MIN_LOG_HERTZ).ln() * logstep
}

fn mel_to_hertz_slaney(mels: f64) -> f64 {
    const MIN_LOG_HERTZ: f64 = 1000.0;
    const MIN_LOG_MEL: f64 = 15.0;
    if mels < MIN_LOG_MEL {
        return 200.0 * mels / 3.0;
    }
    let logstep = 6.4_f64.ln() / 27.0;
    MIN_LOG_HERTZ * (logstep * (mels - MIN_LOG_MEL)).exp()
}

/// Slaney-normalized triangular filters, indexed `[freq_bin][mel]`.
fn mel_filter_bank_slaney(
    n_freq: usize,
    n_mels: usize,
    sample_rate: usize,
    min_hz: f64,
    max_hz: f64,
) -> Vec<Vec<f64>> {
    let mel_min = hertz_to_mel_slaney(min_hz);
    let mel_max = hertz_to_mel_slaney(max_hz);

    let filter_freqs: Vec<f64> = (0..n_mels + 2)
        .map(|i| {
            let t = i as f64 / (n_mels + 1) as f64;
            mel_to_hertz_slaney(mel_min + t * (mel_max - mel_min))
        })
        .collect();

    let nyquist = sample_rate as f64 / 2.0;
    let fft_freqs: Vec<f64> = (0..n_freq)
        .map(|i| i as f64 * nyquist / (n_freq - 1).max(1) as f64)
        .collect();

    let mut filters = vec![vec![0.0f64; n_mels]; n_freq];
    for (f, row) in filters.iter_mut().enumerate() {
        let ff = fft_freqs[f];
        for (m, weight) in row.iter_mut().enumerate() {
            let (left, center, right) = (filter_freqs[m], filter_freqs[m + 1], filter_freqs[m + 2]);
            let down = (ff - left) / (center - left);
            let up = (right - ff) / (right - center);
            let enorm = 2.0 / (right - left);
            *weight = down.min(up).max(0.0) * enorm;
        }
    }

    filters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_has_model_frame_count_for_any_length() {
        for len in [0usize, 1_000, N_SAMPLES, N_SAMPLES + 5_000] {
            let mel = log_mel_spectrogram(&vec![0.0; len], 80);
            assert_eq!(mel.n_mels(), 80);
            assert_eq!(mel.data().len(), 80 * N_FRAMES);
        }
        assert_eq!(N_FRAMES, 3000);
    }

    #[test]
    fn silence_is_flat() {
        let mel = log_mel_spectrogram(&[], 80);
        let first = mel.data()[0];
        assert!(mel.data().iter().all(|v| (v - first).abs() < 1e-6));
    }

    #[test]
    fn tone_energy_lands_in_low_mel_bins() {
        // A 440 Hz tone should light up low bins far more than the top bin.
        let tone: Vec<f32> = (0..SAMPLE_RATE)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / SAMPLE_RATE as f32).sin())
            .collect();
        let mel = log_mel_spectrogram(&tone, 80);
        let frame = 50;
        let low_peak = (0..20)
            .map(|m| mel.data()[m * N_FRAMES + frame])
            .fold(f32::NEG_INFINITY, f32::max);
        let top = mel.data()[79 * N_FRAMES + frame];
        assert!(low_peak > top + 1.0);
    }

    #[test]
    fn reflect_pad_mirrors_without_edge_repeat() {
        let padded = reflect_pad(&[1.0, 2.0, 3.0, 4.0, 5.0], 2);
        assert_eq!(padded, vec![3.0, 2.0, 1.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0]);
    }

    #[test]
    fn slaney_scale_round_trips() {
        for hz in [0.0, 440.0, 1000.0, 7999.0] {
            let back = mel_to_hertz_slaney(hertz_to_mel_slaney(hz));
            assert!((hz - back).abs() < 1e-6);
        }
    }

    #[test]
    fn hann_window_is_periodic() {
        let w = hann_window(4);
        assert!(w[0].abs() < 1e-12);
        assert!((w[2] - 1.0).abs() < 1e-12);
    }
}
