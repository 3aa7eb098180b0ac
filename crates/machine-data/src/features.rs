//! Log-mel feature extraction.
//!
//! The extractor is a black box to the trainer: it maps a mono waveform to
//! a sequence of fixed-size vectors. [`LogMelExtractor`] computes a
//! centered, Hann-windowed STFT, projects the power spectrum onto a mel
//! filterbank, converts to decibels and stacks `frames` consecutive mel
//! frames into one vector.
//!
//! ```text
//! waveform ─▶ STFT(n_fft, hop) ─▶ |X|^power ─▶ mel(n_mels, fmin..fmax)
//!          ─▶ 20/power · log10(· + eps) ─▶ stack `frames` ─▶ (T, n_mels·frames)
//! ```

use std::sync::Arc;

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};

use crate::types::DataError;

/// Feature extraction parameters, deserialized from the `[feature]` config table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Target sample rate in Hz; audio is resampled to it on load.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    /// STFT window size in samples.
    #[serde(default = "default_n_fft")]
    pub n_fft: usize,
    /// STFT hop size in samples.
    #[serde(default = "default_hop_length")]
    pub hop_length: usize,
    /// Number of mel bins.
    #[serde(default = "default_n_mels")]
    pub n_mels: usize,
    /// Lowest filterbank frequency in Hz.
    #[serde(default)]
    pub fmin: f32,
    /// Highest filterbank frequency in Hz. `None` means Nyquist.
    #[serde(default)]
    pub fmax: Option<f32>,
    /// Consecutive mel frames concatenated into one feature vector.
    #[serde(default = "default_frames")]
    pub frames: usize,
    /// Spectrum exponent (1.0 = magnitude, 2.0 = power).
    #[serde(default = "default_power")]
    pub power: f32,
}

fn default_sample_rate() -> u32 {
    16_000
}
fn default_n_fft() -> usize {
    1024
}
fn default_hop_length() -> usize {
    512
}
fn default_n_mels() -> usize {
    128
}
fn default_frames() -> usize {
    5
}
fn default_power() -> f32 {
    2.0
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            n_fft: default_n_fft(),
            hop_length: default_hop_length(),
            n_mels: default_n_mels(),
            fmin: 0.0,
            fmax: None,
            frames: default_frames(),
            power: default_power(),
        }
    }
}

impl FeatureConfig {
    /// Dimension of one stacked feature vector.
    pub fn feature_dim(&self) -> usize {
        self.n_mels * self.frames
    }

    /// Upper filterbank edge, resolving `None` to Nyquist.
    pub fn effective_fmax(&self) -> f32 {
        self.fmax.unwrap_or(self.sample_rate as f32 / 2.0)
    }

    /// Check the parameters describe a usable extractor.
    pub fn validate(&self) -> Result<(), DataError> {
        let bad = |msg: String| Err(DataError::InvalidConfig(msg));
        if self.sample_rate == 0 {
            return bad("sample_rate must be > 0".into());
        }
        if self.n_fft < 2 || self.hop_length == 0 {
            return bad(format!(
                "n_fft must be >= 2 and hop_length > 0 (got {} / {})",
                self.n_fft, self.hop_length
            ));
        }
        if self.n_mels == 0 || self.frames == 0 {
            return bad("n_mels and frames must be > 0".into());
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        let fmax = self.effective_fmax();
        if self.fmin < 0.0 || fmax > nyquist || self.fmin >= fmax {
            return bad(format!(
                "need 0 <= fmin < fmax <= {nyquist} Hz (got fmin={}, fmax={fmax})",
                self.fmin
            ));
        }
        if self.power <= 0.0 {
            return bad(format!("power must be > 0 (got {})", self.power));
        }
        Ok(())
    }
}

/// Maps a waveform to a sequence of fixed-size feature vectors.
pub trait FeatureExtractor {
    /// Length of every vector returned by [`extract`](Self::extract).
    fn dim(&self) -> usize;

    /// Sample rate the waveform must be in.
    fn sample_rate(&self) -> u32;

    /// Feature vectors for one clip, in time order. Clips too short to fill
    /// a single vector yield an empty sequence.
    fn extract(&self, waveform: &[f32]) -> Vec<Vec<f32>>;
}

/// Log-mel spectrogram extractor with frame stacking.
pub struct LogMelExtractor {
    config: FeatureConfig,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    /// `n_mels` rows of `n_fft / 2 + 1` triangular weights.
    filterbank: Vec<Vec<f32>>,
}

impl std::fmt::Debug for LogMelExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogMelExtractor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl LogMelExtractor {
    pub fn new(config: FeatureConfig) -> Result<Self, DataError> {
        config.validate()?;
        let n_fft = config.n_fft;
        let fft = FftPlanner::<f32>::new().plan_fft_forward(n_fft);
        // Periodic Hann window.
        let window = (0..n_fft)
            .map(|i| {
                0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / n_fft as f32).cos()
            })
            .collect();
        let filterbank = mel_filterbank(
            config.sample_rate,
            n_fft,
            config.n_mels,
            config.fmin,
            config.effective_fmax(),
        );
        Ok(Self {
            config,
            fft,
            window,
            filterbank,
        })
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Log-mel frames of shape `(n_frames, n_mels)` before stacking.
    pub fn log_mel_frames(&self, waveform: &[f32]) -> Vec<Vec<f32>> {
        let n_fft = self.config.n_fft;
        let hop = self.config.hop_length;
        let padded = center_pad(waveform, n_fft / 2);
        if padded.len() < n_fft {
            return Vec::new();
        }
        let n_frames = 1 + (padded.len() - n_fft) / hop;
        let n_bins = n_fft / 2 + 1;
        let power = self.config.power;
        let db_scale = 20.0 / power;

        let mut buffer = vec![Complex::new(0.0_f32, 0.0); n_fft];
        let mut spectrum = vec![0.0_f32; n_bins];
        let mut frames = Vec::with_capacity(n_frames);

        for t in 0..n_frames {
            let start = t * hop;
            for (i, slot) in buffer.iter_mut().enumerate() {
                *slot = Complex::new(padded[start + i] * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);
            for (bin, value) in spectrum.iter_mut().enumerate() {
                let mag = buffer[bin].norm();
                *value = if power == 2.0 { mag * mag } else { mag.powf(power) };
            }
            let frame = self
                .filterbank
                .iter()
                .map(|weights| {
                    let energy: f32 = weights.iter().zip(&spectrum).map(|(w, s)| w * s).sum();
                    db_scale * (energy + f32::EPSILON).log10()
                })
                .collect();
            frames.push(frame);
        }
        frames
    }
}

impl FeatureExtractor for LogMelExtractor {
    fn dim(&self) -> usize {
        self.config.feature_dim()
    }

    fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    fn extract(&self, waveform: &[f32]) -> Vec<Vec<f32>> {
        stack_frames(&self.log_mel_frames(waveform), self.config.frames)
    }
}

/// Concatenate every window of `frames` consecutive rows.
pub fn stack_frames(mel: &[Vec<f32>], frames: usize) -> Vec<Vec<f32>> {
    if frames == 0 || mel.len() < frames {
        return Vec::new();
    }
    mel.windows(frames).map(|w| w.concat()).collect()
}

/// Reflect-pad `pad` samples on both ends. Signals too short to reflect are
/// zero-padded instead.
fn center_pad(signal: &[f32], pad: usize) -> Vec<f32> {
    let n = signal.len();
    let mut out = Vec::with_capacity(n + 2 * pad);
    if n > pad {
        out.extend((1..=pad).rev().map(|i| signal[i]));
        out.extend_from_slice(signal);
        out.extend((1..=pad).map(|i| signal[n - 1 - i]));
    } else {
        out.resize(pad, 0.0);
        out.extend_from_slice(signal);
        out.resize(n + 2 * pad, 0.0);
    }
    out
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular HTK-scale mel filterbank, `n_mels × (n_fft / 2 + 1)`.
pub fn mel_filterbank(
    sample_rate: u32,
    n_fft: usize,
    n_mels: usize,
    fmin: f32,
    fmax: f32,
) -> Vec<Vec<f32>> {
    let n_bins = n_fft / 2 + 1;
    let bin_hz: Vec<f32> = (0..n_bins)
        .map(|k| k as f32 * sample_rate as f32 / n_fft as f32)
        .collect();

    let mel_min = hz_to_mel(fmin);
    let mel_max = hz_to_mel(fmax);
    let edges: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            bin_hz
                .iter()
                .map(|&f| {
                    let rising = (f - lo) / (center - lo).max(f32::EPSILON);
                    let falling = (hi - f) / (hi - center).max(f32::EPSILON);
                    rising.min(falling).max(0.0)
                })
                .collect()
        })
        .collect()
}
