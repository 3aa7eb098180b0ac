//! WAV loading: decode PCM, downmix to mono and resample to the target rate.

use std::path::Path;

use hound::{SampleFormat, WavReader};
use rubato::{FftFixedIn, Resampler};

use crate::types::DataError;

/// Load a WAV file as mono `f32` samples in `[-1, 1]` at `sample_rate` Hz.
///
/// Integer PCM of any bit depth and 32-bit float PCM are accepted.
/// Multi-channel audio is averaged across channels. When the file's rate
/// differs from `sample_rate` the signal is band-limited and resampled.
pub fn load_audio(path: &Path, sample_rate: u32) -> Result<Vec<f32>, DataError> {
    let wav_err = |source| DataError::Wav {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = WavReader::open(path).map_err(wav_err)?;
    let spec = reader.spec();
    let channels = spec.channels as usize;
    if channels == 0 {
        return Err(DataError::UnsupportedFormat {
            path: path.to_path_buf(),
            reason: "zero channels".to_string(),
        });
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .map_err(wav_err)?,
        SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(DataError::UnsupportedFormat {
                    path: path.to_path_buf(),
                    reason: format!("{} bits per sample", spec.bits_per_sample),
                });
            }
            let scale = (1_i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .map_err(wav_err)?
        }
    };

    let mono = downmix(&interleaved, channels);
    let out = if spec.sample_rate == sample_rate {
        mono
    } else {
        resample(&mono, spec.sample_rate, sample_rate).map_err(|reason| DataError::Resample {
            path: path.to_path_buf(),
            from_rate: spec.sample_rate,
            to_rate: sample_rate,
            reason,
        })?
    };

    tracing::trace!(
        path = %path.display(),
        source_rate = spec.sample_rate,
        channels,
        samples = out.len(),
        "Loaded audio"
    );
    Ok(out)
}

/// Average interleaved channels into one.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Input chunk length handed to the FFT resampler.
const RESAMPLE_CHUNK: usize = 1024;

/// Resample a mono clip with rubato's FFT resampler.
///
/// The resampler low-passes below the lower of the two Nyquist rates, so
/// downsampling does not fold high-frequency content into the output.
/// The output is trimmed of the resampler delay and has
/// `round(len * to_rate / from_rate)` samples.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>, String> {
    if samples.is_empty() || from_rate == to_rate {
        return Ok(samples.to_vec());
    }
    if from_rate == 0 || to_rate == 0 {
        return Err("sample rate must be positive".to_string());
    }

    let mut resampler =
        FftFixedIn::<f32>::new(from_rate as usize, to_rate as usize, RESAMPLE_CHUNK, 2, 1)
            .map_err(|e| e.to_string())?;
    let expected =
        ((samples.len() as f64) * to_rate as f64 / from_rate as f64).round() as usize;
    let delay = resampler.output_delay();
    let target = expected + delay;

    let mut out = Vec::with_capacity(target + resampler.output_frames_max());
    let mut pos = 0;
    while samples.len() - pos >= resampler.input_frames_next() {
        let n = resampler.input_frames_next();
        let frames: [&[f32]; 1] = [&samples[pos..pos + n]];
        let chunk = resampler
            .process(&frames[..], None)
            .map_err(|e| e.to_string())?;
        out.extend_from_slice(&chunk[0]);
        pos += n;
    }
    if pos < samples.len() {
        let frames: [&[f32]; 1] = [&samples[pos..]];
        let chunk = resampler
            .process_partial(Some(&frames[..]), None)
            .map_err(|e| e.to_string())?;
        out.extend_from_slice(&chunk[0]);
    }
    // Flush the delay line with silence.
    while out.len() < target {
        let chunk = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| e.to_string())?;
        if chunk[0].is_empty() {
            break;
        }
        out.extend_from_slice(&chunk[0]);
    }

    Ok(out.into_iter().skip(delay).take(expected).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::{WavSpec, WavWriter};

    fn write_i16_wav(path: &Path, rate: u32, channels: u16, samples: &[i16]) {
        let spec = WavSpec {
            channels,
            sample_rate: rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let mut writer = WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn test_load_mono_int16_normalized() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("a.wav");
        write_i16_wav(&path, 16_000, 1, &[0, 16384, -16384, i16::MIN]);

        let audio = load_audio(&path, 16_000).unwrap();
        assert_eq!(audio.len(), 4);
        assert!((audio[1] - 0.5).abs() < 1e-4);
        assert!((audio[2] + 0.5).abs() < 1e-4);
        assert!((audio[3] + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_stereo_downmix() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("stereo.wav");
        // Frames: (16384, 0), (-16384, -16384)
        write_i16_wav(&path, 16_000, 2, &[16384, 0, -16384, -16384]);

        let audio = load_audio(&path, 16_000).unwrap();
        assert_eq!(audio.len(), 2);
        assert!((audio[0] - 0.25).abs() < 1e-4);
        assert!((audio[1] + 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_load_resamples() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("32k.wav");
        write_i16_wav(&path, 32_000, 1, &vec![1000; 3200]);

        let audio = load_audio(&path, 16_000).unwrap();
        assert_eq!(audio.len(), 1600);
    }

    #[test]
    fn test_load_corrupt_file_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("bad.wav");
        std::fs::write(&path, b"definitely not RIFF").unwrap();

        let err = load_audio(&path, 16_000).unwrap_err();
        assert!(matches!(err, DataError::Wav { .. }), "got {err}");
    }

    fn sine(freq: f32, rate: u32, seconds: f32) -> Vec<f32> {
        let n = (rate as f32 * seconds) as usize;
        (0..n)
            .map(|i| 0.5 * (2.0 * std::f32::consts::PI * freq * i as f32 / rate as f32).sin())
            .collect()
    }

    fn rms(samples: &[f32]) -> f32 {
        (samples.iter().map(|s| s * s).sum::<f32>() / samples.len().max(1) as f32).sqrt()
    }

    #[test]
    fn test_downsample_removes_content_above_nyquist() {
        // 7 kHz is above the 4 kHz Nyquist of the target rate.
        let input = sine(7_000.0, 32_000, 1.0);
        let out = resample(&input, 32_000, 8_000).unwrap();
        assert_eq!(out.len(), 8_000);
        // Skip the edges where the filter ramps in and out.
        let level = rms(&out[500..7_500]);
        assert!(level < 0.02, "7 kHz leaked through as an alias, rms {level}");
    }

    #[test]
    fn test_downsample_keeps_passband_tone() {
        let input = sine(1_000.0, 32_000, 1.0);
        let out = resample(&input, 32_000, 8_000).unwrap();
        assert_eq!(out.len(), 8_000);
        let level = rms(&out[500..7_500]);
        assert!((level - rms(&input)).abs() < 0.03, "rms {level}");
    }

    #[test]
    fn test_upsample_length_and_identity() {
        let input = sine(440.0, 8_000, 0.1);
        assert_eq!(resample(&input, 8_000, 16_000).unwrap().len(), 1_600);
        assert_eq!(resample(&input, 8_000, 8_000).unwrap(), input);
        assert!(resample(&[], 8_000, 16_000).unwrap().is_empty());
        assert!(resample(&input, 0, 16_000).is_err());
    }
}
