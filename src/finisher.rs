//! Final waveform handling: dtype conversion, normalization and bit-depth
//! classification.
//!
//! Vocoders trained on integer PCM can emit samples still scaled to the
//! training data's integer range. The peak magnitude tells which range a
//! buffer is in:
//!
//! | peak `m`          | treated as             | rescale              |
//! |-------------------|------------------------|----------------------|
//! | `m > 8_388_608`   | 32-bit integer-scaled  | `/ 2_147_483_647`    |
//! | `m > 8`           | 16-bit integer-scaled  | `/ 32_767`           |
//! | otherwise         | float-scaled           | unchanged            |

use crate::model::{SampleType, WaveformPostprocess};
use crate::WaveformBuffer;

/// Peak above which samples are taken to be 32-bit integer-scaled (2^23).
pub const INT32_PEAK_THRESHOLD: f32 = 8_388_608.0;

/// Peak above which samples are taken to be 16-bit integer-scaled.
pub const INT16_PEAK_THRESHOLD: f32 = 8.0;

const INT32_FULL_SCALE: f64 = 2_147_483_647.0;
const INT16_FULL_SCALE: f32 = 32_767.0;

/// Range a waveform's samples are scaled to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitDepth {
    Int32,
    Int16,
    Float,
}

/// Largest absolute sample value, ignoring NaNs.
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .filter(|s| !s.is_nan())
        .fold(0.0f32, |m, s| m.max(s.abs()))
}

pub fn classify_bit_depth(samples: &[f32]) -> BitDepth {
    let m = peak(samples);
    if m > INT32_PEAK_THRESHOLD {
        BitDepth::Int32
    } else if m > INT16_PEAK_THRESHOLD {
        BitDepth::Int16
    } else {
        BitDepth::Float
    }
}

/// Bring an integer-scaled buffer back to float scale.
pub fn adjust_gain_for_float32(buffer: WaveformBuffer) -> WaveformBuffer {
    let depth = classify_bit_depth(&buffer.samples);
    log::debug!("Waveform classified as {:?}", depth);
    let samples = match depth {
        BitDepth::Int32 => buffer
            .samples
            .into_iter()
            .map(|s| (s as f64 / INT32_FULL_SCALE) as f32)
            .collect(),
        BitDepth::Int16 => buffer
            .samples
            .into_iter()
            .map(|s| s / INT16_FULL_SCALE)
            .collect(),
        BitDepth::Float => buffer.samples,
    };
    WaveformBuffer {
        samples,
        sample_rate: buffer.sample_rate,
    }
}

/// Loudness of a float-scaled waveform in dB relative to full scale (RMS).
pub fn loudness_db(samples: &[f32]) -> Option<f32> {
    if samples.is_empty() {
        return None;
    }
    let mean_square =
        samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / samples.len() as f64;
    if mean_square <= 0.0 {
        return None;
    }
    Some((10.0 * mean_square.log10()) as f32)
}

/// Default waveform post-processing for model bundles.
///
/// Normalization runs on float-scale samples. Samples only get clipped to
/// full scale when converted to `Int16`. Integer-scaled buffers are passed
/// through untouched so [`adjust_gain_for_float32`] can still recognize them.
pub fn postprocess_waveform(
    mut samples: Vec<f32>,
    sample_rate: u32,
    options: &WaveformPostprocess,
) -> Vec<f32> {
    let depth = classify_bit_depth(&samples);
    if depth != BitDepth::Float {
        log::debug!("Passing through {:?}-scaled waveform", depth);
        return samples;
    }

    if options.peak_norm {
        let m = peak(&samples);
        if m > 0.0 {
            samples.iter_mut().for_each(|s| *s /= m);
        }
    }

    if options.loudness_norm {
        match loudness_db(&samples) {
            Some(current) => {
                let gain = 10f32.powf((options.target_loudness - current) / 20.0);
                log::debug!(
                    "Loudness {:.2} dB -> {:.2} dB at {} Hz",
                    current,
                    options.target_loudness,
                    sample_rate
                );
                samples.iter_mut().for_each(|s| *s *= gain);
            }
            None => log::warn!("Skipping loudness normalization of a silent waveform"),
        }
    }

    match options.sample_type {
        SampleType::Int16 => {
            if peak(&samples) > 1.0 {
                log::warn!("Waveform exceeds full scale and will be clipped");
            }
            samples
                .into_iter()
                .map(|s| (s.clamp(-1.0, 1.0) * INT16_FULL_SCALE).round())
                .collect()
        }
        SampleType::Float32 => {
            if peak(&samples) > 1.0 {
                log::warn!("Waveform exceeds full scale");
            }
            samples
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(samples: Vec<f32>) -> WaveformBuffer {
        WaveformBuffer {
            samples,
            sample_rate: 48000,
        }
    }

    fn options() -> WaveformPostprocess {
        WaveformPostprocess {
            sample_type: SampleType::Float32,
            peak_norm: false,
            loudness_norm: false,
            target_loudness: -20.0,
        }
    }

    #[test]
    fn large_peaks_are_treated_as_int32() {
        let samples = vec![20_000_000.0, -1_000.0, 0.0];
        assert_eq!(classify_bit_depth(&samples), BitDepth::Int32);
        let out = adjust_gain_for_float32(buffer(samples));
        assert!((out.samples[0] - 20_000_000.0 / 2_147_483_647.0).abs() < 1e-7);
        assert!((out.samples[1] + 1_000.0 / 2_147_483_647.0).abs() < 1e-9);
    }

    #[test]
    fn moderate_peaks_are_treated_as_int16() {
        let samples = vec![1_000.0, -500.0];
        assert_eq!(classify_bit_depth(&samples), BitDepth::Int16);
        let out = adjust_gain_for_float32(buffer(samples));
        assert!((out.samples[0] - 1_000.0 / 32_767.0).abs() < 1e-7);
        assert!((out.samples[1] + 500.0 / 32_767.0).abs() < 1e-7);
    }

    #[test]
    fn float_scale_is_left_alone() {
        let samples = vec![0.5, -0.25, f32::NAN];
        assert_eq!(classify_bit_depth(&samples), BitDepth::Float);
        let out = adjust_gain_for_float32(buffer(samples));
        assert_eq!(out.samples[..2], [0.5, -0.25]);
    }

    #[test]
    fn thresholds_are_exclusive() {
        assert_eq!(classify_bit_depth(&[8.0]), BitDepth::Float);
        assert_eq!(classify_bit_depth(&[8_388_608.0]), BitDepth::Int16);
    }

    #[test]
    fn peak_norm_scales_to_full_scale() {
        let out = postprocess_waveform(
            vec![0.25, -0.5],
            48000,
            &WaveformPostprocess {
                peak_norm: true,
                ..options()
            },
        );
        assert_eq!(out, vec![0.5, -1.0]);
    }

    #[test]
    fn loudness_norm_reaches_target() {
        let samples: Vec<f32> = (0..4800).map(|i| (i as f32 * 0.05).sin() * 0.5).collect();
        let out = postprocess_waveform(
            samples,
            48000,
            &WaveformPostprocess {
                loudness_norm: true,
                target_loudness: -20.0,
                ..options()
            },
        );
        assert!((loudness_db(&out).unwrap() + 20.0).abs() < 0.01);
    }

    #[test]
    fn int16_output_is_integer_scaled_and_clipped() {
        let out = postprocess_waveform(
            vec![0.5, 2.0],
            48000,
            &WaveformPostprocess {
                sample_type: SampleType::Int16,
                ..options()
            },
        );
        assert_eq!(out, vec![16384.0, 32767.0]);
    }

    #[test]
    fn integer_scaled_float32_output_survives_to_gain_adjustment() {
        let out = postprocess_waveform(vec![16_000.0, -8_000.0, 4_000.0], 48000, &options());
        assert_eq!(out, vec![16_000.0, -8_000.0, 4_000.0]);

        let adjusted = adjust_gain_for_float32(buffer(out));
        let expected = [16_000.0 / 32_767.0, -8_000.0 / 32_767.0, 4_000.0 / 32_767.0];
        for (got, want) in adjusted.samples.iter().zip(expected) {
            assert!((got - want).abs() < 1e-6, "{got} != {want}");
        }
    }

    #[test]
    fn float32_output_is_not_clipped() {
        let out = postprocess_waveform(vec![0.5, 1.5], 48000, &options());
        assert_eq!(out, vec![0.5, 1.5]);
    }
}
