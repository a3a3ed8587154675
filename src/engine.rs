use std::time::Instant;

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::error::SvsError;
use crate::labels::LabelSequence;
use crate::model::{
    AcousticPostprocess, ModelBundle, ModelConfig, PostFilterKind, SampleType, VocoderKind,
    WaveformPostprocess,
};
use crate::segment::{segment_labels, SegmentationParams};
use crate::WaveformBuffer;

/// Parameters for one synthesis call.
///
/// Vocoder and post-filter kinds are kept as given and checked by
/// [`SynthesisParams::kinds`] before any model call runs.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(default, setter(into))]
#[serde(default)]
pub struct SynthesisParams {
    /// One of `world`, `pwg`, `usfgan` or `auto`.
    pub vocoder: String,
    /// One of `merlin`, `nnsvs`, `gv` or `none`.
    pub post_filter: String,
    pub trajectory_smoothing: bool,
    /// Smoothing cutoff (Hz) for streams other than F0.
    pub trajectory_smoothing_cutoff: f32,
    /// Smoothing cutoff (Hz) for F0.
    pub trajectory_smoothing_cutoff_f0: f32,
    pub vuv_threshold: f32,
    /// Key shift in semitones the model infers in; the output keeps the
    /// original key.
    pub style_shift: i32,
    pub force_fix_vuv: bool,
    pub fill_silence_to_rest: bool,
    pub sample_type: SampleType,
    pub peak_norm: bool,
    pub loudness_norm: bool,
    /// Target loudness in dB.
    pub target_loudness: f32,
    pub segmented_synthesis: bool,
    /// Overrides the model's segmentation constants.
    #[builder(setter(into, strip_option))]
    pub segmentation: Option<SegmentationParams>,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            vocoder: "auto".to_string(),
            post_filter: "gv".to_string(),
            trajectory_smoothing: true,
            trajectory_smoothing_cutoff: 50.0,
            trajectory_smoothing_cutoff_f0: 20.0,
            vuv_threshold: 0.5,
            style_shift: 0,
            force_fix_vuv: true,
            fill_silence_to_rest: false,
            sample_type: SampleType::Float32,
            peak_norm: false,
            loudness_norm: false,
            target_loudness: -20.0,
            segmented_synthesis: true,
            segmentation: None,
        }
    }
}

impl SynthesisParams {
    /// Parse the vocoder and post-filter kinds.
    pub fn kinds(&self) -> Result<(VocoderKind, PostFilterKind), SvsError> {
        Ok((self.vocoder.parse()?, self.post_filter.parse()?))
    }

    /// Segmentation constants to use with `config`, or `None` when
    /// segmentation is off.
    pub fn segmentation_for(&self, config: &ModelConfig) -> Option<SegmentationParams> {
        if !self.segmented_synthesis {
            return None;
        }
        Some(
            self.segmentation
                .or(config.segmentation)
                .unwrap_or_default(),
        )
    }
}

/// Drives a [`ModelBundle`] through timing prediction, per-segment acoustic
/// prediction and vocoding.
pub struct SynthesisEngine<'a> {
    bundle: &'a mut dyn ModelBundle,
}

impl<'a> SynthesisEngine<'a> {
    pub fn new(bundle: &'a mut dyn ModelBundle) -> Self {
        Self { bundle }
    }

    pub fn config(&self) -> &ModelConfig {
        self.bundle.config()
    }

    /// Predict timing for a score. The result is on the model's frame grid.
    pub fn predict_timing(&mut self, labels: &LabelSequence) -> Result<LabelSequence, SvsError> {
        let mut timing = self.bundle.predict_timing(labels)?;
        timing.frame_shift = self.bundle.config().frame_shift();
        Ok(timing)
    }

    /// Synthesize a waveform from timing-resolved labels.
    pub fn synthesize(
        &mut self,
        labels: &LabelSequence,
        params: &SynthesisParams,
    ) -> Result<WaveformBuffer, SvsError> {
        let start = Instant::now();
        let (vocoder, post_filter) = params.kinds()?;
        let config = self.bundle.config();
        let frame_shift = config.frame_shift();
        let sample_rate = config.sample_rate;

        let segments: Vec<LabelSequence> = match params.segmentation_for(config) {
            Some(segmentation) => {
                let segments = segment_labels(labels, &segmentation);
                if segments.len() > 1 {
                    log::warn!(
                        "Segmented synthesis may leave audible joins at {} boundaries",
                        segments.len() - 1
                    );
                }
                segments.into_iter().map(|s| s.labels).collect()
            }
            None => vec![labels.clone()],
        };
        log::info!("Number of segments: {}", segments.len());

        let f0_shift_in_cent = params.style_shift as f32 * 100.0;
        let acoustic_options = AcousticPostprocess {
            post_filter,
            trajectory_smoothing: params.trajectory_smoothing,
            trajectory_smoothing_cutoff: params.trajectory_smoothing_cutoff,
            trajectory_smoothing_cutoff_f0: params.trajectory_smoothing_cutoff_f0,
            vuv_threshold: params.vuv_threshold,
            force_fix_vuv: params.force_fix_vuv,
            fill_silence_to_rest: params.fill_silence_to_rest,
            f0_shift_in_cent: -f0_shift_in_cent,
        };

        let total = segments.len();
        let mut samples = Vec::new();
        for (i, mut segment) in segments.into_iter().enumerate() {
            segment.frame_shift = frame_shift;
            log::debug!(
                "[segment {}/{}] {:.3}s, {} units",
                i + 1,
                total,
                segment.duration_secs(),
                segment.len()
            );
            let features = self.bundle.predict_acoustic(&segment, f0_shift_in_cent)?;
            let streams = self
                .bundle
                .postprocess_acoustic(features, &segment, &acoustic_options)?;
            let wav = self
                .bundle
                .predict_waveform(&streams, vocoder, params.vuv_threshold)?;
            samples.extend(wav);
        }

        let samples = self.bundle.postprocess_waveform(
            samples,
            &WaveformPostprocess {
                sample_type: params.sample_type,
                peak_norm: params.peak_norm,
                loudness_norm: params.loudness_norm,
                target_loudness: params.target_loudness,
            },
        )?;
        let buffer = WaveformBuffer {
            samples,
            sample_rate,
        };

        let elapsed = start.elapsed().as_secs_f64();
        log::info!("Total time: {:.3} sec", elapsed);
        if buffer.duration_secs() > 0.0 {
            log::info!(
                "Total real-time factor: {:.3}",
                elapsed / buffer.duration_secs()
            );
        }
        Ok(buffer)
    }
}
