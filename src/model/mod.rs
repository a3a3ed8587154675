//! Model bundles and model-directory handling.
//!
//! A [`ModelBundle`] is the capability set of a trained singing-voice model:
//! duration/timing prediction, acoustic-feature prediction and
//! post-processing, and vocoding. The pipeline only drives these calls; how
//! a bundle computes them is up to the implementation behind the trait.
//!
//! # Model Directory Layouts
//!
//! ```text
//! voice/                      voice/                 voice/
//! └── model/                  ├── config.yaml        ├── enuconfig.yaml
//!     ├── config.yaml         ├── qst.hed            └── ...legacy files
//!     ├── qst.hed             └── *.table
//!     └── *.table
//!   packed                    generic compatible     legacy (converted)
//! ```
//!
//! See [`resolver`] for the resolution order.

pub mod convert;
pub mod resolver;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::SvsError;
use crate::finisher;
use crate::labels::{LabelSequence, TICKS_PER_SECOND};
use crate::segment::SegmentationParams;

pub use convert::{CommandConverter, LegacyConverter};
pub use resolver::{packed_model_exists, resolve, ModelLayout, ResolvedModel};

/// Model configuration file inside a packed model directory.
pub const CONFIG_FILE: &str = "config.yaml";

/// Question-set file inside a packed model directory.
pub const QUESTION_FILE: &str = "qst.hed";

/// Vocoder used to turn acoustic features into a waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VocoderKind {
    World,
    Pwg,
    Usfgan,
    /// Let the bundle pick the best vocoder it ships with.
    Auto,
}

impl FromStr for VocoderKind {
    type Err = SvsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "world" => Ok(Self::World),
            "pwg" => Ok(Self::Pwg),
            "usfgan" => Ok(Self::Usfgan),
            "auto" => Ok(Self::Auto),
            _ => Err(SvsError::Configuration(format!("Unknown vocoder type: {s}"))),
        }
    }
}

impl fmt::Display for VocoderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::World => "world",
            Self::Pwg => "pwg",
            Self::Usfgan => "usfgan",
            Self::Auto => "auto",
        })
    }
}

/// Post-filter applied to predicted acoustic features.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostFilterKind {
    Merlin,
    Nnsvs,
    Gv,
    None,
}

impl FromStr for PostFilterKind {
    type Err = SvsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "merlin" => Ok(Self::Merlin),
            "nnsvs" => Ok(Self::Nnsvs),
            "gv" => Ok(Self::Gv),
            "none" => Ok(Self::None),
            _ => Err(SvsError::Configuration(format!(
                "Unknown post-filter type: {s}"
            ))),
        }
    }
}

/// Sample type of the post-processed waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleType {
    /// Integer-scaled samples (full scale = 32767).
    Int16,
    #[default]
    Float32,
}

/// Acoustic features split into their streams, one row per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct MultistreamFeatures {
    /// Mel-generalized cepstrum.
    pub mgc: Array2<f32>,
    /// Log F0.
    pub lf0: Array2<f32>,
    /// Voiced/unvoiced flags.
    pub vuv: Array2<f32>,
    /// Band aperiodicity.
    pub bap: Array2<f32>,
}

impl MultistreamFeatures {
    pub fn num_frames(&self) -> usize {
        self.mgc.nrows()
    }
}

/// Options for [`ModelBundle::postprocess_acoustic`].
#[derive(Debug, Clone, PartialEq)]
pub struct AcousticPostprocess {
    pub post_filter: PostFilterKind,
    pub trajectory_smoothing: bool,
    pub trajectory_smoothing_cutoff: f32,
    pub trajectory_smoothing_cutoff_f0: f32,
    pub vuv_threshold: f32,
    pub force_fix_vuv: bool,
    pub fill_silence_to_rest: bool,
    /// Pitch shift applied to the output F0, in cents.
    pub f0_shift_in_cent: f32,
}

/// Options for [`ModelBundle::postprocess_waveform`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaveformPostprocess {
    pub sample_type: SampleType,
    pub peak_norm: bool,
    pub loudness_norm: bool,
    /// Target loudness in dB relative to full scale.
    pub target_loudness: f32,
}

/// `extensions` section of the model config.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extensions {
    /// Program that rewrites the predicted timing.
    #[serde(default)]
    pub timing_editor: Option<String>,
}

/// The subset of a model's `config.yaml` the pipeline reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub sample_rate: u32,
    /// Frame period in milliseconds.
    #[serde(default = "default_frame_period")]
    pub frame_period: f64,
    #[serde(default)]
    pub extensions: Extensions,
    /// Segmentation constants tuned for this model's training corpus.
    #[serde(default)]
    pub segmentation: Option<SegmentationParams>,
}

fn default_frame_period() -> f64 {
    5.0
}

impl ModelConfig {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frame_period: default_frame_period(),
            extensions: Extensions::default(),
            segmentation: None,
        }
    }

    /// Load `config.yaml` from a model directory.
    pub fn load(model_dir: &Path) -> Result<Self, SvsError> {
        let path = model_dir.join(CONFIG_FILE);
        let text = std::fs::read_to_string(&path).map_err(|e| {
            SvsError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        let config: Self = serde_yaml::from_str(&text)?;
        if config.frame_period <= 0.0 {
            return Err(SvsError::Configuration(format!(
                "frame_period must be positive, got {}",
                config.frame_period
            )));
        }
        Ok(config)
    }

    /// Frame period in label ticks.
    pub fn frame_shift(&self) -> i64 {
        (self.frame_period * TICKS_PER_SECOND as f64 / 1000.0).round() as i64
    }
}

/// Capability set of a loaded singing-voice model.
///
/// Calls take `&mut self`: a bundle owns its inference device and scratch
/// buffers, so the engine never overlaps two calls.
pub trait ModelBundle {
    fn config(&self) -> &ModelConfig;

    /// Predict note/phoneme durations, returning labels with new times.
    fn predict_timing(&mut self, labels: &LabelSequence) -> Result<LabelSequence, SvsError>;

    /// Predict raw acoustic features (frames × dims). The input pitch is
    /// transposed by `f0_shift_in_cent` before inference.
    fn predict_acoustic(
        &mut self,
        labels: &LabelSequence,
        f0_shift_in_cent: f32,
    ) -> Result<Array2<f32>, SvsError>;

    fn postprocess_acoustic(
        &mut self,
        acoustic_features: Array2<f32>,
        labels: &LabelSequence,
        options: &AcousticPostprocess,
    ) -> Result<MultistreamFeatures, SvsError>;

    fn predict_waveform(
        &mut self,
        features: &MultistreamFeatures,
        vocoder: VocoderKind,
        vuv_threshold: f32,
    ) -> Result<Vec<f32>, SvsError>;

    /// Convert dtype and optionally normalize the concatenated waveform.
    fn postprocess_waveform(
        &mut self,
        samples: Vec<f32>,
        options: &WaveformPostprocess,
    ) -> Result<Vec<f32>, SvsError> {
        Ok(finisher::postprocess_waveform(
            samples,
            self.config().sample_rate,
            options,
        ))
    }
}

/// Loads a [`ModelBundle`] from a resolved model directory.
pub trait ModelLoader {
    fn load(&self, model_dir: &Path) -> Result<Box<dyn ModelBundle>, SvsError>;
}

impl<F> ModelLoader for F
where
    F: Fn(&Path) -> Result<Box<dyn ModelBundle>, SvsError>,
{
    fn load(&self, model_dir: &Path) -> Result<Box<dyn ModelBundle>, SvsError> {
        self(model_dir)
    }
}
