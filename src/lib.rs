//! # svs-rs
//!
//! A Rust library that orchestrates singing-voice synthesis from a host
//! project and a trained voice model.
//!
//! ## Features
//!
//! - **Model resolution**: packed, generic and legacy voice directories,
//!   with legacy layouts converted in place
//! - **Timing editing**: optional round trip of predicted timing through an
//!   external editor program
//! - **Segmented synthesis**: long scores are split at pauses and
//!   synthesized piece by piece
//! - **Safe output**: the output WAV only appears once it is complete
//!
//! The trained model itself is supplied through the [`model::ModelBundle`]
//! trait; project parsing and score building through [`score::ProjectReader`]
//! and [`score::ScoreBuilder`].
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::path::Path;
//! use svs_rs::Pipeline;
//!
//! let pipeline = Pipeline::builder()
//!     .with_project_reader(Box::new(my_reader))
//!     .with_score_builder(Box::new(my_score_builder))
//!     .with_model_loader(Box::new(my_loader))
//!     .build()?;
//!
//! let wav = pipeline.synthesize(Path::new("song.tmp"), None, false)?;
//! println!("Wrote {}", wav.display());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod engine;
pub mod error;
pub mod finisher;
pub mod labels;
pub mod model;
pub mod pipeline;
pub mod score;
pub mod segment;
pub mod timing;

use std::path::{Path, PathBuf};

pub use engine::{SynthesisEngine, SynthesisParams, SynthesisParamsBuilder};
pub use error::{PipelineError, Stage, SvsError};
pub use labels::{FullContextLabel, LabelSequence};
pub use pipeline::{Pipeline, PipelineBuilder};

/// Synthesized mono audio.
///
/// Samples may still be integer-scaled until passed through
/// [`finisher::adjust_gain_for_float32`].
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformBuffer {
    /// Mono samples, float-scaled once gain has been adjusted
    pub samples: Vec<f32>,
    /// Sample rate of the audio (from the model's config.yaml)
    pub sample_rate: u32,
}

impl WaveformBuffer {
    /// Write the audio to a 32-bit float WAV file.
    ///
    /// The data goes to a `.partial` file next to `path` that is renamed
    /// over `path` once finalized, so `path` never holds a truncated file.
    pub fn write_wav(&self, path: &Path) -> Result<(), SvsError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let partial = partial_path(path);
        let mut writer = hound::WavWriter::create(&partial, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        std::fs::rename(&partial, path)
            .map_err(|e| SvsError::io(format!("moving WAV to {}", path.display()), e))
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".partial");
    path.with_file_name(name)
}
