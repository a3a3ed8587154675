//! Runs the pipeline with a toy sine-tone "model".
//!
//! ```text
//! cargo run --example synthesize -- song.ust [out.wav]
//! ```
//!
//! The project's `VoiceDir` must hold `model/config.yaml`, `model/qst.hed`
//! and a `*.table` file; only `sample_rate` and `frame_period` are read.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use ndarray::Array2;
use svs_rs::model::{
    AcousticPostprocess, ModelBundle, ModelConfig, MultistreamFeatures, VocoderKind,
};
use svs_rs::score::{ProjectReader, ProjectSetting, ScoreBuilder};
use svs_rs::{FullContextLabel, LabelSequence, Pipeline, SvsError, SynthesisParamsBuilder};

/// Reads `key=value` lines of the `[#SETTING]` block.
struct UstReader;

impl ProjectReader for UstReader {
    fn read_setting(&self, project_path: &Path) -> Result<ProjectSetting, SvsError> {
        let text = read(project_path)?;
        let setting: HashMap<String, String> = blocks(&text)
            .into_iter()
            .find(|(name, _)| name == "#SETTING")
            .map(|(_, entries)| entries)
            .unwrap_or_default();
        ProjectSetting::from_mapping(&setting)
    }
}

/// One label per note: rests become `pau`, the note number rides in `/E:`.
struct UstScoreBuilder;

impl ScoreBuilder for UstScoreBuilder {
    fn build_score(
        &self,
        project_path: &Path,
        _table_path: &Path,
        full_score_path: &Path,
    ) -> Result<(), SvsError> {
        let text = read(project_path)?;
        let blocks = blocks(&text);
        let tempo: f64 = blocks
            .iter()
            .find(|(name, _)| name == "#SETTING")
            .and_then(|(_, s)| s.get("Tempo"))
            .and_then(|t| t.parse().ok())
            .unwrap_or(120.0);
        // 480 ticks per quarter note.
        let ticks_per_note_tick = 10_000_000.0 * 60.0 / tempo / 480.0;

        let mut labels = Vec::new();
        let mut t = 0i64;
        for (name, note) in &blocks {
            if !name.starts_with("#0") {
                continue;
            }
            let length: f64 = note.get("Length").and_then(|l| l.parse().ok()).unwrap_or(0.0);
            let lyric = note.get("Lyric").map(String::as_str).unwrap_or("R");
            let phoneme = if lyric == "R" { "pau" } else { lyric };
            let note_num = note.get("NoteNum").map(String::as_str).unwrap_or("60");
            let end = t + (length * ticks_per_note_tick).round() as i64;
            labels.push(FullContextLabel::new(
                t,
                end,
                format!("xx^xx-{phoneme}+xx=xx/E:{note_num}"),
            ));
            t = end;
        }
        LabelSequence::new(labels, 50_000).save(full_score_path)
    }
}

fn read(path: &Path) -> Result<String, SvsError> {
    std::fs::read_to_string(path)
        .map_err(|e| SvsError::Validation(format!("cannot read {}: {e}", path.display())))
}

fn blocks(text: &str) -> Vec<(String, HashMap<String, String>)> {
    let mut blocks: Vec<(String, HashMap<String, String>)> = Vec::new();
    for line in text.lines().map(str::trim) {
        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            blocks.push((name.to_string(), HashMap::new()));
        } else if let (Some((key, value)), Some((_, entries))) =
            (line.split_once('='), blocks.last_mut())
        {
            entries.insert(key.to_string(), value.to_string());
        }
    }
    blocks
}

/// Sings every note as a plain sine at the note's pitch.
struct ToneBundle {
    config: ModelConfig,
}

fn note_hz(label: &FullContextLabel) -> f32 {
    let note: f32 = label
        .context
        .split("/E:")
        .nth(1)
        .and_then(|n| n.parse().ok())
        .unwrap_or(60.0);
    440.0 * 2f32.powf((note - 69.0) / 12.0)
}

impl ModelBundle for ToneBundle {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn predict_timing(&mut self, labels: &LabelSequence) -> Result<LabelSequence, SvsError> {
        let mut timing = labels.clone();
        timing.frame_shift = self.config.frame_shift();
        timing.quantize();
        Ok(timing)
    }

    fn predict_acoustic(
        &mut self,
        labels: &LabelSequence,
        f0_shift_in_cent: f32,
    ) -> Result<Array2<f32>, SvsError> {
        let mut rows = Vec::new();
        for label in labels {
            let frames = (label.end - label.start) / labels.frame_shift;
            let voiced = !label.is_silence();
            let lf0 = (note_hz(label) * 2f32.powf(f0_shift_in_cent / 1200.0)).ln();
            for _ in 0..frames {
                rows.extend([0.0, lf0, if voiced { 1.0 } else { 0.0 }, 0.0]);
            }
        }
        Array2::from_shape_vec((rows.len() / 4, 4), rows)
            .map_err(|e| SvsError::Model(e.to_string()))
    }

    fn postprocess_acoustic(
        &mut self,
        mut features: Array2<f32>,
        _labels: &LabelSequence,
        options: &AcousticPostprocess,
    ) -> Result<MultistreamFeatures, SvsError> {
        let shift = options.f0_shift_in_cent / 1200.0 * std::f32::consts::LN_2;
        features.column_mut(1).mapv_inplace(|lf0| lf0 + shift);
        let column = |i: usize| features.column(i).to_owned().insert_axis(ndarray::Axis(1));
        Ok(MultistreamFeatures {
            mgc: column(0),
            lf0: column(1),
            vuv: column(2),
            bap: column(3),
        })
    }

    fn predict_waveform(
        &mut self,
        features: &MultistreamFeatures,
        _vocoder: VocoderKind,
        vuv_threshold: f32,
    ) -> Result<Vec<f32>, SvsError> {
        let per_frame =
            (self.config.sample_rate as f64 * self.config.frame_period / 1000.0).round() as usize;
        let mut phase = 0f32;
        let mut samples = Vec::with_capacity(features.num_frames() * per_frame);
        for (lf0, vuv) in features.lf0.iter().zip(features.vuv.iter()) {
            let step = std::f32::consts::TAU * lf0.exp() / self.config.sample_rate as f32;
            for _ in 0..per_frame {
                phase = (phase + step) % std::f32::consts::TAU;
                samples.push(if *vuv >= vuv_threshold { 0.3 * phase.sin() } else { 0.0 });
            }
        }
        Ok(samples)
    }
}

fn load_tone_bundle(model_dir: &Path) -> Result<Box<dyn ModelBundle>, SvsError> {
    Ok(Box::new(ToneBundle {
        config: ModelConfig::load(model_dir)?,
    }))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let project = PathBuf::from(args.next().ok_or("usage: synthesize <project.ust> [out.wav]")?);
    let output = args.next().map(PathBuf::from);

    let pipeline = Pipeline::builder()
        .with_project_reader(Box::new(UstReader))
        .with_score_builder(Box::new(UstScoreBuilder))
        .with_model_loader(Box::new(load_tone_bundle))
        .with_params(SynthesisParamsBuilder::default().vocoder("world").build()?)
        .build()?;

    let start = Instant::now();
    let wav = pipeline.synthesize(&project, output.as_deref(), false)?;
    println!("Saved {} in {:.2?}", wav.display(), start.elapsed());
    Ok(())
}
