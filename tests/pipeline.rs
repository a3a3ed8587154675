use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use ndarray::{s, Array2};
use svs_rs::model::{
    AcousticPostprocess, ModelBundle, ModelConfig, ModelLoader, MultistreamFeatures, SampleType,
    VocoderKind,
};
use svs_rs::score::{ProjectReader, ProjectSetting, ScoreBuilder};
use svs_rs::timing::{ExtensionRequest, ExtensionResponse, TimingEditor};
use svs_rs::{
    FullContextLabel, LabelSequence, Pipeline, PipelineBuilder, Stage, SvsError,
    SynthesisParamsBuilder,
};
use tempfile::TempDir;

type CallLog = Rc<RefCell<Vec<String>>>;

struct FixedReader {
    setting: ProjectSetting,
}

impl ProjectReader for FixedReader {
    fn read_setting(&self, _project_path: &Path) -> Result<ProjectSetting, SvsError> {
        Ok(self.setting.clone())
    }
}

/// Writes a two-second score: pau, a, pau.
struct FixedScore;

impl ScoreBuilder for FixedScore {
    fn build_score(
        &self,
        _project_path: &Path,
        table_path: &Path,
        full_score_path: &Path,
    ) -> Result<(), SvsError> {
        assert!(table_path.is_file());
        let sec = 10_000_000;
        LabelSequence::new(
            vec![
                FullContextLabel::new(0, sec / 2, "xx^xx-pau+a=xx"),
                FullContextLabel::new(sec / 2, 3 * sec / 2, "pau^xx-a+pau=xx"),
                FullContextLabel::new(3 * sec / 2, 2 * sec, "a^xx-pau+xx=xx"),
            ],
            50_000,
        )
        .save(full_score_path)
    }
}

/// One sample of `amplitude` per frame.
struct ConstantBundle {
    config: ModelConfig,
    amplitude: f32,
    calls: CallLog,
}

impl ModelBundle for ConstantBundle {
    fn config(&self) -> &ModelConfig {
        &self.config
    }

    fn predict_timing(&mut self, labels: &LabelSequence) -> Result<LabelSequence, SvsError> {
        self.calls.borrow_mut().push("timing".to_string());
        Ok(labels.clone())
    }

    fn predict_acoustic(
        &mut self,
        labels: &LabelSequence,
        _f0_shift_in_cent: f32,
    ) -> Result<Array2<f32>, SvsError> {
        self.calls.borrow_mut().push("acoustic".to_string());
        let frames = ((labels.end_time() - labels.start_time()) / labels.frame_shift) as usize;
        Ok(Array2::from_elem((frames, 4), self.amplitude))
    }

    fn postprocess_acoustic(
        &mut self,
        features: Array2<f32>,
        _labels: &LabelSequence,
        _options: &AcousticPostprocess,
    ) -> Result<MultistreamFeatures, SvsError> {
        Ok(MultistreamFeatures {
            mgc: features.slice(s![.., 0..1]).to_owned(),
            lf0: features.slice(s![.., 1..2]).to_owned(),
            vuv: features.slice(s![.., 2..3]).to_owned(),
            bap: features.slice(s![.., 3..4]).to_owned(),
        })
    }

    fn predict_waveform(
        &mut self,
        features: &MultistreamFeatures,
        _vocoder: VocoderKind,
        _vuv_threshold: f32,
    ) -> Result<Vec<f32>, SvsError> {
        self.calls.borrow_mut().push("waveform".to_string());
        Ok(features.mgc.column(0).to_vec())
    }
}

struct FakeLoader {
    amplitude: f32,
    calls: CallLog,
}

impl ModelLoader for FakeLoader {
    fn load(&self, model_dir: &Path) -> Result<Box<dyn ModelBundle>, SvsError> {
        self.calls.borrow_mut().push("load".to_string());
        Ok(Box::new(ConstantBundle {
            config: ModelConfig::load(model_dir)?,
            amplitude: self.amplitude,
            calls: Rc::clone(&self.calls),
        }))
    }
}

struct FailingEditor;

impl TimingEditor for FailingEditor {
    fn name(&self) -> String {
        "failing".to_string()
    }

    fn run(&self, _request: &ExtensionRequest) -> Result<ExtensionResponse, SvsError> {
        Err(SvsError::ExternalTool {
            tool: self.name(),
            message: "exit status: 1".to_string(),
        })
    }
}

/// A saved project next to a voice directory with a packed model.
struct Fixture {
    dir: TempDir,
    amplitude: f32,
    calls: CallLog,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let model = dir.path().join("voice").join("model");
        fs::create_dir_all(&model).unwrap();
        fs::write(model.join("config.yaml"), "sample_rate: 200\nframe_period: 5\n").unwrap();
        fs::write(model.join("qst.hed"), "").unwrap();
        fs::write(model.join("kana2phonemes.table"), "").unwrap();
        fs::write(dir.path().join("song.ust"), "").unwrap();
        Self {
            dir,
            amplitude: 0.5,
            calls: Rc::default(),
        }
    }

    fn with_amplitude(mut self, amplitude: f32) -> Self {
        self.amplitude = amplitude;
        self
    }

    fn project(&self) -> PathBuf {
        self.dir.path().join("song.ust")
    }

    fn model_dir(&self) -> PathBuf {
        self.dir.path().join("voice").join("model")
    }

    fn builder(&self) -> PipelineBuilder {
        Pipeline::builder()
            .with_project_reader(Box::new(FixedReader {
                setting: ProjectSetting {
                    project: Some(self.project()),
                    voice_dir: self.dir.path().join("voice"),
                    cache_dir: self.dir.path().join("cache"),
                },
            }))
            .with_score_builder(Box::new(FixedScore))
            .with_model_loader(Box::new(FakeLoader {
                amplitude: self.amplitude,
                calls: Rc::clone(&self.calls),
            }))
    }

    fn wav_files(&self) -> Vec<PathBuf> {
        fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| {
                let name = p.file_name().unwrap().to_string_lossy();
                name.ends_with(".wav") || name.ends_with(".partial")
            })
            .collect()
    }
}

#[test]
fn synthesizes_a_float_scaled_wav_next_to_the_project() {
    let fixture = Fixture::new();
    let params = SynthesisParamsBuilder::default()
        .sample_type(SampleType::Int16)
        .build()
        .unwrap();
    let pipeline = fixture.builder().with_params(params).build().unwrap();

    let wav = pipeline.synthesize(&fixture.project(), None, false).unwrap();

    assert_eq!(fixture.wav_files(), vec![wav.clone()]);
    let name = wav.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("song__") && name.ends_with(".wav"), "{name}");

    let mut reader = hound::WavReader::open(&wav).unwrap();
    assert_eq!(reader.spec().sample_rate, 200);
    assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
    let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
    assert_eq!(samples.len(), 400);
    assert!(samples.iter().all(|s| (s - 0.5).abs() < 1e-3));

    let work = fixture.dir.path().join("song_temp");
    for file in ["song_score.full", "song_score.lab", "song_timing.full", "song_timing.lab"] {
        assert!(work.join(file).is_file(), "{file} missing");
    }
}

#[test]
fn integer_scaled_vocoder_output_is_rescaled_not_clipped() {
    let fixture = Fixture::new().with_amplitude(16_000.0);
    let pipeline = fixture.builder().build().unwrap();

    let wav = pipeline.synthesize(&fixture.project(), None, false).unwrap();

    let mut reader = hound::WavReader::open(&wav).unwrap();
    let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
    assert_eq!(samples.len(), 400);
    let expected = 16_000.0 / 32_767.0;
    assert!(
        samples.iter().all(|s| (s - expected).abs() < 1e-6),
        "expected {expected}, got {:?}",
        &samples[..4]
    );
}

#[test]
fn explicit_output_path_is_used_as_is() {
    let fixture = Fixture::new();
    let out = fixture.dir.path().join("renders");
    fs::create_dir(&out).unwrap();
    let target = out.join("take.wav");
    let pipeline = fixture.builder().build().unwrap();

    let wav = pipeline
        .synthesize(&fixture.project(), Some(&target), false)
        .unwrap();

    assert_eq!(wav, target);
    assert!(target.is_file());
    assert!(out.join("take_temp").join("take_score.full").is_file());
}

#[test]
fn unknown_vocoder_fails_before_the_model_is_touched() {
    let fixture = Fixture::new();
    let params = SynthesisParamsBuilder::default()
        .vocoder("wavenet")
        .build()
        .unwrap();
    let pipeline = fixture.builder().with_params(params).build().unwrap();

    let err = pipeline
        .synthesize(&fixture.project(), None, false)
        .unwrap_err();

    assert_eq!(err.stage, Stage::Configuration);
    assert!(err.source.is_configuration());
    assert!(fixture.calls.borrow().is_empty());
    assert!(fixture.wav_files().is_empty());
}

#[test]
fn voice_without_a_model_is_rejected() {
    let fixture = Fixture::new();
    fs::remove_dir_all(fixture.model_dir()).unwrap();
    let pipeline = fixture.builder().build().unwrap();

    let err = pipeline
        .synthesize(&fixture.project(), None, false)
        .unwrap_err();

    assert_eq!(err.stage, Stage::ModelResolution);
    assert!(err.source.is_configuration());
}

#[test]
fn missing_table_stops_score_building() {
    let fixture = Fixture::new();
    fs::remove_file(fixture.model_dir().join("kana2phonemes.table")).unwrap();
    let pipeline = fixture.builder().build().unwrap();

    let err = pipeline
        .synthesize(&fixture.project(), None, false)
        .unwrap_err();

    assert_eq!(err.stage, Stage::Score);
    assert!(err.source.is_configuration());
    assert!(!fixture.calls.borrow().contains(&"timing".to_string()));
}

#[test]
fn several_tables_still_synthesize() {
    let fixture = Fixture::new();
    fs::write(fixture.model_dir().join("extra.table"), "").unwrap();
    let pipeline = fixture.builder().build().unwrap();

    assert!(pipeline.synthesize(&fixture.project(), None, false).is_ok());
}

#[test]
fn non_project_input_is_a_validation_error() {
    let fixture = Fixture::new();
    let pipeline = fixture.builder().build().unwrap();

    let err = pipeline
        .synthesize(&fixture.dir.path().join("song.wav"), None, false)
        .unwrap_err();

    assert_eq!(err.stage, Stage::Project);
    assert!(err.source.is_validation());
}

#[test]
fn failing_timing_editor_leaves_no_output() {
    let fixture = Fixture::new();
    let pipeline = fixture
        .builder()
        .with_timing_editor(Box::new(FailingEditor))
        .build()
        .unwrap();

    let err = pipeline
        .synthesize(&fixture.project(), None, false)
        .unwrap_err();

    assert_eq!(err.stage, Stage::TimingEdit);
    assert!(err.source.is_external_tool());
    assert!(fixture.wav_files().is_empty());
    assert!(!fixture.calls.borrow().contains(&"acoustic".to_string()));
}
