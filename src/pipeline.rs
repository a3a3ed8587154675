//! End-to-end synthesis from a host project reference to a WAV file.
//!
//! Stages run strictly in order and the first failure aborts the call with
//! a [`PipelineError`] naming the stage. Work files (score, timing, editor
//! exchange files) stay in `<out>/<song>_temp` for inspection; the output
//! WAV only appears once it has been written completely.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::engine::{SynthesisEngine, SynthesisParams};
use crate::error::{PipelineError, Stage, StageContext, SvsError};
use crate::finisher;
use crate::model::{self, LegacyConverter, ModelLoader};
use crate::score::{self, ProjectReader, ScoreBuilder};
use crate::timing::{CommandTimingEditor, ExtensionRequest, TimingEditor, TimingEditorBridge};

/// Project reference extensions the pipeline accepts.
const PROJECT_EXTENSIONS: [&str; 2] = ["tmp", "ust"];

/// Install the process logger. Safe to call on every invocation.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .try_init();
}

/// Logging handle for one synthesis call.
struct StageLogger {
    song: String,
}

impl StageLogger {
    fn new(project_path: &Path) -> Self {
        Self {
            song: file_stem(project_path),
        }
    }

    fn rename(&mut self, song: &str) {
        self.song = song.to_string();
    }

    fn stage(&self, stage: Stage) {
        log::info!(target: "svs::pipeline", "[{}] {}", self.song, stage);
    }

    fn info(&self, message: std::fmt::Arguments<'_>) {
        log::info!(target: "svs::pipeline", "[{}] {}", self.song, message);
    }

    fn warn(&self, message: std::fmt::Arguments<'_>) {
        log::warn!(target: "svs::pipeline", "[{}] {}", self.song, message);
    }
}

/// Where one call reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    pub song: String,
    pub work_dir: PathBuf,
    pub wav: PathBuf,
}

impl OutputPaths {
    /// Derive paths from the caller's output path, or else from the saved
    /// project (`<project dir>/<song>__<timestamp>.wav`), or else a fresh
    /// temporary directory.
    pub fn derive(
        project: Option<&Path>,
        output: Option<&Path>,
        timestamp: &str,
    ) -> Result<Self, SvsError> {
        let (song, out_dir, wav) = match (output, project) {
            (Some(output), _) => {
                let wav = absolute(output)?;
                let out_dir = wav.parent().map(Path::to_path_buf).unwrap_or_default();
                (file_stem(output), out_dir, wav)
            }
            (None, Some(project)) => {
                let song = file_stem(project);
                let out_dir = absolute(project)?
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                let wav = out_dir.join(format!("{song}__{timestamp}.wav"));
                (song, out_dir, wav)
            }
            (None, None) => {
                log::info!("Project is not saved; writing the WAV to a temporary directory");
                let song = format!("temp__{timestamp}");
                let out_dir = tempfile::Builder::new()
                    .prefix("svs-")
                    .tempdir()
                    .map_err(|e| SvsError::io("creating output directory", e))?
                    .keep();
                let wav = out_dir.join(format!("{song}__{timestamp}.wav"));
                (song, out_dir, wav)
            }
        };
        Ok(Self {
            work_dir: out_dir.join(format!("{song}_temp")),
            song,
            wav,
        })
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn absolute(path: &Path) -> Result<PathBuf, SvsError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|e| SvsError::io("reading current dir", e))?;
    Ok(cwd.join(path))
}

/// Reject anything that is not a host project reference.
pub fn check_project_reference(project_path: &Path) -> Result<(), SvsError> {
    let ext = project_path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext {
        Some(ext) if PROJECT_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(SvsError::Validation(format!(
            "input file must be a .ust project or .tmp plugin file: {}",
            project_path.display()
        ))),
    }
}

/// The synthesis pipeline and its collaborators.
pub struct Pipeline {
    project_reader: Box<dyn ProjectReader>,
    score_builder: Box<dyn ScoreBuilder>,
    model_loader: Box<dyn ModelLoader>,
    converter: Option<Box<dyn LegacyConverter>>,
    timing_editor: Option<Box<dyn TimingEditor>>,
    params: SynthesisParams,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn params(&self) -> &SynthesisParams {
        &self.params
    }

    /// Synthesize `project_path` and return the path of the written WAV.
    ///
    /// With `output_path` unset the path is derived from the project name
    /// and the current time. `play_audio` opens the result in the system
    /// player; failing to do so only logs a warning.
    pub fn synthesize(
        &self,
        project_path: &Path,
        output_path: Option<&Path>,
        play_audio: bool,
    ) -> Result<PathBuf, PipelineError> {
        init_logging();
        let mut run = StageLogger::new(project_path);

        run.stage(Stage::Project);
        check_project_reference(project_path).stage(Stage::Project)?;
        let setting = self
            .project_reader
            .read_setting(project_path)
            .stage(Stage::Project)?;

        run.stage(Stage::Configuration);
        self.params.kinds().stage(Stage::Configuration)?;

        run.stage(Stage::ModelResolution);
        let resolved = model::resolve(&setting.voice_dir, self.converter.as_deref())
            .stage(Stage::ModelResolution)?;
        run.info(format_args!(
            "Model {} ({:?})",
            resolved.dir.display(),
            resolved.layout
        ));

        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S").to_string();
        let paths = OutputPaths::derive(setting.project.as_deref(), output_path, &timestamp)
            .stage(Stage::Output)?;
        run.rename(&paths.song);
        std::fs::create_dir_all(&paths.work_dir)
            .map_err(|e| SvsError::io(format!("creating {}", paths.work_dir.display()), e))
            .stage(Stage::Output)?;

        run.stage(Stage::ModelLoading);
        let mut bundle = self
            .model_loader
            .load(&resolved.dir)
            .stage(Stage::ModelLoading)?;

        run.stage(Stage::Score);
        let request = ExtensionRequest::for_song(&paths.work_dir, &paths.song);
        let score = score::build_score(
            self.score_builder.as_ref(),
            project_path,
            &resolved.dir,
            &request.full_score,
        )
        .stage(Stage::Score)?;

        let mut engine = SynthesisEngine::new(bundle.as_mut());

        run.stage(Stage::TimingPrediction);
        let timing = engine.predict_timing(&score).stage(Stage::TimingPrediction)?;

        run.stage(Stage::TimingEdit);
        let configured = engine
            .config()
            .extensions
            .timing_editor
            .as_deref()
            .map(|program| CommandTimingEditor::from_config(program, &setting.voice_dir));
        let editor: Option<&dyn TimingEditor> = match (&self.timing_editor, &configured) {
            (Some(editor), _) => Some(editor.as_ref()),
            (None, Some(editor)) => Some(editor),
            (None, None) => None,
        };
        if let Some(editor) = editor {
            run.info(format_args!("Timing editor: {}", editor.name()));
        }
        let bridge = TimingEditorBridge::new(editor, request, engine.config().frame_shift());
        let timing = bridge.apply(&score, timing).stage(Stage::TimingEdit)?;

        run.stage(Stage::Synthesis);
        let waveform = engine
            .synthesize(&timing, &self.params)
            .stage(Stage::Synthesis)?;

        run.stage(Stage::Output);
        let waveform = finisher::adjust_gain_for_float32(waveform);
        waveform.write_wav(&paths.wav).stage(Stage::Output)?;
        run.info(format_args!(
            "Wrote {:.2}s of audio to {}",
            waveform.duration_secs(),
            paths.wav.display()
        ));

        if play_audio {
            if let Err(e) = open_in_player(&paths.wav) {
                run.warn(format_args!("Could not play {}: {e}", paths.wav.display()));
            }
        }
        Ok(paths.wav)
    }
}

fn open_in_player(path: &Path) -> std::io::Result<()> {
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut command = Command::new("cmd");
        command.args(["/C", "start", ""]).arg(path);
        command
    };
    #[cfg(target_os = "macos")]
    let mut command = {
        let mut command = Command::new("open");
        command.arg(path);
        command
    };
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let mut command = {
        let mut command = Command::new("xdg-open");
        command.arg(path);
        command
    };
    command.spawn().map(|_| ())
}

/// Builder for [`Pipeline`].
#[derive(Default)]
pub struct PipelineBuilder {
    project_reader: Option<Box<dyn ProjectReader>>,
    score_builder: Option<Box<dyn ScoreBuilder>>,
    model_loader: Option<Box<dyn ModelLoader>>,
    converter: Option<Box<dyn LegacyConverter>>,
    timing_editor: Option<Box<dyn TimingEditor>>,
    params: SynthesisParams,
}

impl PipelineBuilder {
    pub fn with_project_reader(mut self, project_reader: Box<dyn ProjectReader>) -> Self {
        self.project_reader = Some(project_reader);
        self
    }

    pub fn with_score_builder(mut self, score_builder: Box<dyn ScoreBuilder>) -> Self {
        self.score_builder = Some(score_builder);
        self
    }

    pub fn with_model_loader(mut self, model_loader: Box<dyn ModelLoader>) -> Self {
        self.model_loader = Some(model_loader);
        self
    }

    /// Converter used when a voice directory has a legacy layout.
    pub fn with_converter(mut self, converter: Box<dyn LegacyConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    /// Timing editor used instead of the one named in the model config.
    pub fn with_timing_editor(mut self, timing_editor: Box<dyn TimingEditor>) -> Self {
        self.timing_editor = Some(timing_editor);
        self
    }

    pub fn with_params(mut self, params: SynthesisParams) -> Self {
        self.params = params;
        self
    }

    pub fn build(self) -> Result<Pipeline, SvsError> {
        let missing = |what: &str| SvsError::Configuration(format!("pipeline needs a {what}"));
        Ok(Pipeline {
            project_reader: self.project_reader.ok_or_else(|| missing("project reader"))?,
            score_builder: self.score_builder.ok_or_else(|| missing("score builder"))?,
            model_loader: self.model_loader.ok_or_else(|| missing("model loader"))?,
            converter: self.converter,
            timing_editor: self.timing_editor,
            params: self.params,
        })
    }
}
