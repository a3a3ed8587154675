//! File-based round trip to an external timing editor.
//!
//! The editor sees four HTS label files: the score (full and mono) and the
//! predicted timing (full and mono). It may rewrite `mono_timing`; every
//! boundary it moves is copied onto the full-context timing, which is then
//! reloaded and snapped to the frame grid.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::SvsError;
use crate::labels::LabelSequence;

/// The four files exchanged with a timing editor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionRequest {
    pub full_score: PathBuf,
    pub mono_score: PathBuf,
    pub full_timing: PathBuf,
    pub mono_timing: PathBuf,
}

impl ExtensionRequest {
    /// Standard file names for `song` inside `work_dir`.
    pub fn for_song(work_dir: &Path, song: &str) -> Self {
        Self {
            full_score: work_dir.join(format!("{song}_score.full")),
            mono_score: work_dir.join(format!("{song}_score.lab")),
            full_timing: work_dir.join(format!("{song}_timing.full")),
            mono_timing: work_dir.join(format!("{song}_timing.lab")),
        }
    }
}

/// What an editor hands back: the rewritten mono timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionResponse {
    pub mono_timing: PathBuf,
}

/// An external program that edits predicted timing.
pub trait TimingEditor {
    fn name(&self) -> String;

    /// Run the editor to completion. Called exactly once per synthesis.
    fn run(&self, request: &ExtensionRequest) -> Result<ExtensionResponse, SvsError>;
}

/// Runs an editor program with `--full_score`, `--mono_score`,
/// `--full_timing` and `--mono_timing` arguments.
///
/// `.py` programs are started through [`python`](Self::python).
#[derive(Debug, Clone)]
pub struct CommandTimingEditor {
    pub program: PathBuf,
    pub python: PathBuf,
}

impl CommandTimingEditor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            python: PathBuf::from("python"),
        }
    }

    /// Editor configured in a model config; relative paths are taken from
    /// `base_dir`.
    pub fn from_config(program: &str, base_dir: &Path) -> Self {
        let program = Path::new(program);
        if program.is_absolute() {
            Self::new(program)
        } else {
            Self::new(base_dir.join(program))
        }
    }

    pub fn with_python(mut self, python: impl Into<PathBuf>) -> Self {
        self.python = python.into();
        self
    }
}

impl TimingEditor for CommandTimingEditor {
    fn name(&self) -> String {
        self.program.display().to_string()
    }

    fn run(&self, request: &ExtensionRequest) -> Result<ExtensionResponse, SvsError> {
        let is_script = self.program.extension().and_then(|e| e.to_str()) == Some("py");
        let mut command = if is_script {
            let mut command = Command::new(&self.python);
            command.arg(&self.program);
            command
        } else {
            Command::new(&self.program)
        };
        command
            .arg("--full_score")
            .arg(&request.full_score)
            .arg("--mono_score")
            .arg(&request.mono_score)
            .arg("--full_timing")
            .arg(&request.full_timing)
            .arg("--mono_timing")
            .arg(&request.mono_timing);

        let status = command
            .status()
            .map_err(|e| SvsError::external(self.name(), format!("failed to start: {e}")))?;
        if !status.success() {
            return Err(SvsError::external(
                self.name(),
                format!("exited with code {:?}", status.code()),
            ));
        }
        Ok(ExtensionResponse {
            mono_timing: request.mono_timing.clone(),
        })
    }
}

/// Routes predicted timing through an optional [`TimingEditor`].
pub struct TimingEditorBridge<'a> {
    editor: Option<&'a dyn TimingEditor>,
    request: ExtensionRequest,
    frame_shift: i64,
}

impl<'a> TimingEditorBridge<'a> {
    pub fn new(
        editor: Option<&'a dyn TimingEditor>,
        request: ExtensionRequest,
        frame_shift: i64,
    ) -> Self {
        Self {
            editor,
            request,
            frame_shift,
        }
    }

    /// Write the exchange files and, if an editor is set, apply its edits.
    ///
    /// Without an editor `timing` is returned unchanged.
    pub fn apply(
        &self,
        score: &LabelSequence,
        timing: LabelSequence,
    ) -> Result<LabelSequence, SvsError> {
        score.save(&self.request.full_score)?;
        score.to_mono().save(&self.request.mono_score)?;
        timing.save(&self.request.full_timing)?;
        timing.to_mono().save(&self.request.mono_timing)?;

        let Some(editor) = self.editor else {
            return Ok(timing);
        };

        log::info!("Editing timing with {}", editor.name());
        let response = editor.run(&self.request)?;
        if !response.mono_timing.is_file() {
            return Err(SvsError::external(
                editor.name(),
                format!("{} was not written", response.mono_timing.display()),
            ));
        }
        let edited = LabelSequence::load(&response.mono_timing)
            .map_err(|e| SvsError::external(editor.name(), e.to_string()))?;

        let full = LabelSequence::load(&self.request.full_timing)?;
        let merged = merge_mono_time_change(&full.to_mono(), &edited, &full)
            .map_err(|e| SvsError::external(editor.name(), e.to_string()))?;
        merged.save(&self.request.full_timing)?;

        let mut reloaded = LabelSequence::load(&self.request.full_timing)?;
        reloaded.frame_shift = self.frame_shift;
        reloaded.quantize();
        reloaded
            .validate()
            .map_err(|e| SvsError::external(editor.name(), e.to_string()))?;
        Ok(reloaded)
    }
}

/// Copy boundary moves from an edited mono timing onto full-context units.
///
/// For every mono unit whose start (or end) moved, each full unit starting
/// (or ending) at the old time gets the new time. Other units are left as
/// they are.
pub fn merge_mono_time_change(
    before: &LabelSequence,
    after: &LabelSequence,
    full: &LabelSequence,
) -> Result<LabelSequence, SvsError> {
    if before.len() != after.len() {
        return Err(SvsError::Validation(format!(
            "edited mono timing has {} units, expected {}",
            after.len(),
            before.len()
        )));
    }

    let mut start_moves = HashMap::new();
    let mut end_moves = HashMap::new();
    for (old, new) in before.iter().zip(after.iter()) {
        if old.start != new.start {
            start_moves.insert(old.start, new.start);
        }
        if old.end != new.end {
            end_moves.insert(old.end, new.end);
        }
    }

    let mut merged = full.clone();
    for label in &mut merged.labels {
        if let Some(&start) = start_moves.get(&label.start) {
            label.start = start;
        }
        if let Some(&end) = end_moves.get(&label.end) {
            label.end = end;
        }
    }
    Ok(merged)
}
