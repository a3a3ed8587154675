use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::SvsError;

/// Rebuilds a legacy voice directory as a packed model.
pub trait LegacyConverter {
    /// Write the packed model converted from `voice_dir` into `out_dir`.
    fn convert(&self, voice_dir: &Path, out_dir: &Path) -> Result<(), SvsError>;
}

/// Runs an external converter program as `<program> <voice_dir> <out_dir>`.
#[derive(Debug, Clone)]
pub struct CommandConverter {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl CommandConverter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }
}

impl LegacyConverter for CommandConverter {
    fn convert(&self, voice_dir: &Path, out_dir: &Path) -> Result<(), SvsError> {
        let tool = self.program.display();
        log::debug!(
            "Running {} {} -> {}",
            tool,
            voice_dir.display(),
            out_dir.display()
        );
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(voice_dir)
            .arg(out_dir)
            .status()
            .map_err(|e| SvsError::external(&tool, format!("failed to start: {e}")))?;
        if !status.success() {
            return Err(SvsError::external(
                &tool,
                format!("exited with code {:?}", status.code()),
            ));
        }
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn nonzero_exit_is_an_external_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let converter = CommandConverter::new("false");
        let err = converter.convert(dir.path(), dir.path()).unwrap_err();
        assert!(err.is_external_tool());
    }

    #[test]
    fn missing_program_is_an_external_tool_error() {
        let dir = tempfile::tempdir().unwrap();
        let converter = CommandConverter::new(dir.path().join("no-such-converter"));
        let err = converter.convert(dir.path(), dir.path()).unwrap_err();
        assert!(err.is_external_tool());
    }
}
