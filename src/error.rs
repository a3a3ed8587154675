use std::fmt;

/// Errors raised by any stage of the synthesis pipeline.
#[derive(thiserror::Error, Debug)]
pub enum SvsError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("external tool '{tool}' failed: {message}")]
    ExternalTool { tool: String, message: String },
    #[error("I/O error while {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("model error: {0}")]
    Model(String),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl SvsError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn external(tool: impl fmt::Display, message: impl Into<String>) -> Self {
        Self::ExternalTool {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    pub fn is_external_tool(&self) -> bool {
        matches!(self, Self::ExternalTool { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// Pipeline stage in which a fatal error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Project,
    Configuration,
    ModelResolution,
    ModelLoading,
    Score,
    TimingPrediction,
    TimingEdit,
    Synthesis,
    Output,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Project => "project setting",
            Stage::Configuration => "synthesis configuration",
            Stage::ModelResolution => "model resolution",
            Stage::ModelLoading => "model loading",
            Stage::Score => "score building",
            Stage::TimingPrediction => "timing prediction",
            Stage::TimingEdit => "timing edit",
            Stage::Synthesis => "synthesis",
            Stage::Output => "waveform output",
        };
        f.write_str(name)
    }
}

/// A fatal pipeline error tagged with the stage that raised it.
#[derive(thiserror::Error, Debug)]
#[error("{stage} failed: {source}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub source: SvsError,
}

pub(crate) trait StageContext<T> {
    fn stage(self, stage: Stage) -> Result<T, PipelineError>;
}

impl<T> StageContext<T> for Result<T, SvsError> {
    fn stage(self, stage: Stage) -> Result<T, PipelineError> {
        self.map_err(|source| PipelineError { stage, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_error_names_the_failing_stage() {
        let err: Result<(), _> =
            Err(SvsError::Configuration("no model".to_string())).stage(Stage::ModelResolution);
        let message = err.unwrap_err().to_string();
        assert_eq!(
            message,
            "model resolution failed: configuration error: no model"
        );
    }
}
