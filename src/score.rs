//! Project settings and score building.
//!
//! Reading the host's project format and turning notes into full-context
//! labels is delegated to the [`ProjectReader`] and [`ScoreBuilder`]
//! collaborators. This module finds the lyric-to-phoneme table they need
//! and loads the score they produce.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::SvsError;
use crate::labels::LabelSequence;

/// Settings the host passes alongside a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSetting {
    /// Saved project file, if the project has been saved.
    pub project: Option<PathBuf>,
    /// Voice directory holding the model.
    pub voice_dir: PathBuf,
    /// Host cache directory.
    pub cache_dir: PathBuf,
}

impl ProjectSetting {
    /// Build settings from the host's `Project`/`VoiceDir`/`CacheDir` keys.
    pub fn from_mapping(setting: &HashMap<String, String>) -> Result<Self, SvsError> {
        let required = |key: &str| {
            setting
                .get(key)
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .ok_or_else(|| SvsError::Validation(format!("project setting lacks {key}")))
        };
        Ok(Self {
            project: setting
                .get("Project")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from),
            voice_dir: required("VoiceDir")?,
            cache_dir: required("CacheDir")?,
        })
    }
}

/// Reads the setting block of a host project reference.
pub trait ProjectReader {
    fn read_setting(&self, project_path: &Path) -> Result<ProjectSetting, SvsError>;
}

/// Turns a project into a full-context label file.
pub trait ScoreBuilder {
    fn build_score(
        &self,
        project_path: &Path,
        table_path: &Path,
        full_score_path: &Path,
    ) -> Result<(), SvsError>;
}

/// Find the lyric-to-phoneme table in a model directory.
///
/// With several candidates the lexicographically first file name wins.
pub fn find_table(model_dir: &Path) -> Result<PathBuf, SvsError> {
    let entries = std::fs::read_dir(model_dir)
        .map_err(|e| SvsError::io(format!("listing {}", model_dir.display()), e))?;
    let mut tables = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| SvsError::io(format!("listing {}", model_dir.display()), e))?
            .path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some("table") {
            tables.push(path);
        }
    }
    tables.sort_by(|a, b| a.file_name().cmp(&b.file_name()));

    let Some(first) = tables.first() else {
        return Err(SvsError::Configuration(format!(
            "Table file does not exist in {}",
            model_dir.display()
        )));
    };
    if tables.len() > 1 {
        log::warn!("Multiple table files are found: {:?}", tables);
    }
    log::info!(
        "Using {}",
        first.file_name().unwrap_or_default().to_string_lossy()
    );
    Ok(first.clone())
}

/// Build the score for `project_path` and load it.
pub fn build_score(
    builder: &dyn ScoreBuilder,
    project_path: &Path,
    model_dir: &Path,
    full_score_path: &Path,
) -> Result<LabelSequence, SvsError> {
    let table = find_table(model_dir)?;
    builder.build_score(project_path, &table, full_score_path)?;
    LabelSequence::load(full_score_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_table_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "").unwrap();
        let err = find_table(dir.path()).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn picks_first_table_by_name() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kana2phonemes_b.table"), "").unwrap();
        std::fs::write(dir.path().join("kana2phonemes_a.table"), "").unwrap();
        std::fs::create_dir(dir.path().join("z.table")).unwrap();

        let table = find_table(dir.path()).unwrap();
        assert_eq!(table, dir.path().join("kana2phonemes_a.table"));
    }

    #[test]
    fn setting_requires_voice_and_cache_dirs() {
        let mut setting = HashMap::new();
        setting.insert("VoiceDir".to_string(), "/voices/a".to_string());
        assert!(ProjectSetting::from_mapping(&setting)
            .unwrap_err()
            .is_validation());

        setting.insert("CacheDir".to_string(), "/cache".to_string());
        setting.insert("Project".to_string(), String::new());
        let parsed = ProjectSetting::from_mapping(&setting).unwrap();
        assert_eq!(parsed.project, None);
        assert_eq!(parsed.voice_dir, PathBuf::from("/voices/a"));
    }
}
