//! Locating a usable model directory inside a voice directory.
//!
//! Resolution order, first match wins:
//!
//! 1. `<voice>/model` holds a packed model.
//! 2. `<voice>` itself holds a packed model (a generic model that may not
//!    have been prepared for this pipeline; a warning is logged).
//! 3. `<voice>` holds a legacy `enuconfig.yaml` manifest: the directory is
//!    converted into `<voice>/model` and that is used.
//! 4. Otherwise resolution fails with a configuration error.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::convert::LegacyConverter;
use super::{CONFIG_FILE, QUESTION_FILE};
use crate::error::SvsError;

/// Manifest of a legacy voice directory.
pub const LEGACY_MANIFEST: &str = "enuconfig.yaml";

/// Name of the phoneme table a conversion produces.
const CONVERTED_TABLE: &str = "kana2phonemes.table";

const MODEL_SUBDIR: &str = "model";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelLayout {
    Packed,
    GenericCompatible,
    Converted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    pub dir: PathBuf,
    pub layout: ModelLayout,
}

#[derive(Debug, Deserialize)]
struct LegacyManifest {
    table_path: String,
}

/// True if `dir` contains every file a packed model needs.
pub fn packed_model_exists(dir: &Path) -> bool {
    [CONFIG_FILE, QUESTION_FILE]
        .iter()
        .all(|name| dir.join(name).is_file())
}

/// Resolve the model directory for the voice directory `source`.
///
/// `converter` is only consulted for legacy layouts.
pub fn resolve(
    source: &Path,
    converter: Option<&dyn LegacyConverter>,
) -> Result<ResolvedModel, SvsError> {
    let packed_dir = source.join(MODEL_SUBDIR);
    if packed_model_exists(&packed_dir) {
        log::info!("Using packed model in {}", packed_dir.display());
        return Ok(ResolvedModel {
            dir: packed_dir,
            layout: ModelLayout::Packed,
        });
    }

    if packed_model_exists(source) {
        log::warn!(
            "Generic model selected in {}. This model might not be prepared for this pipeline.",
            source.display()
        );
        return Ok(ResolvedModel {
            dir: source.to_path_buf(),
            layout: ModelLayout::GenericCompatible,
        });
    }

    if source.join(LEGACY_MANIFEST).is_file() {
        let converter = converter.ok_or_else(|| {
            SvsError::Configuration(format!(
                "{} holds a legacy model but no converter is configured",
                source.display()
            ))
        })?;
        log::info!("Legacy model selected. Converting it for compatibility...");
        convert_legacy(source, &packed_dir, converter)?;
        log::info!("Converted into {}", packed_dir.display());
        return Ok(ResolvedModel {
            dir: packed_dir,
            layout: ModelLayout::Converted,
        });
    }

    Err(SvsError::Configuration(format!(
        "no compatible model found in {}; select a voice with a packed model",
        source.display()
    )))
}

fn convert_legacy(
    source: &Path,
    model_dir: &Path,
    converter: &dyn LegacyConverter,
) -> Result<(), SvsError> {
    fs::create_dir_all(model_dir)
        .map_err(|e| SvsError::io(format!("creating {}", model_dir.display()), e))?;

    // Some model serializers cannot write to paths containing certain
    // characters, so conversion goes to a fresh sibling directory first.
    let parent = source
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let temp = tempfile::Builder::new()
        .prefix(".temp-legacy-convert-")
        .tempdir_in(parent)
        .map_err(|e| SvsError::io(format!("creating temp dir in {}", parent.display()), e))?;

    if let Err(e) = converter.convert(source, temp.path()) {
        let kept = temp.keep();
        log::error!("Conversion failed; partial output left in {}", kept.display());
        return Err(e);
    }

    let entries = fs::read_dir(temp.path())
        .map_err(|e| SvsError::io(format!("listing {}", temp.path().display()), e))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| SvsError::io(format!("listing {}", temp.path().display()), e))?;
        let dest = model_dir.join(entry.file_name());
        replace_with(&entry.path(), &dest)?;
    }

    let manifest_path = source.join(LEGACY_MANIFEST);
    let text = fs::read_to_string(&manifest_path)
        .map_err(|e| SvsError::io(format!("reading {}", manifest_path.display()), e))?;
    let manifest: LegacyManifest = serde_yaml::from_str(&text)?;
    let table_name = Path::new(&manifest.table_path)
        .file_name()
        .ok_or_else(|| {
            SvsError::Configuration(format!(
                "table_path {:?} in {} has no file name",
                manifest.table_path,
                manifest_path.display()
            ))
        })?;
    let produced = model_dir.join(CONVERTED_TABLE);
    let renamed = model_dir.join(table_name);
    if produced != renamed {
        fs::rename(&produced, &renamed).map_err(|e| {
            SvsError::io(
                format!("renaming {} to {}", produced.display(), renamed.display()),
                e,
            )
        })?;
    }

    if !packed_model_exists(model_dir) {
        return Err(SvsError::external(
            "legacy converter",
            format!("no packed model was produced in {}", model_dir.display()),
        ));
    }
    Ok(())
}

fn replace_with(from: &Path, to: &Path) -> Result<(), SvsError> {
    let context = || format!("moving {} to {}", from.display(), to.display());
    if to.is_dir() {
        fs::remove_dir_all(to).map_err(|e| SvsError::io(context(), e))?;
    } else if to.exists() {
        fs::remove_file(to).map_err(|e| SvsError::io(context(), e))?;
    }
    fs::rename(from, to).map_err(|e| SvsError::io(context(), e))
}
