//! File loading: format detection (RON/JSON/TOML), file discovery, and the
//! top-level [`load_game_data`] pipeline.

use std::path::{Path, PathBuf};

use lanetrade_core::config::Tweaks;
use lanetrade_core::state::WorldError;
use serde::de::DeserializeOwned;

use crate::schema::WorldDefinition;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// A definition parsed but describes an impossible world.
    #[error("invalid world definition: {0}")]
    Invalid(String),

    /// Inserting into the world state failed.
    #[error(transparent)]
    World(#[from] WorldError),

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without extension).
///
/// Looks for `{base_name}.ron`, `{base_name}.toml`, and `{base_name}.json`.
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// multiple formats exist for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = &found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing.clone(),
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

/// Deserialize text in a known format. `origin` names the source in errors.
pub fn deserialize_str<T: DeserializeOwned>(
    content: &str,
    format: Format,
    origin: &Path,
) -> Result<T, DataLoadError> {
    let parse_err = |detail: String| DataLoadError::Parse {
        file: origin.to_path_buf(),
        detail,
    };
    match format {
        Format::Ron => ron::from_str(content).map_err(|e| parse_err(e.to_string())),
        Format::Json => serde_json::from_str(content).map_err(|e| parse_err(e.to_string())),
        Format::Toml => toml::from_str(content).map_err(|e| parse_err(e.to_string())),
    }
}

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    deserialize_str(&content, format, path)
}

// ===========================================================================
// Loading pipeline
// ===========================================================================

/// Everything loaded from a data directory.
#[derive(Debug, Clone)]
pub struct GameData {
    pub world: WorldDefinition,
    pub tweaks: Tweaks,
}

/// Load a world definition file.
pub fn load_world_file(path: &Path) -> Result<WorldDefinition, DataLoadError> {
    let world: WorldDefinition = deserialize_file(path)?;
    tracing::debug!(
        file = %path.display(),
        world = %world.world_id,
        nodes = world.nodes.len(),
        edges = world.edges.len(),
        "world definition loaded"
    );
    Ok(world)
}

/// Load a tweaks file. Missing fields take defaults and out-of-range values
/// are reset, as with [`Tweaks::parse_json_or_defaults`]; unlike that
/// function a malformed file is an error rather than a silent fallback.
pub fn load_tweaks_file(path: &Path) -> Result<Tweaks, DataLoadError> {
    let tweaks: Tweaks = deserialize_file(path)?;
    Ok(tweaks.sanitized())
}

/// Load `world.{ron,toml,json}` (required) and `tweaks.{ron,toml,json}`
/// (optional, defaults when absent) from `dir`.
pub fn load_game_data(dir: &Path) -> Result<GameData, DataLoadError> {
    let world = load_world_file(&require_data_file(dir, "world")?)?;
    let tweaks = match find_data_file(dir, "tweaks")? {
        Some(path) => load_tweaks_file(&path)?,
        None => Tweaks::default(),
    };
    Ok(GameData { world, tweaks })
}

// ===========================================================================
// Tests
// ===========================================================================
