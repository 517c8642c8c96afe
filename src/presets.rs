//! Named crop regions persisted to a JSON file.
//!
//! The file is a JSON array of preset objects. Fields this crate does not
//! know about are kept in [`Preset::extra`] and written back unchanged.
//! Every operation re-reads the file, so several processes can share it.

use crate::error::ExtractError;
use crate::pipeline::region::BoundingBoxRelative;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default location of the preset file.
pub const DEFAULT_PRESETS_PATH: &str = "config/presets.json";

const UNNAMED: &str = "(unnamed)";

fn default_scope() -> String {
    "global".to_string()
}

fn default_active() -> bool {
    true
}

/// A reusable crop region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Preset {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// `global`, `template` or `document`.
    #[serde(default = "default_scope")]
    pub scope: String,
    pub bbox_rel: BoundingBoxRelative,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Preset {
    pub fn new(id: impl Into<String>, name: impl Into<String>, bbox_rel: BoundingBoxRelative) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            scope: default_scope(),
            bbox_rel,
            active: true,
            extra: Map::new(),
        }
    }

    /// `"<name> (<scope>)"`.
    pub fn label(&self) -> String {
        format!("{} ({})", self.name.as_deref().unwrap_or(UNNAMED), self.scope)
    }

    /// The stored box, validated.
    pub fn bbox(&self) -> Result<BoundingBoxRelative, ExtractError> {
        self.bbox_rel.validate()?;
        Ok(self.bbox_rel)
    }
}

/// File-backed preset collection.
#[derive(Debug, Clone)]
pub struct PresetStore {
    path: PathBuf,
}

impl Default for PresetStore {
    fn default() -> Self {
        Self::new(DEFAULT_PRESETS_PATH)
    }
}

impl PresetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn store_err(&self, detail: impl ToString) -> ExtractError {
        ExtractError::PresetStore {
            path: self.path.clone(),
            detail: detail.to_string(),
        }
    }

    /// Create the parent directory and an empty `[]` file if missing.
    fn ensure(&self) -> Result<(), ExtractError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| self.store_err(e))?;
            }
        }
        if !self.path.exists() {
            std::fs::write(&self.path, "[]").map_err(|e| self.store_err(e))?;
            debug!("Created empty preset store at {}", self.path.display());
        }
        Ok(())
    }

    /// All presets. A file that is not a JSON array is reset to `[]`;
    /// individual entries that do not parse are skipped.
    pub fn load(&self) -> Result<Vec<Preset>, ExtractError> {
        self.ensure()?;
        let content = std::fs::read_to_string(&self.path).map_err(|e| self.store_err(e))?;

        let entries = match serde_json::from_str::<Value>(&content) {
            Ok(Value::Array(entries)) => entries,
            Ok(_) | Err(_) => {
                warn!(
                    "Preset store {} is not a JSON array; resetting it",
                    self.path.display()
                );
                std::fs::write(&self.path, "[]").map_err(|e| self.store_err(e))?;
                return Ok(Vec::new());
            }
        };

        Ok(entries
            .into_iter()
            .enumerate()
            .filter_map(|(i, entry)| match serde_json::from_value::<Preset>(entry) {
                Ok(p) => Some(p),
                Err(e) => {
                    warn!("Skipping preset #{i} in {}: {e}", self.path.display());
                    None
                }
            })
            .collect())
    }

    /// Overwrite the file with `presets`, pretty-printed.
    pub fn save(&self, presets: &[Preset]) -> Result<(), ExtractError> {
        self.ensure()?;
        let content = serde_json::to_string_pretty(presets).map_err(|e| self.store_err(e))?;
        std::fs::write(&self.path, content).map_err(|e| self.store_err(e))
    }

    pub fn list_active(&self) -> Result<Vec<Preset>, ExtractError> {
        Ok(self.load()?.into_iter().filter(|p| p.active).collect())
    }

    pub fn get(&self, id: &str) -> Result<Option<Preset>, ExtractError> {
        Ok(self.load()?.into_iter().find(|p| p.id == id))
    }

    /// Replace the preset with the same id, or append it.
    pub fn upsert(&self, preset: Preset) -> Result<(), ExtractError> {
        if preset.id.trim().is_empty() {
            return Err(self.store_err("preset needs a non-empty 'id'"));
        }
        let mut presets = self.load()?;
        match presets.iter_mut().find(|p| p.id == preset.id) {
            Some(existing) => *existing = preset,
            None => presets.push(preset),
        }
        self.save(&presets)
    }

    /// Flip the `active` flag. Unknown ids are ignored.
    pub fn set_active(&self, id: &str, active: bool) -> Result<(), ExtractError> {
        let mut presets = self.load()?;
        if let Some(p) = presets.iter_mut().find(|p| p.id == id) {
            p.active = active;
        }
        self.save(&presets)
    }
}
