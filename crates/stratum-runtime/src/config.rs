use crate::RuntimeError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const UMOCI_ENV: &str = "STRATUM_UMOCI";
pub const SKOPEO_ENV: &str = "STRATUM_SKOPEO";

/// External tool locations and export defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub umoci: String,
    pub skopeo: String,
    /// Entrypoint stamped on images exported to an OCI archive.
    pub archive_entrypoint: Vec<String>,
    pub archive_cmd: Vec<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            umoci: "umoci".to_owned(),
            skopeo: "skopeo".to_owned(),
            archive_entrypoint: vec!["/bin/pebble".to_owned()],
            archive_cmd: vec!["help".to_owned()],
        }
    }
}

impl ToolConfig {
    /// Load `$XDG_CONFIG_HOME/stratum/tools.json` (or
    /// `~/.config/stratum/tools.json`), falling back to defaults when the
    /// file does not exist. Environment overrides are applied last.
    pub fn load_default() -> Result<Self, RuntimeError> {
        let config = match default_config_path() {
            Some(path) if path.exists() => Self::load(&path)?,
            _ => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(|e| {
            RuntimeError::Config(format!("invalid tool config {}: {e}", path.display()))
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), RuntimeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| RuntimeError::Config(format!("cannot serialize tool config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup(UMOCI_ENV).filter(|v| !v.is_empty()) {
            self.umoci = v;
        }
        if let Some(v) = lookup(SKOPEO_ENV).filter(|v| !v.is_empty()) {
            self.skopeo = v;
        }
        self
    }
}

fn default_config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(std::env::var_os("HOME")?).join(".config"),
    };
    Some(base.join("stratum").join("tools.json"))
}
