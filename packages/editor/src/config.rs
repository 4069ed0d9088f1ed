use crate::errors::EditorError;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_NAME: &str = "folio.config.json";

/// Editor configuration file format
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    /// Name used in logs to tell editors apart
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Whether the editor starts out editable
    #[serde(default = "default_editable")]
    pub editable: bool,

    /// Never render, even when a renderer is attached
    #[serde(default)]
    pub headless: bool,
}

fn default_namespace() -> String {
    "folio".to_string()
}

fn default_editable() -> bool {
    true
}

impl EditorConfig {
    /// Load config from a directory, falling back to defaults
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, EditorError> {
        let config_path = dir.as_ref().join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Self::from_json(&content)
        } else {
            Ok(EditorConfig::default())
        }
    }

    pub fn from_json(json: &str) -> Result<Self, EditorError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn headless() -> Self {
        Self {
            headless: true,
            ..Default::default()
        }
    }
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            namespace: default_namespace(),
            editable: default_editable(),
            headless: false,
        }
    }
}
