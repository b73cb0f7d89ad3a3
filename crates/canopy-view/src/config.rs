use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Static view settings. Every field has a default so partial JSON works.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewConfig {
    /// Known component types (case-insensitive). Empty accepts every type.
    #[serde(default)]
    pub components: Vec<String>,
    /// Fail the render on an unknown type instead of logging it.
    #[serde(default)]
    pub strict_components: bool,
    /// Properties left unresolved by eager resolution.
    #[serde(default = "default_deferred_properties")]
    pub deferred_properties: Vec<String>,
    /// Parent id used when positioning the root of an unanchored render.
    #[serde(default = "default_id_prefix")]
    pub id_prefix: String,
    #[serde(default = "default_style_property")]
    pub style_property: String,
}

fn default_deferred_properties() -> Vec<String> {
    vec!["template".to_string(), "templates".to_string()]
}

fn default_id_prefix() -> String {
    "_canopy_".to_string()
}

fn default_style_property() -> String {
    "style".to_string()
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            components: Vec::new(),
            strict_components: false,
            deferred_properties: default_deferred_properties(),
            id_prefix: default_id_prefix(),
            style_property: default_style_property(),
        }
    }
}

impl ViewConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn is_known_component(&self, node_type: &str) -> bool {
        self.components.is_empty()
            || self
                .components
                .iter()
                .any(|c| c.eq_ignore_ascii_case(node_type))
    }

    pub fn is_deferred(&self, property: &str) -> bool {
        self.deferred_properties.iter().any(|p| p == property)
    }
}
