//! Template Registry - default parameter profiles per entity tag
//!
//! Every component, standalone routine and loop type is instantiated from a
//! profile keyed by its tag. A profile lists the parameters the entity
//! declares, each with its default value and display metadata.
//!
//! ## Shape
//!
//! ```text
//! { "<tag>": { "plugin": ..., "params": { "<name>": { "val": ..., "categ": ..., ... } } } }
//! ```
//!
//! The registry is immutable once built and is handed explicitly to the
//! construction functions that need it.
//!
//! ## Usage
//!
//! ```rust
//! use psyexp_model::template::TemplateRegistry;
//!
//! let registry = TemplateRegistry::from_json_str(r#"{
//!     "TextComponent": {
//!         "plugin": null,
//!         "params": {
//!             "text": { "val": "Hello", "categ": "Basic", "valType": "str", "label": "Text" }
//!         }
//!     }
//! }"#)?;
//!
//! assert!(registry.contains("TextComponent"));
//! assert_eq!(registry.param("TextComponent", "text").unwrap().label.as_deref(), Some("Text"));
//! # Ok::<(), psyexp_model::Error>(())
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

/// Declared defaults and metadata for one parameter of one entity tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamTemplate {
    /// Default value
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub val: Value,
    /// Category used to group parameters in the editor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categ: Option<String>,
    /// Values the editor offers for choice inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_vals: Option<Value>,
    /// Declared value type (`str`, `code`, `num`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_type: Option<String>,
    /// Input affordance shown by the editor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<String>,
    /// Update-frequency policy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<String>,
    /// Update policies allowed for this parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_updates: Option<Vec<String>>,
    /// Display label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Hint text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Plugin the parameter originates from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
}

/// Full profile of one entity tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentProfile {
    /// Plugin that provides the entity, if any
    #[serde(default)]
    pub plugin: Option<String>,
    /// Declared parameters, in declaration order
    #[serde(default)]
    pub params: IndexMap<String, ParamTemplate>,
}

impl ComponentProfile {
    /// Create an empty profile.
    #[must_use]
    pub fn new(plugin: Option<String>) -> Self {
        Self {
            plugin,
            params: IndexMap::new(),
        }
    }

    /// Declare a parameter on this profile.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, template: ParamTemplate) -> Self {
        self.params.insert(name.into(), template);
        self
    }
}

/// Immutable lookup of entity profiles keyed by tag.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateRegistry {
    profiles: IndexMap<String, ComponentProfile>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from its data-interchange text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the text is not a valid profile mapping.
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Build a registry from an already parsed data-interchange value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the value is not a valid profile mapping.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Register (or replace) the profile for a tag.
    pub fn insert(&mut self, tag: impl Into<String>, profile: ComponentProfile) {
        self.profiles.insert(tag.into(), profile);
    }

    /// Whether a profile exists for `tag`.
    #[must_use]
    pub fn contains(&self, tag: &str) -> bool {
        self.profiles.contains_key(tag)
    }

    /// Number of registered profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// Whether the registry holds no profiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Get the profile for `tag`, if registered.
    #[must_use]
    pub fn profile(&self, tag: &str) -> Option<&ComponentProfile> {
        self.profiles.get(tag)
    }

    /// Get the profile for `tag`, treating absence as a caller error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemplate`] when no profile is registered.
    pub fn require(&self, tag: &str) -> Result<&ComponentProfile> {
        self.profiles.get(tag).ok_or_else(|| Error::UnknownTemplate {
            tag: tag.to_string(),
        })
    }

    /// Get the declared template of parameter `name` under `tag`.
    #[must_use]
    pub fn param(&self, tag: &str, name: &str) -> Option<&ParamTemplate> {
        self.profiles.get(tag).and_then(|profile| profile.params.get(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_from_json() {
        let registry = TemplateRegistry::from_value(serde_json::json!({
            "KeyboardComponent": {
                "plugin": "psychopy-keys",
                "params": {
                    "allowedKeys": {
                        "val": "'y','n'",
                        "categ": "Basic",
                        "allowedUpdates": ["constant", "set every repeat"]
                    }
                }
            }
        }))
        .unwrap();

        let profile = registry.profile("KeyboardComponent").unwrap();
        assert_eq!(profile.plugin.as_deref(), Some("psychopy-keys"));

        let template = registry.param("KeyboardComponent", "allowedKeys").unwrap();
        assert_eq!(template.val, Value::from("'y','n'"));
        assert_eq!(template.allowed_updates.as_ref().map(Vec::len), Some(2));
        assert!(template.hint.is_none());
    }

    #[test]
    fn test_require_unknown_tag() {
        let registry = TemplateRegistry::new();
        let err = registry.require("MovieComponent").unwrap_err();
        assert!(matches!(err, Error::UnknownTemplate { ref tag } if tag == "MovieComponent"));
    }

    #[test]
    fn test_profile_builder_preserves_order() {
        let profile = ComponentProfile::new(None)
            .with_param("name", ParamTemplate::default())
            .with_param("startVal", ParamTemplate::default())
            .with_param("stopVal", ParamTemplate::default());

        let names: Vec<&str> = profile.params.keys().map(String::as_str).collect();
        assert_eq!(names, ["name", "startVal", "stopVal"]);
    }
}
