//! Parameters - the atomic configurable values of every entity
//!
//! A [`Param`] is always resolved from a template: either the profile the
//! [`TemplateRegistry`] declares for its owning tag, or a synthesised
//! "Unknown" fallback when the registry has never heard of it. The fallback
//! keeps documents from newer plugins loadable without losing their values.
//!
//! Params are shared through [`ParamRef`] handles so that the sorted and
//! unsorted views of a [`ParamsArray`] point at the same instances.

mod array;
mod sort;

pub use array::{ParamsArray, ParamsEntry, TimingParams};
pub use sort::{sort_params, unsort_params, ParamMap, SortedParamMap};

use std::borrow::Cow;
use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::markup::Element;
use crate::template::{ParamTemplate, TemplateRegistry};

/// Shared handle to a [`Param`].
pub type ParamRef = Rc<RefCell<Param>>;

/// Category assigned to parameters no template declares.
pub const UNKNOWN_CATEGORY: &str = "Unknown";

/// Input affordance marking an unrecognised parameter.
pub const INVALID_INPUT: &str = "inv";

/// Hint attached to unrecognised parameters.
pub const UNKNOWN_HINT: &str = "Parameter not recognised";

/// Value type of literal-expression parameters.
pub const CODE_VAL_TYPE: &str = "code";

/// Prefix marking a value as a live expression.
pub const CODE_SIGIL: char = '$';

/// Markup element name of a serialised parameter.
pub const PARAM_TAG: &str = "Param";

/// A single configurable value with its display metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Param {
    /// Parameter name (its key in the owning array)
    #[serde(default)]
    pub name: String,
    /// Current value; may encode a live expression
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub val: Value,
    /// Category used for grouping
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categ: Option<String>,
    /// Values offered for choice inputs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_vals: Option<Value>,
    /// Declared value type
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_type: Option<String>,
    /// Input affordance
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
    /// Originating plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
}

impl Param {
    /// Create a blank parameter with only a name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Create a parameter from a declared template.
    #[must_use]
    pub fn from_param_template(name: impl Into<String>, template: &ParamTemplate) -> Self {
        Self {
            name: name.into(),
            val: template.val.clone(),
            categ: template.categ.clone(),
            allowed_vals: template.allowed_vals.clone(),
            val_type: template.val_type.clone(),
            input_type: template.input_type.clone(),
            updates: template.updates.clone(),
            allowed_updates: template.allowed_updates.clone(),
            label: template.label.clone(),
            hint: template.hint.clone(),
            plugin: template.plugin.clone(),
        }
    }

    /// Synthesise the fallback for a parameter no template declares.
    #[must_use]
    pub fn unknown(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            categ: Some(UNKNOWN_CATEGORY.to_string()),
            input_type: Some(INVALID_INPUT.to_string()),
            label: Some(name.clone()),
            hint: Some(UNKNOWN_HINT.to_string()),
            name,
            ..Self::default()
        }
    }

    /// Resolve parameter `name` of entity `tag` against the registry.
    ///
    /// Falls back to [`Param::unknown`] when the registry has no template
    /// for it (including when the tag itself is unregistered).
    #[must_use]
    pub fn from_template(registry: &TemplateRegistry, tag: &str, name: &str) -> Self {
        match registry.param(tag, name) {
            Some(template) => Self::from_param_template(name, template),
            None => {
                debug!(tag, param = name, "unrecognised parameter, using fallback template");
                Self::unknown(name)
            }
        }
    }

    /// Read a parameter from a markup `Param` node, starting from `template`.
    ///
    /// Attributes present on the node (`name`, `val`, `valType`, `updates`,
    /// `plugin`) override the template; absent ones keep the template value.
    #[must_use]
    pub fn from_xml(node: &Element, template: &Self) -> Self {
        let mut param = template.clone();
        if let Some(name) = node.attribute("name") {
            param.name = name.to_string();
        }
        if let Some(val) = node.attribute("val") {
            param.val = Value::String(val.to_string());
        }
        if let Some(val_type) = node.attribute("valType") {
            param.val_type = Some(val_type.to_string());
        }
        if let Some(updates) = node.attribute("updates") {
            param.updates = Some(updates.to_string());
        }
        if let Some(plugin) = node.attribute("plugin") {
            param.plugin = Some(plugin.to_string());
        }
        param
    }

    /// Write this parameter as a markup `Param` node.
    #[must_use]
    pub fn to_xml(&self) -> Element {
        let mut node = Element::new(PARAM_TAG);
        if !self.val.is_null() {
            node.set_attribute("val", self.val_str());
        }
        if let Some(val_type) = &self.val_type {
            node.set_attribute("valType", val_type);
        }
        if let Some(updates) = &self.updates {
            node.set_attribute("updates", updates);
        }
        node.set_attribute("name", &self.name);
        if let Some(plugin) = &self.plugin {
            node.set_attribute("plugin", plugin);
        }
        node
    }

    /// The value rendered as text, as it appears in markup.
    #[must_use]
    pub fn val_str(&self) -> Cow<'_, str> {
        match &self.val {
            Value::String(text) => Cow::Borrowed(text.as_str()),
            Value::Null => Cow::Borrowed(""),
            other => Cow::Owned(other.to_string()),
        }
    }

    /// Replace the value with a text value.
    pub fn set_val(&mut self, val: impl Into<String>) {
        self.val = Value::String(val.into());
    }

    /// Whether the value is a literal expression rather than plain text.
    #[must_use]
    pub fn is_code(&self) -> bool {
        self.val_type.as_deref() == Some(CODE_VAL_TYPE) || self.val_str().starts_with(CODE_SIGIL)
    }

    /// Whether the value passes the minimal syntactic guard (no spaces).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.val_str().contains(' ')
    }

    /// Wrap this parameter in a shared handle.
    #[must_use]
    pub fn shared(self) -> ParamRef {
        Rc::new(RefCell::new(self))
    }
}
