//! Components - the parameterised building blocks of a routine
//!
//! A component is a type tag, an optional plugin origin and a
//! [`ParamsArray`]. Its name lives in the `name` parameter. The timeline
//! attributes ([`Component::visual_start`], [`Component::visual_stop`],
//! [`Component::force_end`], [`Component::disabled`]) are derived from
//! named parameters on every call and are never persisted.

use tracing::debug;

use crate::json::ComponentNode;
use crate::markup::Element;
use crate::param::{Param, ParamsArray};
use crate::template::TemplateRegistry;
use crate::Result;

/// Tag of the experiment-wide settings component.
pub const SETTINGS_TAG: &str = "SettingsComponent";

/// Markup element name of the experiment-wide settings component.
pub const SETTINGS_ELEMENT: &str = "Settings";

/// Tag of a routine's settings component.
pub const ROUTINE_SETTINGS_TAG: &str = "RoutineSettingsComponent";

/// Frame rate assumed when converting frame counts to seconds.
pub const ASSUMED_FRAME_RATE: f64 = 60.0;

const BUILTIN_TAGS: [&str; 2] = [SETTINGS_TAG, ROUTINE_SETTINGS_TAG];

const FORCE_END_PARAMS: [&str; 3] = ["forceEndRoutine", "endRoutineOn", "forceEndRoutineOnPress"];

const FORCE_END_VALUES: [&str; 7] = [
    "true",
    "True",
    "any click",
    "correct click",
    "valid click",
    "look at",
    "look away",
];

/// Colour a component is drawn with on the routine timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualColor {
    /// Disabled component
    Overlay,
    /// Component that ends its routine
    Orange,
    /// Any other component
    Blue,
}

/// A typed, parameter-bearing element of a routine.
#[derive(Debug, Clone)]
pub struct Component {
    tag: String,
    /// Plugin the component comes from, if any
    pub plugin: Option<String>,
    /// Parameters of the component
    pub params: ParamsArray,
}

impl Component {
    /// Create a component with no parameters.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            plugin: None,
            params: ParamsArray::new(),
        }
    }

    /// Create a component with every parameter its profile declares.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemplate`](crate::Error::UnknownTemplate) when
    /// the registry has no profile for `tag`.
    pub fn from_template(registry: &TemplateRegistry, tag: &str) -> Result<Self> {
        let profile = registry.require(tag)?;
        let mut component = Self::new(tag);
        component.plugin.clone_from(&profile.plugin);
        for name in profile.params.keys() {
            component
                .params
                .set(name.as_str(), Param::from_template(registry, tag, name).shared());
        }
        debug!(tag, params = component.params.len(), "component created from template");
        Ok(component)
    }

    /// Like [`Self::from_template`], but a built-in settings tag
    /// ([`SETTINGS_TAG`], [`ROUTINE_SETTINGS_TAG`]) the registry does not
    /// describe yields a bare component instead of an error.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemplate`](crate::Error::UnknownTemplate) for
    /// any other tag without a profile.
    pub fn from_template_or_builtin(registry: &TemplateRegistry, tag: &str) -> Result<Self> {
        match Self::from_template(registry, tag) {
            Err(_) if BUILTIN_TAGS.contains(&tag) => {
                debug!(tag, "built-in component has no template, using a bare one");
                Ok(Self::new(tag))
            }
            resolved => resolved,
        }
    }

    /// The component's type tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The component's name, if it has a `name` parameter.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        name_of(&self.params)
    }

    /// Set the component's name, creating the `name` parameter if absent.
    pub fn set_name(&mut self, registry: &TemplateRegistry, name: &str) {
        set_name_of(&mut self.params, registry, &self.tag, name);
    }

    /// Parameters grouped by category (shared view).
    #[must_use]
    pub fn sorted_params(&self) -> ParamsArray {
        self.params.sorted()
    }

    /// Independent copy of every parameter.
    #[must_use]
    pub fn copy_params(&self) -> ParamsArray {
        self.params.copy()
    }

    fn param_text(&self, name: &str) -> Option<String> {
        let param = self.params.get(name)?;
        let text = param.borrow().val_str().into_owned();
        Some(text)
    }

    fn param_number(&self, name: &str) -> f64 {
        self.param_text(name)
            .and_then(|text| text.trim().parse::<f64>().ok())
            .unwrap_or(f64::NAN)
    }

    /// Onset in seconds, if it can be worked out from `startType`/`startVal`.
    #[must_use]
    pub fn visual_start(&self) -> Option<f64> {
        let start_type = self.param_text("startType")?;
        if !self.params.has("startVal") {
            return None;
        }
        let start_val = self.param_number("startVal");
        let start = match start_type.as_str() {
            "time (s)" => start_val,
            "frames" => start_val / ASSUMED_FRAME_RATE,
            _ => return None,
        };
        (!start.is_nan()).then_some(start)
    }

    /// Offset in seconds, if it can be worked out from `stopType`/`stopVal`.
    #[must_use]
    pub fn visual_stop(&self) -> Option<f64> {
        let stop_type = self.param_text("stopType")?;
        if !self.params.has("stopVal") {
            return None;
        }
        let stop_val = self.param_number("stopVal");
        let stop = match stop_type.as_str() {
            "time (s)" => stop_val,
            "duration (s)" => self.visual_start().unwrap_or(0.0) + stop_val,
            "frames" => stop_val / ASSUMED_FRAME_RATE,
            _ => return None,
        };
        (!stop.is_nan()).then_some(stop)
    }

    /// Whether this component can end its routine early.
    #[must_use]
    pub fn force_end(&self) -> bool {
        FORCE_END_PARAMS.iter().any(|name| {
            self.param_text(name)
                .is_some_and(|val| FORCE_END_VALUES.contains(&val.as_str()))
        })
    }

    /// Whether the `disabled` parameter is set.
    #[must_use]
    pub fn disabled(&self) -> bool {
        self.param_text("disabled")
            .is_some_and(|val| val == "true" || val == "True")
    }

    /// Timeline colour derived from [`Self::disabled`] and [`Self::force_end`].
    #[must_use]
    pub fn visual_color(&self) -> VisualColor {
        if self.disabled() {
            VisualColor::Overlay
        } else if self.force_end() {
            VisualColor::Orange
        } else {
            VisualColor::Blue
        }
    }

    /// Read a component from its markup element.
    ///
    /// A `Settings` element is read as the [`SETTINGS_TAG`] component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemplate`](crate::Error::UnknownTemplate) when
    /// the element's tag has no registered profile and is not a built-in
    /// settings tag.
    pub fn from_xml(registry: &TemplateRegistry, node: &Element) -> Result<Self> {
        let tag = if node.name == SETTINGS_ELEMENT {
            SETTINGS_TAG
        } else {
            node.name.as_str()
        };
        let mut component = Self::from_template_or_builtin(registry, tag)?;
        if let Some(name) = node.attribute("name") {
            component.set_name(registry, name);
        }
        if let Some(plugin) = node.attribute("plugin") {
            component.plugin = Some(plugin.to_string());
        }
        component.params.read_xml(registry, tag, node);
        Ok(component)
    }

    /// Write this component as a markup element.
    #[must_use]
    pub fn to_xml(&self) -> Element {
        let element_name = if self.tag == SETTINGS_TAG {
            SETTINGS_ELEMENT
        } else {
            self.tag.as_str()
        };
        let mut node = Element::new(element_name);
        if let Some(name) = self.name() {
            node.set_attribute("name", name);
        }
        if let Some(plugin) = &self.plugin {
            node.set_attribute("plugin", plugin);
        }
        self.params.write_xml(&mut node);
        node
    }

    /// Snapshot in the data-interchange shape.
    #[must_use]
    pub fn to_json(&self) -> ComponentNode {
        ComponentNode {
            tag: self.tag.clone(),
            plugin: self.plugin.clone(),
            params: self.params.to_json(),
        }
    }

    /// Build a component from its data-interchange shape.
    #[must_use]
    pub fn from_json(node: &ComponentNode) -> Self {
        Self {
            tag: node.tag.clone(),
            plugin: node.plugin.clone(),
            params: ParamsArray::from_json(&node.params),
        }
    }
}

/// Name stored in the `name` parameter of `params`, if any.
pub(crate) fn name_of(params: &ParamsArray) -> Option<String> {
    let param = params.unsorted().get("name")?;
    let name = param.borrow().val_str().into_owned();
    Some(name)
}

/// Write `name` into the `name` parameter, resolving it from the template of
/// `tag` first if the parameter does not exist yet.
pub(crate) fn set_name_of(params: &mut ParamsArray, registry: &TemplateRegistry, tag: &str, name: &str) {
    let param = match params.unsorted().get("name") {
        Some(param) => param,
        None => {
            let param = Param::from_template(registry, tag, "name").shared();
            params.set("name", param.clone());
            param
        }
    };
    param.borrow_mut().set_val(name);
}
