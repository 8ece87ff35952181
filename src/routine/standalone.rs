//! Standalone routines - parameter-bearing flow leaves

use std::cell::RefCell;
use std::rc::Rc;

use super::RoutineEntry;
use crate::component::{name_of, set_name_of};
use crate::json::RoutineNode;
use crate::markup::Element;
use crate::owner::{address_of, Owner};
use crate::param::{Param, ParamsArray};
use crate::template::TemplateRegistry;
use crate::{Error, Result};

/// Shared handle to a [`StandaloneRoutine`].
pub type StandaloneRef = Rc<RefCell<StandaloneRoutine>>;

/// A routine configured entirely by its own parameters.
///
/// Behaves like a [`Routine`](super::Routine) in the flow but has no
/// components; its markup element is named after its tag.
#[derive(Debug, Clone)]
pub struct StandaloneRoutine {
    tag: String,
    /// Plugin the routine comes from, if any
    pub plugin: Option<String>,
    /// Parameters of the routine
    pub params: ParamsArray,
    pub(super) owner: Owner<RoutineEntry>,
}

impl StandaloneRoutine {
    /// Create a standalone routine with no parameters.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            plugin: None,
            params: ParamsArray::new(),
            owner: Owner::default(),
        }
    }

    /// Create a standalone routine with every parameter its profile declares.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemplate`](crate::Error::UnknownTemplate) when
    /// the registry has no profile for `tag`.
    pub fn from_template(registry: &TemplateRegistry, tag: &str) -> Result<Self> {
        let profile = registry.require(tag)?;
        let mut routine = Self::new(tag);
        routine.plugin.clone_from(&profile.plugin);
        for name in profile.params.keys() {
            routine
                .params
                .set(name.as_str(), Param::from_template(registry, tag, name).shared());
        }
        Ok(routine)
    }

    /// The routine's type tag.
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The routine's name, if it has a `name` parameter.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        name_of(&self.params)
    }

    /// Set the routine's name, creating the `name` parameter if absent.
    ///
    /// # Errors
    ///
    /// As for [`Routine::set_name`](super::Routine::set_name), whose
    /// re-keying this shares.
    pub fn set_name(&mut self, registry: &TemplateRegistry, name: &str) -> Result<()> {
        let target = address_of(self);
        let old = self.name();
        self.owner.rename(
            target,
            old,
            name,
            |name| Error::DuplicateRoutine { name },
            || set_name_of(&mut self.params, registry, &self.tag, name),
        )
    }

    /// Independent copy of every parameter.
    #[must_use]
    pub fn copy_params(&self) -> ParamsArray {
        self.params.copy()
    }

    /// Read a standalone routine from its markup element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemplate`](crate::Error::UnknownTemplate) when
    /// the element's tag has no registered profile.
    pub fn from_xml(registry: &TemplateRegistry, node: &Element) -> Result<Self> {
        let mut routine = Self::from_template(registry, &node.name)?;
        if let Some(name) = node.attribute("name") {
            routine.set_name(registry, name)?;
        }
        if let Some(plugin) = node.attribute("plugin") {
            routine.plugin = Some(plugin.to_string());
        }
        routine.params.read_xml(registry, &node.name, node);
        Ok(routine)
    }

    /// Write this routine as a markup element named after its tag.
    #[must_use]
    pub fn to_xml(&self) -> Element {
        let mut node = Element::new(self.tag.as_str());
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
    pub fn to_json(&self) -> RoutineNode {
        RoutineNode {
            tag: self.tag.clone(),
            name: None,
            settings: None,
            components: None,
            plugin: self.plugin.clone(),
            params: Some(self.params.to_json()),
        }
    }

    /// Build a standalone routine from its data-interchange shape.
    #[must_use]
    pub fn from_json(node: &RoutineNode) -> Self {
        Self {
            tag: node.tag.clone(),
            plugin: node.plugin.clone(),
            params: node
                .params
                .as_ref()
                .map(ParamsArray::from_json)
                .unwrap_or_default(),
            owner: Owner::default(),
        }
    }

    /// Wrap this routine in a shared handle.
    #[must_use]
    pub fn shared(self) -> StandaloneRef {
        Rc::new(RefCell::new(self))
    }
}
