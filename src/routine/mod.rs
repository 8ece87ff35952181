//! Routines - the units the flow sequences
//!
//! A [`Routine`] is an ordered list of [`Component`]s plus one settings
//! component that also carries the routine's name. A [`StandaloneRoutine`]
//! is a parameter-bearing leaf with no components. Both are stored in the
//! experiment's routine map as a [`RoutineEntry`] and referenced from the
//! flow by identity.

mod standalone;

pub use standalone::{StandaloneRef, StandaloneRoutine};

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::component::{Component, ROUTINE_SETTINGS_TAG};
use crate::flow::{insertion_index, relocation_index, FlowElement};
use crate::json::RoutineNode;
use crate::markup::Element;
use crate::owner::{address_of, holds, Keyed, Owner, SharedMap};
use crate::template::TemplateRegistry;
use crate::{Error, Result};

/// Tag (and markup element name) of a component-bearing routine.
pub const ROUTINE_TAG: &str = "Routine";

/// Shared handle to a [`Routine`].
pub type RoutineRef = Rc<RefCell<Routine>>;

/// Routines of an experiment keyed by name, in document order.
pub type RoutineMap = IndexMap<String, RoutineEntry>;

/// An ordered sequence of components with a settings component.
///
/// Once added to an experiment the routine remembers (weakly) the routine
/// map it is keyed in, so [`Routine::set_name`] re-keys that map.
#[derive(Debug, Clone)]
pub struct Routine {
    settings: Component,
    components: Vec<Component>,
    owner: Owner<RoutineEntry>,
}

impl Routine {
    /// Create an empty routine with template settings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemplate`] when the registry has no
    /// [`ROUTINE_SETTINGS_TAG`] profile.
    pub fn new(registry: &TemplateRegistry) -> Result<Self> {
        Ok(Self::with_settings(Component::from_template(
            registry,
            ROUTINE_SETTINGS_TAG,
        )?))
    }

    /// Create an empty routine around an existing settings component.
    #[must_use]
    pub fn with_settings(settings: Component) -> Self {
        Self {
            settings,
            components: Vec::new(),
            owner: Owner::default(),
        }
    }

    /// The routine's name, held by its settings component.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.settings.name()
    }

    /// Set the name on the settings component.
    ///
    /// A routine keyed in an experiment's routine map moves to the new key,
    /// keeping its position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRoutine`] if another routine of the same
    /// experiment has that name, or [`Error::NameMapBorrowed`] if the routine
    /// map is borrowed. The name is unchanged on error.
    pub fn set_name(&mut self, registry: &TemplateRegistry, name: &str) -> Result<()> {
        let target = address_of(self);
        let old = self.name();
        self.owner.rename(
            target,
            old,
            name,
            |name| Error::DuplicateRoutine { name },
            || self.settings.set_name(registry, name),
        )
    }

    /// The routine settings component.
    #[must_use]
    pub const fn settings(&self) -> &Component {
        &self.settings
    }

    /// Mutable access to the routine settings component.
    pub fn settings_mut(&mut self) -> &mut Component {
        &mut self.settings
    }

    /// Components in timeline order.
    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Mutable access to one component.
    pub fn component_mut(&mut self, index: usize) -> Option<&mut Component> {
        self.components.get_mut(index)
    }

    /// Position of the first component with the given name.
    #[must_use]
    pub fn index_of_component(&self, name: &str) -> Option<usize> {
        self.components
            .iter()
            .position(|component| component.name().as_deref() == Some(name))
    }

    /// Append a component, returning its index.
    pub fn add_component(&mut self, component: Component) -> usize {
        self.components.push(component);
        self.components.len() - 1
    }

    /// Insert a component at `index`; negative indices append.
    pub fn insert_component(&mut self, component: Component, index: isize) -> usize {
        let index = insertion_index(index, self.components.len());
        self.components.insert(index, component);
        index
    }

    /// Remove and return the component at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfBounds`] if there is no such component.
    pub fn remove_component(&mut self, index: usize) -> Result<Component> {
        if index >= self.components.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                len: self.components.len(),
            });
        }
        Ok(self.components.remove(index))
    }

    /// Move a component so that it lands before what was at `to`.
    ///
    /// Returns the component's final index.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfBounds`] if `from` is not a component.
    pub fn relocate_component(&mut self, from: usize, to: isize) -> Result<usize> {
        let len = self.components.len();
        if from >= len {
            return Err(Error::IndexOutOfBounds { index: from, len });
        }
        let target = relocation_index(from, to, len);
        let component = self.components.remove(from);
        self.components.insert(target, component);
        Ok(target)
    }

    /// Read a routine from its markup element.
    ///
    /// A [`ROUTINE_SETTINGS_TAG`] child becomes the settings component; every
    /// other child is appended as a component.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemplate`] when a child's tag has no profile.
    pub fn from_xml(registry: &TemplateRegistry, node: &Element) -> Result<Self> {
        let mut routine = Self::with_settings(Component::from_template_or_builtin(
            registry,
            ROUTINE_SETTINGS_TAG,
        )?);
        let name = node.attribute("name");
        for child in &node.children {
            let component = Component::from_xml(registry, child)?;
            if component.tag() == ROUTINE_SETTINGS_TAG {
                routine.settings = component;
            } else {
                routine.components.push(component);
            }
        }
        if let Some(name) = name {
            if routine.name().as_deref() != Some(name) {
                routine.set_name(registry, name)?;
            }
        }
        Ok(routine)
    }

    /// Write this routine as a markup element.
    #[must_use]
    pub fn to_xml(&self) -> Element {
        let mut node = Element::new(ROUTINE_TAG);
        if let Some(name) = self.name() {
            node.set_attribute("name", name);
        }
        node.push_child(self.settings.to_xml());
        for component in &self.components {
            node.push_child(component.to_xml());
        }
        node
    }

    /// Snapshot in the data-interchange shape.
    #[must_use]
    pub fn to_json(&self) -> RoutineNode {
        RoutineNode {
            tag: ROUTINE_TAG.to_string(),
            name: self.name(),
            settings: Some(self.settings.to_json()),
            components: Some(self.components.iter().map(Component::to_json).collect()),
            plugin: None,
            params: None,
        }
    }

    /// Build a routine from its data-interchange shape.
    ///
    /// # Errors
    ///
    /// Propagates [`Error::NameMapBorrowed`] from naming; a routine read
    /// from a node has no owner yet, so in practice this does not fail.
    pub fn from_json(registry: &TemplateRegistry, node: &RoutineNode) -> Result<Self> {
        let mut routine = match &node.settings {
            Some(settings) => Self::with_settings(Component::from_json(settings)),
            None => Self::with_settings(Component::from_template_or_builtin(
                registry,
                ROUTINE_SETTINGS_TAG,
            )?),
        };
        routine.components = node
            .components
            .iter()
            .flatten()
            .map(Component::from_json)
            .collect();
        if let Some(name) = &node.name {
            if routine.name().as_deref() != Some(name.as_str()) {
                routine.set_name(registry, name)?;
            }
        }
        Ok(routine)
    }

    /// Wrap this routine in a shared handle.
    #[must_use]
    pub fn shared(self) -> RoutineRef {
        Rc::new(RefCell::new(self))
    }
}

/// A routine-map value: either kind of routine.
#[derive(Debug, Clone)]
pub enum RoutineEntry {
    /// Component-bearing routine
    Routine(RoutineRef),
    /// Parameter-bearing standalone routine
    Standalone(StandaloneRef),
}

impl RoutineEntry {
    /// The routine's name.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        match self {
            Self::Routine(routine) => routine.borrow().name(),
            Self::Standalone(routine) => routine.borrow().name(),
        }
    }

    /// `"Routine"` or the standalone routine's tag.
    #[must_use]
    pub fn tag(&self) -> String {
        match self {
            Self::Routine(_) => ROUTINE_TAG.to_string(),
            Self::Standalone(routine) => routine.borrow().tag().to_string(),
        }
    }

    /// Set the routine's name, re-keying the owning routine map.
    ///
    /// # Errors
    ///
    /// See [`Routine::set_name`].
    pub fn set_name(&self, registry: &TemplateRegistry, name: &str) -> Result<()> {
        match self {
            Self::Routine(routine) => routine.borrow_mut().set_name(registry, name),
            Self::Standalone(routine) => routine.borrow_mut().set_name(registry, name),
        }
    }

    /// Record `map` as the routine map this routine is keyed in.
    pub(crate) fn adopt(&self, map: &SharedMap<Self>) {
        match self {
            Self::Routine(routine) => routine.borrow_mut().owner = Owner::new(map),
            Self::Standalone(routine) => routine.borrow_mut().owner = Owner::new(map),
        }
    }

    /// Whether both entries are the same routine instance.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Routine(a), Self::Routine(b)) => Rc::ptr_eq(a, b),
            (Self::Standalone(a), Self::Standalone(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Flow element referencing this routine.
    #[must_use]
    pub fn to_flow_element(&self) -> FlowElement {
        match self {
            Self::Routine(routine) => FlowElement::Routine(Rc::clone(routine)),
            Self::Standalone(routine) => FlowElement::Standalone(Rc::clone(routine)),
        }
    }

    /// Read a routine definition, dispatching on the element name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemplate`] when a tag has no profile.
    pub fn from_xml(registry: &TemplateRegistry, node: &Element) -> Result<Self> {
        if node.name == ROUTINE_TAG {
            Ok(Self::Routine(Routine::from_xml(registry, node)?.shared()))
        } else {
            Ok(Self::Standalone(
                StandaloneRoutine::from_xml(registry, node)?.shared(),
            ))
        }
    }

    /// Write the routine definition.
    #[must_use]
    pub fn to_xml(&self) -> Element {
        match self {
            Self::Routine(routine) => routine.borrow().to_xml(),
            Self::Standalone(routine) => routine.borrow().to_xml(),
        }
    }

    /// Read a routine definition, dispatching on its tag.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemplate`] if a plain routine lacks settings
    /// and the registry cannot supply them.
    pub fn from_json(registry: &TemplateRegistry, node: &RoutineNode) -> Result<Self> {
        if node.tag == ROUTINE_TAG {
            Ok(Self::Routine(Routine::from_json(registry, node)?.shared()))
        } else {
            Ok(Self::Standalone(StandaloneRoutine::from_json(node).shared()))
        }
    }

    /// Snapshot in the data-interchange shape.
    #[must_use]
    pub fn to_json(&self) -> RoutineNode {
        match self {
            Self::Routine(routine) => routine.borrow().to_json(),
            Self::Standalone(routine) => routine.borrow().to_json(),
        }
    }
}

impl Keyed for RoutineEntry {
    fn is_entity(&self, target: *const ()) -> bool {
        match self {
            Self::Routine(routine) => holds(&**routine, target),
            Self::Standalone(routine) => holds(&**routine, target),
        }
    }
}

impl From<Routine> for RoutineEntry {
    fn from(routine: Routine) -> Self {
        Self::Routine(routine.shared())
    }
}

impl From<StandaloneRoutine> for RoutineEntry {
    fn from(routine: StandaloneRoutine) -> Self {
        Self::Standalone(routine.shared())
    }
}
