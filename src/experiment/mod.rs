//! Experiment - the aggregate root of a document
//!
//! An [`Experiment`] owns the settings component, the routine map (keyed by
//! routine name), the loop map (keyed by loop name), and the [`Flow`]. Every
//! element in the flat flow is either a routine found in the routine map or
//! a loop marker registered in the loop map; the flow is only edited through
//! the experiment, which checks this on every insertion.
//!
//! ## Example
//!
//! ```rust
//! use std::rc::Rc;
//! use psyexp_model::{Experiment, TemplateRegistry};
//!
//! let registry = Rc::new(TemplateRegistry::new());
//! let mut exp = Experiment::builder("stroop.psyexp")
//!     .registry(registry)
//!     .version("2024.2.4")
//!     .build();
//!
//! assert!(exp.routine("trial").is_some());
//! exp.rename_routine("trial", "stroop")?;
//! assert_eq!(exp.flow().flat()[0].name().as_deref(), Some("stroop"));
//!
//! // a routine renamed through its own setter moves to its new key
//! exp.routine("stroop").unwrap().set_name(exp.registry(), "trial")?;
//! assert!(exp.routine("trial").is_some());
//! # Ok::<(), psyexp_model::Error>(())
//! ```

use std::cell::Ref;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::component::{Component, ROUTINE_SETTINGS_TAG, SETTINGS_ELEMENT, SETTINGS_TAG};
use crate::events::{DocumentEvent, Listener};
use crate::flow::{Flow, FlowElement, InitiatorRef, LoopInitiator, LoopTerminator, FLOW_TAG};
use crate::json::ExperimentNode;
use crate::markup::Element;
use crate::owner::SharedMap;
use crate::param::Param;
use crate::routine::{Routine, RoutineEntry, RoutineMap};
use crate::template::TemplateRegistry;
use crate::{Error, Result};

/// Root element name of a markup document.
pub const DOCUMENT_TAG: &str = "PsychoPy2experiment";

/// Markup element holding the routine definitions.
pub const ROUTINES_TAG: &str = "Routines";

/// Name of the routine every new document starts with.
pub const PLACEHOLDER_ROUTINE: &str = "trial";

/// Settings parameter selecting pilot (`"0"`) or run (`"1"`) mode.
pub const RUN_MODE_PARAM: &str = "runMode";

const PILOT: &str = "0";
const RUN: &str = "1";

/// A whole experiment document.
///
/// Routines and loop initiators are keyed by name in maps they hold a weak
/// handle to, so renaming one through its own setter re-keys the map. The
/// flow is only edited through this type, which checks that every element
/// it is given belongs here.
#[derive(Debug)]
pub struct Experiment {
    filename: String,
    version: Option<String>,
    settings: Component,
    routines: SharedMap<RoutineEntry>,
    loops: SharedMap<InitiatorRef>,
    flow: Flow,
    registry: Rc<TemplateRegistry>,
}

impl Experiment {
    /// Create a document holding one placeholder routine named `trial`,
    /// present in both the routine map and the flow.
    #[must_use]
    pub fn new(filename: impl Into<String>, registry: Rc<TemplateRegistry>) -> Self {
        let mut exp = Self::empty(filename.into(), None, registry);

        let mut settings = Component::from_template_or_builtin(&exp.registry, ROUTINE_SETTINGS_TAG)
            .unwrap_or_else(|_| Component::new(ROUTINE_SETTINGS_TAG));
        settings.set_name(&exp.registry, PLACEHOLDER_ROUTINE);
        let trial = RoutineEntry::from(Routine::with_settings(settings));
        exp.flow = Flow::from_flat(vec![trial.to_flow_element()]).unwrap_or_default();
        exp.keep_routine(PLACEHOLDER_ROUTINE.to_string(), trial);
        exp
    }

    /// Create a builder for a new document.
    #[must_use]
    pub fn builder(filename: impl Into<String>) -> ExperimentBuilder {
        ExperimentBuilder::new(filename)
    }

    fn empty(filename: String, version: Option<String>, registry: Rc<TemplateRegistry>) -> Self {
        let settings = Component::from_template_or_builtin(&registry, SETTINGS_TAG)
            .unwrap_or_else(|_| Component::new(SETTINGS_TAG));
        Self {
            filename,
            version,
            settings,
            routines: Rc::default(),
            loops: Rc::default(),
            flow: Flow::new(),
            registry,
        }
    }

    /// Document file name.
    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Document-wide version tag.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Replace the version tag.
    pub fn set_version(&mut self, version: impl Into<String>) {
        self.version = Some(version.into());
    }

    /// The registry entities of this document are resolved against.
    #[must_use]
    pub fn registry(&self) -> &TemplateRegistry {
        &self.registry
    }

    /// The experiment settings component.
    #[must_use]
    pub const fn settings(&self) -> &Component {
        &self.settings
    }

    /// Mutable access to the experiment settings component.
    pub fn settings_mut(&mut self) -> &mut Component {
        &mut self.settings
    }

    /// Routines keyed by name.
    ///
    /// Renaming a routine while this borrow is held fails with
    /// [`Error::NameMapBorrowed`].
    #[must_use]
    pub fn routines(&self) -> Ref<'_, RoutineMap> {
        self.routines.borrow()
    }

    /// Look up a routine by name.
    #[must_use]
    pub fn routine(&self, name: &str) -> Option<RoutineEntry> {
        self.routines.borrow().get(name).cloned()
    }

    /// Loop initiators keyed by loop name.
    #[must_use]
    pub fn loops(&self) -> Ref<'_, IndexMap<String, InitiatorRef>> {
        self.loops.borrow()
    }

    /// Look up a loop initiator by name.
    #[must_use]
    pub fn loop_initiator(&self, name: &str) -> Option<InitiatorRef> {
        self.loops.borrow().get(name).cloned()
    }

    /// The flow.
    #[must_use]
    pub const fn flow(&self) -> &Flow {
        &self.flow
    }

    /// Add a routine to the routine map under its own name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateRoutine`] if the name is taken.
    pub fn add_routine(&mut self, routine: impl Into<RoutineEntry>) -> Result<RoutineEntry> {
        let routine = routine.into();
        let name = routine.name().unwrap_or_default();
        if self.routines.borrow().contains_key(&name) {
            return Err(Error::DuplicateRoutine { name });
        }
        self.keep_routine(name, routine.clone());
        Ok(routine)
    }

    /// Insert a reference to routine `name` into the flow at `index`
    /// (negative appends). Returns its position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRoutine`] if no routine has that name.
    pub fn insert_routine(&mut self, name: &str, index: isize) -> Result<usize> {
        let element = self
            .routine(name)
            .map(|routine| routine.to_flow_element())
            .ok_or_else(|| Error::UnknownRoutine {
                name: name.to_string(),
            })?;
        self.flow.insert_element(element, index)
    }

    /// Insert an element of this experiment into the flow at `index`
    /// (negative appends). Returns its position.
    ///
    /// A terminator whose loop was left unmatched is matched again.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRoutine`] or [`Error::UnknownLoop`] when the
    /// element's name is not registered here, [`Error::ForeignElement`] when
    /// the name belongs to a different instance, and the errors of
    /// [`Flow::insert_element`]. The flow is unchanged on error.
    pub fn insert_element(&mut self, element: FlowElement, index: isize) -> Result<usize> {
        self.check_owned(&element)?;
        let FlowElement::Terminator(terminator) = &element else {
            return self.flow.insert_element(element, index);
        };

        let initiator = terminator.borrow().initiator();
        let rematched = match &initiator {
            Some(initiator) if !initiator.borrow().complete() => {
                LoopTerminator::attach(terminator, initiator);
                Some(Rc::clone(initiator))
            }
            _ => None,
        };
        let inserted = self.flow.insert_element(element, index);
        if let (Err(_), Some(initiator)) = (&inserted, rematched) {
            initiator.borrow_mut().detach_terminator();
        }
        inserted
    }

    /// Remove and return the flow element at `index`.
    ///
    /// Removing a terminator leaves its loop unmatched. Removing an
    /// initiator whose terminator is still in the flow fails; use
    /// [`Self::remove_loop`] for the pair.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Flow::remove_element`]; the flow is
    /// unchanged on error.
    pub fn remove_element(&mut self, index: usize) -> Result<FlowElement> {
        let detached = match self.flow.flat().get(index) {
            Some(FlowElement::Terminator(terminator)) => terminator.borrow().initiator(),
            _ => None,
        };
        let restore = detached.and_then(|initiator| {
            let terminator = initiator.borrow_mut().detach_terminator()?;
            Some((initiator, terminator))
        });

        let removed = self.flow.remove_element(index);
        if let (Err(_), Some((initiator, terminator))) = (&removed, restore) {
            LoopTerminator::attach(&terminator, &initiator);
        }
        removed
    }

    /// Move the flow element at `from` so it lands just before what was at
    /// `to` (negative appends). Returns its final position.
    ///
    /// # Errors
    ///
    /// Returns the errors of [`Flow::relocate_element`]; the flow is
    /// unchanged on error.
    pub fn relocate_element(&mut self, from: usize, to: isize) -> Result<usize> {
        self.flow.relocate_element(from, to)
    }

    /// Add a loop around the flat span `start..end` and register it by name.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLoop`] if a loop of that name exists, or
    /// [`Error::IndexOutOfBounds`] for an invalid span.
    pub fn insert_loop(&mut self, initiator: LoopInitiator, start: usize, end: isize) -> Result<InitiatorRef> {
        let name = initiator.name().unwrap_or_default();
        if self.loops.borrow().contains_key(&name) {
            return Err(Error::DuplicateLoop { name });
        }
        let initiator = initiator.shared();
        self.flow.insert_loop(&initiator, start, end)?;
        self.keep_loop(name, &initiator);
        Ok(initiator)
    }

    /// Remove loop `name`: both markers leave the flow, the body stays, and
    /// the name is freed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownLoop`] if there is no such loop.
    pub fn remove_loop(&mut self, name: &str) -> Result<InitiatorRef> {
        let initiator = self.loop_initiator(name).ok_or_else(|| Error::UnknownLoop {
            name: name.to_string(),
        })?;

        let terminator = initiator.borrow().terminator();
        if let Some(terminator) = terminator {
            let element = FlowElement::Terminator(terminator);
            if let Some(index) = self.flow.index_of(&element) {
                self.remove_element(index)?;
            } else {
                initiator.borrow_mut().detach_terminator();
            }
        }
        if let Some(index) = self.flow.index_of(&FlowElement::Initiator(Rc::clone(&initiator))) {
            self.flow.remove_element(index)?;
        }
        self.loops.borrow_mut().shift_remove(name);
        debug!(loop_name = name, "loop removed");
        Ok(initiator)
    }

    /// Rename a routine, re-keying the routine map in place.
    ///
    /// The routine keeps its identity, its map position and its flow
    /// positions. Same as [`RoutineEntry::set_name`], plus a
    /// [`DocumentEvent::RoutineRenamed`] notification.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRoutine`] if `from` is not a routine, or
    /// [`Error::DuplicateRoutine`] if `to` is taken by another routine.
    pub fn rename_routine(&mut self, from: &str, to: &str) -> Result<()> {
        let routine = self.routine(from).ok_or_else(|| Error::UnknownRoutine {
            name: from.to_string(),
        })?;
        if from == to {
            return Ok(());
        }
        routine.set_name(&self.registry, to)?;

        self.flow.emit(&DocumentEvent::RoutineRenamed {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    /// Rename a loop, its terminator and its loop-map key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownLoop`] if `from` is not a loop, or
    /// [`Error::DuplicateLoop`] if `to` is taken by another loop.
    pub fn rename_loop(&mut self, from: &str, to: &str) -> Result<()> {
        let initiator = self.loop_initiator(from).ok_or_else(|| Error::UnknownLoop {
            name: from.to_string(),
        })?;
        if from == to {
            return Ok(());
        }
        initiator.borrow_mut().set_name(&self.registry, to)?;

        self.flow.emit(&DocumentEvent::LoopRenamed {
            from: from.to_string(),
            to: to.to_string(),
        });
        Ok(())
    }

    /// Whether the experiment runs in pilot mode.
    #[must_use]
    pub fn pilot_mode(&self) -> bool {
        let run_mode = match self.settings.params.get(RUN_MODE_PARAM) {
            Some(param) => {
                let text = param.borrow().val_str().into_owned();
                text
            }
            None => Param::from_template(&self.registry, SETTINGS_TAG, RUN_MODE_PARAM)
                .val_str()
                .into_owned(),
        };
        run_mode == PILOT
    }

    /// Switch between pilot and run mode.
    pub fn set_pilot_mode(&mut self, pilot: bool) {
        let param = match self.settings.params.get(RUN_MODE_PARAM) {
            Some(param) => param,
            None => {
                let param = Param::from_template(&self.registry, SETTINGS_TAG, RUN_MODE_PARAM).shared();
                self.settings.params.set(RUN_MODE_PARAM, Rc::clone(&param));
                param
            }
        };
        param.borrow_mut().set_val(if pilot { PILOT } else { RUN });
    }

    /// Register a listener for successful structural edits.
    pub fn subscribe(&mut self, listener: Listener) {
        self.flow.subscribe(listener);
    }

    /// Snapshot in the data-interchange shape.
    #[must_use]
    pub fn to_node(&self) -> ExperimentNode {
        ExperimentNode {
            filename: self.filename.clone(),
            version: self.version.clone(),
            settings: self.settings.to_json(),
            routines: self
                .routines
                .borrow()
                .iter()
                .map(|(name, routine)| (name.clone(), routine.to_json()))
                .collect(),
            flow: self.flow.to_json(),
        }
    }

    /// The document as a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a parameter value cannot be serialised.
    pub fn to_json(&self) -> Result<Value> {
        let value = serde_json::to_value(self.to_node())?;
        info!(
            filename = %self.filename,
            routines = self.routines.borrow().len(),
            flow = self.flow.len(),
            "experiment serialised to JSON"
        );
        Ok(value)
    }

    /// The document as JSON text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if a parameter value cannot be serialised.
    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_json()?)?)
    }

    /// Build a document from its data-interchange shape.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRoutine`] or [`Error::UnknownLoop`] when a
    /// flow entry cannot be resolved, [`Error::UnmatchedTerminator`] for a
    /// corrupt flow, and [`Error::UnknownTemplate`] for a routine the
    /// registry cannot build.
    pub fn from_node(registry: Rc<TemplateRegistry>, node: &ExperimentNode) -> Result<Self> {
        let mut exp = Self::empty(node.filename.clone(), node.version.clone(), registry);
        exp.settings = Component::from_json(&node.settings);

        for (name, routine) in &node.routines {
            let routine = RoutineEntry::from_json(&exp.registry, routine)?;
            exp.keep_routine(name.clone(), routine);
        }

        let mut flat = Vec::with_capacity(node.flow.len());
        for entry in &node.flow {
            let element = match entry.tag.as_deref() {
                Some(LoopInitiator::TAG) => {
                    let initiator = LoopInitiator::from_json(&exp.registry, entry).shared();
                    exp.register_loop(&entry.name, &initiator)
                }
                Some(LoopTerminator::TAG) => {
                    exp.pair_terminator(LoopTerminator::from_json(entry))?
                }
                _ => exp.resolve_routine(&entry.name)?,
            };
            flat.push(element);
        }
        exp.flow.replace_flat(flat)?;

        info!(
            filename = %exp.filename,
            routines = exp.routines.borrow().len(),
            flow = exp.flow.len(),
            "experiment loaded from JSON"
        );
        Ok(exp)
    }

    /// Build a document from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Json`] if the value does not have the document shape,
    /// and otherwise the errors of [`Self::from_node`].
    pub fn from_json(registry: Rc<TemplateRegistry>, value: &Value) -> Result<Self> {
        let node = ExperimentNode::deserialize(value)?;
        Self::from_node(registry, &node)
    }

    /// Build a document from JSON text.
    ///
    /// # Errors
    ///
    /// See [`Self::from_json`].
    pub fn from_json_str(registry: Rc<TemplateRegistry>, text: &str) -> Result<Self> {
        let node: ExperimentNode = serde_json::from_str(text)?;
        Self::from_node(registry, &node)
    }

    /// The document as a markup element.
    #[must_use]
    pub fn to_xml(&self) -> Element {
        let mut root = Element::new(DOCUMENT_TAG).with_attribute("encoding", "utf-8");
        if let Some(version) = &self.version {
            root.set_attribute("version", version);
        }

        let mut settings = self.settings.to_xml();
        settings.remove_attribute("name");
        settings.remove_attribute("plugin");
        root.push_child(settings);

        let mut routines = Element::new(ROUTINES_TAG);
        for routine in self.routines.borrow().values() {
            routines.push_child(routine.to_xml());
        }
        root.push_child(routines);
        root.push_child(self.flow.to_xml());

        info!(
            filename = %self.filename,
            routines = self.routines.borrow().len(),
            flow = self.flow.len(),
            "experiment serialised to markup"
        );
        root
    }

    /// The document as markup text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Markup`] if the writer fails.
    pub fn to_xml_string(&self) -> Result<String> {
        self.to_xml().to_xml_string()
    }

    /// Build a document from its markup element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingElement`] when `Settings`, `Routines` or
    /// `Flow` is absent, and otherwise the errors of [`Self::from_node`].
    pub fn from_xml(registry: Rc<TemplateRegistry>, filename: impl Into<String>, node: &Element) -> Result<Self> {
        let version = node.attribute("version").map(str::to_string);
        let mut exp = Self::empty(filename.into(), version, registry);
        exp.settings = Component::from_xml(&exp.registry, node.require_child(SETTINGS_ELEMENT)?)?;

        for child in &node.require_child(ROUTINES_TAG)?.children {
            let routine = RoutineEntry::from_xml(&exp.registry, child)?;
            let name = child
                .attribute("name")
                .map(str::to_string)
                .or_else(|| routine.name())
                .unwrap_or_default();
            exp.keep_routine(name, routine);
        }

        let flow_node = node.require_child(FLOW_TAG)?;
        let mut flat = Vec::with_capacity(flow_node.children.len());
        for child in &flow_node.children {
            let element = match child.name.as_str() {
                LoopInitiator::TAG => {
                    let initiator = LoopInitiator::from_xml(&exp.registry, child)?;
                    let name = initiator.name().unwrap_or_default();
                    exp.register_loop(&name, &initiator.shared())
                }
                LoopTerminator::TAG => exp.pair_terminator(LoopTerminator::from_xml(child))?,
                _ => exp.resolve_routine(child.attribute("name").unwrap_or_default())?,
            };
            flat.push(element);
        }
        exp.flow.replace_flat(flat)?;

        info!(
            filename = %exp.filename,
            routines = exp.routines.borrow().len(),
            flow = exp.flow.len(),
            "experiment loaded from markup"
        );
        Ok(exp)
    }

    /// Build a document from markup text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Markup`] for malformed text, and otherwise the errors
    /// of [`Self::from_xml`].
    pub fn from_xml_str(registry: Rc<TemplateRegistry>, filename: impl Into<String>, text: &str) -> Result<Self> {
        let root = Element::parse(text)?;
        Self::from_xml(registry, filename, &root)
    }

    fn keep_routine(&mut self, name: String, routine: RoutineEntry) {
        routine.adopt(&self.routines);
        self.routines.borrow_mut().insert(name, routine);
    }

    fn keep_loop(&mut self, name: String, initiator: &InitiatorRef) {
        LoopInitiator::adopt(initiator, &self.loops);
        self.loops.borrow_mut().insert(name, Rc::clone(initiator));
    }

    /// Check that `element` is registered here under its own name and, for
    /// a loop marker, is not already in the flow.
    fn check_owned(&self, element: &FlowElement) -> Result<()> {
        let name = element.name().unwrap_or_default();
        let registered = match element {
            FlowElement::Routine(_) | FlowElement::Standalone(_) => {
                let Some(routine) = self.routine(&name) else {
                    return Err(Error::UnknownRoutine { name });
                };
                routine.to_flow_element() == *element
            }
            FlowElement::Initiator(initiator) => {
                let Some(known) = self.loop_initiator(&name) else {
                    return Err(Error::UnknownLoop { name });
                };
                Rc::ptr_eq(&known, initiator)
            }
            FlowElement::Terminator(terminator) => {
                let initiator = terminator.borrow().initiator();
                let Some(known) = self.loop_initiator(&name) else {
                    return Err(Error::UnknownLoop { name });
                };
                initiator.is_some_and(|initiator| Rc::ptr_eq(&known, &initiator))
            }
        };
        if !registered {
            warn!(element = %name, "flow element belongs to another document");
            return Err(Error::ForeignElement { name });
        }
        if element.is_loop_marker() && self.flow.index_of(element).is_some() {
            return Err(Error::DuplicateLoop { name });
        }
        Ok(())
    }

    fn register_loop(&mut self, name: &str, initiator: &InitiatorRef) -> FlowElement {
        self.keep_loop(name.to_string(), initiator);
        FlowElement::Initiator(Rc::clone(initiator))
    }

    fn pair_terminator(&self, terminator: LoopTerminator) -> Result<FlowElement> {
        let Some(initiator) = self.loop_initiator(terminator.name()) else {
            let name = terminator.name().to_string();
            warn!(loop_name = %name, "terminator references a loop not seen yet");
            return Err(Error::UnknownLoop { name });
        };
        let terminator = terminator.shared();
        LoopTerminator::attach(&terminator, &initiator);
        Ok(FlowElement::Terminator(terminator))
    }

    fn resolve_routine(&self, name: &str) -> Result<FlowElement> {
        match self.routine(name) {
            Some(routine) => Ok(routine.to_flow_element()),
            None => {
                warn!(routine = name, "flow references a routine missing from the routine map");
                Err(Error::UnknownRoutine {
                    name: name.to_string(),
                })
            }
        }
    }
}

/// Builder for [`Experiment`].
#[derive(Debug)]
pub struct ExperimentBuilder {
    filename: String,
    version: Option<String>,
    registry: Option<Rc<TemplateRegistry>>,
}

impl ExperimentBuilder {
    /// Create a new builder for a document called `filename`.
    #[must_use]
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            version: None,
            registry: None,
        }
    }

    /// Set the template registry.
    ///
    /// Without one the document uses an empty registry; its built-in
    /// settings components are then bare, and it reloads against an empty
    /// registry as well.
    #[must_use]
    pub fn registry(mut self, registry: Rc<TemplateRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Set the version tag.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    /// Build the document.
    #[must_use]
    pub fn build(self) -> Experiment {
        let registry = self.registry.unwrap_or_default();
        let mut exp = Experiment::new(self.filename, registry);
        exp.version = self.version;
        exp
    }
}
