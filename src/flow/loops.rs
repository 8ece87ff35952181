//! Loop markers - the flat-sequence form of a loop
//!
//! A loop is stored in the flow as a [`LoopInitiator`] followed, later, by
//! a [`LoopTerminator`] of the same name. The pair is either `unmatched`
//! (initiator without terminator, a transient editing state) or `matched`.
//!
//! ```text
//!   unmatched ──(add_terminator / parse-time matching)──> matched
//! ```
//!
//! The initiator owns its terminator; the terminator points back through a
//! weak handle so the pair never forms a reference cycle. Renaming an
//! initiator renames its terminator and re-keys the experiment's loop map.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::component::{name_of, set_name_of};
use crate::json::FlowEntryNode;
use crate::markup::Element;
use crate::owner::{address_of, holds, Keyed, Owner, SharedMap};
use crate::param::{Param, ParamsArray};
use crate::template::TemplateRegistry;
use crate::{Error, Result};

/// Shared handle to a [`LoopInitiator`].
pub type InitiatorRef = Rc<RefCell<LoopInitiator>>;

/// Shared handle to a [`LoopTerminator`].
pub type TerminatorRef = Rc<RefCell<LoopTerminator>>;

/// Start marker of a loop, carrying its iteration parameters.
#[derive(Debug, Clone)]
pub struct LoopInitiator {
    loop_type: String,
    /// Plugin the loop type comes from, if any
    pub plugin: Option<String>,
    /// Loop iteration parameters
    pub params: ParamsArray,
    terminator: Option<TerminatorRef>,
    owner: Owner<InitiatorRef>,
}

impl LoopInitiator {
    /// Tag (and markup element name) of initiators.
    pub const TAG: &'static str = "LoopInitiator";

    /// Create an unmatched initiator with no parameters.
    #[must_use]
    pub fn new(loop_type: impl Into<String>) -> Self {
        Self {
            loop_type: loop_type.into(),
            plugin: None,
            params: ParamsArray::new(),
            terminator: None,
            owner: Owner::default(),
        }
    }

    /// Create an unmatched initiator with every parameter of its loop type.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemplate`](crate::Error::UnknownTemplate) when
    /// the registry has no profile for `loop_type`.
    pub fn from_template(registry: &TemplateRegistry, loop_type: &str) -> Result<Self> {
        let profile = registry.require(loop_type)?;
        let mut initiator = Self::new(loop_type);
        initiator.plugin.clone_from(&profile.plugin);
        for name in profile.params.keys() {
            initiator.params.set(
                name.as_str(),
                Param::from_template(registry, loop_type, name).shared(),
            );
        }
        Ok(initiator)
    }

    /// The loop type tag (`TrialHandler`, `StairHandler`, ...).
    #[must_use]
    pub fn loop_type(&self) -> &str {
        &self.loop_type
    }

    /// The loop's name, if it has a `name` parameter.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        name_of(&self.params)
    }

    /// Set the loop's name, creating the `name` parameter if absent.
    ///
    /// An attached terminator takes the same name, and an initiator keyed in
    /// an experiment's loop map moves to the new key.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateLoop`] if another loop of the same
    /// experiment has that name, or [`Error::NameMapBorrowed`] if the loop
    /// map is borrowed. Nothing is renamed on error.
    pub fn set_name(&mut self, registry: &TemplateRegistry, name: &str) -> Result<()> {
        let target = address_of(self);
        let old = self.name();
        self.owner.rename(
            target,
            old,
            name,
            |name| Error::DuplicateLoop { name },
            || {
                set_name_of(&mut self.params, registry, &self.loop_type, name);
                if let Some(terminator) = &self.terminator {
                    terminator.borrow_mut().name = name.to_string();
                }
            },
        )
    }

    /// Unlink the terminator, returning the pair to `unmatched`.
    pub(crate) fn detach_terminator(&mut self) -> Option<TerminatorRef> {
        self.terminator.take()
    }

    /// Record `map` as the loop map `initiator` is keyed in.
    pub(crate) fn adopt(initiator: &InitiatorRef, map: &SharedMap<InitiatorRef>) {
        initiator.borrow_mut().owner = Owner::new(map);
    }

    /// Whether a terminator has been attached.
    #[must_use]
    pub const fn complete(&self) -> bool {
        self.terminator.is_some()
    }

    /// The attached terminator, if matched.
    #[must_use]
    pub fn terminator(&self) -> Option<TerminatorRef> {
        self.terminator.clone()
    }

    /// Create a terminator for `initiator` and attach it.
    ///
    /// The terminator takes the initiator's name and points back to it.
    #[must_use]
    pub fn add_terminator(initiator: &InitiatorRef) -> TerminatorRef {
        let name = initiator.borrow().name().unwrap_or_default();
        let terminator = Rc::new(RefCell::new(LoopTerminator {
            name,
            initiator: Rc::downgrade(initiator),
        }));
        initiator.borrow_mut().terminator = Some(Rc::clone(&terminator));
        terminator
    }

    /// Independent copy of every parameter.
    #[must_use]
    pub fn copy_params(&self) -> ParamsArray {
        self.params.copy()
    }

    /// Read an initiator from its markup element.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownTemplate`](crate::Error::UnknownTemplate) when
    /// the `loopType` has no registered profile.
    pub fn from_xml(registry: &TemplateRegistry, node: &Element) -> Result<Self> {
        let loop_type = node.attribute("loopType").unwrap_or_default();
        let mut initiator = Self::from_template(registry, loop_type)?;
        if let Some(name) = node.attribute("name") {
            initiator.set_name(registry, name)?;
        }
        initiator.params.read_xml(registry, loop_type, node);
        Ok(initiator)
    }

    /// Write this initiator as a markup element.
    #[must_use]
    pub fn to_xml(&self) -> Element {
        let mut node = Element::new(Self::TAG).with_attribute("loopType", self.loop_type.as_str());
        if let Some(name) = self.name() {
            node.set_attribute("name", name);
        }
        self.params.write_xml(&mut node);
        node
    }

    /// Snapshot in the data-interchange shape.
    #[must_use]
    pub fn to_json(&self) -> FlowEntryNode {
        FlowEntryNode {
            tag: Some(Self::TAG.to_string()),
            name: self.name().unwrap_or_default(),
            loop_type: Some(self.loop_type.clone()),
            params: Some(self.params.to_json()),
        }
    }

    /// Build an initiator from its data-interchange shape.
    #[must_use]
    pub fn from_json(registry: &TemplateRegistry, node: &FlowEntryNode) -> Self {
        let mut initiator = Self::new(node.loop_type.clone().unwrap_or_default());
        if let Some(params) = &node.params {
            initiator.params = ParamsArray::from_json(params);
        }
        if initiator.name().as_deref() != Some(node.name.as_str()) {
            let loop_type = initiator.loop_type.clone();
            set_name_of(&mut initiator.params, registry, &loop_type, &node.name);
        }
        initiator
    }

    /// Wrap this initiator in a shared handle.
    #[must_use]
    pub fn shared(self) -> InitiatorRef {
        Rc::new(RefCell::new(self))
    }
}

/// End marker of a loop.
#[derive(Debug, Clone)]
pub struct LoopTerminator {
    name: String,
    initiator: Weak<RefCell<LoopInitiator>>,
}

impl Keyed for InitiatorRef {
    fn is_entity(&self, target: *const ()) -> bool {
        holds(&**self, target)
    }
}

impl LoopTerminator {
    /// Tag (and markup element name) of terminators.
    pub const TAG: &'static str = "LoopTerminator";

    /// Create a terminator not yet matched to any initiator.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initiator: Weak::new(),
        }
    }

    /// Name of the loop this terminator closes.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The matched initiator, if it is still alive.
    #[must_use]
    pub fn initiator(&self) -> Option<InitiatorRef> {
        self.initiator.upgrade()
    }

    /// Match `terminator` to `initiator`, linking both directions.
    pub fn attach(terminator: &TerminatorRef, initiator: &InitiatorRef) {
        terminator.borrow_mut().initiator = Rc::downgrade(initiator);
        initiator.borrow_mut().terminator = Some(Rc::clone(terminator));
    }

    /// Read a terminator from its markup element.
    #[must_use]
    pub fn from_xml(node: &Element) -> Self {
        Self::new(node.attribute("name").unwrap_or_default())
    }

    /// Write this terminator as a markup element.
    #[must_use]
    pub fn to_xml(&self) -> Element {
        Element::new(Self::TAG).with_attribute("name", self.name.as_str())
    }

    /// Snapshot in the data-interchange shape.
    #[must_use]
    pub fn to_json(&self) -> FlowEntryNode {
        FlowEntryNode {
            tag: Some(Self::TAG.to_string()),
            name: self.name.clone(),
            loop_type: None,
            params: None,
        }
    }

    /// Build a terminator from its data-interchange shape.
    #[must_use]
    pub fn from_json(node: &FlowEntryNode) -> Self {
        Self::new(node.name.as_str())
    }

    /// Wrap this terminator in a shared handle.
    #[must_use]
    pub fn shared(self) -> TerminatorRef {
        Rc::new(RefCell::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TemplateRegistry {
        TemplateRegistry::from_value(serde_json::json!({
            "TrialHandler": {
                "params": {
                    "name": { "val": "trials", "categ": "Basic" },
                    "nReps": { "val": 5, "categ": "Basic", "valType": "num" },
                    "loopType": { "val": "random", "categ": "Basic" }
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_add_terminator_matches_pair() {
        let registry = registry();
        let mut initiator = LoopInitiator::from_template(&registry, "TrialHandler").unwrap();
        initiator.set_name(&registry, "blocks").unwrap();
        let initiator = initiator.shared();
        assert!(!initiator.borrow().complete());

        let terminator = LoopInitiator::add_terminator(&initiator);

        assert!(initiator.borrow().complete());
        assert_eq!(terminator.borrow().name(), "blocks");
        let back = terminator.borrow().initiator().unwrap();
        assert!(Rc::ptr_eq(&back, &initiator));
    }

    #[test]
    fn test_rename_carries_terminator_along() {
        let registry = registry();
        let initiator = LoopInitiator::from_template(&registry, "TrialHandler").unwrap().shared();
        let terminator = LoopInitiator::add_terminator(&initiator);

        initiator.borrow_mut().set_name(&registry, "blocks").unwrap();

        assert_eq!(initiator.borrow().name().as_deref(), Some("blocks"));
        assert_eq!(terminator.borrow().name(), "blocks");
        assert_eq!(terminator.borrow().to_xml().attribute("name"), Some("blocks"));
    }

    #[test]
    fn test_attach_links_both_directions() {
        let initiator = LoopInitiator::new("TrialHandler").shared();
        let terminator = LoopTerminator::new("trials").shared();
        assert!(terminator.borrow().initiator().is_none());

        LoopTerminator::attach(&terminator, &initiator);

        assert!(initiator.borrow().complete());
        assert!(terminator.borrow().initiator().is_some());
    }

    #[test]
    fn test_initiator_xml_reads_loop_type_and_params() {
        let registry = registry();
        let node = Element::new(LoopInitiator::TAG)
            .with_attribute("loopType", "TrialHandler")
            .with_attribute("name", "practice")
            .with_child(
                Element::new("Param")
                    .with_attribute("name", "nReps")
                    .with_attribute("val", "2"),
            );

        let initiator = LoopInitiator::from_xml(&registry, &node).unwrap();
        assert_eq!(initiator.loop_type(), "TrialHandler");
        assert_eq!(initiator.name().as_deref(), Some("practice"));
        assert_eq!(initiator.params.get("nReps").unwrap().borrow().val_str(), "2");
        assert_eq!(initiator.params.get("loopType").unwrap().borrow().val_str(), "random");

        let written = initiator.to_xml();
        assert_eq!(written.attribute("loopType"), Some("TrialHandler"));
        assert_eq!(written.attribute("name"), Some("practice"));
    }

    #[test]
    fn test_initiator_json_keeps_non_string_values() {
        let registry = registry();
        let initiator = LoopInitiator::from_template(&registry, "TrialHandler").unwrap();
        let node = initiator.to_json();
        assert_eq!(node.tag.as_deref(), Some(LoopInitiator::TAG));

        let restored = LoopInitiator::from_json(&registry, &node);
        assert_eq!(restored.name().as_deref(), Some("trials"));
        assert_eq!(
            restored.params.get("nReps").unwrap().borrow().val,
            serde_json::Value::from(5)
        );
    }

    #[test]
    fn test_terminator_xml() {
        let terminator = LoopTerminator::from_xml(&Element::new(LoopTerminator::TAG).with_attribute("name", "trials"));
        assert_eq!(terminator.name(), "trials");
        assert_eq!(terminator.to_xml().attribute("name"), Some("trials"));
    }
}
