//! Flow - the experiment's execution order
//!
//! The canonical form is a flat sequence of routines interleaved with loop
//! start/end markers. The nested [`FlowTree`] is derived from it and is
//! recomputed inside every mutator, so a caller never sees the two disagree.
//!
//! Structural edits address the flat sequence by index:
//!
//! - a negative target index means "append at the end";
//! - when relocating forward, the target shifts left by one to account for
//!   the removal, so the element lands just before what was at the
//!   requested index.
//!
//! A failed resynchronisation (an unmatched terminator) rolls the edit back.

mod loops;
mod tree;

pub use loops::{InitiatorRef, LoopInitiator, LoopTerminator, TerminatorRef};
pub use tree::{FlowLoop, FlowNode, FlowTree, LoopId, LoopParent};

use std::rc::Rc;

use tracing::debug;

use crate::events::{DocumentEvent, Listener, Listeners};
use crate::json::FlowEntryNode;
use crate::markup::Element;
use crate::routine::{RoutineEntry, RoutineRef, StandaloneRef, ROUTINE_TAG};
use crate::{Error, Result};

/// Markup element name of the flow.
pub const FLOW_TAG: &str = "Flow";

/// One entry of the flat flow sequence.
///
/// Equality is identity: two elements are equal when they are the same
/// underlying instance.
#[derive(Debug, Clone)]
pub enum FlowElement {
    /// Component-bearing routine
    Routine(RoutineRef),
    /// Standalone routine
    Standalone(StandaloneRef),
    /// Loop start marker
    Initiator(InitiatorRef),
    /// Loop end marker
    Terminator(TerminatorRef),
}

impl PartialEq for FlowElement {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Routine(a), Self::Routine(b)) => Rc::ptr_eq(a, b),
            (Self::Standalone(a), Self::Standalone(b)) => Rc::ptr_eq(a, b),
            (Self::Initiator(a), Self::Initiator(b)) => Rc::ptr_eq(a, b),
            (Self::Terminator(a), Self::Terminator(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl FlowElement {
    /// Name of the routine or loop this element belongs to.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        match self {
            Self::Routine(routine) => routine.borrow().name(),
            Self::Standalone(routine) => routine.borrow().name(),
            Self::Initiator(initiator) => initiator.borrow().name(),
            Self::Terminator(terminator) => Some(terminator.borrow().name().to_string()),
        }
    }

    /// Whether this element is a loop marker.
    #[must_use]
    pub const fn is_loop_marker(&self) -> bool {
        matches!(self, Self::Initiator(_) | Self::Terminator(_))
    }

    /// The routine-map entry this element refers to, if it is a routine.
    #[must_use]
    pub fn as_routine(&self) -> Option<RoutineEntry> {
        match self {
            Self::Routine(routine) => Some(RoutineEntry::Routine(Rc::clone(routine))),
            Self::Standalone(routine) => Some(RoutineEntry::Standalone(Rc::clone(routine))),
            Self::Initiator(_) | Self::Terminator(_) => None,
        }
    }

    /// Markup form as it appears inside `<Flow>`.
    ///
    /// Routines are written as a reference element carrying only a name.
    #[must_use]
    pub fn to_xml(&self) -> Element {
        let tag = match self {
            Self::Routine(_) => ROUTINE_TAG.to_string(),
            Self::Standalone(routine) => routine.borrow().tag().to_string(),
            Self::Initiator(initiator) => return initiator.borrow().to_xml(),
            Self::Terminator(terminator) => return terminator.borrow().to_xml(),
        };
        let mut node = Element::new(tag);
        if let Some(name) = self.name() {
            node.set_attribute("name", name);
        }
        node
    }

    /// Interchange form as it appears in the `flow` sequence.
    #[must_use]
    pub fn to_json(&self) -> FlowEntryNode {
        match self {
            Self::Routine(_) | Self::Standalone(_) => {
                FlowEntryNode::routine(self.name().unwrap_or_default())
            }
            Self::Initiator(initiator) => initiator.borrow().to_json(),
            Self::Terminator(terminator) => terminator.borrow().to_json(),
        }
    }
}

impl From<RoutineEntry> for FlowElement {
    fn from(entry: RoutineEntry) -> Self {
        match entry {
            RoutineEntry::Routine(routine) => Self::Routine(routine),
            RoutineEntry::Standalone(routine) => Self::Standalone(routine),
        }
    }
}

/// Normalise an insertion index: negative appends, too large clamps.
pub(crate) fn insertion_index(index: isize, len: usize) -> usize {
    usize::try_from(index).map_or(len, |index| index.min(len))
}

/// Final position of an element moved from `from` towards `to` in a
/// sequence of `len` elements.
pub(crate) fn relocation_index(from: usize, to: isize, len: usize) -> usize {
    let last = len.saturating_sub(1);
    match usize::try_from(to) {
        Ok(to) if to > from => (to - 1).min(last),
        Ok(to) => to.min(last),
        Err(_) => last,
    }
}

/// The flat flow sequence and its derived tree.
#[derive(Debug, Default)]
pub struct Flow {
    flat: Vec<FlowElement>,
    tree: FlowTree,
    listeners: Listeners,
}

impl Flow {
    /// Create an empty flow.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a flow from a flat sequence.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnmatchedTerminator`] for a corrupt sequence.
    pub fn from_flat(flat: Vec<FlowElement>) -> Result<Self> {
        let mut flow = Self::new();
        flow.replace_flat(flat)?;
        Ok(flow)
    }

    /// The canonical flat sequence.
    #[must_use]
    pub fn flat(&self) -> &[FlowElement] {
        &self.flat
    }

    /// The derived nested tree.
    #[must_use]
    pub const fn dynamic(&self) -> &FlowTree {
        &self.tree
    }

    /// Number of flat elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.flat.len()
    }

    /// Whether the flow is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flat.is_empty()
    }

    /// Position of `element` (by identity) in the flat sequence.
    #[must_use]
    pub fn index_of(&self, element: &FlowElement) -> Option<usize> {
        self.flat.iter().position(|candidate| candidate == element)
    }

    /// Re-derive the tree from the flat sequence.
    ///
    /// On failure the previous tree is kept.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnmatchedTerminator`] for a corrupt sequence.
    pub fn dynamicize(&mut self) -> Result<()> {
        self.tree = FlowTree::dynamicize(&self.flat)?;
        Ok(())
    }

    /// The flat sequence rebuilt from the tree.
    #[must_use]
    pub fn flatten(&self) -> Vec<FlowElement> {
        self.tree.flatten()
    }

    /// Replace the whole flat sequence, deriving its tree once.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnmatchedTerminator`] for a corrupt sequence; the
    /// flow is left unchanged.
    pub fn replace_flat(&mut self, flat: Vec<FlowElement>) -> Result<()> {
        let tree = FlowTree::dynamicize(&flat)?;
        self.flat = flat;
        self.tree = tree;
        debug!(elements = self.flat.len(), loops = self.tree.loops().len(), "flow resynchronised");
        Ok(())
    }

    /// Insert `element` at `index` (negative appends). Returns its position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnmatchedTerminator`] if the edit would orphan a
    /// terminator; the flow is left unchanged.
    pub fn insert_element(&mut self, element: FlowElement, index: isize) -> Result<usize> {
        let index = insertion_index(index, self.flat.len());
        let mut flat = self.flat.clone();
        flat.insert(index, element);
        self.replace_flat(flat)?;
        debug!(index, len = self.flat.len(), "flow element inserted");
        self.listeners.emit(&DocumentEvent::ElementInserted { index });
        Ok(index)
    }

    /// Remove and return the element at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfBounds`] for a bad index, or
    /// [`Error::UnmatchedTerminator`] if the edit would orphan a terminator;
    /// the flow is left unchanged.
    pub fn remove_element(&mut self, index: usize) -> Result<FlowElement> {
        self.check_index(index)?;
        let mut flat = self.flat.clone();
        let element = flat.remove(index);
        self.replace_flat(flat)?;
        debug!(index, len = self.flat.len(), "flow element removed");
        self.listeners.emit(&DocumentEvent::ElementRemoved { index });
        Ok(element)
    }

    /// Move the element at `from` so it lands just before what was at `to`
    /// (negative appends). Returns its final position.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfBounds`] for a bad source index, or
    /// [`Error::UnmatchedTerminator`] if the move would orphan a terminator;
    /// the flow is left unchanged.
    pub fn relocate_element(&mut self, from: usize, to: isize) -> Result<usize> {
        self.check_index(from)?;
        let target = relocation_index(from, to, self.flat.len());
        let mut flat = self.flat.clone();
        let element = flat.remove(from);
        flat.insert(target, element);
        self.replace_flat(flat)?;
        debug!(from, to = target, "flow element relocated");
        self.listeners.emit(&DocumentEvent::ElementRelocated { from, to: target });
        Ok(target)
    }

    /// Wrap the span `start..end` of the flat sequence in a matched loop.
    ///
    /// The initiator is placed at `start` and its terminator before the
    /// element that was at `end` (a negative `end` closes the loop at the
    /// end of the flow). An unmatched initiator is matched first.
    ///
    /// # Errors
    ///
    /// Returns [`Error::IndexOutOfBounds`] when `start` lies past `end` or
    /// past the end of the flow.
    pub fn insert_loop(&mut self, initiator: &InitiatorRef, start: usize, end: isize) -> Result<(usize, usize)> {
        let len = self.flat.len();
        let end = insertion_index(end, len);
        if start > end {
            return Err(Error::IndexOutOfBounds { index: start, len });
        }
        let existing = initiator.borrow().terminator();
        let terminator = match existing {
            Some(terminator) => terminator,
            None => LoopInitiator::add_terminator(initiator),
        };

        let mut flat = self.flat.clone();
        flat.insert(end, FlowElement::Terminator(terminator));
        flat.insert(start, FlowElement::Initiator(Rc::clone(initiator)));
        self.replace_flat(flat)?;

        let end = end + 1;
        let name = initiator.borrow().name().unwrap_or_default();
        debug!(loop_name = %name, start, end, "loop inserted");
        self.listeners.emit(&DocumentEvent::LoopInserted { name, start, end });
        Ok((start, end))
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.flat.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                len: self.flat.len(),
            });
        }
        Ok(())
    }

    /// Register a listener for successful structural edits.
    pub fn subscribe(&mut self, listener: Listener) {
        self.listeners.subscribe(listener);
    }

    pub(crate) fn emit(&mut self, event: &DocumentEvent) {
        self.listeners.emit(event);
    }

    /// Markup form of the flat sequence (never the tree).
    #[must_use]
    pub fn to_xml(&self) -> Element {
        let mut node = Element::new(FLOW_TAG);
        for element in &self.flat {
            node.push_child(element.to_xml());
        }
        node
    }

    /// Interchange form of the flat sequence (never the tree).
    #[must_use]
    pub fn to_json(&self) -> Vec<FlowEntryNode> {
        self.flat.iter().map(FlowElement::to_json).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::Component;
    use crate::routine::Routine;

    fn routine(name: &str) -> FlowElement {
        let mut settings = Component::new("RoutineSettingsComponent");
        let mut param = crate::param::Param::new("name");
        param.set_val(name);
        settings.params.set("name", param.shared());
        FlowElement::Routine(Routine::with_settings(settings).shared())
    }

    fn matched_loop(name: &str) -> (FlowElement, FlowElement) {
        let mut initiator = LoopInitiator::new("TrialHandler");
        let mut param = crate::param::Param::new("name");
        param.set_val(name);
        initiator.params.set("name", param.shared());
        let initiator = initiator.shared();
        let terminator = LoopInitiator::add_terminator(&initiator);
        (FlowElement::Initiator(initiator), FlowElement::Terminator(terminator))
    }

    fn names(flat: &[FlowElement]) -> Vec<String> {
        flat.iter().map(|element| element.name().unwrap_or_default()).collect()
    }

    #[test]
    fn test_insertion_index() {
        assert_eq!(insertion_index(-1, 4), 4);
        assert_eq!(insertion_index(2, 4), 2);
        assert_eq!(insertion_index(9, 4), 4);
    }

    #[test]
    fn test_relocation_index() {
        assert_eq!(relocation_index(0, 3, 4), 2);
        assert_eq!(relocation_index(3, 0, 4), 0);
        assert_eq!(relocation_index(1, -1, 4), 3);
        assert_eq!(relocation_index(1, 1, 4), 1);
        assert_eq!(relocation_index(0, 10, 4), 3);
    }

    #[test]
    fn test_relocate_forward_lands_before_target() {
        let flat = vec![routine("A"), routine("B"), routine("C"), routine("D")];
        let mut flow = Flow::from_flat(flat).unwrap();

        let target = flow.relocate_element(0, 3).unwrap();

        assert_eq!(target, 2);
        assert_eq!(names(flow.flat()), ["B", "C", "A", "D"]);
        assert_eq!(flow.dynamic().root().len(), 4);
    }

    #[test]
    fn test_insert_negative_appends_and_resyncs() {
        let mut flow = Flow::from_flat(vec![routine("A")]).unwrap();
        let index = flow.insert_element(routine("B"), -1).unwrap();
        assert_eq!(index, 1);
        assert_eq!(names(&flow.flatten()), ["A", "B"]);
    }

    #[test]
    fn test_nested_loops_tree_shape() {
        let (outer_start, outer_end) = matched_loop("outer");
        let (inner_start, inner_end) = matched_loop("inner");
        let flat = vec![
            routine("A"),
            outer_start,
            routine("B"),
            inner_start,
            routine("C"),
            inner_end,
            outer_end,
            routine("D"),
        ];
        let flow = Flow::from_flat(flat.clone()).unwrap();
        let tree = flow.dynamic();

        assert_eq!(tree.root().len(), 3);
        assert_eq!(tree.loops().len(), 2);

        let FlowNode::Loop(outer) = tree.root()[1] else {
            panic!("expected loop node");
        };
        let outer_loop = tree.get(outer).unwrap();
        assert_eq!(outer_loop.name().as_deref(), Some("outer"));
        assert!(outer_loop.complete());
        assert_eq!(outer_loop.parent(), LoopParent::Flow);
        assert_eq!(outer_loop.body().len(), 2);

        let FlowNode::Loop(inner) = outer_loop.body()[1] else {
            panic!("expected nested loop node");
        };
        assert_eq!(tree.depth(inner), 1);
        assert_eq!(tree.get(inner).unwrap().parent(), LoopParent::Loop(outer));
        assert_eq!(names(&tree.flatten_loop(inner)), ["inner", "C", "inner"]);

        assert_eq!(flow.flatten(), flat);
    }

    #[test]
    fn test_unmatched_initiator_keeps_following_elements_outside() {
        let initiator = FlowElement::Initiator(LoopInitiator::new("TrialHandler").shared());
        let flat = vec![routine("A"), initiator, routine("B")];
        let flow = Flow::from_flat(flat.clone()).unwrap();

        assert_eq!(flow.dynamic().root().len(), 3);
        assert!(!flow.dynamic().loops()[0].complete());
        assert_eq!(flow.flatten(), flat);
    }

    #[test]
    fn test_orphan_terminator_rejected_and_state_kept() {
        let (start, end) = matched_loop("L1");
        let mut flow = Flow::from_flat(vec![start, routine("A"), end]).unwrap();

        // moving the terminator in front of its initiator orphans it
        let err = flow.relocate_element(2, 0).unwrap_err();

        assert!(matches!(err, Error::UnmatchedTerminator { ref name } if name == "L1"));
        assert_eq!(names(flow.flat()), ["L1", "A", "L1"]);
        assert_eq!(flow.dynamic().loops()[0].body().len(), 1);
    }

    #[test]
    fn test_remove_out_of_bounds() {
        let mut flow = Flow::from_flat(vec![routine("A")]).unwrap();
        assert!(matches!(
            flow.remove_element(1),
            Err(Error::IndexOutOfBounds { index: 1, len: 1 })
        ));
    }

    #[test]
    fn test_insert_loop_wraps_span() {
        let mut flow = Flow::from_flat(vec![routine("A"), routine("B"), routine("C")]).unwrap();
        let initiator = LoopInitiator::new("TrialHandler").shared();

        let (start, end) = flow.insert_loop(&initiator, 1, 2).unwrap();

        assert_eq!((start, end), (1, 3));
        assert_eq!(flow.len(), 5);
        assert!(initiator.borrow().complete());
        let tree = flow.dynamic();
        assert_eq!(tree.root().len(), 3);
        assert_eq!(tree.loops()[0].body().len(), 1);
    }

    #[test]
    fn test_to_json_writes_routine_references() {
        let (start, end) = matched_loop("trials");
        let flow = Flow::from_flat(vec![start, routine("trial"), end]).unwrap();
        let json = flow.to_json();

        assert_eq!(json[0].tag.as_deref(), Some(LoopInitiator::TAG));
        assert_eq!(json[1], FlowEntryNode::routine("trial"));
        assert_eq!(json[2].tag.as_deref(), Some(LoopTerminator::TAG));
    }
}
