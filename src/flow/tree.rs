//! Nested view of the flow
//!
//! [`FlowTree::dynamicize`] turns the flat sequence into a tree where each
//! loop's body is an explicit child list; [`FlowTree::flatten`] is its exact
//! inverse. Loops live in an arena indexed by [`LoopId`] so that every loop
//! can name its parent without owning it.
//!
//! ```text
//! flat:  [A, I(trials), B, I(inner), C, T(inner), T(trials), D]
//!
//! tree:  A
//!        trials ─┬─ B
//!                └─ inner ── C
//!        D
//! ```

use std::rc::Rc;

use tracing::{trace, warn};

use super::{FlowElement, InitiatorRef, TerminatorRef};
use crate::param::ParamsArray;
use crate::{Error, Result};

/// Index of a [`FlowLoop`] in its [`FlowTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoopId(usize);

impl LoopId {
    /// Position of the loop in [`FlowTree::loops`].
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Where a loop sits: directly in the flow, or inside another loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopParent {
    /// Top level of the flow
    Flow,
    /// Body of another loop
    Loop(LoopId),
}

/// A node of a body: a routine, or a nested loop.
#[derive(Debug, Clone, PartialEq)]
pub enum FlowNode {
    /// Routine or standalone routine
    Element(FlowElement),
    /// Nested loop
    Loop(LoopId),
}

/// Derived tree node wrapping one initiator and its body.
///
/// Never serialised: the initiator/terminator pair in the flat sequence is
/// the persistent form.
#[derive(Debug, Clone)]
pub struct FlowLoop {
    initiator: InitiatorRef,
    terminator: Option<TerminatorRef>,
    parent: LoopParent,
    body: Vec<FlowNode>,
}

impl FlowLoop {
    fn new(initiator: InitiatorRef, parent: LoopParent) -> Self {
        Self {
            initiator,
            terminator: None,
            parent,
            body: Vec::new(),
        }
    }

    /// The loop's initiator.
    #[must_use]
    pub const fn initiator(&self) -> &InitiatorRef {
        &self.initiator
    }

    /// The terminator closing this loop in the flat sequence, if any.
    #[must_use]
    pub const fn terminator(&self) -> Option<&TerminatorRef> {
        self.terminator.as_ref()
    }

    /// Whether the loop was closed by a terminator.
    #[must_use]
    pub const fn complete(&self) -> bool {
        self.terminator.is_some()
    }

    /// The enclosing loop, or the flow itself.
    #[must_use]
    pub const fn parent(&self) -> LoopParent {
        self.parent
    }

    /// The loop body in order.
    #[must_use]
    pub fn body(&self) -> &[FlowNode] {
        &self.body
    }

    /// Name of the initiator.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        self.initiator.borrow().name()
    }

    /// Loop type of the initiator.
    #[must_use]
    pub fn loop_type(&self) -> String {
        self.initiator.borrow().loop_type().to_string()
    }

    /// The initiator's parameters (shared view).
    #[must_use]
    pub fn params(&self) -> ParamsArray {
        self.initiator.borrow().params.clone()
    }
}

/// The nested form of a flat flow sequence.
#[derive(Debug, Clone, Default)]
pub struct FlowTree {
    root: Vec<FlowNode>,
    loops: Vec<FlowLoop>,
}

impl FlowTree {
    /// Build the tree of a flat sequence in one left-to-right pass.
    ///
    /// An initiator always becomes a loop node in the current body, but
    /// only opens a new body when it is already matched; a terminator closes
    /// the innermost open loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnmatchedTerminator`] when a terminator appears with
    /// no open loop.
    pub fn dynamicize(flat: &[FlowElement]) -> Result<Self> {
        let mut tree = Self::default();
        let mut open: Vec<LoopId> = Vec::new();

        for element in flat {
            let parent = open.last().map_or(LoopParent::Flow, |&id| LoopParent::Loop(id));
            match element {
                FlowElement::Initiator(initiator) => {
                    let id = LoopId(tree.loops.len());
                    tree.loops.push(FlowLoop::new(Rc::clone(initiator), parent));
                    tree.body_mut(parent).push(FlowNode::Loop(id));
                    if initiator.borrow().complete() {
                        open.push(id);
                    }
                }
                FlowElement::Terminator(terminator) => {
                    let Some(id) = open.pop() else {
                        let name = terminator.borrow().name().to_string();
                        warn!(terminator = %name, "loop terminator with no open loop");
                        return Err(Error::UnmatchedTerminator { name });
                    };
                    tree.loops[id.0].terminator = Some(Rc::clone(terminator));
                }
                FlowElement::Routine(_) | FlowElement::Standalone(_) => {
                    tree.body_mut(parent).push(FlowNode::Element(element.clone()));
                }
            }
        }

        trace!(elements = flat.len(), loops = tree.loops.len(), "flow tree derived");
        Ok(tree)
    }

    fn body_mut(&mut self, parent: LoopParent) -> &mut Vec<FlowNode> {
        match parent {
            LoopParent::Flow => &mut self.root,
            LoopParent::Loop(id) => &mut self.loops[id.0].body,
        }
    }

    /// Top-level nodes of the flow.
    #[must_use]
    pub fn root(&self) -> &[FlowNode] {
        &self.root
    }

    /// Every loop, in initiator order.
    #[must_use]
    pub fn loops(&self) -> &[FlowLoop] {
        &self.loops
    }

    /// Look up a loop by id.
    #[must_use]
    pub fn get(&self, id: LoopId) -> Option<&FlowLoop> {
        self.loops.get(id.0)
    }

    /// Body of the flow or of a loop.
    #[must_use]
    pub fn body(&self, parent: LoopParent) -> &[FlowNode] {
        match parent {
            LoopParent::Flow => &self.root,
            LoopParent::Loop(id) => match self.loops.get(id.0) {
                Some(flow_loop) => &flow_loop.body,
                None => &[],
            },
        }
    }

    /// Number of loops enclosing `id` (0 for a top-level loop).
    #[must_use]
    pub fn depth(&self, id: LoopId) -> usize {
        let mut depth = 0;
        let mut parent = self.loops.get(id.0).map_or(LoopParent::Flow, FlowLoop::parent);
        while let LoopParent::Loop(outer) = parent {
            depth += 1;
            parent = self.loops[outer.0].parent;
        }
        depth
    }

    /// The flat sequence this tree was derived from.
    #[must_use]
    pub fn flatten(&self) -> Vec<FlowElement> {
        let mut flat = Vec::new();
        self.flatten_into(&self.root, &mut flat);
        flat
    }

    /// The flat form of one loop: initiator, body, terminator if present.
    #[must_use]
    pub fn flatten_loop(&self, id: LoopId) -> Vec<FlowElement> {
        let mut flat = Vec::new();
        self.flatten_into(&[FlowNode::Loop(id)], &mut flat);
        flat
    }

    fn flatten_into(&self, nodes: &[FlowNode], flat: &mut Vec<FlowElement>) {
        for node in nodes {
            match node {
                FlowNode::Element(element) => flat.push(element.clone()),
                FlowNode::Loop(id) => {
                    let Some(flow_loop) = self.loops.get(id.0) else {
                        continue;
                    };
                    flat.push(FlowElement::Initiator(Rc::clone(&flow_loop.initiator)));
                    self.flatten_into(&flow_loop.body, flat);
                    if let Some(terminator) = &flow_loop.terminator {
                        flat.push(FlowElement::Terminator(Rc::clone(terminator)));
                    }
                }
            }
        }
    }
}
