//! Change notification
//!
//! The embedding application registers listeners on an
//! [`Experiment`](crate::Experiment); each successful structural mutation
//! invokes them synchronously, after the flat sequence and its tree agree
//! again. Failed mutations notify nobody.

use std::fmt;

/// A structural change to the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentEvent {
    /// An element was inserted into the flow at `index`
    ElementInserted {
        /// Final position of the element
        index: usize,
    },
    /// The element at `index` was removed from the flow
    ElementRemoved {
        /// Former position of the element
        index: usize,
    },
    /// An element moved within the flow
    ElementRelocated {
        /// Former position
        from: usize,
        /// Final position
        to: usize,
    },
    /// A loop was wrapped around a span of the flow
    LoopInserted {
        /// Loop name
        name: String,
        /// Position of the initiator
        start: usize,
        /// Position of the terminator
        end: usize,
    },
    /// A routine was renamed and re-keyed
    RoutineRenamed {
        /// Previous name
        from: String,
        /// New name
        to: String,
    },
    /// A loop and its terminator were renamed and re-keyed
    LoopRenamed {
        /// Previous name
        from: String,
        /// New name
        to: String,
    },
}

/// Callback invoked after each successful mutation.
pub type Listener = Box<dyn FnMut(&DocumentEvent)>;

/// Registered listeners, notified in subscription order.
#[derive(Default)]
pub struct Listeners {
    listeners: Vec<Listener>,
}

impl Listeners {
    /// Register a listener.
    pub fn subscribe(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// Notify every listener of `event`.
    pub fn emit(&mut self, event: &DocumentEvent) {
        for listener in &mut self.listeners {
            listener(event);
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    /// Whether no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;

    #[test]
    fn test_emit_reaches_every_listener_in_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut listeners = Listeners::default();
        for id in 0..2 {
            let seen = Rc::clone(&seen);
            listeners.subscribe(Box::new(move |event| seen.borrow_mut().push((id, event.clone()))));
        }

        listeners.emit(&DocumentEvent::ElementRemoved { index: 3 });

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], (0, DocumentEvent::ElementRemoved { index: 3 }));
        assert_eq!(seen[1].0, 1);
    }
}
