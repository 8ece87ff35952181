//! Error types for psyexp-model
//!
//! Structural corruption (an orphaned loop terminator, a flow entry naming a
//! routine that does not exist) aborts the operation and names the offending
//! element. Unknown parameters and missing attributes are never errors: they
//! resolve through template fallbacks instead.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// psyexp-model error types
#[derive(Error, Debug)]
pub enum Error {
    /// A loop terminator appeared while no loop was open
    #[error("Loop terminator '{name}' found with no matching loop initiator\nThe flow is corrupt and cannot be rendered")]
    UnmatchedTerminator {
        /// Name carried by the orphaned terminator
        name: String,
    },

    /// A flow entry references a routine missing from the routine map
    #[error("Flow references unknown routine '{name}'")]
    UnknownRoutine {
        /// Routine name referenced by the flow
        name: String,
    },

    /// A terminator names a loop whose initiator has not been read yet
    #[error("Loop terminator references unknown loop '{name}'")]
    UnknownLoop {
        /// Loop name carried by the terminator
        name: String,
    },

    /// The template registry has no profile for an entity tag
    #[error("No template profile registered for '{tag}'")]
    UnknownTemplate {
        /// Entity tag that was looked up
        tag: String,
    },

    /// A structural edit addressed a position outside the sequence
    #[error("Index {index} out of bounds (sequence has {len} elements)")]
    IndexOutOfBounds {
        /// Requested index
        index: usize,
        /// Sequence length at the time of the request
        len: usize,
    },

    /// A routine name is already taken
    #[error("A routine named '{name}' already exists")]
    DuplicateRoutine {
        /// Colliding routine name
        name: String,
    },

    /// A loop name is already taken
    #[error("A loop named '{name}' already exists")]
    DuplicateLoop {
        /// Colliding loop name
        name: String,
    },

    /// A rename ran while the owning name map was borrowed elsewhere
    #[error("Cannot rename to '{name}' while the owning name map is in use")]
    NameMapBorrowed {
        /// Requested name
        name: String,
    },

    /// A flow element does not belong to this experiment
    #[error("Flow element '{name}' is not owned by this experiment")]
    ForeignElement {
        /// Name of the rejected element
        name: String,
    },

    /// A required child element is absent from a markup document
    #[error("Markup element <{parent}> has no <{name}> child")]
    MissingElement {
        /// Element that was searched
        parent: String,
        /// Missing child element name
        name: String,
    },

    /// Markup text could not be tokenised or written
    #[error("Markup error: {0}")]
    Markup(String),

    /// Data-interchange (JSON) error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error reports a corrupt document structure.
    ///
    /// Structural corruption is fatal and never retried.
    #[must_use]
    pub const fn is_structural_corruption(&self) -> bool {
        matches!(
            self,
            Self::UnmatchedTerminator { .. } | Self::UnknownRoutine { .. } | Self::UnknownLoop { .. }
        )
    }
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Self::Markup(err.to_string())
    }
}
