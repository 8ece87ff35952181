//! Data-interchange shapes
//!
//! Serde mirror of the JSON document format. These types carry no
//! behaviour; entities convert to and from them with their `to_json` /
//! `from_json` functions.
//!
//! ```text
//! ExperimentNode
//! ├── settings: ComponentNode
//! ├── routines: { name: RoutineNode }   tag "Routine" → components
//! │                                     other tag    → params
//! └── flow: [FlowEntryNode]             {name} routine reference
//!                                       {tag: LoopInitiator|LoopTerminator, ...}
//! ```

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::param::Param;

/// Component (or settings) in the interchange format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentNode {
    /// Component type tag
    pub tag: String,
    /// Originating plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    /// Parameters keyed by name
    #[serde(default)]
    pub params: IndexMap<String, Param>,
}

/// Routine or standalone routine in the interchange format.
///
/// `tag == "Routine"` selects the component-bearing form (`settings`,
/// `components`); any other tag is a standalone routine (`plugin`, `params`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineNode {
    /// `"Routine"` or the standalone routine's tag
    pub tag: String,
    /// Routine name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Routine settings component
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<ComponentNode>,
    /// Routine components in order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<Vec<ComponentNode>>,
    /// Standalone routine plugin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    /// Standalone routine parameters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<IndexMap<String, Param>>,
}

/// One entry of the flat flow sequence in the interchange format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowEntryNode {
    /// `LoopInitiator`, `LoopTerminator`, or absent for routine references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Routine or loop name
    pub name: String,
    /// Loop type of an initiator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_type: Option<String>,
    /// Loop parameters of an initiator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<IndexMap<String, Param>>,
}

impl FlowEntryNode {
    /// Reference to a routine by name.
    #[must_use]
    pub fn routine(name: impl Into<String>) -> Self {
        Self {
            tag: None,
            name: name.into(),
            loop_type: None,
            params: None,
        }
    }
}

/// Whole experiment document in the interchange format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExperimentNode {
    /// Document file name
    pub filename: String,
    /// Document-wide version tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Experiment settings
    pub settings: ComponentNode,
    /// Routines keyed by name
    #[serde(default)]
    pub routines: IndexMap<String, RoutineNode>,
    /// Flat flow sequence
    #[serde(default)]
    pub flow: Vec<FlowEntryNode>,
}
