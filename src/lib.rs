//! # psyexp-model: Experiment Document Model
//!
//! **Version**: 0.1.0
//!
//! The in-memory model of a visual experiment-authoring document: routines
//! made of parameterised components, a flow that sequences routines inside
//! (possibly nested) loops, and lossless round-trips through the
//! structured-markup (`.psyexp`) and JSON interchange formats.
//!
//! ## Design Principles
//!
//! - **Flat is canonical**: the flow is stored as a flat sequence of
//!   routines and loop markers; the nested tree is derived on every edit
//! - **Templates, not schemas**: every parameter is resolved from a
//!   [`TemplateRegistry`], with an "Unknown" fallback that keeps documents
//!   from newer plugins loadable
//! - **Shared views**: sorted and unsorted parameter views alias the same
//!   [`Param`] instances; [`ParamsArray::copy`] is the only deep copy
//!
//! ## Example Usage
//!
//! ```rust
//! use std::rc::Rc;
//! use psyexp_model::{Experiment, TemplateRegistry};
//!
//! let registry = Rc::new(TemplateRegistry::from_json_str(r#"{
//!     "SettingsComponent": { "params": { "expName": { "val": "" } } },
//!     "RoutineSettingsComponent": { "params": { "name": { "val": "routine" } } }
//! }"#)?);
//!
//! let exp = Experiment::new("stroop.psyexp", Rc::clone(&registry));
//! let text = exp.to_xml_string()?;
//!
//! let reloaded = Experiment::from_xml_str(registry, "stroop.psyexp", &text)?;
//! assert_eq!(reloaded.flow().len(), 1);
//! # Ok::<(), psyexp_model::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod component;
pub mod error;
pub mod events;
pub mod experiment;
pub mod flow;
pub mod json;
pub mod markup;
mod owner;
pub mod param;
pub mod routine;
pub mod template;

pub use component::{Component, VisualColor};
pub use error::{Error, Result};
pub use events::DocumentEvent;
pub use experiment::{Experiment, ExperimentBuilder};
pub use flow::{Flow, FlowElement, FlowLoop, FlowNode, FlowTree, LoopInitiator, LoopTerminator};
pub use markup::Element;
pub use param::{Param, ParamRef, ParamsArray};
pub use routine::{Routine, RoutineEntry, RoutineMap, StandaloneRoutine};
pub use template::TemplateRegistry;
