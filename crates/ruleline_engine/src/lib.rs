//! Pattern compilation, change-impact analysis, and match activation for Ruleline.
//!
//! This crate provides:
//! - [`QueryDefiner`] - Compiling constraint ASTs to a single SQL query
//! - [`JoinGraph`] - Equality edges between table aliases, for impact paths
//! - [`analyze`] - Turning one record change into pending activations
//! - [`ConstraintSet`] - A rule's pattern with its memoized compiled forms
//! - [`Rule`] - Activation, reconciliation, and callback dispatch
//! - [`RuleRegistry`] - The set of registered rules
//!
//! # Example
//!
//! ```
//! use ruleline_engine::{Callbacks, EngineConfig, RuleRegistry};
//! use ruleline_storage::{FieldSchema, FieldType, RecordSchema, SchemaRegistry};
//!
//! let schema = SchemaRegistry::new().with(
//!     RecordSchema::new("Racer", "racers")
//!         .with_field(FieldSchema::required("time", FieldType::Integer)),
//! );
//! let mut registry = RuleRegistry::new(EngineConfig::sqlite(), schema);
//! registry
//!     .register_source(
//!         "rule fastest\n  Racer(<id>, <time>)\n  not Racer(time < <time>)\n",
//!         Callbacks::new(),
//!     )
//!     .unwrap();
//! assert!(registry.find_by_name("fastest").is_some());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod attributes;
pub mod config;
pub mod definer;
pub mod graph;
pub mod impact;
pub mod pattern;
pub mod registry;
pub mod rule;

pub use attributes::AttributeTracker;
pub use config::EngineConfig;
pub use definer::{CompiledQuery, QueryDefiner, Sink};
pub use graph::{Edge, JoinGraph, Vertex};
pub use impact::{Change, Impact, PendingActivation, analyze};
pub use pattern::ConstraintSet;
pub use registry::{LoadReport, RuleRegistry, RuleSet};
pub use rule::{
    Callback, CallbackContext, CallbackError, Callbacks, DispatchOutcome, DispatchReport, Event,
    Rule, RuleId,
};
