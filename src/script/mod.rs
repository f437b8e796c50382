//! Script module
//!
//! Data model and store for automation scripts: typed steps with parameter
//! placeholders, loaded from JSON and validated structurally before use.

mod model;
mod store;

pub use model::{collect_placeholders, ActionKind, BoundParams, Script, ScriptError, Step};
pub use store::{ScriptStore, ScriptSummary, StoreError};
