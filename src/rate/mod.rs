//! Rate control module
//!
//! Provides launch pacing between session dispatches.

mod pacer;

pub use pacer::{LaunchPacer, PacerConfig};
