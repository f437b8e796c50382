//! Statistics module
//!
//! Lock-free batch statistics tracking using atomic operations.

mod atomic;

pub use atomic::{BatchStats, BatchStatsSnapshot};
