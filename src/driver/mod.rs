//! Driver capability
//!
//! The engine never talks to a browser directly. It drives an injected
//! implementation of [`Driver`]: one call to open a live automation context per
//! target profile, one call per mechanical primitive, one call to close. How a
//! primitive is carried out (CDP, WebDriver, anything else) is entirely the
//! implementation's business; the engine only interprets the outcome.

mod errors;
pub mod sim;

pub use errors::DriverError;
pub use sim::{SimDriver, SimDriverConfig};

use async_trait::async_trait;

use crate::script::ActionKind;

/// Result of one successfully executed driver primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrimitiveStatus {
    Ok,
    /// The primitive went through, with a caveat worth surfacing as progress.
    Warning(String),
}

/// Opens live automation contexts for target profiles.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Open a controllable automation context for the given target profile.
    ///
    /// The returned handle is exclusively owned by the caller until closed.
    async fn open_session(&self, target: &str) -> Result<Box<dyn DriverHandle>, DriverError>;
}

/// One live, exclusively-owned automation context.
#[async_trait]
pub trait DriverHandle: Send {
    /// Execute one primitive with fully resolved locator and input.
    ///
    /// `wait` steps are handled by the interpreter and never reach the driver.
    async fn run_primitive(
        &mut self,
        action: ActionKind,
        locator: Option<&str>,
        input: Option<&str>,
    ) -> Result<PrimitiveStatus, DriverError>;

    /// Close the underlying context. Best-effort; callers log failures and
    /// never let them change an already-determined session outcome.
    async fn close(&mut self) -> Result<(), DriverError>;
}
