//! Error types for the combat simulation.
//!
//! Cast eligibility failures are deliberately absent here: they are ordinary
//! results of [`Simulation::try_cast`](crate::simulation::Simulation::try_cast)
//! and live in [`CastFailure`](crate::cast::CastFailure).

use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`SimError`].
pub type Result<T> = std::result::Result<T, SimError>;

/// Top-level error type for all simulation errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// Malformed or missing configuration, detected before any run starts.
    #[error("Setup error: {0}")]
    Setup(String),

    /// An action was scheduled earlier than the current simulation time.
    #[error("Cannot schedule action at {due:?}: clock is already at {now:?}")]
    InvalidSchedule {
        /// Requested due time.
        due: Duration,
        /// Current simulation time.
        now: Duration,
    },

    /// Internal state was found corrupted; the iteration is aborted.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// A named unit, aura or spell lookup failed.
    #[error("Not found: {0}")]
    NotFound(String),
}

impl SimError {
    /// Build a setup error from anything displayable.
    pub fn setup(message: impl Into<String>) -> Self {
        Self::Setup(message.into())
    }

    /// Build an invariant violation, logging it before it propagates.
    pub fn invariant(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "Simulation invariant violated");
        Self::InvariantViolation(message)
    }

    /// Whether this error must abort the whole batch rather than one iteration.
    #[must_use]
    pub const fn is_fatal_setup(&self) -> bool {
        matches!(self, Self::Setup(_))
    }
}
