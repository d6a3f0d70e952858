//! Error types for the brightness control loop.

use thiserror::Error;

/// Failures that stop the actuator from establishing its starting state.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("display discovery failed")]
    Discovery(#[source] anyhow::Error),

    #[error("no displays found")]
    NoDisplays,

    #[error("initial brightness read from {display} failed")]
    InitialRead {
        display: String,
        #[source]
        source: anyhow::Error,
    },
}
