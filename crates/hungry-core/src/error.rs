//! Core domain errors.

use thiserror::Error;

/// Core domain errors for the hungry agent.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Function name not known to the dispatcher.
    #[error("Unknown function: {0}")]
    UnknownFunction(String),
}
