//! Error types shared across the gate.

use thiserror::Error;

use crate::domain::Rejection;

/// Backing store failures - the "Infrastructure" class of the error taxonomy.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store connection failed: {0}")]
    Connection(String),

    #[error("Script execution failed: {0}")]
    Script(String),

    #[error("Unexpected store reply: {0}")]
    Protocol(String),
}

/// Failures while loading the tunable thresholds.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Settings source unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid settings document: {0}")]
    Invalid(String),
}

/// Errors surfaced by the gate services.
///
/// `Rejected` carries a policy decision; the other variants are
/// infrastructure failures on paths whose policy is fail-closed.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("Request rejected: {0}")]
    Rejected(Rejection),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}

impl From<Rejection> for GuardError {
    fn from(rejection: Rejection) -> Self {
        GuardError::Rejected(rejection)
    }
}
