//! Error taxonomy shared by every pipeline.
//!
//! Whole-operation failures travel through `Promise` outcomes, so the error is
//! `Clone` and carries rendered messages instead of source objects.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// Disk read/write failure.
    #[error("i/o failure: {0}")]
    Io(String),
    /// Corrupt or structurally unreadable persisted/clipboard data.
    #[error("format error: {0}")]
    Format(String),
    /// Target world or region is not available on the host.
    #[error("world '{0}' is not available")]
    MissingWorld(String),
    /// Operation exceeded its tick budget.
    #[error("timed out: {0}")]
    Timeout(String),
    /// Explicit cancel.
    #[error("cancelled")]
    Cancelled,
    /// A session with the same key is still active.
    #[error("session '{0}' is already active")]
    Busy(String),
    /// Value violates a model invariant (coordinate range, empty sentinel, ...).
    #[error("invalid value: {0}")]
    Invalid(String),
}

pub type VaultResult<T> = std::result::Result<T, VaultError>;

impl VaultError {
    pub fn format(msg: impl Into<String>) -> Self {
        VaultError::Format(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        VaultError::Invalid(msg.into())
    }

    /// Recover a typed error from an `anyhow` chain; anything else is I/O.
    pub fn from_anyhow(err: anyhow::Error) -> Self {
        match err.downcast_ref::<VaultError>() {
            Some(v) => v.clone(),
            None => VaultError::Io(format!("{err:#}")),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, VaultError::Cancelled)
    }
}

impl From<std::io::Error> for VaultError {
    fn from(e: std::io::Error) -> Self {
        VaultError::Io(e.to_string())
    }
}
