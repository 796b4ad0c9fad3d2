//! Bus errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    /// The bus itself could not be reached.
    #[error("bus transport unavailable: {0}")]
    TransportUnavailable(String),

    /// The named service has no owner on the bus.
    #[error("service not running: {0}")]
    ServiceUnknown(String),

    #[error("no such device: {0}")]
    NoSuchDevice(String),

    #[error("remote call {method} failed: {reason}")]
    Call { method: &'static str, reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
