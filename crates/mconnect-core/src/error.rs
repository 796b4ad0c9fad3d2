//! Core errors.

use mconnect_bus::BusError;
use mconnect_types::{DeviceId, Transition};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The bus itself is unreachable.
    #[error("bus transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A registry method was called after teardown.
    #[error("device registry destroyed")]
    RegistryDestroyed,

    /// A remote transition was issued but never confirmed by the service.
    #[error("{transition} on {id} was not confirmed in time")]
    TransitionTimeout { id: DeviceId, transition: Transition },

    #[error("unknown device: {0}")]
    UnknownDevice(DeviceId),

    #[error("device session {0} disposed")]
    SessionDisposed(DeviceId),

    /// The requested transition does not apply to the device's current state.
    #[error("{transition} does not apply to {id} in its current state")]
    TransitionNotApplicable { id: DeviceId, transition: Transition },

    /// The device does not advertise the capability behind an action.
    #[error("device {id} does not support {action}")]
    Unsupported { id: DeviceId, action: &'static str },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("bus error: {0}")]
    Bus(BusError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<BusError> for CoreError {
    fn from(e: BusError) -> Self {
        match e {
            BusError::TransportUnavailable(reason) => Self::TransportUnavailable(reason),
            other => Self::Bus(other),
        }
    }
}
