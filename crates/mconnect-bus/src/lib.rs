//! Session-bus access to the mconnect service.
//!
//! Defines the [`ServiceBus`] trait that every backend implements: presence
//! watching for the well-known service name, device enumeration, the stream
//! of device signals, and the commands the service accepts. The zbus backend
//! lives behind the `dbus` feature; an in-memory backend for tests lives
//! behind `mock`.

use async_trait::async_trait;
use mconnect_types::{DeviceId, DeviceRecord, PropertyChange};
use tokio::sync::mpsc;

#[cfg(feature = "dbus")]
pub mod dbus;
pub mod error;
#[cfg(feature = "mock")]
pub mod mock;

pub use error::BusError;

/// Well-known name of the mconnect service.
pub const DEFAULT_BUS_NAME: &str = "org.mconnect";

/// Channel capacity used by backends for event streams.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Current owner of a watched name. `None` means nobody owns it.
///
/// The first value sent on a watch reflects the state at subscription time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameOwner(pub Option<String>);

/// A device-level signal from the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSignal {
    /// `device::added`, carrying the full record of the new device.
    DeviceAdded(DeviceRecord),
    /// `device::removed`.
    DeviceRemoved(DeviceId),
    /// One notification batch of `changed::<field>` for a single device.
    Changed {
        id: DeviceId,
        changes: Vec<PropertyChange>,
    },
}

/// Access to the remote service over the session bus.
///
/// Every stream is ordered: for a given device, signals arrive in the order
/// the service emitted them.
#[async_trait]
pub trait ServiceBus: Send + Sync + 'static {
    /// Watch ownership of `name`. Fails with
    /// [`BusError::TransportUnavailable`] if the bus cannot be reached.
    async fn watch_name(&self, name: &str) -> Result<mpsc::Receiver<NameOwner>, BusError>;

    /// Subscribe to device added/removed/changed signals.
    async fn subscribe_devices(&self) -> Result<mpsc::Receiver<RemoteSignal>, BusError>;

    /// Enumerate the devices currently known to the service, in the
    /// service's order.
    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, BusError>;

    /// Grant trust to a device.
    async fn allow_device(&self, id: &DeviceId) -> Result<(), BusError>;

    /// Revoke trust from a device, cancelling any pairing in progress.
    async fn disallow_device(&self, id: &DeviceId) -> Result<(), BusError>;

    /// Ring the device so it can be found.
    async fn locate_device(&self, id: &DeviceId) -> Result<(), BusError>;

    /// Ask the bus to launch the service.
    async fn start_service(&self, name: &str) -> Result<(), BusError>;
}
