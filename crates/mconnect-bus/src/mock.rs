//! Mock bus backend for testing.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mconnect_types::{DeviceId, DeviceRecord, PropertyChange};
use tokio::sync::mpsc;

use crate::error::BusError;
use crate::{NameOwner, RemoteSignal, ServiceBus, EVENT_CHANNEL_CAPACITY};

/// A remote call recorded by [`MockBus`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    Allow(DeviceId),
    Disallow(DeviceId),
    Locate(DeviceId),
    StartService(String),
}

#[derive(Debug, Default)]
struct MockState {
    owner: Option<String>,
    owner_serial: u32,
    devices: Vec<DeviceRecord>,
    name_watchers: Vec<mpsc::Sender<NameOwner>>,
    device_watchers: Vec<mpsc::Sender<RemoteSignal>>,
    calls: Vec<MockCall>,
    auto_confirm: bool,
    appear_on_start: bool,
    transport_down: bool,
    enumeration_fails: bool,
}

impl MockState {
    fn broadcast_owner(&mut self) {
        let owner = NameOwner(self.owner.clone());
        self.name_watchers
            .retain(|tx| tx.try_send(owner.clone()).is_ok());
    }

    fn broadcast_signal(&mut self, signal: &RemoteSignal) {
        self.device_watchers
            .retain(|tx| tx.try_send(signal.clone()).is_ok());
    }

    fn appear(&mut self) {
        self.owner_serial += 1;
        self.owner = Some(format!(":1.{}", self.owner_serial));
        self.broadcast_owner();
    }

    fn change(&mut self, id: &DeviceId, changes: Vec<PropertyChange>) {
        if let Some(record) = self.devices.iter_mut().find(|r| r.id.as_ref() == Some(id)) {
            for change in &changes {
                record.apply(change);
            }
        }
        self.broadcast_signal(&RemoteSignal::Changed {
            id: id.clone(),
            changes,
        });
    }

    fn check_present(&self) -> Result<(), BusError> {
        if self.transport_down {
            return Err(BusError::TransportUnavailable("mock bus down".to_string()));
        }
        if self.owner.is_none() {
            return Err(BusError::ServiceUnknown("mock".to_string()));
        }
        Ok(())
    }

    fn check_known(&self, id: &DeviceId) -> Result<(), BusError> {
        self.check_present()?;
        if self.devices.iter().any(|r| r.id.as_ref() == Some(id)) {
            Ok(())
        } else {
            Err(BusError::NoSuchDevice(id.to_string()))
        }
    }
}

/// In-memory stand-in for the session bus and the remote service.
///
/// Tests drive the service side through a [`MockBusHandle`]: make the
/// service appear or vanish, add/remove devices, emit change batches, and
/// inspect the remote calls the code under test made.
pub struct MockBus {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBus {
    /// Create a mock bus with the service absent.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Get a clonable handle for driving the service side from tests.
    pub fn handle(&self) -> MockBusHandle {
        MockBusHandle {
            state: Arc::clone(&self.state),
        }
    }
}

/// Clonable driver handle for [`MockBus`].
#[derive(Clone)]
pub struct MockBusHandle {
    state: Arc<Mutex<MockState>>,
}

impl MockBusHandle {
    /// Give the service an owner on the bus.
    pub fn appear(&self) {
        self.state.lock().unwrap().appear();
    }

    /// Drop the service's owner.
    pub fn vanish(&self) {
        let mut state = self.state.lock().unwrap();
        state.owner = None;
        state.broadcast_owner();
    }

    /// Replace the owner in one step, as a bus does after a fast restart.
    pub fn restart(&self) {
        self.state.lock().unwrap().appear();
    }

    /// Register a device. Emits `device::added` to current subscribers.
    pub fn add_device(&self, record: DeviceRecord) {
        let mut state = self.state.lock().unwrap();
        state.devices.push(record.clone());
        state.broadcast_signal(&RemoteSignal::DeviceAdded(record));
    }

    /// Unregister a device. Emits `device::removed`.
    pub fn remove_device(&self, id: &DeviceId) {
        let mut state = self.state.lock().unwrap();
        state.devices.retain(|r| r.id.as_ref() != Some(id));
        state.broadcast_signal(&RemoteSignal::DeviceRemoved(id.clone()));
    }

    /// Emit one change batch for a device.
    pub fn change(&self, id: &DeviceId, changes: Vec<PropertyChange>) {
        self.state.lock().unwrap().change(id, changes);
    }

    /// When set, Allow/Disallow calls are answered with the matching
    /// change notification, like a cooperative service.
    pub fn set_auto_confirm(&self, enabled: bool) {
        self.state.lock().unwrap().auto_confirm = enabled;
    }

    /// When set, `start_service` makes the service appear.
    pub fn set_appear_on_start(&self, enabled: bool) {
        self.state.lock().unwrap().appear_on_start = enabled;
    }

    /// Simulate an unreachable bus.
    pub fn set_transport_down(&self, down: bool) {
        self.state.lock().unwrap().transport_down = down;
    }

    /// When set, enumeration fails while the service stays present.
    pub fn set_enumeration_fails(&self, fails: bool) {
        self.state.lock().unwrap().enumeration_fails = fails;
    }

    /// Snapshot of all remote calls made so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Number of Allow/Disallow calls made so far.
    pub fn transition_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, MockCall::Allow(_) | MockCall::Disallow(_)))
            .count()
    }
}

#[async_trait]
impl ServiceBus for MockBus {
    async fn watch_name(&self, _name: &str) -> Result<mpsc::Receiver<NameOwner>, BusError> {
        let mut state = self.state.lock().unwrap();
        if state.transport_down {
            return Err(BusError::TransportUnavailable("mock bus down".to_string()));
        }
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tx.try_send(NameOwner(state.owner.clone()))
            .map_err(|e| BusError::Other(anyhow::anyhow!("mock watch: {e}")))?;
        state.name_watchers.push(tx);
        Ok(rx)
    }

    async fn subscribe_devices(&self) -> Result<mpsc::Receiver<RemoteSignal>, BusError> {
        let mut state = self.state.lock().unwrap();
        state.check_present()?;
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        state.device_watchers.push(tx);
        Ok(rx)
    }

    async fn list_devices(&self) -> Result<Vec<DeviceRecord>, BusError> {
        let state = self.state.lock().unwrap();
        state.check_present()?;
        if state.enumeration_fails {
            return Err(BusError::Call {
                method: "GetDevices",
                reason: "mock enumeration failure".to_string(),
            });
        }
        Ok(state.devices.clone())
    }

    async fn allow_device(&self, id: &DeviceId) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        state.check_known(id)?;
        state.calls.push(MockCall::Allow(id.clone()));
        if state.auto_confirm {
            state.change(
                id,
                vec![PropertyChange::Allowed(true), PropertyChange::Paired(true)],
            );
        }
        Ok(())
    }

    async fn disallow_device(&self, id: &DeviceId) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        state.check_known(id)?;
        state.calls.push(MockCall::Disallow(id.clone()));
        if state.auto_confirm {
            state.change(
                id,
                vec![PropertyChange::Allowed(false), PropertyChange::Paired(false)],
            );
        }
        Ok(())
    }

    async fn locate_device(&self, id: &DeviceId) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        state.check_known(id)?;
        state.calls.push(MockCall::Locate(id.clone()));
        Ok(())
    }

    async fn start_service(&self, name: &str) -> Result<(), BusError> {
        let mut state = self.state.lock().unwrap();
        if state.transport_down {
            return Err(BusError::TransportUnavailable("mock bus down".to_string()));
        }
        state.calls.push(MockCall::StartService(name.to_string()));
        if state.appear_on_start && state.owner.is_none() {
            state.appear();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str) -> DeviceRecord {
        DeviceRecord {
            id: Some(DeviceId::from(id)),
            name: Some(id.to_string()),
            allowed: Some(false),
            paired: Some(false),
            ..DeviceRecord::default()
        }
    }

    #[tokio::test]
    async fn watch_reports_current_owner_first() {
        let bus = MockBus::new();
        let handle = bus.handle();
        let mut rx = bus.watch_name("org.mconnect").await.unwrap();
        assert_eq!(rx.recv().await, Some(NameOwner(None)));

        handle.appear();
        let owner = rx.recv().await.unwrap();
        assert!(owner.0.is_some());
    }

    #[tokio::test]
    async fn transport_down_fails_watch() {
        let bus = MockBus::new();
        bus.handle().set_transport_down(true);
        let err = bus.watch_name("org.mconnect").await.unwrap_err();
        assert!(matches!(err, BusError::TransportUnavailable(_)));
    }

    #[tokio::test]
    async fn auto_confirm_emits_change() {
        let bus = MockBus::new();
        let handle = bus.handle();
        handle.appear();
        handle.add_device(record("a"));
        handle.set_auto_confirm(true);

        let mut signals = bus.subscribe_devices().await.unwrap();
        bus.allow_device(&DeviceId::from("a")).await.unwrap();

        let signal = signals.recv().await.unwrap();
        assert_eq!(
            signal,
            RemoteSignal::Changed {
                id: DeviceId::from("a"),
                changes: vec![PropertyChange::Allowed(true), PropertyChange::Paired(true)],
            }
        );
        assert_eq!(handle.calls(), vec![MockCall::Allow(DeviceId::from("a"))]);
        let listed = bus.list_devices().await.unwrap();
        assert_eq!(listed[0].allowed, Some(true));
    }

    #[tokio::test]
    async fn enumeration_failure_keeps_service_present() {
        let bus = MockBus::new();
        let handle = bus.handle();
        handle.appear();
        handle.set_enumeration_fails(true);

        let err = bus.list_devices().await.unwrap_err();
        assert!(matches!(err, BusError::Call { method: "GetDevices", .. }));
        assert!(bus.subscribe_devices().await.is_ok());

        handle.set_enumeration_fails(false);
        assert!(bus.list_devices().await.is_ok());
    }

    #[tokio::test]
    async fn added_device_is_announced_before_its_changes() {
        let bus = MockBus::new();
        let handle = bus.handle();
        handle.appear();
        let mut signals = bus.subscribe_devices().await.unwrap();

        handle.add_device(record("b"));
        handle.change(&DeviceId::from("b"), vec![PropertyChange::Allowed(true)]);

        assert_eq!(
            signals.recv().await.unwrap(),
            RemoteSignal::DeviceAdded(record("b"))
        );
        assert_eq!(
            signals.recv().await.unwrap(),
            RemoteSignal::Changed {
                id: DeviceId::from("b"),
                changes: vec![PropertyChange::Allowed(true)],
            }
        );
    }

    #[tokio::test]
    async fn calls_require_the_service() {
        let bus = MockBus::new();
        let err = bus.allow_device(&DeviceId::from("a")).await.unwrap_err();
        assert!(matches!(err, BusError::ServiceUnknown(_)));
    }
}
