//! Per-device session: the local mirror of one remote device.

use std::fmt;
use std::sync::Arc;

use mconnect_types::{Device, DeviceId, Field, PropertyChange};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::CoreError;
use crate::observer::{Observer, ObserverList, SubscriptionId};

/// Notification delivered to a session's subscribers.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// One batch of remote changes was applied. `fields` lists each changed
    /// field once, in the order first seen.
    Changed {
        snapshot: Arc<Device>,
        fields: Vec<Field>,
    },
    /// The service was re-read. Consumers should redraw everything.
    Refreshed(Arc<Device>),
    /// The session is gone. Delivered exactly once, last.
    Disposed,
}

struct SessionShared {
    id: DeviceId,
    generation: u64,
    snapshot: RwLock<Arc<Device>>,
    observers: ObserverList<SessionEvent>,
}

/// Clonable handle to a device session.
///
/// Sessions are created and disposed only by the registry. Property state
/// is never mutated locally; it only moves when the service says so.
#[derive(Clone)]
pub struct DeviceSession {
    shared: Arc<SessionShared>,
}

impl DeviceSession {
    pub(crate) fn new(device: Device, generation: u64) -> Self {
        Self {
            shared: Arc::new(SessionShared {
                id: device.id.clone(),
                generation,
                snapshot: RwLock::new(Arc::new(device)),
                observers: ObserverList::new(),
            }),
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.shared.id
    }

    /// Service generation this session belongs to.
    pub fn generation(&self) -> u64 {
        self.shared.generation
    }

    /// Current state. Cheap; the snapshot is shared, not copied.
    pub fn snapshot(&self) -> Arc<Device> {
        self.shared.snapshot.read().clone()
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.observers.is_closed()
    }

    /// Register for change notifications.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::SessionDisposed`] once the session is disposed.
    pub fn subscribe<O>(&self, observer: O) -> Result<SubscriptionId, CoreError>
    where
        O: Observer<SessionEvent> + 'static,
    {
        self.shared
            .observers
            .subscribe(Box::new(observer))
            .ok_or_else(|| CoreError::SessionDisposed(self.shared.id.clone()))
    }

    /// Returns whether the subscription existed. No-op after disposal.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.observers.unsubscribe(id)
    }

    /// Apply one batch of remote changes. When a field changes more than
    /// once in the batch, the last value wins.
    pub(crate) fn apply(&self, changes: &[PropertyChange]) -> Vec<Field> {
        if self.is_disposed() {
            debug!(device = %self.shared.id, "ignoring changes for disposed session");
            return Vec::new();
        }

        let mut device = Device::clone(&self.snapshot());
        let mut fields = Vec::new();
        for change in changes {
            if let Some(anomaly) = device.apply(change) {
                warn!(%anomaly, "bad property value from service");
            }
            let field = change.field();
            if !fields.contains(&field) {
                fields.push(field);
            }
        }

        let snapshot = Arc::new(device);
        *self.shared.snapshot.write() = Arc::clone(&snapshot);
        self.shared.observers.emit(SessionEvent::Changed {
            snapshot,
            fields: fields.clone(),
        });
        fields
    }

    /// Replace the whole state, e.g. when the service re-announces a device
    /// it already reported. Emits `Changed` only for fields that differ.
    pub(crate) fn replace(&self, device: Device) -> Vec<Field> {
        if self.is_disposed() {
            return Vec::new();
        }
        let fields = changed_fields(&self.snapshot(), &device);
        if fields.is_empty() {
            return fields;
        }
        let snapshot = Arc::new(device);
        *self.shared.snapshot.write() = Arc::clone(&snapshot);
        self.shared.observers.emit(SessionEvent::Changed {
            snapshot,
            fields: fields.clone(),
        });
        fields
    }

    pub(crate) fn refresh(&self) {
        self.shared
            .observers
            .emit(SessionEvent::Refreshed(self.snapshot()));
    }

    /// Notify `Disposed` once and drop every subscriber.
    pub(crate) fn dispose(&self) {
        self.shared.observers.close(SessionEvent::Disposed);
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.shared.id)
            .field("generation", &self.shared.generation)
            .field("disposed", &self.is_disposed())
            .finish_non_exhaustive()
    }
}

fn changed_fields(old: &Device, new: &Device) -> Vec<Field> {
    Field::ALL
        .into_iter()
        .filter(|field| match field {
            Field::Active => old.connected != new.connected,
            Field::Battery => old.battery != new.battery,
            Field::Name => old.name != new.name || old.device_type != new.device_type,
            Field::Plugins => old.capabilities != new.capabilities,
            Field::Allowed => old.allowed != new.allowed,
            Field::Paired => old.paired != new.paired,
        })
        .collect()
}
