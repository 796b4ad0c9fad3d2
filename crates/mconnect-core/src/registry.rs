//! Device registry: the set of device sessions for one service generation.
//!
//! A registry is opened when the service appears and destroyed when it
//! vanishes. It owns every [`DeviceSession`] of that generation, applies
//! the service's device signals to them, and tracks trust transitions that
//! were issued but not yet confirmed.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use mconnect_bus::{RemoteSignal, ServiceBus};
use mconnect_types::{CapabilityAction, Device, DeviceId, DeviceRecord, Field, PropertyChange, Transition};
use parking_lot::{Mutex, MutexGuard, ReentrantMutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::observer::{Observer, ObserverList, SubscriptionId};
use crate::session::DeviceSession;

/// Notification delivered to registry subscribers.
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    Added(DeviceSession),
    Removed(DeviceId),
    /// A device's state changed. Carries the fields that moved.
    Changed { id: DeviceId, fields: Vec<Field> },
    /// The registry was torn down. Delivered once, after the `Removed`
    /// notifications for every remaining device.
    Destroyed,
}

struct Waiter {
    ticket: u64,
    id: DeviceId,
    transition: Transition,
    tx: oneshot::Sender<Result<(), CoreError>>,
}

#[derive(Default)]
struct RegistryState {
    sessions: IndexMap<DeviceId, DeviceSession>,
    waiters: Vec<Waiter>,
    next_ticket: u64,
    destroyed: bool,
}

struct RegistryInner {
    bus: Arc<dyn ServiceBus>,
    generation: u64,
    timeout: Duration,
    state: Mutex<RegistryState>,
    /// Serializes mutation-plus-notification so subscribers never see a
    /// replayed device twice or miss one.
    delivery: ReentrantMutex<()>,
    observers: ObserverList<RegistryEvent>,
    cancel: CancellationToken,
}

/// Clonable handle to the registry of one service generation.
#[derive(Clone)]
pub struct DeviceRegistry {
    inner: Arc<RegistryInner>,
}

impl DeviceRegistry {
    /// Enumerate the service's devices and create a session for each.
    ///
    /// Records without an id are skipped; duplicates keep the first
    /// occurrence. Malformed fields are logged and replaced with safe
    /// defaults.
    ///
    /// # Errors
    ///
    /// Fails if the enumeration call fails.
    pub async fn open(
        bus: Arc<dyn ServiceBus>,
        generation: u64,
        timeout: Duration,
    ) -> Result<Self, CoreError> {
        let records = bus.list_devices().await?;

        let mut sessions = IndexMap::new();
        for record in &records {
            let Some(device) = normalize(record) else {
                continue;
            };
            if sessions.contains_key(&device.id) {
                warn!(device = %device.id, "duplicate device in enumeration, ignoring");
                continue;
            }
            sessions.insert(device.id.clone(), DeviceSession::new(device, generation));
        }
        info!(generation, devices = sessions.len(), "device registry opened");

        Ok(Self {
            inner: Arc::new(RegistryInner {
                bus,
                generation,
                timeout,
                state: Mutex::new(RegistryState {
                    sessions,
                    ..RegistryState::default()
                }),
                delivery: ReentrantMutex::new(()),
                observers: ObserverList::new(),
                cancel: CancellationToken::new(),
            }),
        })
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.lock().destroyed
    }

    /// Look up one device.
    ///
    /// # Errors
    ///
    /// [`CoreError::UnknownDevice`] if absent, [`CoreError::RegistryDestroyed`]
    /// after teardown.
    pub fn session(&self, id: &DeviceId) -> Result<DeviceSession, CoreError> {
        self.live_state()?
            .sessions
            .get(id)
            .cloned()
            .ok_or_else(|| CoreError::UnknownDevice(id.clone()))
    }

    /// All sessions in the order the service reported them.
    ///
    /// # Errors
    ///
    /// [`CoreError::RegistryDestroyed`] after teardown.
    pub fn sessions(&self) -> Result<Vec<DeviceSession>, CoreError> {
        Ok(self.live_state()?.sessions.values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribe to registry events. The observer first receives an
    /// `Added` for every existing device, in order, then live events.
    ///
    /// # Errors
    ///
    /// [`CoreError::RegistryDestroyed`] after teardown.
    pub fn subscribe<O>(&self, observer: O) -> Result<SubscriptionId, CoreError>
    where
        O: Observer<RegistryEvent> + 'static,
    {
        let _serial = self.inner.delivery.lock();
        let existing = self.sessions()?;
        let mut observer: Box<dyn Observer<RegistryEvent>> = Box::new(observer);
        for session in existing {
            observer.notify(&RegistryEvent::Added(session));
        }
        self.inner
            .observers
            .subscribe(observer)
            .ok_or(CoreError::RegistryDestroyed)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.observers.unsubscribe(id)
    }

    /// Apply one device signal from the service.
    ///
    /// # Errors
    ///
    /// [`CoreError::RegistryDestroyed`] after teardown.
    pub fn handle_signal(&self, signal: RemoteSignal) -> Result<(), CoreError> {
        let _serial = self.inner.delivery.lock();
        match signal {
            RemoteSignal::DeviceAdded(record) => {
                self.ensure_live()?;
                if let Some(device) = normalize(&record) {
                    self.upsert(device)?;
                }
                Ok(())
            }
            RemoteSignal::DeviceRemoved(id) => self.remove(&id),
            RemoteSignal::Changed { id, changes } => self.apply_changes(&id, &changes),
        }
    }

    /// Ask the service to perform `transition` on a device.
    ///
    /// Local state is untouched: the device only changes when the service
    /// reports it. The returned handle resolves once the reported state
    /// satisfies the transition, or fails on timeout or teardown.
    ///
    /// # Errors
    ///
    /// Fails if the device is unknown, the registry is destroyed, or the
    /// remote call fails.
    pub async fn request_transition(
        &self,
        id: &DeviceId,
        transition: Transition,
    ) -> Result<PendingTransition, CoreError> {
        let (tx, rx) = oneshot::channel();
        let ticket = {
            let mut state = self.live_state()?;
            if !state.sessions.contains_key(id) {
                return Err(CoreError::UnknownDevice(id.clone()));
            }
            state.waiters.retain(|w| !w.tx.is_closed());
            state.next_ticket += 1;
            let ticket = state.next_ticket;
            state.waiters.push(Waiter {
                ticket,
                id: id.clone(),
                transition,
                tx,
            });
            ticket
        };

        info!(device = %id, %transition, "requesting trust transition");
        let result = match transition {
            Transition::Allow => self.inner.bus.allow_device(id).await,
            Transition::Disallow => self.inner.bus.disallow_device(id).await,
        };
        if let Err(e) = result {
            self.inner.state.lock().waiters.retain(|w| w.ticket != ticket);
            return Err(e.into());
        }

        // The service may already be in the requested state.
        if let Ok(session) = self.session(id) {
            self.resolve_waiters(id, &session.snapshot());
        }

        Ok(PendingTransition {
            id: id.clone(),
            transition,
            rx,
            timeout: self.inner.timeout,
            cancel: self.inner.cancel.clone(),
        })
    }

    /// Ring a device.
    ///
    /// # Errors
    ///
    /// [`CoreError::Unsupported`] if the device lacks the capability, or
    /// the remote call's error.
    pub async fn locate(&self, id: &DeviceId) -> Result<(), CoreError> {
        let session = self.session(id)?;
        if !session
            .snapshot()
            .capabilities
            .supports(CapabilityAction::Locate)
        {
            return Err(CoreError::Unsupported {
                id: id.clone(),
                action: "locate",
            });
        }
        self.inner.bus.locate_device(id).await?;
        debug!(device = %id, "locate requested");
        Ok(())
    }

    /// Re-read every device from the service and reconcile: new devices
    /// are added, missing ones removed, the rest replaced. Every surviving
    /// session then gets a `Refreshed` notification.
    ///
    /// # Errors
    ///
    /// Fails if the registry is destroyed or the enumeration call fails.
    pub async fn resync(&self) -> Result<(), CoreError> {
        self.ensure_live()?;
        let records = self.inner.bus.list_devices().await?;

        let _serial = self.inner.delivery.lock();
        let mut seen = Vec::new();
        for record in &records {
            if let Some(device) = normalize(record) {
                seen.push(device.id.clone());
                self.upsert(device)?;
            }
        }

        let stale: Vec<DeviceId> = self
            .live_state()?
            .sessions
            .keys()
            .filter(|id| !seen.contains(id))
            .cloned()
            .collect();
        for id in stale {
            self.remove(&id)?;
        }

        for session in self.sessions()? {
            session.refresh();
        }
        debug!(generation = self.inner.generation, "registry resynchronized");
        Ok(())
    }

    /// Tear down: abort pending transitions, dispose every session, notify
    /// `Removed` for each and then `Destroyed`. Idempotent.
    pub fn destroy(&self) {
        let _serial = self.inner.delivery.lock();
        let (sessions, waiters) = {
            let mut state = self.inner.state.lock();
            if state.destroyed {
                return;
            }
            state.destroyed = true;
            (
                std::mem::take(&mut state.sessions),
                std::mem::take(&mut state.waiters),
            )
        };

        self.inner.cancel.cancel();
        for waiter in waiters {
            let _ = waiter.tx.send(Err(CoreError::RegistryDestroyed));
        }
        for (id, session) in sessions {
            session.dispose();
            self.inner.observers.emit(RegistryEvent::Removed(id));
        }
        self.inner.observers.close(RegistryEvent::Destroyed);
        info!(generation = self.inner.generation, "device registry destroyed");
    }

    fn ensure_live(&self) -> Result<(), CoreError> {
        if self.is_destroyed() {
            return Err(CoreError::RegistryDestroyed);
        }
        Ok(())
    }

    fn live_state(&self) -> Result<MutexGuard<'_, RegistryState>, CoreError> {
        let state = self.inner.state.lock();
        if state.destroyed {
            Err(CoreError::RegistryDestroyed)
        } else {
            Ok(state)
        }
    }

    fn upsert(&self, device: Device) -> Result<(), CoreError> {
        let id = device.id.clone();
        let existing = self.live_state()?.sessions.get(&id).cloned();

        if let Some(session) = existing {
            debug!(device = %id, "device re-announced, replacing state");
            let fields = session.replace(device);
            self.settle(&id, &session, fields);
            return Ok(());
        }

        let session = DeviceSession::new(device, self.inner.generation);
        self.live_state()?
            .sessions
            .insert(id.clone(), session.clone());
        info!(device = %id, name = %session.snapshot().name, "device added");
        self.inner.observers.emit(RegistryEvent::Added(session));
        Ok(())
    }

    fn remove(&self, id: &DeviceId) -> Result<(), CoreError> {
        let Some(session) = self.live_state()?.sessions.shift_remove(id) else {
            debug!(device = %id, "removal of unknown device ignored");
            return Ok(());
        };

        session.dispose();
        let waiters = {
            let mut state = self.inner.state.lock();
            let (gone, keep) = std::mem::take(&mut state.waiters)
                .into_iter()
                .partition(|w| &w.id == id);
            state.waiters = keep;
            gone
        };
        for waiter in waiters {
            let _ = waiter.tx.send(Err(CoreError::UnknownDevice(id.clone())));
        }

        info!(device = %id, "device removed");
        self.inner.observers.emit(RegistryEvent::Removed(id.clone()));
        Ok(())
    }

    fn apply_changes(&self, id: &DeviceId, changes: &[PropertyChange]) -> Result<(), CoreError> {
        let Some(session) = self.live_state()?.sessions.get(id).cloned() else {
            debug!(device = %id, "change for unknown device ignored");
            return Ok(());
        };
        let fields = session.apply(changes);
        self.settle(id, &session, fields);
        Ok(())
    }

    fn settle(&self, id: &DeviceId, session: &DeviceSession, fields: Vec<Field>) {
        if !fields.is_empty() {
            self.inner.observers.emit(RegistryEvent::Changed {
                id: id.clone(),
                fields,
            });
        }
        self.resolve_waiters(id, &session.snapshot());
    }

    fn resolve_waiters(&self, id: &DeviceId, device: &Device) {
        let ready: Vec<Waiter> = {
            let mut state = self.inner.state.lock();
            let (ready, pending) = std::mem::take(&mut state.waiters)
                .into_iter()
                .partition(|w| &w.id == id && w.transition.is_satisfied_by(device));
            state.waiters = pending;
            ready
        };
        for waiter in ready {
            debug!(device = %id, transition = %waiter.transition, "transition confirmed");
            let _ = waiter.tx.send(Ok(()));
        }
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("generation", &self.inner.generation)
            .field("devices", &self.len())
            .finish_non_exhaustive()
    }
}

/// A trust transition awaiting confirmation from the service.
#[derive(Debug)]
pub struct PendingTransition {
    id: DeviceId,
    transition: Transition,
    rx: oneshot::Receiver<Result<(), CoreError>>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl PendingTransition {
    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn transition(&self) -> Transition {
        self.transition
    }

    /// Wait for the service to confirm.
    ///
    /// # Errors
    ///
    /// [`CoreError::TransitionTimeout`] if nothing confirms it in time,
    /// [`CoreError::RegistryDestroyed`] if the service goes away first,
    /// [`CoreError::UnknownDevice`] if the device is removed.
    pub async fn wait(self) -> Result<(), CoreError> {
        let Self {
            id,
            transition,
            rx,
            timeout,
            cancel,
        } = self;

        tokio::select! {
            biased;
            result = rx => result.unwrap_or(Err(CoreError::RegistryDestroyed)),
            () = cancel.cancelled() => Err(CoreError::RegistryDestroyed),
            () = tokio::time::sleep(timeout) => {
                warn!(device = %id, %transition, "transition not confirmed in time");
                Err(CoreError::TransitionTimeout { id, transition })
            }
        }
    }
}

fn normalize(record: &DeviceRecord) -> Option<Device> {
    let Some((device, anomalies)) = record.normalize() else {
        warn!("device record without an id, skipping");
        return None;
    };
    for anomaly in &anomalies {
        warn!(%anomaly, "malformed device record");
    }
    Some(device)
}
