//! Application context: ties the watcher, registry and gate together.
//!
//! The context owns two queues. Presence transitions from the watcher go
//! on an unbounded queue that is always drained first, so a burst of device
//! signals or user intents can never push out an appearance or a
//! disappearance. Everything else shares a bounded event queue. Both are
//! processed one event at a time by [`AppContext::run`].

use std::sync::Arc;

use mconnect_bus::{RemoteSignal, ServiceBus, EVENT_CHANNEL_CAPACITY};
use mconnect_types::{DeviceId, Transition};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{Config, IndicatorSettings};
use crate::error::CoreError;
use crate::gate::{ActionGate, GateOutcome};
use crate::observer::{Observer, ObserverList, SubscriptionId};
use crate::projection::is_visible;
use crate::prompt::ConfirmationPrompt;
use crate::registry::{DeviceRegistry, RegistryEvent};
use crate::watcher::{Presence, PresenceHandler, ServiceWatcher};

/// Events processed by the context's main loop.
#[derive(Debug)]
pub enum ContextEvent {
    /// A device signal, tagged with the registry generation it was
    /// received for.
    Remote { generation: u64, signal: RemoteSignal },
    /// Gate an explicit trust transition.
    RequestTransition {
        id: DeviceId,
        transition: Transition,
    },
    /// Gate whichever transition the device's state calls for.
    ToggleAllowed(DeviceId),
    /// Ring a device.
    Locate(DeviceId),
    /// Re-read every device from the service, or retry binding after a
    /// failed enumeration.
    Resync,
    UpdateSettings(IndicatorSettings),
    /// Launch the service (the "Enable" affordance).
    StartService,
    Shutdown,
}

/// Notification delivered to context subscribers.
#[derive(Debug, Clone)]
pub enum AppEvent {
    /// A new registry was opened for the service.
    ServiceAppeared { generation: u64 },
    /// The service went away. The registry was already torn down.
    ServiceVanished,
    /// The service appeared but its devices could not be enumerated. The
    /// context stays unbound until [`ContextEvent::Resync`] or the next
    /// appearance.
    BindFailed {
        generation: u64,
        error: Arc<CoreError>,
    },
    Registry(RegistryEvent),
    /// A gated transition failed or was never confirmed. The device still
    /// shows its last confirmed state.
    TransitionFailed {
        id: DeviceId,
        transition: Option<Transition>,
        error: Arc<CoreError>,
    },
    /// The context stopped. Delivered once, last.
    ShutDown,
}

/// Aggregate status, published after every processed event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextStatus {
    pub service_present: bool,
    pub owner: Option<String>,
    /// Registry generation; increments each time the service appears.
    pub generation: u64,
    pub device_count: usize,
    /// Devices shown under the current settings.
    pub visible_count: usize,
    /// Show the "Enable" item: no registry is bound.
    pub show_enable_item: bool,
    /// Show the aggregate device section instead of per-device indicators.
    pub show_device_section: bool,
}

/// Forwards watcher callbacks into the presence queue.
struct PresenceForwarder(mpsc::UnboundedSender<Presence>);

impl PresenceHandler for PresenceForwarder {
    fn on_appeared(&mut self, owner: &str) {
        let presence = Presence::Appeared {
            owner: owner.to_string(),
        };
        if self.0.send(presence).is_err() {
            debug!("context gone, dropping service appearance");
        }
    }

    fn on_vanished(&mut self) {
        if self.0.send(Presence::Vanished).is_err() {
            debug!("context gone, dropping service disappearance");
        }
    }
}

/// What the main loop picked up next.
enum Next {
    Presence(Presence),
    Event(Option<ContextEvent>),
}

/// The application core.
pub struct AppContext {
    config: Config,
    bus: Arc<dyn ServiceBus>,
    gate: ActionGate,
    watcher: Option<ServiceWatcher>,
    registry: Option<DeviceRegistry>,
    owner: Option<String>,
    /// Owner whose devices could not be enumerated; `Resync` retries it.
    unbound_owner: Option<String>,
    generation: u64,
    forwarder: Option<JoinHandle<()>>,
    tasks: Vec<JoinHandle<()>>,
    observers: Arc<ObserverList<AppEvent>>,
    presence_tx: mpsc::UnboundedSender<Presence>,
    presence_rx: mpsc::UnboundedReceiver<Presence>,
    event_tx: mpsc::Sender<ContextEvent>,
    event_rx: mpsc::Receiver<ContextEvent>,
    status_tx: watch::Sender<ContextStatus>,
    settings_tx: watch::Sender<IndicatorSettings>,
    registry_tx: watch::Sender<Option<DeviceRegistry>>,
}

impl AppContext {
    pub fn new(
        config: Config,
        bus: Arc<dyn ServiceBus>,
        prompter: Arc<dyn ConfirmationPrompt>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (presence_tx, presence_rx) = mpsc::unbounded_channel();
        let (status_tx, _) = watch::channel(ContextStatus {
            show_enable_item: true,
            show_device_section: !config.indicator.per_device_indicators,
            ..ContextStatus::default()
        });
        let (settings_tx, _) = watch::channel(config.indicator);
        let (registry_tx, _) = watch::channel(None);

        Self {
            config,
            bus,
            gate: ActionGate::new(prompter),
            watcher: None,
            registry: None,
            owner: None,
            unbound_owner: None,
            generation: 0,
            forwarder: None,
            tasks: Vec::new(),
            observers: Arc::new(ObserverList::new()),
            presence_tx,
            presence_rx,
            event_tx,
            event_rx,
            status_tx,
            settings_tx,
            registry_tx,
        }
    }

    /// Get a clone of the event sender for feeding events into the context.
    pub fn event_sender(&self) -> mpsc::Sender<ContextEvent> {
        self.event_tx.clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<ContextStatus> {
        self.status_tx.subscribe()
    }

    /// Current indicator settings, for projections.
    pub fn settings_receiver(&self) -> watch::Receiver<IndicatorSettings> {
        self.settings_tx.subscribe()
    }

    /// The registry of the current generation, `None` while the service
    /// is absent.
    pub fn registry_receiver(&self) -> watch::Receiver<Option<DeviceRegistry>> {
        self.registry_tx.subscribe()
    }

    pub fn registry(&self) -> Option<&DeviceRegistry> {
        self.registry.as_ref()
    }

    /// Subscribe to context events. Returns `None` after shutdown.
    pub fn subscribe<O>(&self, observer: O) -> Option<SubscriptionId>
    where
        O: Observer<AppEvent> + 'static,
    {
        self.observers.subscribe(Box::new(observer))
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Start watching the service name.
    ///
    /// # Errors
    ///
    /// [`CoreError::TransportUnavailable`] if the bus cannot be reached.
    pub async fn init(&mut self) -> Result<(), CoreError> {
        if self.watcher.is_some() {
            return Ok(());
        }
        let name = self.config.service.bus_name.clone();
        let watcher = ServiceWatcher::start(
            self.bus.as_ref(),
            &name,
            PresenceForwarder(self.presence_tx.clone()),
        )
        .await?;
        info!(name = %name, "watching for service");
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Run the context event loop until [`ContextEvent::Shutdown`].
    ///
    /// # Errors
    ///
    /// Fails only if the watcher cannot be started.
    pub async fn run(&mut self) -> Result<(), CoreError> {
        self.init().await?;
        info!("context running");

        loop {
            let next = tokio::select! {
                biased;
                Some(presence) = self.presence_rx.recv() => Next::Presence(presence),
                event = self.event_rx.recv() => Next::Event(event),
            };
            match next {
                Next::Presence(Presence::Appeared { owner }) => self.bind(owner).await,
                Next::Presence(Presence::Vanished) => self.service_vanished().await,
                Next::Event(None | Some(ContextEvent::Shutdown)) => {
                    info!("shutting down");
                    break;
                }
                Next::Event(Some(event)) => self.handle_event(event).await,
            }
            self.tasks.retain(|t| !t.is_finished());
            self.publish_status();
        }

        self.shutdown();
        Ok(())
    }

    /// Stop watching and tear everything down. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.unbind();
        self.owner = None;
        self.publish_status();
        self.observers.close(AppEvent::ShutDown);
    }

    async fn handle_event(&mut self, event: ContextEvent) {
        match event {
            ContextEvent::Remote { generation, signal } => self.apply_remote(generation, signal),
            ContextEvent::RequestTransition { id, transition } => {
                self.spawn_gated(id, Some(transition));
            }
            ContextEvent::ToggleAllowed(id) => self.spawn_gated(id, None),
            ContextEvent::Locate(id) => self.spawn_locate(id),
            ContextEvent::Resync => {
                if let Some(registry) = &self.registry {
                    if let Err(e) = registry.resync().await {
                        warn!(error = %e, "resync failed");
                    }
                } else if let Some(owner) = self.unbound_owner.take() {
                    info!("retrying bind");
                    self.bind(owner).await;
                }
            }
            ContextEvent::UpdateSettings(settings) => self.update_settings(settings).await,
            ContextEvent::StartService => self.start_service().await,
            ContextEvent::Shutdown => {}
        }
    }

    async fn bind(&mut self, owner: String) {
        if self.registry.is_some() {
            debug!("service appeared while bound, rebinding");
            self.unbind();
        }
        self.unbound_owner = None;
        self.generation += 1;
        let generation = self.generation;

        let (signals, registry) = match self.open_generation(generation).await {
            Ok(opened) => opened,
            Err(e) => {
                warn!(generation, error = %e, "failed to bind to service");
                self.owner = None;
                self.unbound_owner = Some(owner);
                self.observers.emit(AppEvent::BindFailed {
                    generation,
                    error: Arc::new(e),
                });
                return;
            }
        };
        self.owner = Some(owner);

        self.observers.emit(AppEvent::ServiceAppeared { generation });
        let observers = Arc::clone(&self.observers);
        let forward = move |event: &RegistryEvent| observers.emit(AppEvent::Registry(event.clone()));
        if let Err(e) = registry.subscribe(forward) {
            warn!(generation, error = %e, "failed to observe registry");
        }

        let event_tx = self.event_tx.clone();
        self.forwarder = Some(tokio::spawn(forward_signals(signals, generation, event_tx)));
        self.registry_tx.send_replace(Some(registry.clone()));
        self.registry = Some(registry);
        info!(generation, "bound to service");
    }

    async fn open_generation(
        &self,
        generation: u64,
    ) -> Result<(mpsc::Receiver<RemoteSignal>, DeviceRegistry), CoreError> {
        // Subscribe before enumerating so nothing between the two is lost.
        let signals = self.bus.subscribe_devices().await?;
        let registry = DeviceRegistry::open(
            Arc::clone(&self.bus),
            generation,
            self.config.service.transition_timeout(),
        )
        .await?;
        Ok((signals, registry))
    }

    fn unbind(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
        if let Some(registry) = self.registry.take() {
            self.registry_tx.send_replace(None);
            registry.destroy();
        }
    }

    async fn service_vanished(&mut self) {
        self.unbind();
        self.owner = None;
        self.unbound_owner = None;
        self.observers.emit(AppEvent::ServiceVanished);

        let start_daemon = self.settings_tx.borrow().start_daemon;
        if start_daemon {
            self.start_service().await;
        } else {
            info!("waiting for service to start");
        }
    }

    fn apply_remote(&self, generation: u64, signal: RemoteSignal) {
        let Some(registry) = self.registry.as_ref().filter(|r| r.generation() == generation) else {
            debug!(generation, "dropping signal for stale generation");
            return;
        };
        if let Err(e) = registry.handle_signal(signal) {
            warn!(generation, error = %e, "failed to apply device signal");
        }
    }

    async fn update_settings(&mut self, settings: IndicatorSettings) {
        let previous = self.settings_tx.send_replace(settings);
        debug!(?settings, "settings updated");

        if let Some(registry) = &self.registry {
            if let Ok(sessions) = registry.sessions() {
                for session in sessions {
                    session.refresh();
                }
            }
        } else if settings.start_daemon && !previous.start_daemon && self.watcher.is_some() {
            self.start_service().await;
        }
    }

    async fn start_service(&self) {
        let name = &self.config.service.bus_name;
        match self.bus.start_service(name).await {
            Ok(()) => info!(name = %name, "requested service start"),
            Err(e) => warn!(name = %name, error = %e, "failed to start service"),
        }
    }

    fn spawn_gated(&mut self, id: DeviceId, transition: Option<Transition>) {
        let Some(registry) = self.registry.clone() else {
            warn!(device = %id, "trust change requested with no service");
            self.observers.emit(AppEvent::TransitionFailed {
                id,
                transition,
                error: Arc::new(CoreError::RegistryDestroyed),
            });
            return;
        };
        let gate = self.gate.clone();
        let observers = Arc::clone(&self.observers);

        self.tasks.push(tokio::spawn(async move {
            let outcome = match transition {
                Some(t) => gate.request(&registry, &id, t).await,
                None => gate.toggle(&registry, &id).await,
            };
            let (requested, result) = match outcome {
                Ok(GateOutcome::Dispatched { request, pending }) => {
                    (Some(request.transition), pending.wait().await)
                }
                Ok(GateOutcome::Cancelled(_)) => return,
                Err(e) => (transition, Err(e)),
            };
            match result {
                Ok(()) => info!(device = %id, "trust change confirmed by service"),
                Err(error) => {
                    warn!(device = %id, %error, "trust change failed");
                    observers.emit(AppEvent::TransitionFailed {
                        id,
                        transition: requested,
                        error: Arc::new(error),
                    });
                }
            }
        }));
    }

    fn spawn_locate(&mut self, id: DeviceId) {
        let Some(registry) = self.registry.clone() else {
            warn!(device = %id, "locate requested with no service");
            return;
        };
        self.tasks.push(tokio::spawn(async move {
            if let Err(e) = registry.locate(&id).await {
                warn!(device = %id, error = %e, "locate failed");
            }
        }));
    }

    fn publish_status(&self) {
        let settings = *self.settings_tx.borrow();
        let sessions = self
            .registry
            .as_ref()
            .and_then(|r| r.sessions().ok())
            .unwrap_or_default();
        let visible_count = sessions
            .iter()
            .filter(|s| is_visible(&s.snapshot(), &settings))
            .count();

        self.status_tx.send_replace(ContextStatus {
            service_present: self.owner.is_some(),
            owner: self.owner.clone(),
            generation: self.generation,
            device_count: sessions.len(),
            visible_count,
            show_enable_item: self.registry.is_none(),
            show_device_section: !settings.per_device_indicators,
        });
    }
}

async fn forward_signals(
    mut signals: mpsc::Receiver<RemoteSignal>,
    generation: u64,
    event_tx: mpsc::Sender<ContextEvent>,
) {
    while let Some(signal) = signals.recv().await {
        if event_tx
            .send(ContextEvent::Remote { generation, signal })
            .await
            .is_err()
        {
            break;
        }
    }
    debug!(generation, "device signal stream ended");
}
