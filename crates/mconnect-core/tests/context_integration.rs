//! Integration tests exercising the full context event loop against the
//! mock bus.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mconnect_bus::mock::{MockBus, MockBusHandle, MockCall};
use mconnect_bus::RemoteSignal;
use mconnect_core::config::{Config, IndicatorSettings, ServiceConfig};
use mconnect_core::{
    project, AppContext, AppEvent, ConfirmationPrompt, ContextEvent, ContextStatus, CoreError,
    DeviceRegistry, Prompt, PromptKind, PromptResponse, RegistryEvent,
};
use mconnect_types::{DeviceId, DeviceRecord, PropertyChange, Transition};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

const WAIT: Duration = Duration::from_secs(5);

struct TestPrompt {
    response: PromptResponse,
    seen: Mutex<Vec<PromptKind>>,
}

#[async_trait]
impl ConfirmationPrompt for TestPrompt {
    async fn confirm(&self, prompt: &Prompt) -> PromptResponse {
        self.seen.lock().push(prompt.kind);
        self.response
    }
}

/// Everything needed to drive one context.
struct Harness {
    bus: MockBusHandle,
    prompt: Arc<TestPrompt>,
    events: Arc<Mutex<Vec<AppEvent>>>,
    status: watch::Receiver<ContextStatus>,
    registry: watch::Receiver<Option<DeviceRegistry>>,
    sender: mpsc::Sender<ContextEvent>,
    handle: tokio::task::JoinHandle<()>,
}

impl Harness {
    async fn shutdown(self) {
        let _ = self.sender.send(ContextEvent::Shutdown).await;
        let _ = tokio::time::timeout(WAIT, self.handle).await;
    }

    async fn send(&self, event: ContextEvent) {
        self.sender.send(event).await.unwrap();
    }

    fn current_registry(&self) -> DeviceRegistry {
        self.registry.borrow().clone().expect("registry bound")
    }

    fn events(&self) -> Vec<AppEvent> {
        self.events.lock().clone()
    }
}

fn test_prompt(response: PromptResponse) -> Arc<TestPrompt> {
    Arc::new(TestPrompt {
        response,
        seen: Mutex::new(Vec::new()),
    })
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn phone_a() -> DeviceRecord {
    DeviceRecord {
        id: Some(DeviceId::from("/org/mconnect/device/a")),
        name: Some("Phone A".to_string()),
        device_type: Some("phone".to_string()),
        connected: Some(true),
        paired: Some(true),
        allowed: Some(true),
        battery_level: Some(85),
        battery_charging: Some(false),
        plugins: Some(vec![
            "kdeconnect.battery".to_string(),
            "kdeconnect.findmyphone.request".to_string(),
        ]),
    }
}

fn tablet_b() -> DeviceRecord {
    DeviceRecord {
        id: Some(DeviceId::from("/org/mconnect/device/b")),
        name: Some("Tablet B".to_string()),
        device_type: Some("tablet".to_string()),
        connected: Some(true),
        paired: Some(false),
        allowed: Some(false),
        battery_level: None,
        battery_charging: None,
        plugins: Some(Vec::new()),
    }
}

fn id_a() -> DeviceId {
    DeviceId::from("/org/mconnect/device/a")
}

fn id_b() -> DeviceId {
    DeviceId::from("/org/mconnect/device/b")
}

fn config(timeout_ms: u64, start_daemon: bool) -> Config {
    Config {
        indicator: IndicatorSettings {
            start_daemon,
            ..IndicatorSettings::default()
        },
        service: ServiceConfig {
            transition_timeout_ms: timeout_ms,
            ..ServiceConfig::default()
        },
    }
}

/// Start a context on `bus` and spawn its loop.
fn start(bus: MockBus, config: Config, response: PromptResponse) -> Harness {
    init_tracing();
    let handle = bus.handle();
    let prompt = test_prompt(response);

    let mut ctx = AppContext::new(config, Arc::new(bus), prompt.clone());
    let events: Arc<Mutex<Vec<AppEvent>>> = Arc::default();
    let sink = Arc::clone(&events);
    ctx.subscribe(move |e: &AppEvent| sink.lock().push(e.clone()))
        .unwrap();

    let status = ctx.status_receiver();
    let registry = ctx.registry_receiver();
    let sender = ctx.event_sender();
    let task = tokio::spawn(async move {
        if let Err(e) = ctx.run().await {
            eprintln!("context error: {e}");
        }
    });

    Harness {
        bus: handle,
        prompt,
        events,
        status,
        registry,
        sender,
        handle: task,
    }
}

/// A bus with the service running and both test devices registered.
fn populated_bus() -> MockBus {
    let bus = MockBus::new();
    let handle = bus.handle();
    handle.appear();
    handle.add_device(phone_a());
    handle.add_device(tablet_b());
    bus
}

/// Wait for a condition on a status receiver with timeout.
async fn wait_for_status(
    rx: &mut watch::Receiver<ContextStatus>,
    pred: impl Fn(&ContextStatus) -> bool,
) -> Result<ContextStatus, &'static str> {
    tokio::time::timeout(WAIT, async {
        loop {
            {
                let status = rx.borrow_and_update().clone();
                if pred(&status) {
                    return Ok(status);
                }
            }
            if rx.changed().await.is_err() {
                return Err("watch closed");
            }
        }
    })
    .await
    .map_err(|_| "timeout")?
}

/// Poll until `pred` holds.
async fn wait_until(what: &str, pred: impl Fn() -> bool) {
    let result = tokio::time::timeout(WAIT, async {
        while !pred() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {what}");
}

fn added_ids(events: &[AppEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            AppEvent::Registry(RegistryEvent::Added(s)) => Some(s.id().to_string()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_enumeration_and_projection() {
    let mut h = start(populated_bus(), config(5000, true), PromptResponse::Reject);

    let status = wait_for_status(&mut h.status, |s| s.device_count == 2)
        .await
        .expect("devices enumerated");
    assert!(status.service_present);
    assert!(!status.show_enable_item);
    assert!(status.show_device_section);
    assert_eq!(status.generation, 1);
    // B is not allowed and hidden by default.
    assert_eq!(status.visible_count, 1);

    assert_eq!(
        added_ids(&h.events()),
        vec![id_a().to_string(), id_b().to_string()]
    );

    let registry = h.current_registry();
    let a = registry.session(&id_a()).unwrap().snapshot();
    let view = project(&a, &IndicatorSettings::default());
    assert_eq!(view.battery_icon, "battery-full-symbolic");
    assert_eq!(view.battery_label, "85%");
    assert_eq!(view.indicator_icon, "smartphone-connected");
    assert!(view.can_locate);

    let b = registry.session(&id_b()).unwrap().snapshot();
    assert!(!project(&b, &IndicatorSettings::default()).visible);

    h.send(ContextEvent::UpdateSettings(IndicatorSettings {
        show_unallowed: true,
        ..IndicatorSettings::default()
    }))
    .await;
    wait_for_status(&mut h.status, |s| s.visible_count == 2)
        .await
        .expect("B shown with show-unallowed");

    h.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_revoke_makes_no_call() {
    let h = start(populated_bus(), config(5000, true), PromptResponse::Reject);
    let mut status = h.status.clone();
    wait_for_status(&mut status, |s| s.device_count == 2)
        .await
        .expect("bound");

    h.send(ContextEvent::RequestTransition {
        id: id_a(),
        transition: Transition::Disallow,
    })
    .await;

    let prompt = Arc::clone(&h.prompt);
    wait_until("prompt", || !prompt.seen.lock().is_empty()).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*h.prompt.seen.lock(), vec![PromptKind::RevokeTrust]);
    assert_eq!(h.bus.transition_calls(), 0);
    let a = h.current_registry().session(&id_a()).unwrap().snapshot();
    assert!(a.paired);
    assert!(a.allowed);
    assert!(!h
        .events()
        .iter()
        .any(|e| matches!(e, AppEvent::TransitionFailed { .. })));

    h.shutdown().await;
}

#[tokio::test]
async fn test_confirmed_grant_waits_for_service() {
    let bus = populated_bus();
    bus.handle().set_auto_confirm(true);
    let h = start(bus, config(5000, true), PromptResponse::Accept);
    let mut status = h.status.clone();
    wait_for_status(&mut status, |s| s.device_count == 2)
        .await
        .expect("bound");

    h.send(ContextEvent::ToggleAllowed(id_b())).await;

    let registry = h.current_registry();
    wait_until("B allowed", || {
        registry.session(&id_b()).unwrap().snapshot().allowed
    })
    .await;
    assert_eq!(h.bus.calls(), vec![MockCall::Allow(id_b())]);
    assert_eq!(*h.prompt.seen.lock(), vec![PromptKind::GrantTrust]);

    wait_for_status(&mut status, |s| s.visible_count == 2)
        .await
        .expect("B visible once allowed");

    h.shutdown().await;
}

#[tokio::test]
async fn test_vanish_aborts_pending_transition() {
    let h = start(populated_bus(), config(60_000, false), PromptResponse::Accept);
    let mut status = h.status.clone();
    wait_for_status(&mut status, |s| s.device_count == 2)
        .await
        .expect("bound");
    let session = h.current_registry().session(&id_b()).unwrap();

    h.send(ContextEvent::RequestTransition {
        id: id_b(),
        transition: Transition::Allow,
    })
    .await;
    let bus = h.bus.clone();
    wait_until("allow call", || bus.transition_calls() == 1).await;

    h.bus.vanish();

    // Resolves long before the 60s transition timeout.
    let events = Arc::clone(&h.events);
    wait_until("transition failure", || {
        events.lock().iter().any(|e| {
            matches!(
                e,
                AppEvent::TransitionFailed { error, .. }
                    if matches!(**error, CoreError::RegistryDestroyed)
            )
        })
    })
    .await;

    let status = wait_for_status(&mut status, |s| !s.service_present)
        .await
        .expect("service gone");
    assert!(status.show_enable_item);
    assert_eq!(status.device_count, 0);
    assert!(session.is_disposed());
    assert!(matches!(
        session.subscribe(|_: &mconnect_core::SessionEvent| {}),
        Err(CoreError::SessionDisposed(_))
    ));
    // start-daemon is off: nothing was launched.
    assert!(!h
        .bus
        .calls()
        .iter()
        .any(|c| matches!(c, MockCall::StartService(_))));

    h.shutdown().await;
}

#[tokio::test]
async fn test_added_removed_symmetry() {
    let h = start(populated_bus(), config(5000, true), PromptResponse::Reject);
    let mut status = h.status.clone();
    wait_for_status(&mut status, |s| s.device_count == 2)
        .await
        .expect("bound");

    let c = DeviceRecord {
        id: Some(DeviceId::from("/org/mconnect/device/c")),
        ..DeviceRecord::default()
    };
    h.bus.add_device(c);
    h.bus.remove_device(&id_a());
    h.bus.remove_device(&DeviceId::from("/org/mconnect/device/c"));
    h.bus.add_device(phone_a());

    wait_for_status(&mut status, |s| s.device_count == 2)
        .await
        .expect("settled");
    let events = Arc::clone(&h.events);
    wait_until("all signals applied", || {
        added_ids(&events.lock()).len() == 4
    })
    .await;

    let mut live: Vec<String> = Vec::new();
    for event in h.events() {
        match event {
            AppEvent::Registry(RegistryEvent::Added(s)) => live.push(s.id().to_string()),
            AppEvent::Registry(RegistryEvent::Removed(id)) => {
                live.retain(|l| *l != id.to_string());
            }
            _ => {}
        }
    }
    let registry_ids: Vec<String> = h
        .current_registry()
        .sessions()
        .unwrap()
        .iter()
        .map(|s| s.id().to_string())
        .collect();
    assert_eq!(live, registry_ids);
    assert_eq!(registry_ids, vec![id_b().to_string(), id_a().to_string()]);

    h.shutdown().await;
}

#[tokio::test]
async fn test_owner_change_is_vanish_then_appear() {
    let h = start(populated_bus(), config(5000, false), PromptResponse::Reject);
    let mut status = h.status.clone();
    wait_for_status(&mut status, |s| s.generation == 1 && s.device_count == 2)
        .await
        .expect("bound");
    let first = h.current_registry();

    h.bus.restart();

    let status = wait_for_status(&mut status, |s| s.generation == 2 && s.device_count == 2)
        .await
        .expect("rebound");
    assert!(status.service_present);
    assert!(first.is_destroyed());

    let lifecycle: Vec<&str> = h
        .events()
        .iter()
        .filter_map(|e| match e {
            AppEvent::ServiceAppeared { .. } => Some("appeared"),
            AppEvent::ServiceVanished => Some("vanished"),
            _ => None,
        })
        .collect();
    assert_eq!(lifecycle, vec!["appeared", "vanished", "appeared"]);

    h.shutdown().await;
}

#[tokio::test]
async fn test_stale_generation_signal_is_dropped() {
    let h = start(populated_bus(), config(5000, true), PromptResponse::Reject);
    let mut status = h.status.clone();
    wait_for_status(&mut status, |s| s.device_count == 2)
        .await
        .expect("bound");

    h.send(ContextEvent::Remote {
        generation: 99,
        signal: RemoteSignal::Changed {
            id: id_b(),
            changes: vec![PropertyChange::Allowed(true)],
        },
    })
    .await;
    h.send(ContextEvent::Remote {
        generation: 1,
        signal: RemoteSignal::Changed {
            id: id_b(),
            changes: vec![PropertyChange::Name("Renamed".to_string())],
        },
    })
    .await;

    let registry = h.current_registry();
    wait_until("rename applied", || {
        registry.session(&id_b()).unwrap().snapshot().name == "Renamed"
    })
    .await;
    assert!(!registry.session(&id_b()).unwrap().snapshot().allowed);

    h.shutdown().await;
}

#[tokio::test]
async fn test_auto_start_when_absent() {
    let bus = MockBus::new();
    bus.handle().set_appear_on_start(true);
    let mut h = start(bus, config(5000, true), PromptResponse::Reject);

    wait_for_status(&mut h.status, |s| s.service_present)
        .await
        .expect("service started");
    assert_eq!(
        h.bus.calls(),
        vec![MockCall::StartService("org.mconnect".to_string())]
    );

    h.shutdown().await;
}

#[tokio::test]
async fn test_enable_waits_until_start_daemon_set() {
    let bus = MockBus::new();
    bus.handle().set_appear_on_start(true);
    let mut h = start(bus, config(5000, false), PromptResponse::Reject);

    let status = wait_for_status(&mut h.status, |s| s.show_enable_item)
        .await
        .expect("enable item shown");
    assert!(!status.service_present);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.bus.calls().is_empty());

    h.send(ContextEvent::UpdateSettings(IndicatorSettings {
        start_daemon: true,
        ..IndicatorSettings::default()
    }))
    .await;

    wait_for_status(&mut h.status, |s| s.service_present && !s.show_enable_item)
        .await
        .expect("service started after enabling");

    h.shutdown().await;
}

#[tokio::test]
async fn test_transport_down_fails_start() {
    init_tracing();
    let bus = MockBus::new();
    bus.handle().set_transport_down(true);
    let prompt = test_prompt(PromptResponse::Reject);
    let mut ctx = AppContext::new(Config::default(), Arc::new(bus), prompt);

    let err = ctx.run().await.unwrap_err();
    assert!(matches!(err, CoreError::TransportUnavailable(_)));
}

#[tokio::test]
async fn test_shutdown_notifies_once() {
    let h = start(populated_bus(), config(5000, true), PromptResponse::Reject);
    let mut status = h.status.clone();
    wait_for_status(&mut status, |s| s.device_count == 2)
        .await
        .expect("bound");
    let registry = h.current_registry();
    let events = Arc::clone(&h.events);

    h.shutdown().await;

    assert!(registry.is_destroyed());
    let shut_down = events
        .lock()
        .iter()
        .filter(|e| matches!(e, AppEvent::ShutDown))
        .count();
    assert_eq!(shut_down, 1);
}

#[tokio::test]
async fn test_appearance_survives_full_event_queue() {
    init_tracing();
    let bus = MockBus::new();
    let handle = bus.handle();
    handle.add_device(phone_a());

    let mut ctx = AppContext::new(
        config(5000, false),
        Arc::new(bus),
        test_prompt(PromptResponse::Reject),
    );
    ctx.init().await.unwrap();
    let mut status = ctx.status_receiver();
    let sender = ctx.event_sender();

    // Backlog the event queue before the service shows up.
    let mut queued = 0;
    while sender.try_send(ContextEvent::Resync).is_ok() {
        queued += 1;
    }
    assert!(queued > 0);
    handle.appear();

    let task = tokio::spawn(async move { ctx.run().await });

    let bound = wait_for_status(&mut status, |s| s.service_present && s.device_count == 1)
        .await
        .expect("bound despite the backlog");
    assert_eq!(bound.generation, 1);

    sender.send(ContextEvent::Shutdown).await.unwrap();
    let result = tokio::time::timeout(WAIT, task).await.expect("loop stopped");
    assert!(result.unwrap().is_ok());
}

#[tokio::test]
async fn test_failed_enumeration_is_reported_and_retried() {
    let bus = populated_bus();
    bus.handle().set_enumeration_fails(true);
    let mut h = start(bus, config(5000, false), PromptResponse::Reject);

    let events = Arc::clone(&h.events);
    wait_until("bind failure", || {
        events
            .lock()
            .iter()
            .any(|e| matches!(e, AppEvent::BindFailed { generation: 1, .. }))
    })
    .await;
    let status = wait_for_status(&mut h.status, |s| s.generation == 1)
        .await
        .expect("status after failed bind");
    assert!(!status.service_present);
    assert!(status.show_enable_item);
    assert_eq!(status.device_count, 0);
    assert!(h.registry.borrow().is_none());

    h.bus.set_enumeration_fails(false);
    h.send(ContextEvent::Resync).await;

    let status = wait_for_status(&mut h.status, |s| s.service_present && s.device_count == 2)
        .await
        .expect("bound on retry");
    assert_eq!(status.generation, 2);
    assert!(!status.show_enable_item);
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, AppEvent::ServiceAppeared { generation: 2 })));

    h.shutdown().await;
}

#[tokio::test]
async fn test_unconfirmed_disallow_times_out_and_keeps_state() {
    let h = start(populated_bus(), config(200, false), PromptResponse::Accept);
    let mut status = h.status.clone();
    wait_for_status(&mut status, |s| s.device_count == 2)
        .await
        .expect("bound");

    h.send(ContextEvent::RequestTransition {
        id: id_a(),
        transition: Transition::Disallow,
    })
    .await;

    let events = Arc::clone(&h.events);
    wait_until("transition timeout", || {
        events.lock().iter().any(|e| {
            matches!(
                e,
                AppEvent::TransitionFailed { id, transition: Some(Transition::Disallow), error }
                    if *id == id_a() && matches!(**error, CoreError::TransitionTimeout { .. })
            )
        })
    })
    .await;

    assert_eq!(h.bus.calls(), vec![MockCall::Disallow(id_a())]);
    let a = h.current_registry().session(&id_a()).unwrap().snapshot();
    assert!(a.allowed);
    assert!(a.paired);
    assert_eq!(h.status.borrow().visible_count, 1);

    h.shutdown().await;
}

#[tokio::test]
async fn test_offline_allowed_device_stays_visible() {
    let h = start(populated_bus(), config(5000, false), PromptResponse::Reject);
    let mut status = h.status.clone();
    wait_for_status(&mut status, |s| s.device_count == 2 && s.visible_count == 1)
        .await
        .expect("bound");

    h.bus.change(&id_a(), vec![PropertyChange::Active(false)]);

    let registry = h.current_registry();
    wait_until("A offline", || {
        !registry.session(&id_a()).unwrap().snapshot().connected
    })
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let status = h.status.borrow().clone();
    assert_eq!(status.device_count, 2);
    assert_eq!(status.visible_count, 1);

    let view = project(
        &registry.session(&id_a()).unwrap().snapshot(),
        &IndicatorSettings::default(),
    );
    assert!(view.visible);
    assert!(view.offline_collapsed);

    h.shutdown().await;
}
