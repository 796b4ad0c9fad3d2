//! Presence watching for the service's well-known bus name.

use std::sync::Arc;

use mconnect_bus::{NameOwner, ServiceBus};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::error::CoreError;

/// A presence transition of the watched name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presence {
    Appeared { owner: String },
    Vanished,
}

/// Turns a sequence of owner reports into presence transitions.
///
/// A change of owner is reported as `Vanished` followed by `Appeared`,
/// never as a single appearance. The first report always produces a
/// transition so consumers learn the initial state.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    current: Option<Option<String>>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner from the last report, if the service is present.
    pub fn owner(&self) -> Option<&str> {
        self.current.as_ref().and_then(|o| o.as_deref())
    }

    pub fn update(&mut self, owner: NameOwner) -> Vec<Presence> {
        let next = owner.0;
        let previous = self.current.replace(next.clone());
        match (previous, next) {
            (None, None) => vec![Presence::Vanished],
            (None, Some(owner)) | (Some(None), Some(owner)) => vec![Presence::Appeared { owner }],
            (Some(Some(_)), None) => vec![Presence::Vanished],
            (Some(None), None) => Vec::new(),
            (Some(Some(old)), Some(owner)) if old == owner => Vec::new(),
            (Some(Some(_)), Some(owner)) => vec![Presence::Vanished, Presence::Appeared { owner }],
        }
    }
}

/// Receives presence transitions.
pub trait PresenceHandler: Send + 'static {
    fn on_appeared(&mut self, owner: &str);
    fn on_vanished(&mut self);
}

type SharedHandler = Arc<Mutex<Option<Box<dyn PresenceHandler>>>>;

/// Watches a bus name and reports appear/vanish transitions.
///
/// After [`ServiceWatcher::stop`] returns, the handler is never called
/// again.
pub struct ServiceWatcher {
    name: String,
    handler: SharedHandler,
    task: Option<JoinHandle<()>>,
}

impl ServiceWatcher {
    /// Start watching `name`. The handler is told the initial state as
    /// soon as the bus reports it.
    ///
    /// # Errors
    ///
    /// [`CoreError::TransportUnavailable`] if the bus cannot be reached.
    pub async fn start<H>(bus: &dyn ServiceBus, name: &str, handler: H) -> Result<Self, CoreError>
    where
        H: PresenceHandler,
    {
        let mut owners = bus.watch_name(name).await?;
        let handler: SharedHandler = Arc::new(Mutex::new(Some(Box::new(handler))));

        let task_handler = Arc::clone(&handler);
        let task_name = name.to_string();
        let task = tokio::spawn(async move {
            let mut tracker = PresenceTracker::new();
            while let Some(owner) = owners.recv().await {
                for presence in tracker.update(owner) {
                    // Dispatch under the lock so `stop` cannot interleave.
                    let mut guard = task_handler.lock();
                    let Some(handler) = guard.as_mut() else {
                        return;
                    };
                    match presence {
                        Presence::Appeared { owner } => {
                            info!(name = %task_name, %owner, "service appeared");
                            handler.on_appeared(&owner);
                        }
                        Presence::Vanished => {
                            info!(name = %task_name, "service vanished");
                            handler.on_vanished();
                        }
                    }
                }
            }
            debug!(name = %task_name, "name watch ended");
        });

        Ok(Self {
            name: name.to_string(),
            handler,
            task: Some(task),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handler.lock().is_some()
    }

    /// Stop watching. Idempotent.
    pub fn stop(&mut self) {
        // Taking the handler waits out any in-flight callback.
        let handler = self.handler.lock().take();
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if handler.is_some() {
            debug!(name = %self.name, "service watcher stopped");
        }
    }
}

impl Drop for ServiceWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
