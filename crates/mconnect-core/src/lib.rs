//! Device-session synchronization and lifecycle engine for mconnect-indicator.
//!
//! Watches the mconnect service on the session bus, keeps a registry of
//! per-device sessions in step with the service's notifications, fans
//! changes out to observers, and puts a confirmation gate in front of every
//! trust change sent back to the service.

pub mod config;
pub mod context;
pub mod error;
pub mod gate;
pub mod observer;
pub mod projection;
pub mod prompt;
pub mod registry;
pub mod request;
pub mod session;
pub mod setup;
pub mod watcher;

pub use config::{Config, IndicatorSettings, ServiceConfig};
pub use context::{AppContext, AppEvent, ContextEvent, ContextStatus};
pub use error::CoreError;
pub use gate::{ActionGate, GateOutcome};
pub use observer::{Observer, ObserverList, SubscriptionId};
pub use projection::{project, DeviceView, Projection, Render};
pub use prompt::{ConfirmationPrompt, Prompt, PromptKind, PromptResponse};
pub use registry::{DeviceRegistry, PendingTransition, RegistryEvent};
pub use request::{ActionRequest, ConfirmationState, RequestId};
pub use session::{DeviceSession, SessionEvent};
pub use watcher::{Presence, PresenceHandler, PresenceTracker, ServiceWatcher};
