//! Presentation projections of device state.
//!
//! [`project`] is a pure function from a device snapshot and the current
//! settings to everything a menu entry or panel indicator displays. A
//! [`Projection`] subscribes to a session and hands each new view to a
//! [`Render`] implementation.

use mconnect_types::{Capability, CapabilityAction, Device, DeviceType, BATTERY_MISSING_ICON};
use tokio::sync::watch;
use tracing::trace;

use crate::config::IndicatorSettings;
use crate::error::CoreError;
use crate::observer::{Observer, SubscriptionId};
use crate::session::{DeviceSession, SessionEvent};

/// Everything a device entry displays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceView {
    pub label: String,
    pub battery_icon: String,
    /// `"85%"`, or empty when no battery is shown.
    pub battery_label: String,
    pub status_icon: &'static str,
    pub indicator_icon: String,
    /// Whether the device's menu entry is shown.
    pub visible: bool,
    /// Offline with `show-offline` unset: a surface may fold the entry
    /// away. Never affects `visible`.
    pub offline_collapsed: bool,
    /// Whether the device gets its own panel indicator.
    pub indicator_visible: bool,
    pub can_sms: bool,
    pub can_locate: bool,
}

pub fn project(device: &Device, settings: &IndicatorSettings) -> DeviceView {
    let (battery_icon, battery_label) = battery_display(device);
    let visible = is_visible(device, settings);

    DeviceView {
        label: device.name.clone(),
        battery_icon,
        battery_label,
        status_icon: status_icon(device),
        indicator_icon: indicator_icon(device),
        visible,
        offline_collapsed: !device.connected && !settings.show_offline,
        indicator_visible: visible && settings.per_device_indicators,
        can_sms: device.connected && device.capabilities.supports(CapabilityAction::SendSms),
        can_locate: device.connected && device.capabilities.supports(CapabilityAction::Locate),
    }
}

/// `allowed || show-unallowed`.
pub fn is_visible(device: &Device, settings: &IndicatorSettings) -> bool {
    device.allowed || settings.show_unallowed
}

fn battery_display(device: &Device) -> (String, String) {
    if !device.connected || !device.capabilities.contains(&Capability::Battery) {
        return (BATTERY_MISSING_ICON.to_string(), String::new());
    }
    match device.battery {
        Some(battery) => (battery.tier().icon_name(battery.charging), battery.label()),
        None => (BATTERY_MISSING_ICON.to_string(), String::new()),
    }
}

/// Trust status icon for the allow/disallow button.
pub fn status_icon(device: &Device) -> &'static str {
    if device.paired && device.allowed {
        "channel-secure-symbolic"
    } else if device.allowed {
        "feed-refresh-symbolic"
    } else {
        "channel-insecure-symbolic"
    }
}

/// Panel indicator icon, e.g. `smartphone-connected`.
pub fn indicator_icon(device: &Device) -> String {
    let kind = match device.device_type {
        DeviceType::Phone => "smartphone",
        other => other.as_str(),
    };
    let state = if device.connected {
        "connected"
    } else if device.allowed {
        "trusted"
    } else {
        "disconnected"
    };
    format!("{kind}-{state}")
}

/// A display surface that redraws from a [`DeviceView`].
pub trait Render: Send {
    fn render(&mut self, view: &DeviceView);

    /// The device is gone; release the surface.
    fn dispose(&mut self) {}
}

/// Keeps a [`Render`] in step with one session.
pub struct Projection<R> {
    renderer: R,
    settings: watch::Receiver<IndicatorSettings>,
    last: Option<DeviceView>,
}

impl<R: Render + 'static> Projection<R> {
    /// Render the session's current state and subscribe for updates.
    ///
    /// # Errors
    ///
    /// [`CoreError::SessionDisposed`] if the session is already gone.
    pub fn attach(
        session: &DeviceSession,
        settings: watch::Receiver<IndicatorSettings>,
        renderer: R,
    ) -> Result<SubscriptionId, CoreError> {
        let mut projection = Self {
            renderer,
            settings,
            last: None,
        };
        projection.update(&session.snapshot(), true);
        session.subscribe(projection)
    }

    fn update(&mut self, device: &Device, force: bool) {
        let settings = *self.settings.borrow();
        let view = project(device, &settings);
        if !force && self.last.as_ref() == Some(&view) {
            trace!(device = %device.id, "view unchanged");
            return;
        }
        self.renderer.render(&view);
        self.last = Some(view);
    }
}

impl<R: Render + 'static> Observer<SessionEvent> for Projection<R> {
    fn notify(&mut self, event: &SessionEvent) {
        match event {
            SessionEvent::Changed { snapshot, .. } => self.update(snapshot, false),
            SessionEvent::Refreshed(snapshot) => self.update(snapshot, true),
            SessionEvent::Disposed => self.renderer.dispose(),
        }
    }
}
