//! Raw device records and property changes as delivered by the service.
//!
//! The service is not trusted to send complete or well-formed data. Records
//! and changes are normalised into a [`Device`] here; anything missing or out
//! of range falls back to a safe default and is reported as a
//! [`MalformedDeviceRecord`] for the caller to log.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::{Battery, Capabilities, Device, DeviceId, DeviceType, Field};

/// Name shown for a device whose record carries none.
pub const DEFAULT_NAME: &str = "Unknown device";

/// A record or change was missing a field or carried an invalid value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("malformed record for device {id}: {field} {reason}")]
pub struct MalformedDeviceRecord {
    pub id: DeviceId,
    pub field: Field,
    pub reason: String,
}

impl MalformedDeviceRecord {
    fn new(id: &DeviceId, field: Field, reason: impl Into<String>) -> Self {
        Self {
            id: id.clone(),
            field,
            reason: reason.into(),
        }
    }
}

/// Full device state as enumerated from the service. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub id: Option<DeviceId>,
    pub name: Option<String>,
    pub device_type: Option<String>,
    pub connected: Option<bool>,
    pub paired: Option<bool>,
    pub allowed: Option<bool>,
    pub battery_level: Option<i64>,
    pub battery_charging: Option<bool>,
    pub plugins: Option<Vec<String>>,
}

/// A single property change notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PropertyChange {
    Active(bool),
    Battery { level: i64, charging: bool },
    /// The battery capability went away or reported no level.
    BatteryUnavailable,
    Name(String),
    Plugins(Vec<String>),
    Allowed(bool),
    Paired(bool),
}

impl PropertyChange {
    pub fn field(&self) -> Field {
        match self {
            Self::Active(_) => Field::Active,
            Self::Battery { .. } | Self::BatteryUnavailable => Field::Battery,
            Self::Name(_) => Field::Name,
            Self::Plugins(_) => Field::Plugins,
            Self::Allowed(_) => Field::Allowed,
            Self::Paired(_) => Field::Paired,
        }
    }
}

impl DeviceRecord {
    /// Normalise into a [`Device`], substituting defaults for anything
    /// missing or invalid.
    ///
    /// Returns `None` only when the record has no id at all, since such a
    /// device cannot be tracked.
    pub fn normalize(&self) -> Option<(Device, Vec<MalformedDeviceRecord>)> {
        let id = self.id.clone()?;
        let mut device = Device::placeholder(id.clone());
        let mut anomalies = Vec::new();

        match &self.name {
            Some(name) if !name.trim().is_empty() => device.name.clone_from(name),
            Some(_) => anomalies.push(MalformedDeviceRecord::new(&id, Field::Name, "is empty")),
            None => anomalies.push(MalformedDeviceRecord::new(&id, Field::Name, "is missing")),
        }

        device.device_type = self
            .device_type
            .as_deref()
            .map_or(DeviceType::Unknown, DeviceType::parse);

        let mut flag = |value: Option<bool>, field: Field| {
            value.unwrap_or_else(|| {
                anomalies.push(MalformedDeviceRecord::new(&id, field, "is missing"));
                false
            })
        };
        device.connected = flag(self.connected, Field::Active);
        device.paired = flag(self.paired, Field::Paired);
        device.allowed = flag(self.allowed, Field::Allowed);

        if let Some(level) = self.battery_level {
            device.battery = Battery::new(level, self.battery_charging.unwrap_or(false));
            if device.battery.is_none() {
                anomalies.push(MalformedDeviceRecord::new(
                    &id,
                    Field::Battery,
                    format!("level {level} out of range"),
                ));
            }
        }

        match &self.plugins {
            Some(plugins) => device.capabilities = Capabilities::from_plugins(plugins),
            None => anomalies.push(MalformedDeviceRecord::new(&id, Field::Plugins, "is missing")),
        }

        Some((device, anomalies))
    }

    /// Fold a change into the raw record, keeping it in step with the
    /// service's view.
    pub fn apply(&mut self, change: &PropertyChange) {
        match change {
            PropertyChange::Active(v) => self.connected = Some(*v),
            PropertyChange::Battery { level, charging } => {
                self.battery_level = Some(*level);
                self.battery_charging = Some(*charging);
            }
            PropertyChange::BatteryUnavailable => {
                self.battery_level = None;
                self.battery_charging = None;
            }
            PropertyChange::Name(v) => self.name = Some(v.clone()),
            PropertyChange::Plugins(v) => self.plugins = Some(v.clone()),
            PropertyChange::Allowed(v) => self.allowed = Some(*v),
            PropertyChange::Paired(v) => self.paired = Some(*v),
        }
    }
}

impl Device {
    /// Apply one change. An invalid value leaves the field at its safe
    /// default and is reported.
    pub fn apply(&mut self, change: &PropertyChange) -> Option<MalformedDeviceRecord> {
        match change {
            PropertyChange::Active(v) => self.connected = *v,
            PropertyChange::Battery { level, charging } => {
                self.battery = Battery::new(*level, *charging);
                if self.battery.is_none() {
                    return Some(MalformedDeviceRecord::new(
                        &self.id,
                        Field::Battery,
                        format!("level {level} out of range"),
                    ));
                }
            }
            PropertyChange::BatteryUnavailable => self.battery = None,
            PropertyChange::Name(name) => {
                if name.trim().is_empty() {
                    self.name = DEFAULT_NAME.to_string();
                    return Some(MalformedDeviceRecord::new(&self.id, Field::Name, "is empty"));
                }
                self.name.clone_from(name);
            }
            PropertyChange::Plugins(plugins) => {
                self.capabilities = Capabilities::from_plugins(plugins);
            }
            PropertyChange::Allowed(v) => self.allowed = *v,
            PropertyChange::Paired(v) => self.paired = *v,
        }
        None
    }
}
