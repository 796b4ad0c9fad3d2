//! Device descriptor types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::battery::BatteryTier;

/// Opaque, stable identifier assigned to a device by the remote service.
///
/// On the session bus this is the device's object path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Form factor reported by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Phone,
    Tablet,
    Desktop,
    #[default]
    Unknown,
}

impl DeviceType {
    /// Parse the service's type string. Anything unrecognised is `Unknown`.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "phone" | "smartphone" => Self::Phone,
            "tablet" => Self::Tablet,
            "desktop" | "laptop" => Self::Desktop,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Phone => "phone",
            Self::Tablet => "tablet",
            Self::Desktop => "desktop",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Battery state. Only present when the service reports a valid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Battery {
    level: u8,
    pub charging: bool,
}

impl Battery {
    /// Returns `None` unless `level` lies in `0..=100`.
    pub fn new(level: i64, charging: bool) -> Option<Self> {
        u8::try_from(level)
            .ok()
            .filter(|l| *l <= 100)
            .map(|level| Self { level, charging })
    }

    pub fn level(self) -> u8 {
        self.level
    }

    pub fn tier(self) -> BatteryTier {
        BatteryTier::from_level(self.level)
    }

    /// Display label, e.g. `"85%"`.
    pub fn label(self) -> String {
        format!("{}%", self.level)
    }
}

/// An optional feature a device advertises.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    Battery,
    FindMyPhone,
    Sms,
    Other(String),
}

/// Action a capability makes available to presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityAction {
    /// Make the device ring so it can be found.
    Locate,
    /// Compose a text message.
    SendSms,
}

impl Capability {
    /// Map a plugin/packet-type name to a capability.
    ///
    /// Accepts both bare plugin names (`"battery"`) and KDE Connect packet
    /// types (`"kdeconnect.findmyphone.request"`).
    pub fn from_plugin(name: &str) -> Self {
        let bare = name.strip_prefix("kdeconnect.").unwrap_or(name);
        let plugin = bare.split('.').next().unwrap_or(bare);
        match plugin {
            "battery" => Self::Battery,
            "findmyphone" => Self::FindMyPhone,
            "sms" | "telephony" => Self::Sms,
            _ => Self::Other(plugin.to_string()),
        }
    }

    pub fn action(&self) -> Option<CapabilityAction> {
        match self {
            Self::FindMyPhone => Some(CapabilityAction::Locate),
            Self::Sms => Some(CapabilityAction::SendSms),
            Self::Battery | Self::Other(_) => None,
        }
    }
}

/// Set of advertised capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn from_plugins<I, S>(plugins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(
            plugins
                .into_iter()
                .map(|p| Capability::from_plugin(p.as_ref()))
                .collect(),
        )
    }

    pub fn contains(&self, capability: &Capability) -> bool {
        self.0.contains(capability)
    }

    pub fn supports(&self, action: CapabilityAction) -> bool {
        self.0.iter().any(|c| c.action() == Some(action))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A device property that can change independently.
///
/// These mirror the service's `changed::<field>` notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Field {
    /// Live transport presence; drives [`Device::connected`].
    Active,
    Battery,
    Name,
    Plugins,
    Allowed,
    Paired,
}

impl Field {
    pub const ALL: [Field; 6] = [
        Field::Active,
        Field::Battery,
        Field::Name,
        Field::Plugins,
        Field::Allowed,
        Field::Paired,
    ];
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Active => "active",
            Self::Battery => "battery",
            Self::Name => "name",
            Self::Plugins => "plugins",
            Self::Allowed => "allowed",
            Self::Paired => "paired",
        };
        f.write_str(name)
    }
}

/// Local mirror of one remote device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub device_type: DeviceType,
    pub connected: bool,
    pub paired: bool,
    pub allowed: bool,
    pub battery: Option<Battery>,
    pub capabilities: Capabilities,
}

impl Device {
    /// A device with safe display defaults: untrusted, offline, no battery.
    pub fn placeholder(id: DeviceId) -> Self {
        Self {
            id,
            name: crate::record::DEFAULT_NAME.to_string(),
            device_type: DeviceType::Unknown,
            connected: false,
            paired: false,
            allowed: false,
            battery: None,
            capabilities: Capabilities::default(),
        }
    }

    pub fn battery_tier(&self) -> Option<BatteryTier> {
        self.battery.map(Battery::tier)
    }
}
