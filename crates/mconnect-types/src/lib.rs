//! Shared types for mconnect-indicator.
//!
//! This crate contains the device data model shared across the workspace:
//! device identity and state, raw records and property changes as the
//! remote service delivers them, trust transitions and battery tiers.

pub mod battery;
pub mod device;
pub mod record;
pub mod transition;

pub use battery::{BatteryTier, BATTERY_MISSING_ICON};
pub use device::{
    Battery, Capabilities, Capability, CapabilityAction, Device, DeviceId, DeviceType, Field,
};
pub use record::{DeviceRecord, MalformedDeviceRecord, PropertyChange, DEFAULT_NAME};
pub use transition::Transition;
