//! Trust transitions.

use serde::{Deserialize, Serialize};

use crate::device::Device;

/// A requested change to a device's trust state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    /// Grant local trust.
    Allow,
    /// Revoke trust, cancelling any pairing in progress.
    Disallow,
}

impl Transition {
    /// Whether the device's authoritative state reflects this transition.
    pub fn is_satisfied_by(self, device: &Device) -> bool {
        match self {
            Self::Allow => device.allowed,
            Self::Disallow => !device.allowed && !device.paired,
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Allow => write!(f, "Allow"),
            Self::Disallow => write!(f, "Disallow"),
        }
    }
}
