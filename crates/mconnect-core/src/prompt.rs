//! Confirmation prompts for trust changes.

use async_trait::async_trait;
use mconnect_types::{Device, Transition};

/// Which confirmation the device's current state calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// The device is paired; revoking denies it access.
    RevokeTrust,
    /// Allowed but not yet paired: a pairing request is in flight.
    CancelPendingRequest,
    /// Not allowed; granting trust is a security decision.
    GrantTrust,
}

impl PromptKind {
    pub fn for_device(device: &Device) -> Self {
        if device.paired {
            Self::RevokeTrust
        } else if device.allowed {
            Self::CancelPendingRequest
        } else {
            Self::GrantTrust
        }
    }

    /// The transition accepting this prompt dispatches.
    pub fn transition(self) -> Transition {
        match self {
            Self::RevokeTrust | Self::CancelPendingRequest => Transition::Disallow,
            Self::GrantTrust => Transition::Allow,
        }
    }
}

/// Content shown to the user before a trust change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub icon_name: &'static str,
    pub title: String,
    pub message: String,
}

impl Prompt {
    pub fn for_device(device: &Device) -> Self {
        let kind = PromptKind::for_device(device);
        let (icon_name, title, message) = match kind {
            PromptKind::RevokeTrust => (
                "channel-insecure-symbolic",
                "Mark device as unallowed?",
                format!(
                    "Marking the {} \"{}\" as unallowed will deny it access to your computer. \
                     Are you sure you want to proceed?",
                    device.device_type, device.name
                ),
            ),
            PromptKind::CancelPendingRequest => (
                "feed-refresh-symbolic",
                "Mark device as unallowed?",
                format!(
                    "There is a pair request in progress for {} \"{}\". Marking it as \
                     unallowed will cancel the request and deny it access to your computer. \
                     Are you sure you want to proceed?",
                    device.device_type, device.name
                ),
            ),
            PromptKind::GrantTrust => (
                "channel-insecure-symbolic",
                "Mark device as allowed?",
                format!(
                    "Marking the {} \"{}\" as allowed will allow it access to your computer \
                     and may pose a serious security risk. Are you sure you want to proceed?",
                    device.device_type, device.name
                ),
            ),
        };
        Self {
            kind,
            icon_name,
            title: title.to_string(),
            message,
        }
    }
}

/// The user's answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptResponse {
    Accept,
    Reject,
    /// Closed without answering.
    Dismissed,
}

/// Asks the user to confirm a trust change.
#[async_trait]
pub trait ConfirmationPrompt: Send + Sync {
    async fn confirm(&self, prompt: &Prompt) -> PromptResponse;
}
