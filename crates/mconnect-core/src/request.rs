//! Confirmation state of a gated trust request.

use mconnect_types::{DeviceId, Transition};
use uuid::Uuid;

/// Identifies one gated request in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a request is in the confirm-then-dispatch flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmationState {
    /// Waiting for the user to answer the prompt.
    Pending,
    /// Accepted, not yet sent to the service.
    Confirmed,
    /// Sent to the service.
    Dispatched,
    /// Rejected or dismissed. Nothing was sent.
    Cancelled,
}

impl ConfirmationState {
    pub fn can_confirm(self) -> bool {
        self == Self::Pending
    }

    pub fn can_dispatch(self) -> bool {
        self == Self::Confirmed
    }

    pub fn can_cancel(self) -> bool {
        self == Self::Pending
    }

    pub fn is_final(self) -> bool {
        matches!(self, Self::Dispatched | Self::Cancelled)
    }
}

impl std::fmt::Display for ConfirmationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Confirmed => write!(f, "Confirmed"),
            Self::Dispatched => write!(f, "Dispatched"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// A trust transition awaiting user confirmation.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub id: RequestId,
    pub target: DeviceId,
    pub transition: Transition,
    state: ConfirmationState,
}

impl ActionRequest {
    pub fn new(target: DeviceId, transition: Transition) -> Self {
        Self {
            id: RequestId::new(),
            target,
            transition,
            state: ConfirmationState::Pending,
        }
    }

    pub fn state(&self) -> ConfirmationState {
        self.state
    }

    /// Returns false if the request was not pending.
    pub fn confirm(&mut self) -> bool {
        self.advance(ConfirmationState::can_confirm, ConfirmationState::Confirmed)
    }

    pub fn cancel(&mut self) -> bool {
        self.advance(ConfirmationState::can_cancel, ConfirmationState::Cancelled)
    }

    pub fn mark_dispatched(&mut self) -> bool {
        self.advance(ConfirmationState::can_dispatch, ConfirmationState::Dispatched)
    }

    fn advance(&mut self, allowed: fn(ConfirmationState) -> bool, next: ConfirmationState) -> bool {
        if allowed(self.state) {
            self.state = next;
            true
        } else {
            false
        }
    }
}
