//! Confirm-then-dispatch gate for trust transitions.

use std::sync::Arc;

use mconnect_types::{DeviceId, Transition};
use tracing::{debug, info};

use crate::error::CoreError;
use crate::prompt::{ConfirmationPrompt, Prompt, PromptResponse};
use crate::registry::{DeviceRegistry, PendingTransition};
use crate::request::ActionRequest;

/// How a gated request ended.
#[derive(Debug)]
pub enum GateOutcome {
    /// Confirmed and sent. Await the handle for the service's confirmation.
    Dispatched {
        request: ActionRequest,
        pending: PendingTransition,
    },
    /// Rejected or dismissed. No remote call was made.
    Cancelled(ActionRequest),
}

impl GateOutcome {
    pub fn request(&self) -> &ActionRequest {
        match self {
            Self::Dispatched { request, .. } | Self::Cancelled(request) => request,
        }
    }

    pub fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched { .. })
    }
}

/// Puts a confirmation prompt in front of every trust transition.
///
/// Requests for the same device are not coalesced: each call prompts on
/// its own.
#[derive(Clone)]
pub struct ActionGate {
    prompter: Arc<dyn ConfirmationPrompt>,
}

impl ActionGate {
    pub fn new(prompter: Arc<dyn ConfirmationPrompt>) -> Self {
        Self { prompter }
    }

    /// Gate an explicit transition.
    ///
    /// # Errors
    ///
    /// [`CoreError::TransitionNotApplicable`] if the device's current state
    /// calls for the opposite transition, lookup errors from the registry,
    /// or the dispatch error if the remote call fails.
    pub async fn request(
        &self,
        registry: &DeviceRegistry,
        id: &DeviceId,
        transition: Transition,
    ) -> Result<GateOutcome, CoreError> {
        let device = registry.session(id)?.snapshot();
        let prompt = Prompt::for_device(&device);
        if prompt.kind.transition() != transition {
            return Err(CoreError::TransitionNotApplicable {
                id: id.clone(),
                transition,
            });
        }
        self.run(registry, ActionRequest::new(id.clone(), transition), &prompt)
            .await
    }

    /// Gate whichever transition the device's current state calls for:
    /// revoke when paired or allowed, grant otherwise.
    ///
    /// # Errors
    ///
    /// Lookup errors from the registry or the dispatch error.
    pub async fn toggle(
        &self,
        registry: &DeviceRegistry,
        id: &DeviceId,
    ) -> Result<GateOutcome, CoreError> {
        let device = registry.session(id)?.snapshot();
        let prompt = Prompt::for_device(&device);
        let request = ActionRequest::new(id.clone(), prompt.kind.transition());
        self.run(registry, request, &prompt).await
    }

    async fn run(
        &self,
        registry: &DeviceRegistry,
        mut request: ActionRequest,
        prompt: &Prompt,
    ) -> Result<GateOutcome, CoreError> {
        debug!(request = %request.id, device = %request.target, kind = ?prompt.kind, "prompting");
        let response = self.prompter.confirm(prompt).await;

        if response != PromptResponse::Accept {
            request.cancel();
            info!(request = %request.id, device = %request.target, ?response, "request cancelled");
            return Ok(GateOutcome::Cancelled(request));
        }

        request.confirm();
        let pending = registry
            .request_transition(&request.target, request.transition)
            .await?;
        request.mark_dispatched();
        info!(
            request = %request.id,
            device = %request.target,
            transition = %request.transition,
            "request dispatched"
        );
        Ok(GateOutcome::Dispatched { request, pending })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use mconnect_bus::mock::{MockBus, MockBusHandle, MockCall};
    use mconnect_types::DeviceRecord;
    use parking_lot::Mutex;

    use super::*;
    use crate::prompt::PromptKind;
    use crate::request::ConfirmationState;

    struct Scripted {
        response: PromptResponse,
        seen: Mutex<Vec<PromptKind>>,
    }

    #[async_trait]
    impl ConfirmationPrompt for Scripted {
        async fn confirm(&self, prompt: &Prompt) -> PromptResponse {
            self.seen.lock().push(prompt.kind);
            self.response
        }
    }

    fn scripted(response: PromptResponse) -> Arc<Scripted> {
        Arc::new(Scripted {
            response,
            seen: Mutex::new(Vec::new()),
        })
    }

    async fn setup(allowed: bool, paired: bool) -> (DeviceRegistry, MockBusHandle) {
        let bus = MockBus::new();
        let handle = bus.handle();
        handle.appear();
        handle.add_device(DeviceRecord {
            id: Some(DeviceId::from("a")),
            name: Some("Pixel".to_string()),
            connected: Some(true),
            allowed: Some(allowed),
            paired: Some(paired),
            plugins: Some(Vec::new()),
            ..DeviceRecord::default()
        });
        let registry = DeviceRegistry::open(Arc::new(bus), 1, Duration::from_secs(5))
            .await
            .unwrap();
        (registry, handle)
    }

    #[tokio::test]
    async fn cancel_on_paired_device_makes_no_call() {
        let (registry, handle) = setup(true, true).await;
        let prompter = scripted(PromptResponse::Reject);
        let gate = ActionGate::new(prompter.clone());

        let outcome = gate
            .request(&registry, &DeviceId::from("a"), Transition::Disallow)
            .await
            .unwrap();

        assert!(!outcome.is_dispatched());
        assert_eq!(outcome.request().state(), ConfirmationState::Cancelled);
        assert_eq!(*prompter.seen.lock(), vec![PromptKind::RevokeTrust]);
        assert!(handle.calls().is_empty());
        assert!(registry.session(&DeviceId::from("a")).unwrap().snapshot().paired);
    }

    #[tokio::test]
    async fn dismissal_is_a_cancel() {
        let (registry, handle) = setup(false, false).await;
        let gate = ActionGate::new(scripted(PromptResponse::Dismissed));

        let outcome = gate.toggle(&registry, &DeviceId::from("a")).await.unwrap();

        assert!(!outcome.is_dispatched());
        assert_eq!(handle.transition_calls(), 0);
    }

    #[tokio::test]
    async fn accept_dispatches_to_the_service() {
        let (registry, handle) = setup(false, false).await;
        let gate = ActionGate::new(scripted(PromptResponse::Accept));

        let outcome = gate.toggle(&registry, &DeviceId::from("a")).await.unwrap();

        assert!(outcome.is_dispatched());
        assert_eq!(outcome.request().transition, Transition::Allow);
        assert_eq!(outcome.request().state(), ConfirmationState::Dispatched);
        assert_eq!(handle.calls(), vec![MockCall::Allow(DeviceId::from("a"))]);
    }

    #[tokio::test]
    async fn mismatched_transition_is_rejected_without_prompt() {
        let (registry, handle) = setup(false, false).await;
        let prompter = scripted(PromptResponse::Accept);
        let gate = ActionGate::new(prompter.clone());

        let err = gate
            .request(&registry, &DeviceId::from("a"), Transition::Disallow)
            .await
            .unwrap_err();

        assert!(matches!(err, CoreError::TransitionNotApplicable { .. }));
        assert!(prompter.seen.lock().is_empty());
        assert!(handle.calls().is_empty());
    }

    #[tokio::test]
    async fn concurrent_requests_each_prompt() {
        let (registry, handle) = setup(false, false).await;
        let prompter = scripted(PromptResponse::Accept);
        let gate = ActionGate::new(prompter.clone());
        let id = DeviceId::from("a");

        let (first, second) = tokio::join!(
            gate.request(&registry, &id, Transition::Allow),
            gate.request(&registry, &id, Transition::Allow)
        );

        assert!(first.unwrap().is_dispatched());
        assert!(second.unwrap().is_dispatched());
        assert_eq!(prompter.seen.lock().len(), 2);
        assert_eq!(handle.transition_calls(), 2);
    }
}
