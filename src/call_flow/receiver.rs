use super::identity::derive_receiver_id;
use crate::error::Result;
use crate::events::PeerlinkEvent;
use crate::orchestrator::ConnectionOrchestrator;
use crate::rendezvous::PushCredential;
use tracing::{debug, info, warn};

/// Where the receiver stands once it is registered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceiverStatus {
    /// A caller asked for this receiver before it came online; its offer
    /// is expected shortly
    CallerWaiting { caller_id: String },
    /// Registered and waiting for an incoming offer
    Waiting,
}

/// Receiver side of a call: become reachable and answer the caller
pub struct ReceiverFlow {
    orchestrator: ConnectionOrchestrator,
}

impl ReceiverFlow {
    pub fn new(orchestrator: ConnectionOrchestrator) -> Self {
        Self { orchestrator }
    }

    /// Register as reachable under the identifier derived from
    /// `push_token`.
    ///
    /// Camera absence and push-credential registration failures are
    /// tolerated. Failing to register the identifier itself is fatal: the
    /// session is torn down and the error returned.
    pub async fn start(&self, push_token: Option<&str>) -> Result<ReceiverSession> {
        let id = derive_receiver_id(push_token);
        info!("Starting receiver as {}", id);

        self.orchestrator.initialize(&id).await?;

        match self.orchestrator.acquire_local_media().await {
            Ok(stream) => {
                if let Err(e) = self.orchestrator.attach_local_media(stream).await {
                    warn!("Local media not attached: {}", e);
                }
            }
            Err(e) => warn!("Continuing without local media: {}", e),
        }

        // Offers may arrive as soon as the identifier is visible
        self.orchestrator.accept_incoming_calls(true);

        let ctx = self.orchestrator.context();
        if let Err(e) = ctx.rendezvous.register(&id).await {
            warn!("Registration of {} failed: {}", id, e);
            self.orchestrator.disconnect().await;
            return Err(e.into());
        }

        if let Some(token) = push_token {
            let credential = PushCredential::fcm(token);
            match ctx.wake.register_token(&id, &credential).await {
                Ok(()) => debug!("Push credential registered for {}", id),
                Err(e) => warn!("Push credential registration failed: {}", e),
            }
        }

        let status = match ctx.rendezvous.check_wanted(&id).await {
            Ok(wanted) => match wanted.caller_id {
                Some(caller_id) if wanted.wanted => {
                    info!("Caller {} is already waiting", caller_id);
                    ctx.events.publish(PeerlinkEvent::CallerWaiting {
                        caller_id: caller_id.clone(),
                    });
                    ReceiverStatus::CallerWaiting { caller_id }
                }
                _ => ReceiverStatus::Waiting,
            },
            Err(e) => {
                warn!("Could not check for waiting callers: {}", e);
                ReceiverStatus::Waiting
            }
        };

        Ok(ReceiverSession {
            id,
            status,
            orchestrator: self.orchestrator.clone(),
        })
    }
}

/// A registered receiver
pub struct ReceiverSession {
    id: String,
    status: ReceiverStatus,
    orchestrator: ConnectionOrchestrator,
}

impl ReceiverSession {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> &ReceiverStatus {
        &self.status
    }

    pub fn orchestrator(&self) -> &ConnectionOrchestrator {
        &self.orchestrator
    }

    /// Unregister and hang up
    pub async fn teardown(self) {
        let ctx = self.orchestrator.context();
        if let Err(e) = ctx.rendezvous.unregister(&self.id).await {
            warn!("Unregistering {} failed: {}", self.id, e);
        }
        self.orchestrator.disconnect().await;
        info!("Receiver {} stopped", self.id);
    }
}
