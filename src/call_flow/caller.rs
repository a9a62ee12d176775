use super::identity::{derive_receiver_id, ephemeral_id};
use crate::error::{Result, SignalingError};
use crate::events::PeerlinkEvent;
use crate::media::MediaStream;
use crate::orchestrator::ConnectionOrchestrator;
use crate::peer::CallMetadata;
use crate::rendezvous::{CallRequest, WakeNotification};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Who to call, and how to wake them if they are offline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallTarget {
    pub id: String,
    pub wake_token: Option<String>,
}

impl CallTarget {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self {
            id: id.into(),
            wake_token: None,
        }
    }

    /// Target known by its push token; the identifier is derived from it the
    /// same way the receiver derives its own
    pub fn from_push_token<S: Into<String>>(token: S) -> Self {
        let token = token.into();
        Self {
            id: derive_receiver_id(Some(&token)),
            wake_token: Some(token),
        }
    }

    pub fn with_wake_token<S: Into<String>>(mut self, token: S) -> Self {
        self.wake_token = Some(token.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    pub caller_id: String,
    /// Whether the receiver had to be woken up first
    pub woke_receiver: bool,
}

/// Caller side of a call: find the receiver, wake it when needed, offer
pub struct CallerFlow {
    orchestrator: ConnectionOrchestrator,
    /// Cancels the wait of the current call; replaced by every `call`
    cancel: Mutex<CancellationToken>,
}

impl CallerFlow {
    pub fn new(orchestrator: ConnectionOrchestrator) -> Self {
        Self {
            orchestrator,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn orchestrator(&self) -> &ConnectionOrchestrator {
        &self.orchestrator
    }

    /// Token that aborts the current call's wait for the receiver
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.lock().clone()
    }

    /// Call `target` under a fresh identifier.
    ///
    /// An offline receiver is sent a wake notification and polled until it
    /// reports online; the poll has no upper bound and ends only through
    /// the cancel token. A failed wake notification ends the attempt.
    /// Any failure disconnects the session.
    pub async fn call(&self, target: &CallTarget) -> Result<CallOutcome> {
        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        let caller_id = ephemeral_id();
        info!("Calling {} as {}", target.id, caller_id);

        let stream = match self.orchestrator.acquire_local_media().await {
            Ok(stream) => Some(stream),
            Err(e) => {
                warn!("Calling without local media: {}", e);
                None
            }
        };

        if let Err(e) = self.orchestrator.initialize(&caller_id).await {
            if let Some(stream) = stream {
                stream.stop();
            }
            return Err(e);
        }

        match self.connect(&caller_id, target, stream, &cancel).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("Call to {} failed: {}", target.id, e);
                self.orchestrator.disconnect().await;
                Err(e)
            }
        }
    }

    /// Cancel any pending poll and hang up
    pub async fn teardown(&self) {
        self.cancel.lock().cancel();
        self.orchestrator.disconnect().await;
    }

    async fn connect(
        &self,
        caller_id: &str,
        target: &CallTarget,
        stream: Option<MediaStream>,
        cancel: &CancellationToken,
    ) -> Result<CallOutcome> {
        if let Some(stream) = stream {
            if let Err(e) = self.orchestrator.attach_local_media(stream).await {
                warn!("Local media not attached: {}", e);
            }
        }

        let woke_receiver = self.wake_if_offline(caller_id, target, cancel).await?;

        let language = self.orchestrator.context().config.call.language.clone();
        self.orchestrator
            .start_call(&target.id, CallMetadata::with_language(language))
            .await?;

        Ok(CallOutcome {
            caller_id: caller_id.to_string(),
            woke_receiver,
        })
    }

    /// Make sure `target` is online without calling it, waking it under a
    /// fresh caller identifier when needed. Returns whether a wake was sent.
    pub async fn ensure_online(&self, target: &CallTarget) -> Result<bool> {
        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        self.wake_if_offline(&ephemeral_id(), target, &cancel).await
    }

    async fn wake_if_offline(
        &self,
        caller_id: &str,
        target: &CallTarget,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let ctx = self.orchestrator.context();
        let language = ctx.config.call.language.clone();

        if ctx.rendezvous.is_online(&target.id).await? {
            return Ok(false);
        }

        info!("{} is offline, waking it", target.id);
        let request = CallRequest {
            caller_id: caller_id.to_string(),
            target_id: target.id.clone(),
            caller_lang: language.clone(),
        };
        if let Err(e) = ctx.rendezvous.request_call(&request).await {
            warn!("Call request for {} not recorded: {}", target.id, e);
        }

        let Some(token) = target.wake_token.clone() else {
            return Err(SignalingError::WakeFailed {
                details: format!("no wake token for offline receiver {}", target.id),
            }
            .into());
        };
        let notification = WakeNotification {
            token,
            caller_id: caller_id.to_string(),
            caller_lang: language,
            receiver_id: target.id.clone(),
        };
        ctx.wake.send_wake(&notification).await.map_err(|e| match e {
            SignalingError::WakeFailed { .. } => e,
            other => SignalingError::WakeFailed {
                details: other.to_string(),
            },
        })?;
        ctx.events.publish(PeerlinkEvent::WakeSent {
            receiver_id: target.id.clone(),
        });

        self.wait_until_online(&target.id, cancel).await?;
        Ok(true)
    }

    async fn wait_until_online(&self, target_id: &str, cancel: &CancellationToken) -> Result<()> {
        let ctx = self.orchestrator.context();
        let period = ctx.config.call.poll_interval();
        let mut polls = 0u64;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Stopped waiting for {}", target_id);
                    return Err(SignalingError::Cancelled.into());
                }
                _ = tokio::time::sleep(period) => {}
            }

            polls += 1;
            match ctx.rendezvous.is_online(target_id).await {
                Ok(true) => {
                    info!("{} came online after {} polls", target_id, polls);
                    return Ok(());
                }
                Ok(false) => debug!("{} still offline (poll {})", target_id, polls),
                Err(e) => warn!("Online check for {} failed: {}", target_id, e),
            }
        }
    }
}
