//! Signaling channel used to exchange offers, answers, candidates and
//! hang-ups between two peers. Any transport can sit behind the trait; the
//! crate ships an in-process hub.

use crate::error::SignalingError;
use crate::peer::{IceCandidate, SessionDescription};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Metadata carried alongside an offer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallMetadata {
    /// BCP-47 language code of the calling side
    #[serde(default)]
    pub caller_lang: Option<String>,
}

impl CallMetadata {
    pub fn with_language<S: Into<String>>(code: S) -> Self {
        Self {
            caller_lang: Some(code.into()),
        }
    }
}

/// Signals emitted by a session towards its peer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum OutboundSignal {
    CallUser {
        to: String,
        from: String,
        offer: SessionDescription,
        metadata: CallMetadata,
    },
    MakeAnswer {
        to: String,
        from: String,
        answer: SessionDescription,
    },
    IceCandidate {
        to: String,
        from: String,
        candidate: IceCandidate,
    },
    HangUp {
        to: String,
        from: String,
    },
}

impl OutboundSignal {
    pub fn recipient(&self) -> &str {
        match self {
            OutboundSignal::CallUser { to, .. }
            | OutboundSignal::MakeAnswer { to, .. }
            | OutboundSignal::IceCandidate { to, .. }
            | OutboundSignal::HangUp { to, .. } => to,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutboundSignal::CallUser { .. } => "call-user",
            OutboundSignal::MakeAnswer { .. } => "make-answer",
            OutboundSignal::IceCandidate { .. } => "ice-candidate",
            OutboundSignal::HangUp { .. } => "hang-up",
        }
    }

    /// What the recipient observes when this signal is delivered
    pub fn into_event(self) -> SignalingEvent {
        match self {
            OutboundSignal::CallUser {
                from,
                offer,
                metadata,
                ..
            } => SignalingEvent::CallMade {
                from,
                offer,
                metadata,
            },
            OutboundSignal::MakeAnswer { from, answer, .. } => {
                SignalingEvent::CallAccepted { from, answer }
            }
            OutboundSignal::IceCandidate {
                from, candidate, ..
            } => SignalingEvent::IceCandidate { from, candidate },
            OutboundSignal::HangUp { from, .. } => SignalingEvent::CallEnded { from },
        }
    }
}

/// Signals consumed by a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SignalingEvent {
    CallMade {
        from: String,
        offer: SessionDescription,
        metadata: CallMetadata,
    },
    CallAccepted {
        from: String,
        answer: SessionDescription,
    },
    IceCandidate {
        from: String,
        candidate: IceCandidate,
    },
    CallEnded {
        from: String,
    },
}

impl SignalingEvent {
    pub fn sender(&self) -> &str {
        match self {
            SignalingEvent::CallMade { from, .. }
            | SignalingEvent::CallAccepted { from, .. }
            | SignalingEvent::IceCandidate { from, .. }
            | SignalingEvent::CallEnded { from } => from,
        }
    }
}

pub type SignalingEvents = mpsc::UnboundedReceiver<SignalingEvent>;

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, signal: OutboundSignal) -> Result<(), SignalingError>;

    /// Start receiving signals addressed to `id`. A later subscription for
    /// the same id replaces the earlier one.
    async fn subscribe(&self, id: &str) -> Result<SignalingEvents, SignalingError>;
}

/// In-process signaling relay keyed by participant id
#[derive(Clone, Default)]
pub struct LocalSignalingHub {
    inner: Arc<HubInner>,
}

#[derive(Default)]
struct HubInner {
    routes: Mutex<HashMap<String, mpsc::UnboundedSender<SignalingEvent>>>,
    history: Mutex<Vec<OutboundSignal>>,
}

impl LocalSignalingHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_subscribed(&self, id: &str) -> bool {
        self.inner
            .routes
            .lock()
            .get(id)
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    pub fn unsubscribe(&self, id: &str) {
        self.inner.routes.lock().remove(id);
    }

    /// Every signal successfully relayed, in send order
    pub fn history(&self) -> Vec<OutboundSignal> {
        self.inner.history.lock().clone()
    }
}

#[async_trait]
impl SignalingChannel for LocalSignalingHub {
    async fn send(&self, signal: OutboundSignal) -> Result<(), SignalingError> {
        let recipient = signal.recipient().to_string();
        let route = self.inner.routes.lock().get(&recipient).cloned();

        let Some(route) = route else {
            warn!("No signaling route for {} ({})", recipient, signal.name());
            return Err(SignalingError::UnknownPeer { id: recipient });
        };

        debug!("Relaying {} to {}", signal.name(), recipient);
        if route.send(signal.clone().into_event()).is_err() {
            warn!("Signaling subscription of {} is gone", recipient);
            self.inner.routes.lock().remove(&recipient);
            return Err(SignalingError::ChannelClosed);
        }
        self.inner.history.lock().push(signal);
        Ok(())
    }

    async fn subscribe(&self, id: &str) -> Result<SignalingEvents, SignalingError> {
        let (tx, rx) = mpsc::unbounded_channel();
        if self.inner.routes.lock().insert(id.to_string(), tx).is_some() {
            debug!("Replaced signaling subscription for {}", id);
        }
        Ok(rx)
    }
}
