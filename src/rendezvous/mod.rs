//! Client side of the rendezvous (registration/discovery) service and of
//! the separate push wake-notification backend.
//!
//! Every operation is idempotent and safe to retry; retry policy belongs to
//! the call flows, not to the clients.

#[cfg(feature = "http")]
mod http;
mod memory;
pub mod wire;

#[cfg(feature = "http")]
pub use http::HttpRendezvousClient;
pub use memory::InMemoryRendezvous;

use crate::error::SignalingError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Whether a caller is currently looking for a receiver
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WantedStatus {
    pub wanted: bool,
    pub caller_id: Option<String>,
}

/// Caller's request to be connected to an offline receiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRequest {
    pub caller_id: String,
    pub target_id: String,
    pub caller_lang: String,
}

/// Push credential a receiver hands out so it can be woken up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushCredential {
    pub token: String,
    /// Credential flavour understood by the wake backend
    pub kind: String,
}

impl PushCredential {
    pub fn fcm<S: Into<String>>(token: S) -> Self {
        Self {
            token: token.into(),
            kind: "fcm".to_string(),
        }
    }
}

/// Wake notification addressed to an offline receiver
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeNotification {
    pub token: String,
    pub caller_id: String,
    pub caller_lang: String,
    pub receiver_id: String,
}

impl WakeNotification {
    pub const KIND: &'static str = "wake-up";

    pub fn title(&self) -> String {
        "Incoming call".to_string()
    }

    pub fn body(&self) -> String {
        format!("Caller {} ({}) wants to talk", self.caller_id, self.caller_lang)
    }

    pub fn to_wire(&self) -> wire::NotificationBody {
        wire::NotificationBody {
            token: self.token.clone(),
            title: self.title(),
            body: self.body(),
            data: wire::NotificationData {
                kind: Self::KIND.to_string(),
                caller_id: self.caller_id.clone(),
                caller_lang: self.caller_lang.clone(),
                receiver_id: self.receiver_id.clone(),
            },
        }
    }
}

#[async_trait]
pub trait RendezvousService: Send + Sync {
    /// Register `id` as online
    async fn register(&self, id: &str) -> Result<(), SignalingError>;

    async fn is_online(&self, id: &str) -> Result<bool, SignalingError>;

    /// Whether some caller has asked for `id`
    async fn check_wanted(&self, id: &str) -> Result<WantedStatus, SignalingError>;

    async fn request_call(&self, request: &CallRequest) -> Result<(), SignalingError>;

    async fn unregister(&self, id: &str) -> Result<(), SignalingError>;
}

#[async_trait]
pub trait WakeNotifier: Send + Sync {
    async fn register_token(
        &self,
        receiver_id: &str,
        credential: &PushCredential,
    ) -> Result<(), SignalingError>;

    async fn send_wake(&self, notification: &WakeNotification) -> Result<(), SignalingError>;
}
