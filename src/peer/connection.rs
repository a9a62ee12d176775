//! Seam to the underlying standards-compliant peer-connection capability.
//! Transport and codec internals live behind these traits.

use crate::config::IceServer;
use crate::error::SessionError;
use crate::media::MediaTrack;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer<S: Into<String>>(sdp: S) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer<S: Into<String>>(sdp: S) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new<S: Into<String>>(candidate: S) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalingState {
    Stable,
    HaveLocalOffer,
    HaveRemoteOffer,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Message sub-channel carried by the peer connection
#[async_trait]
pub trait DataChannel: Send + Sync {
    fn label(&self) -> &str;

    fn is_open(&self) -> bool;

    async fn send_text(&self, text: &str) -> Result<(), SessionError>;

    async fn close(&self);
}

/// Notifications raised by the peer connection
pub enum PeerConnectionEvent {
    /// A local candidate was gathered and must be sent to the peer
    LocalCandidate(IceCandidate),
    ConnectionStateChanged(ConnectionState),
    /// A remote media track arrived
    RemoteTrack(MediaTrack),
    /// A data channel (local or remote-initiated) is open
    DataChannelOpen(Arc<dyn DataChannel>),
    DataChannelMessage(String),
    DataChannelClosed,
}

impl std::fmt::Debug for PeerConnectionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerConnectionEvent::LocalCandidate(c) => {
                f.debug_tuple("LocalCandidate").field(c).finish()
            }
            PeerConnectionEvent::ConnectionStateChanged(s) => {
                f.debug_tuple("ConnectionStateChanged").field(s).finish()
            }
            PeerConnectionEvent::RemoteTrack(t) => f.debug_tuple("RemoteTrack").field(t).finish(),
            PeerConnectionEvent::DataChannelOpen(dc) => {
                f.debug_tuple("DataChannelOpen").field(&dc.label()).finish()
            }
            PeerConnectionEvent::DataChannelMessage(m) => {
                f.debug_tuple("DataChannelMessage").field(m).finish()
            }
            PeerConnectionEvent::DataChannelClosed => f.write_str("DataChannelClosed"),
        }
    }
}

pub type PeerConnectionEvents = mpsc::UnboundedReceiver<PeerConnectionEvent>;

/// One peer-connection instance
#[async_trait]
pub trait PeerConnection: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, SessionError>;

    async fn create_answer(&self) -> Result<SessionDescription, SessionError>;

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), SessionError>;

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), SessionError>;

    /// Return to the stable state, discarding a pending local or remote offer
    async fn rollback(&self) -> Result<(), SessionError>;

    /// Fails if no remote description has been applied yet
    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError>;

    /// Add an outbound sender for the track. Adding the same track twice is a no-op.
    fn add_track(&self, track: MediaTrack) -> Result<(), SessionError>;

    /// Swap the track on every sender of the same kind without renegotiating.
    /// Returns the number of senders updated.
    async fn replace_track(&self, track: MediaTrack) -> Result<usize, SessionError>;

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, SessionError>;

    fn signaling_state(&self) -> SignalingState;

    fn connection_state(&self) -> ConnectionState;

    async fn close(&self);
}

/// Allocates peer connections configured with ICE servers
#[async_trait]
pub trait PeerConnectionFactory: Send + Sync {
    async fn create(
        &self,
        self_id: &str,
        ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, PeerConnectionEvents), SessionError>;
}
