mod connection;
mod loopback;
mod negotiation;
mod pump;
mod session;
#[cfg(test)]
mod tests;

pub use connection::{
    ConnectionState, DataChannel, IceCandidate, PeerConnection, PeerConnectionEvent,
    PeerConnectionEvents, PeerConnectionFactory, SdpType, SessionDescription, SignalingState,
};
pub use loopback::LoopbackNetwork;
pub use session::{PeerSession, RemoteStreamHandler};

pub use crate::signaling::CallMetadata;

use serde::{Deserialize, Serialize};

/// Which side of the handshake a session is playing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Caller,
    Callee,
}

/// Lifecycle of one peer session.
///
/// `Idle -> Negotiating(role) -> Connected -> Closed`, with `Failed`
/// reachable from any non-idle state on unrecoverable transport error.
/// `Closed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Negotiating(Role),
    Connected,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataChannelStatus {
    Closed,
    Connecting,
    Open,
}

/// Result of swapping the outbound track on a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// Number of senders now carrying the new track
    Replaced { senders: usize },
    /// Session is not connected; nothing was changed
    NotConnected,
}
