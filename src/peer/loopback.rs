use super::connection::{
    ConnectionState, DataChannel, IceCandidate, PeerConnection, PeerConnectionEvent,
    PeerConnectionEvents, PeerConnectionFactory, SdpType, SessionDescription, SignalingState,
};
use crate::config::IceServer;
use crate::error::SessionError;
use crate::media::MediaTrack;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

const ORIGIN_PREFIX: &str = "o=peerlink-loopback ";
const LABEL_PREFIX: &str = "a=label:";

/// In-process peer-connection capability.
///
/// Connections created from the same network reach each other by id. A
/// connection reports `Connected` once both descriptions are applied, the
/// signaling state is stable and at least one remote candidate was added,
/// mirroring the order a real ICE agent needs.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    peers: Mutex<HashMap<String, Weak<LoopbackPeer>>>,
    created: AtomicUsize,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total peer connections ever allocated on this network
    pub fn connections_created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    /// Connection state of the live connection registered under `id`
    pub fn connection_state(&self, id: &str) -> Option<ConnectionState> {
        self.lookup(id).map(|peer| peer.connection_state())
    }

    /// Outbound tracks currently attached to senders of `id`
    pub fn sender_tracks(&self, id: &str) -> Vec<MediaTrack> {
        self.lookup(id)
            .map(|peer| peer.state.lock().senders.clone())
            .unwrap_or_default()
    }

    /// Simulate an unrecoverable transport failure on `id`
    pub fn sever(&self, id: &str) {
        if let Some(peer) = self.lookup(id) {
            warn!("Severing loopback transport for {}", id);
            peer.state.lock().connection = ConnectionState::Failed;
            peer.emit(PeerConnectionEvent::ConnectionStateChanged(
                ConnectionState::Failed,
            ));
        }
    }

    fn register(&self, peer: &Arc<LoopbackPeer>) {
        self.inner.created.fetch_add(1, Ordering::SeqCst);
        self.inner
            .peers
            .lock()
            .insert(peer.id.clone(), Arc::downgrade(peer));
    }

    fn unregister(&self, peer: &LoopbackPeer) {
        let mut peers = self.inner.peers.lock();
        let is_current = peers
            .get(&peer.id)
            .map(|weak| std::ptr::eq(weak.as_ptr(), peer))
            .unwrap_or(false);
        if is_current {
            peers.remove(&peer.id);
        }
    }

    fn lookup(&self, id: &str) -> Option<Arc<LoopbackPeer>> {
        self.inner.peers.lock().get(id).and_then(Weak::upgrade)
    }

    fn deliver(&self, id: &str, event: PeerConnectionEvent) -> bool {
        match self.lookup(id) {
            Some(peer) => peer.emit(event),
            None => false,
        }
    }
}

#[async_trait]
impl PeerConnectionFactory for LoopbackNetwork {
    async fn create(
        &self,
        self_id: &str,
        ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, PeerConnectionEvents), SessionError> {
        let (events, receiver) = mpsc::unbounded_channel();
        let peer = Arc::new(LoopbackPeer {
            id: self_id.to_string(),
            network: self.clone(),
            events,
            ice_servers: ice_servers.to_vec(),
            state: Mutex::new(PeerState::default()),
        });
        self.register(&peer);

        info!(
            "Created loopback peer connection for {} ({} ICE servers)",
            self_id,
            ice_servers.len()
        );

        Ok((peer, receiver))
    }
}

struct PeerState {
    signaling: SignalingState,
    connection: ConnectionState,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    remote_peer: Option<String>,
    remote_channel_label: Option<String>,
    senders: Vec<MediaTrack>,
    applied_candidates: Vec<IceCandidate>,
    channel: Option<Arc<LoopbackDataChannel>>,
}

impl Default for PeerState {
    fn default() -> Self {
        Self {
            signaling: SignalingState::Stable,
            connection: ConnectionState::New,
            local: None,
            remote: None,
            remote_peer: None,
            remote_channel_label: None,
            senders: Vec::new(),
            applied_candidates: Vec::new(),
            channel: None,
        }
    }
}

struct LoopbackPeer {
    id: String,
    network: LoopbackNetwork,
    events: mpsc::UnboundedSender<PeerConnectionEvent>,
    ice_servers: Vec<IceServer>,
    state: Mutex<PeerState>,
}

impl LoopbackPeer {
    fn emit(&self, event: PeerConnectionEvent) -> bool {
        self.events.send(event).is_ok()
    }

    fn invalid(&self, state: SignalingState, operation: &str) -> SessionError {
        SessionError::InvalidState {
            state: format!("{:?}", state),
            operation: operation.to_string(),
        }
    }

    fn ensure_open(&self, state: &PeerState, operation: &str) -> Result<(), SessionError> {
        if state.signaling == SignalingState::Closed {
            return Err(self.invalid(state.signaling, operation));
        }
        Ok(())
    }

    fn build_sdp(&self, state: &PeerState) -> String {
        let mut sdp = format!("v=0\r\n{}{} 0 IN IP4 127.0.0.1\r\ns=-\r\n", ORIGIN_PREFIX, self.id);
        for track in &state.senders {
            sdp.push_str(&format!(
                "m={} 9 UDP/TLS/RTP/SAVPF 96\r\na=msid:{}\r\n",
                track.kind().as_str(),
                track.id()
            ));
        }
        if let Some(channel) = &state.channel {
            sdp.push_str("m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n");
            sdp.push_str(&format!("{}{}\r\n", LABEL_PREFIX, channel.label));
        }
        sdp
    }

    fn local_candidates(&self) -> Vec<IceCandidate> {
        let port = 50000 + self.id.bytes().map(u32::from).sum::<u32>() % 10000;
        let mut candidates = vec![IceCandidate::new(format!(
            "candidate:1 1 udp 2122260223 127.0.0.1 {} typ host",
            port
        ))];
        let has_reflector = self
            .ice_servers
            .iter()
            .flat_map(|s| s.urls.iter())
            .any(|url| url.starts_with("stun:") || url.starts_with("turn:"));
        if has_reflector {
            candidates.push(IceCandidate::new(format!(
                "candidate:2 1 udp 1686052607 198.51.100.7 {} typ srflx raddr 127.0.0.1 rport {}",
                port, port
            )));
        }
        candidates
    }

    fn try_connect(&self) {
        let (peer_id, channel, remote_label) = {
            let mut state = self.state.lock();
            let ready = state.signaling == SignalingState::Stable
                && state.local.is_some()
                && state.remote.is_some()
                && !state.applied_candidates.is_empty();
            if !ready
                || matches!(
                    state.connection,
                    ConnectionState::Connected | ConnectionState::Failed | ConnectionState::Closed
                )
            {
                return;
            }
            let Some(peer_id) = state.remote_peer.clone() else {
                return;
            };
            state.connection = ConnectionState::Connected;
            (peer_id, state.channel.clone(), state.remote_channel_label.clone())
        };

        debug!("Loopback {} connected to {}", self.id, peer_id);
        self.emit(PeerConnectionEvent::ConnectionStateChanged(
            ConnectionState::Connecting,
        ));
        self.emit(PeerConnectionEvent::ConnectionStateChanged(
            ConnectionState::Connected,
        ));

        if let Some(remote) = self.network.lookup(&peer_id) {
            let tracks = remote.state.lock().senders.clone();
            for track in tracks {
                self.emit(PeerConnectionEvent::RemoteTrack(track));
            }
        }

        let channel = match (channel, remote_label) {
            (Some(channel), _) => Some(channel),
            (None, Some(label)) => {
                let channel = Arc::new(LoopbackDataChannel::new(&label, self.network.clone()));
                self.state.lock().channel = Some(Arc::clone(&channel));
                Some(channel)
            }
            (None, None) => None,
        };

        if let Some(channel) = channel {
            channel.open_to(&peer_id);
            self.emit(PeerConnectionEvent::DataChannelOpen(channel));
        }
    }
}

#[async_trait]
impl PeerConnection for LoopbackPeer {
    async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        let state = self.state.lock();
        self.ensure_open(&state, "create_offer")?;
        Ok(SessionDescription::offer(self.build_sdp(&state)))
    }

    async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        let state = self.state.lock();
        if state.signaling != SignalingState::HaveRemoteOffer {
            return Err(self.invalid(state.signaling, "create_answer"));
        }
        Ok(SessionDescription::answer(self.build_sdp(&state)))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock();
            self.ensure_open(&state, "set_local_description")?;
            let next = match (description.sdp_type, state.signaling) {
                (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveLocalOffer,
                (SdpType::Answer, SignalingState::HaveRemoteOffer) => SignalingState::Stable,
                (_, current) => return Err(self.invalid(current, "set_local_description")),
            };
            state.signaling = next;
            state.local = Some(description);
        }

        for candidate in self.local_candidates() {
            self.emit(PeerConnectionEvent::LocalCandidate(candidate));
        }
        self.try_connect();
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), SessionError> {
        let origin = description
            .sdp
            .lines()
            .find_map(|line| line.strip_prefix(ORIGIN_PREFIX))
            .and_then(|rest| rest.split_whitespace().next())
            .map(str::to_string)
            .ok_or_else(|| SessionError::Negotiation {
                details: "remote description has no loopback origin".to_string(),
            })?;
        let label = description
            .sdp
            .lines()
            .find_map(|line| line.strip_prefix(LABEL_PREFIX))
            .map(str::to_string);

        {
            let mut state = self.state.lock();
            self.ensure_open(&state, "set_remote_description")?;
            let next = match (description.sdp_type, state.signaling) {
                (SdpType::Offer, SignalingState::Stable) => SignalingState::HaveRemoteOffer,
                (SdpType::Answer, SignalingState::HaveLocalOffer) => SignalingState::Stable,
                (_, current) => return Err(self.invalid(current, "set_remote_description")),
            };
            state.signaling = next;
            state.remote = Some(description);
            state.remote_peer = Some(origin);
            if label.is_some() {
                state.remote_channel_label = label;
            }
        }

        self.try_connect();
        Ok(())
    }

    async fn rollback(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        match state.signaling {
            SignalingState::HaveLocalOffer => {
                state.local = None;
            }
            SignalingState::HaveRemoteOffer => {
                state.remote = None;
                state.remote_peer = None;
                state.remote_channel_label = None;
            }
            SignalingState::Stable => return Ok(()),
            SignalingState::Closed => return Err(self.invalid(state.signaling, "rollback")),
        }
        state.signaling = SignalingState::Stable;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock();
            self.ensure_open(&state, "add_ice_candidate")?;
            if state.remote.is_none() {
                return Err(self.invalid(state.signaling, "add_ice_candidate"));
            }
            state.applied_candidates.push(candidate);
        }
        self.try_connect();
        Ok(())
    }

    fn add_track(&self, track: MediaTrack) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        self.ensure_open(&state, "add_track")?;
        if !state.senders.iter().any(|t| t.same_track(&track)) {
            state.senders.push(track);
        }
        Ok(())
    }

    async fn replace_track(&self, track: MediaTrack) -> Result<usize, SessionError> {
        let mut state = self.state.lock();
        self.ensure_open(&state, "replace_track")?;
        let mut replaced = 0;
        for sender in state.senders.iter_mut().filter(|t| t.kind() == track.kind()) {
            *sender = track.clone();
            replaced += 1;
        }
        Ok(replaced)
    }

    async fn create_data_channel(&self, label: &str) -> Result<Arc<dyn DataChannel>, SessionError> {
        let mut state = self.state.lock();
        self.ensure_open(&state, "create_data_channel")?;
        let channel = Arc::new(LoopbackDataChannel::new(label, self.network.clone()));
        state.channel = Some(Arc::clone(&channel));
        Ok(channel)
    }

    fn signaling_state(&self) -> SignalingState {
        self.state.lock().signaling
    }

    fn connection_state(&self) -> ConnectionState {
        self.state.lock().connection
    }

    async fn close(&self) {
        let channel = {
            let mut state = self.state.lock();
            if state.signaling == SignalingState::Closed {
                return;
            }
            state.signaling = SignalingState::Closed;
            state.connection = ConnectionState::Closed;
            state.channel.take()
        };
        if let Some(channel) = channel {
            channel.close().await;
        }
        self.network.unregister(self);
        debug!("Loopback peer connection {} closed", self.id);
    }
}

impl Drop for LoopbackPeer {
    fn drop(&mut self) {
        self.network.unregister(self);
    }
}

struct LoopbackDataChannel {
    label: String,
    network: LoopbackNetwork,
    peer_id: Mutex<Option<String>>,
    open: AtomicBool,
}

impl LoopbackDataChannel {
    fn new(label: &str, network: LoopbackNetwork) -> Self {
        Self {
            label: label.to_string(),
            network,
            peer_id: Mutex::new(None),
            open: AtomicBool::new(false),
        }
    }

    fn open_to(&self, peer_id: &str) {
        *self.peer_id.lock() = Some(peer_id.to_string());
        self.open.store(true, Ordering::Release);
    }
}

#[async_trait]
impl DataChannel for LoopbackDataChannel {
    fn label(&self) -> &str {
        &self.label
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    async fn send_text(&self, text: &str) -> Result<(), SessionError> {
        if !self.is_open() {
            return Err(SessionError::DataChannel {
                details: format!("channel '{}' is not open", self.label),
            });
        }
        let peer_id = self.peer_id.lock().clone().ok_or_else(|| SessionError::DataChannel {
            details: "channel has no remote end".to_string(),
        })?;
        if self
            .network
            .deliver(&peer_id, PeerConnectionEvent::DataChannelMessage(text.to_string()))
        {
            Ok(())
        } else {
            Err(SessionError::DataChannel {
                details: format!("peer {} is gone", peer_id),
            })
        }
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            if let Some(peer_id) = self.peer_id.lock().clone() {
                self.network
                    .deliver(&peer_id, PeerConnectionEvent::DataChannelClosed);
            }
        }
    }
}
