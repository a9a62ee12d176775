use super::connection::{DataChannel, IceCandidate, PeerConnection, SignalingState};
use super::pump::spawn_event_pump;
use super::{DataChannelStatus, ReplaceOutcome, SessionState};
use crate::config::IceServer;
use crate::context::SessionContext;
use crate::error::{Result, SessionError};
use crate::events::{EventBus, PeerlinkEvent};
use crate::media::{MediaStream, MediaTrack, RemoteStream, TrackObserver};
use crate::signaling::SignalingChannel;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Invoked once, when the first remote track arrives
pub type RemoteStreamHandler = Box<dyn FnOnce(RemoteStream) + Send>;

/// One peer-connection attempt.
///
/// A session is opened once, used for a single call and closed; a new call
/// always gets a new session. Clones share the same session.
#[derive(Clone)]
pub struct PeerSession {
    pub(super) inner: Arc<SessionInner>,
}

pub(super) struct SessionInner {
    pub(super) factory: Arc<dyn crate::peer::PeerConnectionFactory>,
    pub(super) signaling: Arc<dyn SignalingChannel>,
    pub(super) events: EventBus,
    pub(super) ice_servers: Vec<IceServer>,
    pub(super) data_channel_label: String,
    pub(super) core: Mutex<SessionCore>,
    pub(super) state_tx: watch::Sender<SessionState>,
    /// Set while an offer or answer is being produced
    pub(super) negotiating: AtomicBool,
    pub(super) closed: CancellationToken,
    pub(super) pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

pub(super) struct SessionCore {
    pub(super) self_id: Option<String>,
    pub(super) peer_id: Option<String>,
    pub(super) connection: Option<Arc<dyn PeerConnection>>,
    pub(super) local_stream: Option<MediaStream>,
    pub(super) remote_stream: Option<RemoteStream>,
    /// Inbound candidates waiting for the remote description, FIFO, keyed
    /// by sender
    pub(super) pending_candidates: VecDeque<(String, IceCandidate)>,
    /// Local candidates gathered before the peer id was known
    pub(super) pending_outbound: Vec<IceCandidate>,
    pub(super) remote_description_set: bool,
    pub(super) data_channel: Option<Arc<dyn DataChannel>>,
    pub(super) data_channel_status: DataChannelStatus,
    pub(super) on_remote: Option<RemoteStreamHandler>,
}

impl SessionCore {
    fn new() -> Self {
        Self {
            self_id: None,
            peer_id: None,
            connection: None,
            local_stream: None,
            remote_stream: None,
            pending_candidates: VecDeque::new(),
            pending_outbound: Vec::new(),
            remote_description_set: false,
            data_channel: None,
            data_channel_status: DataChannelStatus::Closed,
            on_remote: None,
        }
    }

    /// Take ownership of `stream`, stopping whatever was attached before
    pub(super) fn replace_local_stream(&mut self, stream: MediaStream) {
        if let Some(previous) = self.local_stream.take() {
            let stopped = previous.stop();
            debug!(
                "Stopped {} tracks of previous local stream {}",
                stopped,
                previous.id()
            );
        }
        self.local_stream = Some(stream);
    }

    pub(super) fn local_tracks(&self) -> Vec<MediaTrack> {
        self.local_stream
            .as_ref()
            .map(|s| s.tracks().to_vec())
            .unwrap_or_default()
    }
}

impl PeerSession {
    pub fn new(ctx: &SessionContext) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            inner: Arc::new(SessionInner {
                factory: Arc::clone(&ctx.peers),
                signaling: Arc::clone(&ctx.signaling),
                events: ctx.events.clone(),
                ice_servers: ctx.config.ice.servers.clone(),
                data_channel_label: ctx.config.call.data_channel_label.clone(),
                core: Mutex::new(SessionCore::new()),
                state_tx,
                negotiating: AtomicBool::new(false),
                closed: CancellationToken::new(),
                pump: parking_lot::Mutex::new(None),
            }),
        }
    }

    /// Allocate the underlying peer connection with the configured ICE
    /// servers and start listening to its events.
    pub async fn open(&self, self_id: &str) -> Result<()> {
        if self.is_closed() {
            return Err(SessionError::Closed.into());
        }

        let mut core = self.inner.core.lock().await;
        if core.connection.is_some() {
            return Err(SessionError::InvalidState {
                state: format!("{:?}", self.state()),
                operation: "open".to_string(),
            }
            .into());
        }

        let (connection, events) = self
            .inner
            .factory
            .create(self_id, &self.inner.ice_servers)
            .await?;

        core.connection = Some(connection);
        core.self_id = Some(self_id.to_string());

        let pump = spawn_event_pump(
            Arc::downgrade(&self.inner),
            events,
            self.inner.closed.clone(),
        );
        *self.inner.pump.lock() = Some(pump);

        info!(
            "Peer session opened for {} with {} ICE servers",
            self_id,
            self.inner.ice_servers.len()
        );
        Ok(())
    }

    /// Take exclusive ownership of `stream`. A previously attached stream
    /// has its tracks stopped first. Fails once the session is closed, in
    /// which case the incoming stream is stopped as well.
    pub async fn attach_local_stream(&self, stream: MediaStream) -> Result<()> {
        let mut core = self.inner.core.lock().await;
        if self.is_closed() {
            stream.stop();
            return Err(SessionError::Closed.into());
        }
        debug!(
            "Attaching local stream {} ({} tracks)",
            stream.id(),
            stream.tracks().len()
        );
        core.replace_local_stream(stream);
        Ok(())
    }

    /// Stop the attached local tracks while keeping the stream attached.
    /// Returns how many tracks were still live.
    pub async fn stop_local_tracks(&self) -> usize {
        let core = self.inner.core.lock().await;
        core.local_stream.as_ref().map(|s| s.stop()).unwrap_or(0)
    }

    /// Swap the outbound track of matching kind on every sender without
    /// renegotiating. Only effective while connected.
    pub async fn replace_outbound_track(&self, track: MediaTrack) -> Result<ReplaceOutcome> {
        let core = self.inner.core.lock().await;
        if self.state() != SessionState::Connected {
            debug!(
                "Not replacing {} track, session is {:?}",
                track.kind().as_str(),
                self.state()
            );
            return Ok(ReplaceOutcome::NotConnected);
        }
        let Some(connection) = core.connection.as_ref() else {
            return Ok(ReplaceOutcome::NotConnected);
        };

        let senders = connection.replace_track(track.clone()).await?;
        info!(
            "Replaced outbound {} track on {} senders",
            track.kind().as_str(),
            senders
        );
        Ok(ReplaceOutcome::Replaced { senders })
    }

    /// Send text over the open data channel
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let channel = {
            let core = self.inner.core.lock().await;
            core.data_channel.clone()
        };
        match channel {
            Some(channel) if channel.is_open() => {
                channel.send_text(text).await?;
                Ok(())
            }
            _ => Err(SessionError::DataChannel {
                details: "data channel is not open".to_string(),
            }
            .into()),
        }
    }

    /// Register the handler for the first remote track when the session is
    /// the calling side
    pub async fn set_remote_handler(&self, handler: RemoteStreamHandler) {
        self.inner.core.lock().await.on_remote = Some(handler);
    }

    /// Stop every owned track, close the connection and move to `Closed`.
    /// Idempotent. Anything still in flight observes the cancellation and
    /// drops its result.
    pub async fn close(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        self.inner.closed.cancel();

        let mut core = self.inner.core.lock().await;
        if let Some(stream) = core.local_stream.take() {
            let stopped = stream.stop();
            debug!("Stopped {} local tracks on close", stopped);
        }
        if let Some(channel) = core.data_channel.take() {
            channel.close().await;
        }
        if let Some(connection) = core.connection.take() {
            connection.close().await;
        }
        core.pending_candidates.clear();
        core.pending_outbound.clear();
        core.on_remote = None;
        self.set_channel_status(&mut core, DataChannelStatus::Closed);
        drop(core);

        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        self.transition(SessionState::Closed);
        info!("Peer session closed");
    }

    /// Wait until the session reaches `target`. Returns `false` on timeout.
    pub async fn wait_for_state(&self, target: SessionState, timeout: Duration) -> bool {
        let mut rx = self.inner.state_tx.subscribe();
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|state| *state == target)).await,
            Ok(Ok(_))
        );
        reached
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Cancelled when the session closes
    pub fn closed_token(&self) -> CancellationToken {
        self.inner.closed.clone()
    }

    pub async fn is_open(&self) -> bool {
        !self.is_closed() && self.inner.core.lock().await.connection.is_some()
    }

    /// Signaling state of the underlying connection; `None` before `open`
    pub async fn signaling_state(&self) -> Option<SignalingState> {
        let core = self.inner.core.lock().await;
        core.connection.as_ref().map(|c| c.signaling_state())
    }

    pub async fn self_id(&self) -> Option<String> {
        self.inner.core.lock().await.self_id.clone()
    }

    pub async fn peer_id(&self) -> Option<String> {
        self.inner.core.lock().await.peer_id.clone()
    }

    pub async fn remote_stream(&self) -> Option<RemoteStream> {
        self.inner.core.lock().await.remote_stream.clone()
    }

    /// Observer for the attached local video track, if any
    pub async fn local_video_observer(&self) -> Option<TrackObserver> {
        let core = self.inner.core.lock().await;
        core.local_stream
            .as_ref()
            .and_then(|s| s.video_track())
            .map(|t| t.observer())
    }

    pub async fn has_local_video(&self) -> bool {
        let core = self.inner.core.lock().await;
        core.local_stream
            .as_ref()
            .map(|s| s.has_video())
            .unwrap_or(false)
    }

    /// Device backing the attached local video track
    pub async fn local_video_device(&self) -> Option<String> {
        let core = self.inner.core.lock().await;
        core.local_stream
            .as_ref()
            .and_then(|s| s.video_track())
            .and_then(|t| t.device_id().map(str::to_string))
    }

    pub async fn data_channel_status(&self) -> DataChannelStatus {
        self.inner.core.lock().await.data_channel_status
    }

    pub(super) async fn lock_core(&self) -> MutexGuard<'_, SessionCore> {
        self.inner.core.lock().await
    }

    /// Move to `to`, publishing the change. `Closed` is terminal and
    /// `Failed` can only be left by closing.
    pub(super) fn transition(&self, to: SessionState) -> bool {
        let mut from = None;
        self.inner.state_tx.send_if_modified(|state| {
            let allowed = match *state {
                SessionState::Closed => false,
                SessionState::Failed => to == SessionState::Closed,
                current => current != to,
            };
            if allowed {
                from = Some(*state);
                *state = to;
            }
            allowed
        });

        if !matches!(to, SessionState::Negotiating(_)) {
            self.inner.negotiating.store(false, Ordering::Release);
        }

        match from {
            Some(from) => {
                info!("Peer session {:?} -> {:?}", from, to);
                self.inner
                    .events
                    .publish(PeerlinkEvent::StateChanged { from, to });
                true
            }
            None => false,
        }
    }

    pub(super) fn set_channel_status(&self, core: &mut SessionCore, status: DataChannelStatus) {
        if core.data_channel_status != status {
            core.data_channel_status = status;
            self.inner
                .events
                .publish(PeerlinkEvent::DataChannelStatusChanged { status });
        }
    }

    /// Apply the candidates `peer` sent, in arrival order. Candidates
    /// buffered from anyone else are dropped.
    pub(super) async fn flush_pending_candidates(&self, core: &mut SessionCore, peer: &str) {
        let Some(connection) = core.connection.clone() else {
            core.pending_candidates.clear();
            return;
        };
        let mut applied = 0;
        let mut dropped = 0;
        while let Some((from, candidate)) = core.pending_candidates.pop_front() {
            if from != peer {
                dropped += 1;
                continue;
            }
            applied += 1;
            if let Err(e) = connection.add_ice_candidate(candidate).await {
                warn!("Failed to apply buffered ICE candidate: {}", e);
            }
        }
        if applied > 0 {
            debug!("Flushed {} buffered ICE candidates from {}", applied, peer);
        }
        if dropped > 0 {
            debug!("Dropped {} buffered ICE candidates not from {}", dropped, peer);
        }
    }

    /// Send local candidates gathered before the peer was known
    pub(super) async fn flush_outbound_candidates(&self, core: &mut SessionCore) {
        let (Some(from), Some(to)) = (core.self_id.clone(), core.peer_id.clone()) else {
            return;
        };
        for candidate in std::mem::take(&mut core.pending_outbound) {
            self.send_candidate(&from, &to, candidate).await;
        }
    }

    pub(super) async fn send_candidate(&self, from: &str, to: &str, candidate: IceCandidate) {
        let signal = crate::signaling::OutboundSignal::IceCandidate {
            to: to.to_string(),
            from: from.to_string(),
            candidate,
        };
        if let Err(e) = self.inner.signaling.send(signal).await {
            warn!("Failed to send ICE candidate to {}: {}", to, e);
        }
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("state", &self.state())
            .field("closed", &self.is_closed())
            .finish()
    }
}
