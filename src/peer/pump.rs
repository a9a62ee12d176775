use super::connection::{ConnectionState, PeerConnectionEvent, PeerConnectionEvents};
use super::session::{PeerSession, SessionInner};
use super::{DataChannelStatus, SessionState};
use crate::error::SessionError;
use crate::events::PeerlinkEvent;
use crate::media::RemoteStream;
use std::sync::Weak;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Forward peer-connection events into the session until it closes.
/// Holds the session weakly so an abandoned session is not kept alive.
pub(super) fn spawn_event_pump(
    weak: Weak<SessionInner>,
    mut events: PeerConnectionEvents,
    closed: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                biased;
                _ = closed.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let Some(inner) = weak.upgrade() else {
                break;
            };
            let session = PeerSession { inner };
            if session.is_closed() {
                debug!("Dropping {:?} received after close", event);
                break;
            }
            session.handle_connection_event(event).await;
        }
        debug!("Peer connection event pump stopped");
    })
}

impl PeerSession {
    async fn handle_connection_event(&self, event: PeerConnectionEvent) {
        match event {
            PeerConnectionEvent::LocalCandidate(candidate) => {
                let mut core = self.lock_core().await;
                match (core.self_id.clone(), core.peer_id.clone()) {
                    (Some(from), Some(to)) => self.send_candidate(&from, &to, candidate).await,
                    _ => core.pending_outbound.push(candidate),
                }
            }
            PeerConnectionEvent::ConnectionStateChanged(state) => {
                self.handle_connection_state(state);
            }
            PeerConnectionEvent::RemoteTrack(track) => {
                let mut core = self.lock_core().await;
                let remote = core
                    .remote_stream
                    .get_or_insert_with(RemoteStream::new)
                    .clone();
                remote.add_track(track);
                let track_count = remote.tracks().len();

                if let Some(on_remote) = core.on_remote.take() {
                    on_remote(remote.clone());
                }
                drop(core);

                self.inner.events.publish(PeerlinkEvent::RemoteStream {
                    stream_id: remote.id().to_string(),
                    track_count,
                });
            }
            PeerConnectionEvent::DataChannelOpen(channel) => {
                let mut core = self.lock_core().await;
                info!("Data channel '{}' open", channel.label());
                core.data_channel = Some(channel);
                self.set_channel_status(&mut core, DataChannelStatus::Open);
            }
            PeerConnectionEvent::DataChannelMessage(text) => {
                self.inner
                    .events
                    .publish(PeerlinkEvent::DataChannelMessage { text });
            }
            PeerConnectionEvent::DataChannelClosed => {
                let mut core = self.lock_core().await;
                core.data_channel = None;
                self.set_channel_status(&mut core, DataChannelStatus::Closed);
            }
        }
    }

    fn handle_connection_state(&self, state: ConnectionState) {
        match state {
            ConnectionState::Connected => {
                if matches!(self.state(), SessionState::Negotiating(_)) {
                    self.transition(SessionState::Connected);
                }
            }
            ConnectionState::Failed => {
                let current = self.state();
                if !matches!(current, SessionState::Idle) && !current.is_terminal() {
                    warn!("Peer connection failed while {:?}", current);
                    self.transition(SessionState::Failed);
                    let error = SessionError::Transport {
                        details: "peer connection failed".to_string(),
                    };
                    self.inner
                        .events
                        .publish(PeerlinkEvent::error("peer_session", error));
                }
            }
            ConnectionState::Disconnected => {
                warn!("Peer connection disconnected");
            }
            other => debug!("Peer connection state {:?}", other),
        }
    }
}
