use super::*;
use crate::config::{IceServer, PeerlinkConfig};
use crate::context::SessionContext;
use crate::environment::LoopbackEnvironment;
use crate::error::{PeerlinkError, SessionError, SignalingError};
use crate::events::{EventFilter, PeerlinkEvent};
use crate::media::{MediaDevices, StreamRequest, TrackKind, VirtualMediaDevices};
use crate::rendezvous::InMemoryRendezvous;
use crate::signaling::{LocalSignalingHub, SignalingChannel, SignalingEvent, SignalingEvents};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(2);

fn camera() -> VirtualMediaDevices {
    VirtualMediaDevices::from_labels(&["Back Camera", "Front Camera"])
}

/// Feed signaling events addressed to `session` back into it
fn relay(session: PeerSession, mut inbox: SignalingEvents) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            let result = match event {
                SignalingEvent::CallMade { from, offer, .. } => {
                    session.handle_incoming_offer(&from, offer, None, None).await
                }
                SignalingEvent::CallAccepted { answer, .. } => session.handle_answer(answer).await,
                SignalingEvent::IceCandidate { from, candidate } => {
                    session.add_remote_candidate(&from, candidate).await
                }
                SignalingEvent::CallEnded { .. } => {
                    session.close().await;
                    Ok(())
                }
            };
            if let Err(e) = result {
                tracing::warn!("relay error: {}", e);
            }
        }
    })
}

async fn wait_for_channel(session: &PeerSession, status: DataChannelStatus) -> bool {
    for _ in 0..100 {
        if session.data_channel_status().await == status {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

struct Pair {
    env: LoopbackEnvironment,
    caller: PeerSession,
    callee: PeerSession,
    callee_ctx: SessionContext,
    caller_media: VirtualMediaDevices,
    _relays: Vec<JoinHandle<()>>,
}

async fn connected_pair() -> Pair {
    let env = LoopbackEnvironment::default();
    let caller_media = camera();
    let caller_ctx = env.participant(caller_media.clone());
    let callee_ctx = env.participant(camera());

    let caller = PeerSession::new(&caller_ctx);
    let callee = PeerSession::new(&callee_ctx);
    caller.open("caller-1").await.unwrap();
    callee.open("AB12CD34").await.unwrap();

    let relays = vec![
        relay(caller.clone(), env.hub.subscribe("caller-1").await.unwrap()),
        relay(callee.clone(), env.hub.subscribe("AB12CD34").await.unwrap()),
    ];

    let callee_stream = callee_ctx
        .media
        .acquire(&StreamRequest::video_and_audio("virtual-1"))
        .await
        .unwrap();
    callee.attach_local_stream(callee_stream).await.unwrap();

    let caller_stream = caller_ctx
        .media
        .acquire(&StreamRequest::video_and_audio("virtual-0"))
        .await
        .unwrap();
    caller
        .start_call("AB12CD34", Some(caller_stream), CallMetadata::with_language("en-US"))
        .await
        .unwrap();

    assert!(caller.wait_for_state(SessionState::Connected, WAIT).await);
    assert!(callee.wait_for_state(SessionState::Connected, WAIT).await);

    Pair {
        env,
        caller,
        callee,
        callee_ctx,
        caller_media,
        _relays: relays,
    }
}

#[tokio::test]
async fn test_start_call_before_open_is_not_ready() {
    let env = LoopbackEnvironment::default();
    let ctx = env.participant(camera());
    let session = PeerSession::new(&ctx);

    let result = session
        .start_call("AB12CD34", None, CallMetadata::default())
        .await;

    assert!(matches!(
        result,
        Err(PeerlinkError::Session(SessionError::NotReady { .. }))
    ));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.peer_id().await, None);
    assert_eq!(session.data_channel_status().await, DataChannelStatus::Closed);
    assert!(env.hub.history().is_empty());
    assert_eq!(env.network.connections_created(), 0);
}

#[tokio::test]
async fn test_connects_over_loopback() {
    let pair = connected_pair().await;

    assert_eq!(pair.caller.peer_id().await.as_deref(), Some("AB12CD34"));
    assert_eq!(pair.callee.peer_id().await.as_deref(), Some("caller-1"));

    let caller_remote = pair.caller.remote_stream().await.unwrap();
    let callee_remote = pair.callee.remote_stream().await.unwrap();
    assert_eq!(caller_remote.tracks().len(), 2);
    assert_eq!(callee_remote.tracks().len(), 2);
    assert!(callee_remote
        .tracks()
        .iter()
        .any(|t| t.device_id() == Some("virtual-0")));
}

#[tokio::test]
async fn test_data_channel_carries_text() {
    let pair = connected_pair().await;
    let mut messages = pair.callee_ctx.events.subscribe_filtered(
        EventFilter::EventTypes(vec!["data_channel_message"]),
        "test",
    );

    assert!(wait_for_channel(&pair.caller, DataChannelStatus::Open).await);
    assert!(wait_for_channel(&pair.callee, DataChannelStatus::Open).await);

    pair.caller.send_text("bom dia").await.unwrap();

    let event = tokio::time::timeout(WAIT, messages.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        PeerlinkEvent::DataChannelMessage {
            text: "bom dia".to_string()
        }
    );
}

#[tokio::test]
async fn test_remote_handler_fires_once() {
    let env = LoopbackEnvironment::default();
    let caller_ctx = env.participant(camera());
    let callee_ctx = env.participant(camera());
    let caller = PeerSession::new(&caller_ctx);
    let callee = PeerSession::new(&callee_ctx);
    caller.open("caller-1").await.unwrap();
    callee.open("R1").await.unwrap();

    let _caller_relay = relay(caller.clone(), env.hub.subscribe("caller-1").await.unwrap());
    let mut callee_inbox = env.hub.subscribe("R1").await.unwrap();

    let stream = caller_ctx
        .media
        .acquire(&StreamRequest::video_and_audio("virtual-0"))
        .await
        .unwrap();
    caller
        .start_call("R1", Some(stream), CallMetadata::default())
        .await
        .unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handler = Some(Box::new(move |remote: crate::media::RemoteStream| {
        let _ = tx.send(remote.id().to_string());
    }) as RemoteStreamHandler);

    let driven = callee.clone();
    let _driver = tokio::spawn(async move {
        while let Some(event) = callee_inbox.recv().await {
            match event {
                SignalingEvent::CallMade { from, offer, .. } => {
                    driven
                        .handle_incoming_offer(&from, offer, None, handler.take())
                        .await
                        .unwrap();
                }
                SignalingEvent::IceCandidate { from, candidate } => {
                    driven.add_remote_candidate(&from, candidate).await.unwrap();
                }
                _ => {}
            }
        }
    });

    assert!(callee.wait_for_state(SessionState::Connected, WAIT).await);
    let stream_id = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        callee.remote_stream().await.map(|s| s.id().to_string()),
        Some(stream_id)
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_second_call_setup_is_rejected() {
    let env = LoopbackEnvironment::default();
    let ctx = env.participant(camera());
    let session = PeerSession::new(&ctx);
    session.open("caller-1").await.unwrap();
    let _inbox = env.hub.subscribe("R1").await.unwrap();

    session
        .start_call("R1", None, CallMetadata::default())
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Negotiating(Role::Caller));

    let second = session.start_call("R2", None, CallMetadata::default()).await;
    assert!(matches!(
        second,
        Err(PeerlinkError::Session(SessionError::NotReady { .. }))
    ));
    assert_eq!(session.peer_id().await.as_deref(), Some("R1"));
}

#[tokio::test]
async fn test_undeliverable_offer_reverts_to_idle() {
    let env = LoopbackEnvironment::default();
    let ctx = env.participant(camera());
    let session = PeerSession::new(&ctx);
    session.open("caller-1").await.unwrap();

    let result = session
        .start_call("R1", None, CallMetadata::default())
        .await;
    assert!(matches!(
        result,
        Err(PeerlinkError::Signaling(SignalingError::UnknownPeer { .. }))
    ));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.signaling_state().await, Some(SignalingState::Stable));
    assert_eq!(session.peer_id().await, None);

    // Retry succeeds once the receiver is reachable
    let _inbox = env.hub.subscribe("R1").await.unwrap();
    session
        .start_call("R1", None, CallMetadata::default())
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Negotiating(Role::Caller));
}

#[tokio::test]
async fn test_malformed_offer_leaves_session_idle() {
    let env = LoopbackEnvironment::default();
    let ctx = env.participant(camera());
    let session = PeerSession::new(&ctx);
    session.open("R1").await.unwrap();
    let mut states = ctx
        .events
        .subscribe_filtered(EventFilter::EventTypes(vec!["state_changed"]), "test");

    let result = session
        .handle_incoming_offer("caller-1", SessionDescription::offer("garbage"), None, None)
        .await;

    assert!(matches!(
        result,
        Err(PeerlinkError::Session(SessionError::Negotiation { .. }))
    ));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.signaling_state().await, Some(SignalingState::Stable));
    // A rejected offer never enters negotiation
    assert!(states.drain().is_empty());
}

#[tokio::test]
async fn test_rejected_offer_discards_its_candidates() {
    let env = LoopbackEnvironment::default();
    let ctx = env.participant(camera());
    let session = PeerSession::new(&ctx);
    session.open("R1").await.unwrap();

    session
        .add_remote_candidate("X1", IceCandidate::new("x1-host"))
        .await
        .unwrap();
    assert_eq!(session.pending_candidate_count().await, 1);

    let result = session
        .handle_incoming_offer("X1", SessionDescription::offer("garbage"), None, None)
        .await;
    assert!(result.is_err());
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.pending_candidate_count().await, 0);
}

#[tokio::test]
async fn test_replace_track_requires_connection() {
    let env = LoopbackEnvironment::default();
    let ctx = env.participant(camera());
    let session = PeerSession::new(&ctx);
    session.open("caller-1").await.unwrap();

    let outcome = session
        .replace_outbound_track(crate::media::MediaTrack::new(TrackKind::Video, None))
        .await
        .unwrap();
    assert_eq!(outcome, ReplaceOutcome::NotConnected);
}

#[tokio::test]
async fn test_replace_track_swaps_outbound_sender() {
    let pair = connected_pair().await;
    let replacement = pair
        .caller_media
        .acquire(&StreamRequest::video_and_audio("virtual-1"))
        .await
        .unwrap();
    let video = replacement.video_track().cloned().unwrap();

    let outcome = pair.caller.replace_outbound_track(video.clone()).await.unwrap();
    assert_eq!(outcome, ReplaceOutcome::Replaced { senders: 1 });
    assert!(pair
        .env
        .network
        .sender_tracks("caller-1")
        .iter()
        .any(|t| t.same_track(&video)));
    assert_eq!(pair.caller.state(), SessionState::Connected);
}

#[tokio::test]
async fn test_close_is_idempotent_and_stops_tracks() {
    let env = LoopbackEnvironment::default();
    let media = camera();
    let ctx = env.participant(media.clone());
    let session = PeerSession::new(&ctx);
    session.open("caller-1").await.unwrap();

    let stream = media
        .acquire(&StreamRequest::video_and_audio("virtual-0"))
        .await
        .unwrap();
    session.attach_local_stream(stream).await.unwrap();
    assert_eq!(media.live_tracks().len(), 2);

    session.close().await;
    session.close().await;

    assert_eq!(session.state(), SessionState::Closed);
    assert!(media.live_tracks().is_empty());

    let late = media
        .acquire(&StreamRequest::video_and_audio("virtual-1"))
        .await
        .unwrap();
    assert!(session.attach_local_stream(late).await.is_err());
    assert!(media.live_tracks().is_empty());
    assert!(session.add_remote_candidate("caller-1", IceCandidate::new("c")).await.is_ok());
    assert_eq!(session.pending_candidate_count().await, 0);
}

#[tokio::test]
async fn test_attach_stops_previous_stream() {
    let env = LoopbackEnvironment::default();
    let media = camera();
    let ctx = env.participant(media.clone());
    let session = PeerSession::new(&ctx);

    let first = media
        .acquire(&StreamRequest::video_and_audio("virtual-0"))
        .await
        .unwrap();
    let first_video = first.video_track().cloned().unwrap();
    session.attach_local_stream(first).await.unwrap();

    let second = media
        .acquire(&StreamRequest::video_and_audio("virtual-1"))
        .await
        .unwrap();
    session.attach_local_stream(second).await.unwrap();

    assert!(first_video.is_ended());
    assert_eq!(media.live_tracks().len(), 2);
    assert_eq!(session.local_video_device().await.as_deref(), Some("virtual-1"));
}

#[tokio::test]
async fn test_transport_failure_moves_to_failed() {
    let pair = connected_pair().await;
    let mut errors = pair
        .callee_ctx
        .events
        .subscribe_filtered(EventFilter::EventTypes(vec!["error"]), "test");

    pair.env.network.sever("AB12CD34");

    assert!(pair.callee.wait_for_state(SessionState::Failed, WAIT).await);
    let event = tokio::time::timeout(WAIT, errors.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        event,
        PeerlinkEvent::error(
            "peer_session",
            SessionError::Transport {
                details: "peer connection failed".to_string()
            }
        )
    );

    pair.callee.close().await;
    assert_eq!(pair.callee.state(), SessionState::Closed);
}

/// Connection that records the order candidates are applied in
#[derive(Default)]
struct RecordingConnection {
    applied: Mutex<Vec<String>>,
    remote_set: AtomicBool,
    fail_offer: AtomicBool,
    signaling: Mutex<Option<SignalingState>>,
}

impl RecordingConnection {
    fn current(&self) -> SignalingState {
        self.signaling.lock().unwrap_or(SignalingState::Stable)
    }
}

#[async_trait]
impl PeerConnection for RecordingConnection {
    async fn create_offer(&self) -> Result<SessionDescription, SessionError> {
        if self.fail_offer.load(Ordering::SeqCst) {
            return Err(SessionError::Negotiation {
                details: "no codecs".to_string(),
            });
        }
        Ok(SessionDescription::offer("v=0"))
    }

    async fn create_answer(&self) -> Result<SessionDescription, SessionError> {
        Ok(SessionDescription::answer("v=0"))
    }

    async fn set_local_description(&self, description: SessionDescription) -> Result<(), SessionError> {
        *self.signaling.lock() = Some(match description.sdp_type {
            SdpType::Offer => SignalingState::HaveLocalOffer,
            SdpType::Answer => SignalingState::Stable,
        });
        Ok(())
    }

    async fn set_remote_description(&self, description: SessionDescription) -> Result<(), SessionError> {
        *self.signaling.lock() = Some(match description.sdp_type {
            SdpType::Offer => SignalingState::HaveRemoteOffer,
            SdpType::Answer => SignalingState::Stable,
        });
        self.remote_set.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<(), SessionError> {
        *self.signaling.lock() = Some(SignalingState::Stable);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), SessionError> {
        if !self.remote_set.load(Ordering::SeqCst) {
            return Err(SessionError::InvalidState {
                state: "no remote description".to_string(),
                operation: "add_ice_candidate".to_string(),
            });
        }
        self.applied.lock().push(candidate.candidate);
        Ok(())
    }

    fn add_track(&self, _track: crate::media::MediaTrack) -> Result<(), SessionError> {
        Ok(())
    }

    async fn replace_track(&self, _track: crate::media::MediaTrack) -> Result<usize, SessionError> {
        Ok(0)
    }

    async fn create_data_channel(&self, _label: &str) -> Result<Arc<dyn DataChannel>, SessionError> {
        Err(SessionError::DataChannel {
            details: "unsupported".to_string(),
        })
    }

    fn signaling_state(&self) -> SignalingState {
        self.current()
    }

    fn connection_state(&self) -> ConnectionState {
        ConnectionState::New
    }

    async fn close(&self) {}
}

struct RecordingFactory {
    connection: Arc<RecordingConnection>,
    events: Mutex<Vec<mpsc::UnboundedSender<PeerConnectionEvent>>>,
}

#[async_trait]
impl PeerConnectionFactory for RecordingFactory {
    async fn create(
        &self,
        _self_id: &str,
        _ice_servers: &[IceServer],
    ) -> Result<(Arc<dyn PeerConnection>, PeerConnectionEvents), SessionError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events.lock().push(tx);
        Ok((self.connection.clone(), rx))
    }
}

fn recording_context(
    connection: &Arc<RecordingConnection>,
    media: VirtualMediaDevices,
) -> (SessionContext, LocalSignalingHub) {
    let factory = Arc::new(RecordingFactory {
        connection: Arc::clone(connection),
        events: Mutex::new(Vec::new()),
    });
    let hub = LocalSignalingHub::new();
    let rendezvous = InMemoryRendezvous::new();
    let ctx = SessionContext::new(
        Arc::new(PeerlinkConfig::default()),
        Arc::new(media),
        factory,
        Arc::new(hub.clone()),
        Arc::new(rendezvous.clone()),
        Arc::new(rendezvous),
    );
    (ctx, hub)
}

#[tokio::test]
async fn test_candidates_buffered_until_remote_description() {
    let connection = Arc::new(RecordingConnection::default());
    let (ctx, hub) = recording_context(&connection, camera());
    let _caller_inbox = hub.subscribe("caller-1").await.unwrap();

    let session = PeerSession::new(&ctx);
    session.open("R1").await.unwrap();

    for candidate in ["c1", "c2", "c3"] {
        session
            .add_remote_candidate("caller-1", IceCandidate::new(candidate))
            .await
            .unwrap();
    }
    assert_eq!(session.pending_candidate_count().await, 3);
    assert!(connection.applied.lock().is_empty());

    session
        .handle_incoming_offer("caller-1", SessionDescription::offer("v=0"), None, None)
        .await
        .unwrap();

    assert_eq!(*connection.applied.lock(), vec!["c1", "c2", "c3"]);
    assert_eq!(session.pending_candidate_count().await, 0);

    session.add_remote_candidate("caller-1", IceCandidate::new("c4")).await.unwrap();
    assert_eq!(connection.applied.lock().last().map(String::as_str), Some("c4"));
}

#[tokio::test]
async fn test_candidates_from_other_senders_are_dropped() {
    let connection = Arc::new(RecordingConnection::default());
    let (ctx, hub) = recording_context(&connection, camera());
    let _caller_inbox = hub.subscribe("caller-1").await.unwrap();

    let session = PeerSession::new(&ctx);
    session.open("R1").await.unwrap();

    session
        .add_remote_candidate("caller-0", IceCandidate::new("stale"))
        .await
        .unwrap();
    session
        .add_remote_candidate("caller-1", IceCandidate::new("c1"))
        .await
        .unwrap();
    assert_eq!(session.pending_candidate_count().await, 2);

    session
        .handle_incoming_offer("caller-1", SessionDescription::offer("v=0"), None, None)
        .await
        .unwrap();
    assert_eq!(*connection.applied.lock(), vec!["c1"]);
    assert_eq!(session.pending_candidate_count().await, 0);

    session
        .add_remote_candidate("caller-0", IceCandidate::new("late"))
        .await
        .unwrap();
    session
        .add_remote_candidate("caller-1", IceCandidate::new("c2"))
        .await
        .unwrap();
    assert_eq!(*connection.applied.lock(), vec!["c1", "c2"]);
}

#[tokio::test]
async fn test_failed_offer_keeps_previous_setup() {
    let connection = Arc::new(RecordingConnection::default());
    let media = camera();
    let (ctx, hub) = recording_context(&connection, media.clone());
    let _callee_inbox = hub.subscribe("R1").await.unwrap();

    let session = PeerSession::new(&ctx);
    session.open("caller-1").await.unwrap();
    let attached = media
        .acquire(&StreamRequest::video_and_audio("virtual-0"))
        .await
        .unwrap();
    session.attach_local_stream(attached).await.unwrap();

    connection.fail_offer.store(true, Ordering::SeqCst);
    let offered = media
        .acquire(&StreamRequest::video_and_audio("virtual-1"))
        .await
        .unwrap();
    let offered_video = offered.video_track().cloned().unwrap();
    let result = session
        .start_call("R1", Some(offered), CallMetadata::default())
        .await;

    assert!(matches!(
        result,
        Err(PeerlinkError::Session(SessionError::Negotiation { .. }))
    ));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(session.peer_id().await, None);
    assert_eq!(session.data_channel_status().await, DataChannelStatus::Closed);
    assert_eq!(session.local_video_device().await.as_deref(), Some("virtual-0"));
    assert!(offered_video.is_ended());
    assert!(hub.history().is_empty());

    connection.fail_offer.store(false, Ordering::SeqCst);
    session
        .start_call("R1", None, CallMetadata::default())
        .await
        .unwrap();
    assert_eq!(session.state(), SessionState::Negotiating(Role::Caller));
}
