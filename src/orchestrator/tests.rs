use super::*;
use crate::environment::LoopbackEnvironment;
use crate::error::{PeerlinkError, SessionError};
use crate::events::{EventFilter, PeerlinkEvent};
use crate::media::VirtualMediaDevices;
use crate::peer::{CallMetadata, SessionState};
use crate::signaling::OutboundSignal;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(2);

fn cameras() -> VirtualMediaDevices {
    VirtualMediaDevices::from_labels(&["Front Camera", "Back Camera"])
        .with_frame_interval(Duration::from_millis(100))
}

async fn ready(env: &LoopbackEnvironment, id: &str) -> ConnectionOrchestrator {
    let orchestrator = ConnectionOrchestrator::new(env.participant(cameras()));
    orchestrator.initialize(id).await.unwrap();
    let stream = orchestrator.acquire_local_media().await.unwrap();
    orchestrator.attach_local_media(stream).await.unwrap();
    orchestrator
}

async fn connected(env: &LoopbackEnvironment) -> (ConnectionOrchestrator, ConnectionOrchestrator) {
    let receiver = ready(env, "AB12CD34").await;
    receiver.accept_incoming_calls(true);
    let caller = ready(env, "caller-1").await;

    caller
        .start_call("AB12CD34", CallMetadata::with_language("en-US"))
        .await
        .unwrap();
    assert!(caller.wait_until_connected(WAIT).await);
    assert!(receiver.wait_until_connected(WAIT).await);
    (caller, receiver)
}

#[tokio::test]
async fn test_start_call_before_initialize_is_not_ready() {
    let env = LoopbackEnvironment::default();
    let orchestrator = ConnectionOrchestrator::new(env.participant(cameras()));

    let result = orchestrator
        .start_call("AB12CD34", CallMetadata::default())
        .await;
    assert!(matches!(
        result,
        Err(PeerlinkError::Session(SessionError::NotReady { .. }))
    ));
    assert!(!orchestrator.is_ready());
    assert!(orchestrator.session().await.is_none());
    assert!(env.hub.history().is_empty());
}

#[tokio::test]
async fn test_initialize_raises_readiness() {
    let env = LoopbackEnvironment::default();
    let orchestrator = ConnectionOrchestrator::new(env.participant(cameras()));
    assert!(!orchestrator.is_ready());

    orchestrator.initialize("AB12CD34").await.unwrap();

    assert!(orchestrator.is_ready());
    assert!(env.hub.is_subscribed("AB12CD34"));
    let session = orchestrator.session().await.unwrap();
    assert!(session.is_open().await);
    assert_eq!(orchestrator.self_id().await.as_deref(), Some("AB12CD34"));
}

#[tokio::test]
async fn test_call_connects_and_announces_language() {
    let env = LoopbackEnvironment::default();
    let receiver = ready(&env, "AB12CD34").await;
    receiver.accept_incoming_calls(true);
    let mut languages = receiver
        .context()
        .events
        .subscribe_filtered(EventFilter::EventTypes(vec!["caller_language"]), "test");
    let caller = ready(&env, "caller-1").await;

    caller
        .start_call("AB12CD34", CallMetadata::with_language("en-US"))
        .await
        .unwrap();

    assert!(caller.wait_until_connected(WAIT).await);
    assert!(receiver.wait_until_connected(WAIT).await);
    assert_eq!(
        languages.try_recv().unwrap(),
        Some(PeerlinkEvent::CallerLanguage {
            code: "en-US".to_string()
        })
    );
}

#[tokio::test]
async fn test_second_call_while_negotiating_is_rejected() {
    let env = LoopbackEnvironment::default();
    // Receiver exists but does not answer
    let _receiver = ready(&env, "AB12CD34").await;
    let caller = ready(&env, "caller-1").await;

    caller
        .start_call("AB12CD34", CallMetadata::default())
        .await
        .unwrap();
    let offers_before = env.hub.history().len();

    let second = caller.start_call("AB12CD34", CallMetadata::default()).await;
    assert!(matches!(
        second,
        Err(PeerlinkError::Session(SessionError::NotReady { .. }))
    ));
    assert_eq!(env.hub.history().len(), offers_before);
}

#[tokio::test]
async fn test_not_accepting_ignores_offers() {
    let env = LoopbackEnvironment::default();
    let receiver = ready(&env, "AB12CD34").await;
    let caller = ready(&env, "caller-1").await;

    caller
        .start_call("AB12CD34", CallMetadata::default())
        .await
        .unwrap();

    assert!(!receiver.wait_until_connected(Duration::from_millis(200)).await);
    let session = receiver.session().await.unwrap();
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test]
async fn test_remote_stream_handler_receives_stream() {
    let env = LoopbackEnvironment::default();
    let receiver = ready(&env, "AB12CD34").await;
    receiver.accept_incoming_calls(true);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    receiver
        .set_remote_stream_handler(move |stream| {
            let _ = tx.send(stream.tracks().len());
        })
        .await;
    let caller = ready(&env, "caller-1").await;

    caller
        .start_call("AB12CD34", CallMetadata::default())
        .await
        .unwrap();

    let tracks = tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(tracks >= 1);
}

#[tokio::test]
async fn test_disconnect_hangs_up_peer() {
    let env = LoopbackEnvironment::default();
    let (caller, receiver) = connected(&env).await;
    let receiver_session = receiver.session().await.unwrap();

    caller.disconnect().await;

    assert!(!caller.is_ready());
    assert!(env.hub.history().iter().any(|signal| matches!(
        signal,
        OutboundSignal::HangUp { to, from } if to == "AB12CD34" && from == "caller-1"
    )));
    assert!(receiver_session.wait_for_state(SessionState::Closed, WAIT).await);
    assert!(!receiver.is_ready());

    // Idempotent
    caller.disconnect().await;
    assert!(caller.session().await.is_none());
}

#[tokio::test]
async fn test_reinitialize_after_disconnect() {
    let env = LoopbackEnvironment::default();
    let orchestrator = ready(&env, "AB12CD34").await;
    let first = orchestrator.session().await.unwrap();

    orchestrator.initialize("AB12CD34").await.unwrap();

    assert!(first.is_closed());
    assert!(orchestrator.is_ready());
    let second = orchestrator.session().await.unwrap();
    assert!(!second.is_closed());
}

#[tokio::test(start_paused = true)]
async fn test_switch_camera_rearms_monitor() {
    let env = LoopbackEnvironment::default();
    let (caller, _receiver) = connected(&env).await;
    let monitor = caller.health_monitor().await.unwrap();
    assert!(monitor.is_monitoring());

    let outcome = caller.switch_camera().await.unwrap();

    assert_eq!(outcome.device.label, "Front Camera");
    assert!(matches!(
        outcome.replaced,
        crate::peer::ReplaceOutcome::Replaced { .. }
    ));
    assert!(monitor.is_monitoring());
    assert_eq!(monitor.attempts(), 0);
    let session = caller.session().await.unwrap();
    assert_eq!(session.local_video_device().await.as_deref(), Some("virtual-0"));
}

#[tokio::test]
async fn test_send_text_reaches_peer() {
    let env = LoopbackEnvironment::default();
    let (caller, receiver) = connected(&env).await;
    let mut messages = receiver
        .context()
        .events
        .subscribe_filtered(EventFilter::EventTypes(vec!["data_channel_message"]), "test");

    // The channel opens right after the connection
    let mut sent = false;
    for _ in 0..50 {
        if caller.send_text("olá").await.is_ok() {
            sent = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(sent);

    let message = tokio::time::timeout(WAIT, messages.recv()).await.unwrap().unwrap();
    assert_eq!(
        message,
        PeerlinkEvent::DataChannelMessage {
            text: "olá".to_string()
        }
    );
}
