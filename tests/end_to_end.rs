use peerlink::{
    CallTarget, CallerFlow, ConnectionOrchestrator, EventFilter, LoopbackEnvironment,
    PeerlinkEvent, PushCredential, ReceiverFlow, RendezvousService, SessionState,
    VirtualMediaDevices, WakeNotifier,
};
use std::time::Duration;

const RECEIVER_TOKEN: &str = "AB12CD34-fcm-token-0001";
const WAIT: Duration = Duration::from_secs(5);

fn cameras() -> VirtualMediaDevices {
    VirtualMediaDevices::from_labels(&["Front Camera", "Back Camera", "Back Ultra Wide Camera"])
        .with_frame_interval(Duration::from_millis(100))
}

#[tokio::test]
async fn receiver_online_caller_connects() {
    let env = LoopbackEnvironment::default();
    let receiver = ConnectionOrchestrator::new(env.participant(cameras()));
    let caller = ConnectionOrchestrator::new(env.participant(cameras()));
    let mut answered = receiver
        .context()
        .events
        .subscribe_filtered(EventFilter::EventTypes(vec!["state_changed"]), "receiver");

    let registered = ReceiverFlow::new(receiver.clone())
        .start(Some(RECEIVER_TOKEN))
        .await
        .unwrap();
    assert_eq!(registered.id(), "AB12CD34");

    let rendezvous = env.rendezvous.clone();
    assert!(rendezvous.is_online("AB12CD34").await.unwrap());

    let flow = CallerFlow::new(caller.clone());
    let outcome = flow.call(&CallTarget::new("AB12CD34")).await.unwrap();
    assert!(!outcome.woke_receiver);

    assert!(caller.wait_until_connected(WAIT).await);
    assert!(receiver.wait_until_connected(WAIT).await);

    // The receiver went through the callee side of the handshake
    let mut saw_callee = false;
    while let Ok(Some(event)) = answered.try_recv() {
        if let PeerlinkEvent::StateChanged { to, .. } = event {
            if to == SessionState::Negotiating(peerlink::Role::Callee) {
                saw_callee = true;
            }
        }
    }
    assert!(saw_callee);

    flow.teardown().await;
    registered.teardown().await;
    assert!(!env.rendezvous.is_registered("AB12CD34"));
}

#[tokio::test(start_paused = true)]
async fn offline_receiver_is_woken_and_call_completes() {
    let env = LoopbackEnvironment::default();
    let receiver = ConnectionOrchestrator::new(env.participant(cameras()));
    let caller = ConnectionOrchestrator::new(env.participant(cameras()));

    // Token left behind by an earlier receiver session
    env.rendezvous
        .register_token("AB12CD34", &PushCredential::fcm(RECEIVER_TOKEN))
        .await
        .unwrap();

    let mut wakes = env.rendezvous.subscribe_wakes();
    let receiver_flow = ReceiverFlow::new(receiver.clone());
    let woken = tokio::spawn(async move {
        let wake = wakes.recv().await.unwrap();
        assert_eq!(wake.receiver_id, "AB12CD34");
        // The device takes a moment to come up after the push arrives
        tokio::time::sleep(Duration::from_secs(4)).await;
        receiver_flow.start(Some(RECEIVER_TOKEN)).await
    });

    let flow = CallerFlow::new(caller.clone());
    let outcome = flow
        .call(&CallTarget::from_push_token(RECEIVER_TOKEN))
        .await
        .unwrap();
    assert!(outcome.woke_receiver);

    let session = woken.await.unwrap().unwrap();
    assert_eq!(
        session.status(),
        &peerlink::ReceiverStatus::CallerWaiting {
            caller_id: outcome.caller_id.clone()
        }
    );

    let sent = env.rendezvous.sent_wakes();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].caller_id, outcome.caller_id);
    assert_eq!(sent[0].caller_lang, "pt-BR");

    assert!(caller.wait_until_connected(WAIT).await);
    assert!(receiver.wait_until_connected(WAIT).await);
}
