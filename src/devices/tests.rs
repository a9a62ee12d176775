use super::*;
use crate::environment::LoopbackEnvironment;
use crate::error::{DeviceError, PeerlinkError, SessionError};
use crate::events::{EventFilter, PeerlinkEvent};
use crate::media::{Device, MediaDevices, TrackKind, VirtualMediaDevices};
use crate::peer::{PeerSession, ReplaceOutcome};
use std::sync::Arc;
use std::time::Duration;

const VALIDITY: Duration = Duration::from_secs(30);

fn registry_for(media: &VirtualMediaDevices) -> DeviceRegistry {
    DeviceRegistry::new(Arc::new(media.clone()), VALIDITY)
}

fn labels(snapshot: &DeviceSnapshot) -> Vec<String> {
    snapshot
        .devices()
        .iter()
        .map(|r| r.device.label.clone())
        .collect()
}

#[test]
fn test_score_rules() {
    assert_eq!(score_label("Back Camera"), 90);
    assert_eq!(score_label("camera2 1, facing back"), 90);
    assert_eq!(score_label("Back Ultra Wide Camera"), 60);
    assert_eq!(score_label("Front Camera"), 80);
    assert_eq!(score_label("FaceTime HD (Selfie)"), 80);
    assert_eq!(score_label("Front Wide"), 80);
    assert_eq!(score_label("Wide Angle"), 60);
    assert_eq!(score_label("USB Webcam"), BASE_SCORE);
}

#[test]
fn test_rank_is_total_and_stable() {
    let devices = vec![
        Device::new("a", "USB Webcam"),
        Device::new("b", "Front Camera"),
        Device::new("c", "Ultra Wide"),
        Device::new("d", "Back Camera"),
        Device::new("e", "Capture Card"),
        Device::new("f", "Selfie Cam"),
    ];

    let ranked = rank_devices(devices);
    let ids: Vec<&str> = ranked.iter().map(|r| r.device.id.as_str()).collect();
    assert_eq!(ids, vec!["d", "b", "f", "c", "a", "e"]);
    assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_cached_within_validity() {
    let media = VirtualMediaDevices::from_labels(&["Front Camera", "Back Camera"]);
    let registry = registry_for(&media);

    let first = registry.ranked_devices().await.unwrap();
    let second = registry.ranked_devices().await.unwrap();
    assert_eq!(media.enumeration_count(), 1);
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(labels(&first), vec!["Back Camera", "Front Camera"]);

    tokio::time::advance(Duration::from_secs(31)).await;

    let third = registry.ranked_devices().await.unwrap();
    assert_eq!(media.enumeration_count(), 2);
    assert!(!Arc::ptr_eq(&first, &third));
    // The earlier snapshot is untouched by the refresh
    assert_eq!(first.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_builds_new_snapshot() {
    let media = VirtualMediaDevices::from_labels(&["Front Camera", "Back Camera"]);
    let registry = registry_for(&media);
    let before = registry.ranked_devices().await.unwrap();

    media.set_devices(vec![Device::new("x", "USB Webcam")]);
    registry.invalidate().await;
    let after = registry.ranked_devices().await.unwrap();

    assert_eq!(labels(&before), vec!["Back Camera", "Front Camera"]);
    assert_eq!(labels(&after), vec!["USB Webcam"]);
}

#[tokio::test]
async fn test_next_device_is_cyclic() {
    let media = VirtualMediaDevices::from_labels(&["USB Webcam", "Front Camera", "Back Camera"]);
    let registry = registry_for(&media);
    let snapshot = registry.ranked_devices().await.unwrap();

    let start = snapshot.get(0).cloned().unwrap();
    let mut current = start.id.clone();
    let mut visited = Vec::new();
    for _ in 0..snapshot.len() {
        let next = registry.next_device(Some(&current)).await.unwrap();
        visited.push(next.label.clone());
        current = next.id;
    }

    assert_eq!(current, start.id);
    assert_eq!(visited, vec!["Front Camera", "USB Webcam", "Back Camera"]);
}

#[tokio::test]
async fn test_next_device_without_current_starts_at_top() {
    let media = VirtualMediaDevices::from_labels(&["Front Camera", "Back Camera"]);
    let registry = registry_for(&media);

    assert_eq!(registry.next_device(None).await.unwrap().label, "Back Camera");
    assert_eq!(
        registry.next_device(Some("unplugged")).await.unwrap().label,
        "Back Camera"
    );
}

#[tokio::test]
async fn test_next_device_needs_two_devices() {
    let media = VirtualMediaDevices::from_labels(&["Front Camera"]);
    let registry = registry_for(&media);

    assert!(matches!(
        registry.next_device(None).await,
        Err(DeviceError::InsufficientDevices { count: 1 })
    ));
}

#[tokio::test]
async fn test_enumeration_denied() {
    let media = VirtualMediaDevices::from_labels(&["Front Camera"]);
    media.set_deny_enumeration(true);
    let registry = registry_for(&media);

    assert!(matches!(
        registry.list_devices().await,
        Err(DeviceError::Enumeration { .. })
    ));
    assert!(matches!(
        registry.ranked_devices().await,
        Err(DeviceError::Enumeration { .. })
    ));
}

fn switcher_for(media: &VirtualMediaDevices) -> (Arc<CameraSwitcher>, PeerSession, crate::context::SessionContext) {
    let env = LoopbackEnvironment::default();
    let ctx = env.participant(media.clone());
    let session = PeerSession::new(&ctx);
    let registry = Arc::new(DeviceRegistry::new(Arc::clone(&ctx.media), VALIDITY));
    let switcher = Arc::new(CameraSwitcher::new(&ctx, registry, session.clone()));
    (switcher, session, ctx)
}

#[tokio::test(start_paused = true)]
async fn test_acquire_preferred_uses_best_camera() {
    let media = VirtualMediaDevices::from_labels(&["Front Camera", "Back Camera"]);
    let (switcher, _session, _ctx) = switcher_for(&media);

    let stream = switcher.acquire_preferred().await.unwrap();
    assert_eq!(stream.video_track().and_then(|t| t.device_id()), Some("virtual-1"));
    assert_eq!(switcher.active_device().as_deref(), Some("virtual-1"));
}

#[tokio::test(start_paused = true)]
async fn test_acquire_preferred_falls_back_to_audio() {
    let media = VirtualMediaDevices::from_labels(&["Back Camera"]);
    media.set_device_failing("virtual-0", true);
    let (switcher, _session, _ctx) = switcher_for(&media);

    let stream = switcher.acquire_preferred().await.unwrap();
    assert!(!stream.has_video());
    assert_eq!(stream.audio_track().map(|t| t.kind()), Some(TrackKind::Audio));
    assert_eq!(switcher.active_device(), None);
}

#[tokio::test(start_paused = true)]
async fn test_switch_attaches_next_camera() {
    let media = VirtualMediaDevices::from_labels(&["Front Camera", "Back Camera"]);
    let (switcher, session, ctx) = switcher_for(&media);
    let mut switched = ctx
        .events
        .subscribe_filtered(EventFilter::EventTypes(vec!["device_switched"]), "test");

    let initial = switcher.acquire_preferred().await.unwrap();
    let initial_video = initial.video_track().cloned().unwrap();
    session.attach_local_stream(initial).await.unwrap();

    let outcome = switcher.switch_to_next(SwitchTrigger::Manual).await.unwrap();

    assert_eq!(outcome.device.id, "virtual-0");
    assert_eq!(outcome.replaced, ReplaceOutcome::NotConnected);
    assert!(initial_video.is_ended());
    assert_eq!(session.local_video_device().await.as_deref(), Some("virtual-0"));
    assert_eq!(media.live_tracks().len(), 2);
    assert!(!switcher.is_switching());
    assert_eq!(
        switched.try_recv().unwrap(),
        Some(PeerlinkEvent::DeviceSwitched {
            device_id: "virtual-0".to_string(),
            label: "Front Camera".to_string(),
            trigger: SwitchTrigger::Manual,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_switch_is_rejected() {
    let media = VirtualMediaDevices::from_labels(&["Front Camera", "Back Camera", "Wide"])
        .with_acquire_delay(Duration::from_millis(200));
    let (switcher, session, _ctx) = switcher_for(&media);
    let initial = switcher.acquire_preferred().await.unwrap();
    session.attach_local_stream(initial).await.unwrap();
    let baseline = media.acquisition_count();

    let recovery = {
        let switcher = Arc::clone(&switcher);
        tokio::spawn(async move { switcher.switch_to_next(SwitchTrigger::Recovery).await })
    };
    tokio::task::yield_now().await;
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(switcher.is_switching());

    let manual = switcher.switch_to_next(SwitchTrigger::Manual).await;
    assert!(matches!(
        manual,
        Err(PeerlinkError::Device(DeviceError::SwitchInProgress))
    ));

    let recovered = recovery.await.unwrap().unwrap();
    assert_eq!(recovered.device.label, "Front Camera");
    assert_eq!(media.acquisition_count(), baseline + 1);
    assert_eq!(media.max_concurrent_acquisitions(), 1);
    assert!(!switcher.is_switching());
}

#[tokio::test(start_paused = true)]
async fn test_failed_acquisition_still_advances() {
    let media = VirtualMediaDevices::from_labels(&["Front Camera", "Back Camera", "USB Webcam"]);
    let (switcher, session, _ctx) = switcher_for(&media);
    let initial = switcher.acquire_preferred().await.unwrap();
    session.attach_local_stream(initial).await.unwrap();
    media.set_device_failing("virtual-0", true);

    let failed = switcher.switch_to_next(SwitchTrigger::Recovery).await;
    assert!(matches!(
        failed,
        Err(PeerlinkError::Device(DeviceError::Acquisition { .. }))
    ));
    assert_eq!(switcher.active_device().as_deref(), Some("virtual-0"));

    let outcome = switcher.switch_to_next(SwitchTrigger::Manual).await.unwrap();
    assert_eq!(outcome.device.label, "USB Webcam");
}

#[tokio::test(start_paused = true)]
async fn test_switch_after_close_acquires_nothing() {
    let media = VirtualMediaDevices::from_labels(&["Front Camera", "Back Camera"]);
    let (switcher, session, _ctx) = switcher_for(&media);
    session.close().await;

    let result = switcher.switch_to_next(SwitchTrigger::Manual).await;
    assert!(matches!(
        result,
        Err(PeerlinkError::Session(SessionError::Closed))
    ));
    assert_eq!(media.acquisition_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_close_during_settle_drops_switch() {
    let media = VirtualMediaDevices::from_labels(&["Front Camera", "Back Camera"]);
    let (switcher, session, _ctx) = switcher_for(&media);
    let initial = switcher.acquire_preferred().await.unwrap();
    session.attach_local_stream(initial).await.unwrap();
    let baseline = media.acquisition_count();

    let pending = {
        let switcher = Arc::clone(&switcher);
        tokio::spawn(async move { switcher.switch_to_next(SwitchTrigger::Recovery).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    session.close().await;

    assert!(matches!(
        pending.await.unwrap(),
        Err(PeerlinkError::Session(SessionError::Closed))
    ));
    assert_eq!(media.acquisition_count(), baseline);
    assert!(media.live_tracks().is_empty());
    assert!(media.enumerate().await.is_ok());
}
