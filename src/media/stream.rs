use super::{TrackKind, TrackState};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

struct TrackInner {
    id: String,
    kind: TrackKind,
    device_id: Option<String>,
    ended: AtomicBool,
    activity: watch::Sender<u64>,
}

/// Handle to a single audio or video track.
///
/// Clones share the same underlying track; the peer connection's senders
/// hold clones while the owning [`MediaStream`] decides when to stop it.
#[derive(Clone)]
pub struct MediaTrack {
    inner: Arc<TrackInner>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, device_id: Option<String>) -> Self {
        let (activity, _) = watch::channel(0);
        Self {
            inner: Arc::new(TrackInner {
                id: Uuid::new_v4().to_string(),
                kind,
                device_id,
                ended: AtomicBool::new(false),
                activity,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn kind(&self) -> TrackKind {
        self.inner.kind
    }

    pub fn device_id(&self) -> Option<&str> {
        self.inner.device_id.as_deref()
    }

    pub fn state(&self) -> TrackState {
        if self.inner.ended.load(Ordering::Acquire) {
            TrackState::Ended
        } else {
            TrackState::Live
        }
    }

    pub fn is_ended(&self) -> bool {
        self.state() == TrackState::Ended
    }

    /// Stop the track and release its device. Returns `false` if it had
    /// already ended.
    pub fn stop(&self) -> bool {
        let stopped = !self.inner.ended.swap(true, Ordering::AcqRel);
        if stopped {
            debug!("Stopped {} track {}", self.kind().as_str(), self.id());
        }
        stopped
    }

    /// Record playback progress on the surface rendering this track
    pub fn report_activity(&self) {
        if self.is_ended() {
            return;
        }
        self.inner.activity.send_modify(|frames| *frames += 1);
    }

    /// Number of activity reports so far
    pub fn activity_count(&self) -> u64 {
        *self.inner.activity.borrow()
    }

    /// Read-only view that does not keep the track alive
    pub fn observer(&self) -> TrackObserver {
        TrackObserver {
            track: Arc::downgrade(&self.inner),
            activity: self.inner.activity.subscribe(),
        }
    }

    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("device_id", &self.inner.device_id)
            .field("state", &self.state())
            .finish()
    }
}

/// Non-owning observation of a local track, used by the health monitor
pub struct TrackObserver {
    track: Weak<TrackInner>,
    activity: watch::Receiver<u64>,
}

impl TrackObserver {
    /// A dropped track reads as ended
    pub fn state(&self) -> TrackState {
        match self.track.upgrade() {
            Some(inner) if !inner.ended.load(Ordering::Acquire) => TrackState::Live,
            _ => TrackState::Ended,
        }
    }

    /// Wait for the next activity report. Errors once the track is gone.
    pub async fn activity_changed(&mut self) -> Result<(), watch::error::RecvError> {
        self.activity.changed().await
    }
}

/// Locally captured stream. Not `Clone`: exactly one owner at a time.
#[derive(Debug)]
pub struct MediaStream {
    id: String,
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn video_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Video)
    }

    pub fn audio_track(&self) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == TrackKind::Audio)
    }

    pub fn has_video(&self) -> bool {
        self.video_track().is_some()
    }

    /// Stop every track; returns how many were still live
    pub fn stop(&self) -> usize {
        self.tracks.iter().filter(|t| t.stop()).count()
    }
}

/// Stream assembled from tracks arriving from the remote peer.
/// The session keeps a reference but never stops these tracks.
#[derive(Debug, Clone)]
pub struct RemoteStream {
    id: String,
    tracks: Arc<parking_lot::RwLock<Vec<MediaTrack>>>,
}

impl RemoteStream {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tracks: Arc::new(parking_lot::RwLock::new(Vec::new())),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> Vec<MediaTrack> {
        self.tracks.read().clone()
    }

    pub(crate) fn add_track(&self, track: MediaTrack) {
        let mut tracks = self.tracks.write();
        if !tracks.iter().any(|t| t.same_track(&track)) {
            tracks.push(track);
        }
    }
}

impl Default for RemoteStream {
    fn default() -> Self {
        Self::new()
    }
}
