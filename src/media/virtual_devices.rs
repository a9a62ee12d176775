use super::{Device, MediaDevices, MediaStream, MediaTrack, StreamRequest, TrackKind};
use crate::error::DeviceError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// In-process capture backend with a fixed device list.
///
/// Used when no platform capture is available (tests, the CLI demo). It can
/// deny enumeration or permission, fail specific devices, delay
/// acquisition, and optionally drive playback activity on video tracks.
#[derive(Clone)]
pub struct VirtualMediaDevices {
    inner: Arc<VirtualInner>,
}

struct VirtualInner {
    devices: Mutex<Vec<Device>>,
    deny_enumeration: AtomicBool,
    deny_permission: AtomicBool,
    failing_devices: Mutex<HashSet<String>>,
    acquire_delay: Mutex<Duration>,
    frame_interval: Mutex<Option<Duration>>,
    enumerations: AtomicUsize,
    acquisitions: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    issued: Mutex<Vec<MediaTrack>>,
}

impl VirtualMediaDevices {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            inner: Arc::new(VirtualInner {
                devices: Mutex::new(devices),
                deny_enumeration: AtomicBool::new(false),
                deny_permission: AtomicBool::new(false),
                failing_devices: Mutex::new(HashSet::new()),
                acquire_delay: Mutex::new(Duration::ZERO),
                frame_interval: Mutex::new(None),
                enumerations: AtomicUsize::new(0),
                acquisitions: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                issued: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Devices get ids `virtual-0`, `virtual-1`, ... in label order
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let devices = labels
            .iter()
            .enumerate()
            .map(|(i, label)| Device::new(format!("virtual-{}", i), label.as_ref()))
            .collect();
        Self::new(devices)
    }

    pub fn with_acquire_delay(self, delay: Duration) -> Self {
        *self.inner.acquire_delay.lock() = delay;
        self
    }

    /// Report playback activity on every live video track at this rate
    pub fn with_frame_interval(self, frame_interval: Duration) -> Self {
        *self.inner.frame_interval.lock() = Some(frame_interval);
        self
    }

    pub fn set_devices(&self, devices: Vec<Device>) {
        *self.inner.devices.lock() = devices;
    }

    pub fn set_deny_enumeration(&self, deny: bool) {
        self.inner.deny_enumeration.store(deny, Ordering::Relaxed);
    }

    pub fn set_deny_permission(&self, deny: bool) {
        self.inner.deny_permission.store(deny, Ordering::Relaxed);
    }

    /// Make acquisition of a specific device fail (or succeed again)
    pub fn set_device_failing(&self, device_id: &str, failing: bool) {
        let mut failing_devices = self.inner.failing_devices.lock();
        if failing {
            failing_devices.insert(device_id.to_string());
        } else {
            failing_devices.remove(device_id);
        }
    }

    pub fn enumeration_count(&self) -> usize {
        self.inner.enumerations.load(Ordering::SeqCst)
    }

    pub fn acquisition_count(&self) -> usize {
        self.inner.acquisitions.load(Ordering::SeqCst)
    }

    /// Highest number of acquisitions that were ever running at once
    pub fn max_concurrent_acquisitions(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    /// Every track handed out so far, in acquisition order
    pub fn issued_tracks(&self) -> Vec<MediaTrack> {
        self.inner.issued.lock().clone()
    }

    /// Tracks that have not been stopped yet
    pub fn live_tracks(&self) -> Vec<MediaTrack> {
        self.inner
            .issued
            .lock()
            .iter()
            .filter(|t| !t.is_ended())
            .cloned()
            .collect()
    }

    async fn open(&self, request: &StreamRequest) -> Result<MediaStream, DeviceError> {
        let delay = *self.inner.acquire_delay.lock();
        if !delay.is_zero() {
            sleep(delay).await;
        }

        if self.inner.deny_permission.load(Ordering::Relaxed) {
            return Err(DeviceError::PermissionDenied {
                device: request.video_device.clone(),
            });
        }

        let mut tracks = Vec::new();

        if let Some(device_id) = &request.video_device {
            let known = self.inner.devices.lock().iter().any(|d| &d.id == device_id);
            if !known {
                return Err(DeviceError::NotFound {
                    device: device_id.clone(),
                });
            }
            if self.inner.failing_devices.lock().contains(device_id) {
                return Err(DeviceError::Acquisition {
                    device: device_id.clone(),
                    details: "device is busy or disconnected".to_string(),
                });
            }
            tracks.push(MediaTrack::new(TrackKind::Video, Some(device_id.clone())));
        }

        if request.audio {
            tracks.push(MediaTrack::new(TrackKind::Audio, None));
        }

        self.inner.issued.lock().extend(tracks.iter().cloned());

        if let Some(frame_interval) = *self.inner.frame_interval.lock() {
            for track in tracks.iter().filter(|t| t.kind() == TrackKind::Video) {
                spawn_frame_pump(track.clone(), frame_interval);
            }
        }

        Ok(MediaStream::new(tracks))
    }
}

fn spawn_frame_pump(track: MediaTrack, frame_interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        while !track.is_ended() {
            ticker.tick().await;
            track.report_activity();
            trace!("Virtual frame on track {}", track.id());
        }
        debug!("Virtual frame pump for track {} stopped", track.id());
    });
}

#[async_trait]
impl MediaDevices for VirtualMediaDevices {
    async fn enumerate(&self) -> Result<Vec<Device>, DeviceError> {
        self.inner.enumerations.fetch_add(1, Ordering::SeqCst);

        if self.inner.deny_enumeration.load(Ordering::Relaxed) {
            warn!("Virtual device enumeration denied");
            return Err(DeviceError::Enumeration {
                details: "enumeration denied by platform".to_string(),
            });
        }

        let devices = self.inner.devices.lock().clone();
        debug!("Enumerated {} virtual capture devices", devices.len());
        Ok(devices)
    }

    async fn acquire(&self, request: &StreamRequest) -> Result<MediaStream, DeviceError> {
        self.inner.acquisitions.fetch_add(1, Ordering::SeqCst);
        let now_in_flight = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner
            .max_in_flight
            .fetch_max(now_in_flight, Ordering::SeqCst);

        let result = self.open(request).await;
        self.inner.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &result {
            Ok(stream) => info!(
                "Acquired virtual stream {} ({} tracks, video device {:?})",
                stream.id(),
                stream.tracks().len(),
                request.video_device
            ),
            Err(e) => warn!("Virtual stream acquisition failed: {}", e),
        }

        result
    }
}
