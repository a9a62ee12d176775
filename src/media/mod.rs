mod stream;
mod virtual_devices;

pub use stream::{MediaStream, MediaTrack, RemoteStream, TrackObserver};
pub use virtual_devices::VirtualMediaDevices;

use crate::error::DeviceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Media kind carried by a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackKind {
    Audio,
    Video,
}

impl TrackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackKind::Audio => "audio",
            TrackKind::Video => "video",
        }
    }
}

/// Readiness of a capture track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackState {
    Live,
    Ended,
}

/// Placement hint parsed from a device label
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapabilityHint {
    Front,
    Back,
    Wide,
}

impl CapabilityHint {
    /// Best-effort keyword detection; labels are free text and vary by
    /// platform and locale.
    pub fn from_label(label: &str) -> Vec<CapabilityHint> {
        let label = label.to_lowercase();
        let mut hints = Vec::new();
        if label.contains("front") || label.contains("selfie") {
            hints.push(CapabilityHint::Front);
        }
        if label.contains("back") {
            hints.push(CapabilityHint::Back);
        }
        if label.contains("wide") || label.contains("ultra") {
            hints.push(CapabilityHint::Wide);
        }
        hints
    }
}

/// A video capture device as reported by enumeration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,
    pub label: String,
    pub hints: Vec<CapabilityHint>,
}

impl Device {
    pub fn new<I: Into<String>, L: Into<String>>(id: I, label: L) -> Self {
        let label = label.into();
        Self {
            id: id.into(),
            hints: CapabilityHint::from_label(&label),
            label,
        }
    }
}

/// What to capture when acquiring a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Video device to open; `None` requests audio only
    pub video_device: Option<String>,
    pub audio: bool,
}

impl StreamRequest {
    pub fn video_and_audio<S: Into<String>>(device_id: S) -> Self {
        Self {
            video_device: Some(device_id.into()),
            audio: true,
        }
    }

    pub fn audio_only() -> Self {
        Self {
            video_device: None,
            audio: true,
        }
    }
}

/// Platform capture capability: device enumeration and stream acquisition
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Enumerate video input devices in platform order
    async fn enumerate(&self) -> Result<Vec<Device>, DeviceError>;

    /// Open the requested devices and return a fresh stream
    async fn acquire(&self, request: &StreamRequest) -> Result<MediaStream, DeviceError>;
}
