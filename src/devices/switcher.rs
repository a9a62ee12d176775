use super::DeviceRegistry;
use crate::context::SessionContext;
use crate::error::{DeviceError, Result, SessionError};
use crate::events::{EventBus, PeerlinkEvent};
use crate::media::{Device, MediaDevices, MediaStream, StreamRequest};
use crate::peer::{PeerSession, ReplaceOutcome};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What asked for a camera switch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchTrigger {
    Manual,
    Recovery,
}

#[derive(Debug, Clone)]
pub struct SwitchOutcome {
    pub device: Device,
    pub replaced: ReplaceOutcome,
}

/// Open the best-ranked camera with audio, falling back to audio only when
/// no camera can be opened.
pub async fn acquire_preferred(
    registry: &DeviceRegistry,
    media: &dyn MediaDevices,
) -> std::result::Result<MediaStream, DeviceError> {
    match registry.preferred_device().await {
        Ok(Some(device)) => {
            match media
                .acquire(&StreamRequest::video_and_audio(device.id.clone()))
                .await
            {
                Ok(stream) => {
                    info!("Using camera '{}'", device.label);
                    return Ok(stream);
                }
                Err(e) => warn!("Camera '{}' unavailable: {}", device.label, e),
            }
        }
        Ok(None) => info!("No camera found, continuing with audio only"),
        Err(e) => warn!("Camera enumeration failed: {}", e),
    }

    media.acquire(&StreamRequest::audio_only()).await
}

/// Clears the in-flight marker when the switch ends, however it ends
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Moves the session's capture to another device.
///
/// Manual toggles and health-triggered recovery share this path. At most
/// one switch runs at a time; a concurrent request is rejected with
/// `SwitchInProgress` rather than queued.
pub struct CameraSwitcher {
    registry: Arc<DeviceRegistry>,
    media: Arc<dyn MediaDevices>,
    session: PeerSession,
    events: EventBus,
    settle_delay: Duration,
    in_flight: AtomicBool,
    active_device: Mutex<Option<String>>,
}

impl CameraSwitcher {
    pub fn new(ctx: &SessionContext, registry: Arc<DeviceRegistry>, session: PeerSession) -> Self {
        Self {
            registry,
            media: Arc::clone(&ctx.media),
            session,
            events: ctx.events.clone(),
            settle_delay: ctx.config.devices.settle_delay(),
            in_flight: AtomicBool::new(false),
            active_device: Mutex::new(None),
        }
    }

    pub fn active_device(&self) -> Option<String> {
        self.active_device.lock().clone()
    }

    pub fn is_switching(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    /// Open the best-ranked camera and remember it as the active device
    pub async fn acquire_preferred(&self) -> std::result::Result<MediaStream, DeviceError> {
        let stream = acquire_preferred(&self.registry, self.media.as_ref()).await?;
        if let Some(device_id) = stream.video_track().and_then(|t| t.device_id()) {
            *self.active_device.lock() = Some(device_id.to_string());
        }
        Ok(stream)
    }

    /// Switch to the device after the active one in ranked order.
    ///
    /// The old tracks are stopped and the device given time to settle before
    /// the new stream is acquired. The active device advances even when the
    /// acquisition fails, so the next attempt tries a different camera. A
    /// stream acquired after the session closed is stopped and dropped.
    pub async fn switch_to_next(&self, trigger: SwitchTrigger) -> Result<SwitchOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Rejecting {:?} switch, another switch is in flight", trigger);
            return Err(DeviceError::SwitchInProgress.into());
        }
        let _guard = InFlightGuard(&self.in_flight);

        if self.session.is_closed() {
            return Err(SessionError::Closed.into());
        }

        let current = match self.active_device() {
            Some(id) => Some(id),
            None => self.session.local_video_device().await,
        };
        let next = self.registry.next_device(current.as_deref()).await?;
        info!(
            "Switching camera ({:?}): {:?} -> '{}'",
            trigger, current, next.label
        );

        let stopped = self.session.stop_local_tracks().await;
        debug!("Stopped {} local tracks, settling for {:?}", stopped, self.settle_delay);

        let closed = self.session.closed_token();
        tokio::select! {
            _ = closed.cancelled() => return Err(SessionError::Closed.into()),
            _ = tokio::time::sleep(self.settle_delay) => {}
        }

        *self.active_device.lock() = Some(next.id.clone());

        let stream = self
            .media
            .acquire(&StreamRequest::video_and_audio(next.id.clone()))
            .await?;

        if self.session.is_closed() {
            stream.stop();
            debug!("Session closed during switch, dropping new stream");
            return Err(SessionError::Closed.into());
        }

        let tracks = stream.tracks().to_vec();
        self.session.attach_local_stream(stream).await?;

        let mut replaced = ReplaceOutcome::NotConnected;
        for track in tracks {
            if let ReplaceOutcome::Replaced { senders } =
                self.session.replace_outbound_track(track).await?
            {
                replaced = match replaced {
                    ReplaceOutcome::Replaced { senders: total } => ReplaceOutcome::Replaced {
                        senders: total + senders,
                    },
                    ReplaceOutcome::NotConnected => ReplaceOutcome::Replaced { senders },
                };
            }
        }

        self.events.publish(PeerlinkEvent::DeviceSwitched {
            device_id: next.id.clone(),
            label: next.label.clone(),
            trigger,
        });

        Ok(SwitchOutcome {
            device: next,
            replaced,
        })
    }
}
