use super::scoring::{rank_devices, RankedDevice};
use crate::error::DeviceError;
use crate::media::{Device, MediaDevices};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

/// Immutable ranked enumeration result. A refresh always builds a new
/// snapshot; existing ones are never touched.
#[derive(Debug, Clone)]
pub struct DeviceSnapshot {
    devices: Vec<RankedDevice>,
    refreshed_at: Instant,
    validity: Duration,
}

impl DeviceSnapshot {
    pub fn devices(&self) -> &[RankedDevice] {
        &self.devices
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Device> {
        self.devices.get(index).map(|r| &r.device)
    }

    pub fn position(&self, device_id: &str) -> Option<usize> {
        self.devices.iter().position(|r| r.device.id == device_id)
    }

    pub fn refreshed_at(&self) -> Instant {
        self.refreshed_at
    }

    pub fn is_fresh(&self) -> bool {
        self.refreshed_at.elapsed() < self.validity
    }
}

/// Enumerates, ranks and caches capture devices
pub struct DeviceRegistry {
    source: Arc<dyn MediaDevices>,
    validity: Duration,
    cache: Mutex<Option<Arc<DeviceSnapshot>>>,
}

impl DeviceRegistry {
    pub fn new(source: Arc<dyn MediaDevices>, validity: Duration) -> Self {
        Self {
            source,
            validity,
            cache: Mutex::new(None),
        }
    }

    /// Raw enumeration in platform order, bypassing the cache
    pub async fn list_devices(&self) -> Result<Vec<Device>, DeviceError> {
        self.source.enumerate().await
    }

    /// Ranked devices, served from cache while the snapshot is fresh.
    ///
    /// Concurrent callers serialize on the cache lock, so a stale cache is
    /// refreshed by exactly one enumeration.
    pub async fn ranked_devices(&self) -> Result<Arc<DeviceSnapshot>, DeviceError> {
        let mut cache = self.cache.lock().await;

        if let Some(snapshot) = cache.as_ref() {
            if snapshot.is_fresh() {
                debug!("Using cached device snapshot ({} devices)", snapshot.len());
                return Ok(Arc::clone(snapshot));
            }
        }

        let devices = self.source.enumerate().await?;
        let snapshot = Arc::new(DeviceSnapshot {
            devices: rank_devices(devices),
            refreshed_at: Instant::now(),
            validity: self.validity,
        });

        info!(
            "Refreshed device snapshot: [{}]",
            snapshot
                .devices()
                .iter()
                .map(|r| format!("{} ({})", r.device.label, r.score))
                .collect::<Vec<_>>()
                .join(", ")
        );

        *cache = Some(Arc::clone(&snapshot));
        Ok(snapshot)
    }

    /// Device after `current` in ranked order, wrapping around. An unknown
    /// or absent current device yields the first ranked device.
    pub async fn next_device(&self, current: Option<&str>) -> Result<Device, DeviceError> {
        let snapshot = self.ranked_devices().await?;

        if snapshot.len() < 2 {
            return Err(DeviceError::InsufficientDevices {
                count: snapshot.len(),
            });
        }

        let next_index = match current.and_then(|id| snapshot.position(id)) {
            Some(index) => (index + 1) % snapshot.len(),
            None => 0,
        };

        snapshot
            .get(next_index)
            .cloned()
            .ok_or(DeviceError::InsufficientDevices {
                count: snapshot.len(),
            })
    }

    /// Highest-ranked device, if any
    pub async fn preferred_device(&self) -> Result<Option<Device>, DeviceError> {
        let snapshot = self.ranked_devices().await?;
        Ok(snapshot.get(0).cloned())
    }

    /// Drop the cached snapshot so the next lookup re-enumerates
    pub async fn invalidate(&self) {
        self.cache.lock().await.take();
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }
}
