//! Fully in-process wiring: loopback peer connections, a local signaling
//! hub and the in-memory rendezvous service shared by any number of
//! participants.

use crate::config::PeerlinkConfig;
use crate::context::SessionContext;
use crate::media::VirtualMediaDevices;
use crate::peer::LoopbackNetwork;
use crate::rendezvous::InMemoryRendezvous;
use crate::signaling::LocalSignalingHub;
use std::sync::Arc;

#[derive(Clone)]
pub struct LoopbackEnvironment {
    pub config: Arc<PeerlinkConfig>,
    pub hub: LocalSignalingHub,
    pub network: LoopbackNetwork,
    pub rendezvous: InMemoryRendezvous,
}

impl LoopbackEnvironment {
    pub fn new(config: PeerlinkConfig) -> Self {
        Self {
            config: Arc::new(config),
            hub: LocalSignalingHub::new(),
            network: LoopbackNetwork::new(),
            rendezvous: InMemoryRendezvous::new(),
        }
    }

    /// Context for one participant using `media` as its capture backend.
    /// Each participant gets its own event bus.
    pub fn participant(&self, media: VirtualMediaDevices) -> SessionContext {
        SessionContext::new(
            Arc::clone(&self.config),
            Arc::new(media),
            Arc::new(self.network.clone()),
            Arc::new(self.hub.clone()),
            Arc::new(self.rendezvous.clone()),
            Arc::new(self.rendezvous.clone()),
        )
    }

    /// Virtual capture backend exposing the configured device labels
    pub fn virtual_media(&self) -> VirtualMediaDevices {
        VirtualMediaDevices::from_labels(&self.config.devices.virtual_labels)
    }
}

impl Default for LoopbackEnvironment {
    fn default() -> Self {
        Self::new(PeerlinkConfig::default())
    }
}
