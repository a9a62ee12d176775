use crate::config::PeerlinkConfig;
use crate::events::EventBus;
use crate::media::MediaDevices;
use crate::peer::PeerConnectionFactory;
use crate::rendezvous::{RendezvousService, WakeNotifier};
use crate::signaling::SignalingChannel;
use std::sync::Arc;

/// Everything a participant's components need, handed to each constructor.
/// Cloning shares the same collaborators and event bus.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<PeerlinkConfig>,
    pub events: EventBus,
    pub media: Arc<dyn MediaDevices>,
    pub peers: Arc<dyn PeerConnectionFactory>,
    pub signaling: Arc<dyn SignalingChannel>,
    pub rendezvous: Arc<dyn RendezvousService>,
    pub wake: Arc<dyn WakeNotifier>,
}

impl SessionContext {
    pub fn new(
        config: Arc<PeerlinkConfig>,
        media: Arc<dyn MediaDevices>,
        peers: Arc<dyn PeerConnectionFactory>,
        signaling: Arc<dyn SignalingChannel>,
        rendezvous: Arc<dyn RendezvousService>,
        wake: Arc<dyn WakeNotifier>,
    ) -> Self {
        let events = EventBus::new(config.system.event_bus_capacity);
        Self {
            config,
            events,
            media,
            peers,
            signaling,
            rendezvous,
            wake,
        }
    }

    /// Share an existing event bus instead of the one created in `new`
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("subscribers", &self.events.subscriber_count())
            .finish_non_exhaustive()
    }
}
