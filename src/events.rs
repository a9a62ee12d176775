use crate::devices::SwitchTrigger;
use crate::error::EventBusError;
use crate::health::RecoveryReason;
use crate::peer::{DataChannelStatus, SessionState};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events published to the application layer (UI, translation, speech)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PeerlinkEvent {
    /// Peer session moved between lifecycle states
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// First track of the remote stream arrived
    RemoteStream { stream_id: String, track_count: usize },
    DataChannelStatusChanged { status: DataChannelStatus },
    /// Text received over the data channel
    DataChannelMessage { text: String },
    /// Language announced by the calling side
    CallerLanguage { code: String },
    /// A caller was already waiting when the receiver registered
    CallerWaiting { caller_id: String },
    /// Wake notification dispatched to an offline receiver
    WakeSent { receiver_id: String },
    DeviceSwitched {
        device_id: String,
        label: String,
        trigger: SwitchTrigger,
    },
    RecoveryStarted { reason: RecoveryReason, attempt: u32 },
    /// Automatic recovery gave up; a manual retry is required
    RecoveryExhausted { attempts: u32 },
    /// Error surfaced to the application
    Error { component: String, error: String },
}

impl PeerlinkEvent {
    pub fn error<C: Into<String>, E: ToString>(component: C, error: E) -> Self {
        PeerlinkEvent::Error {
            component: component.into(),
            error: error.to_string(),
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            PeerlinkEvent::StateChanged { from, to } => {
                format!("Session state {:?} -> {:?}", from, to)
            }
            PeerlinkEvent::RemoteStream {
                stream_id,
                track_count,
            } => format!("Remote stream {} ({} tracks)", stream_id, track_count),
            PeerlinkEvent::DataChannelStatusChanged { status } => {
                format!("Data channel {:?}", status)
            }
            PeerlinkEvent::DataChannelMessage { text } => {
                format!("Data channel message ({} bytes)", text.len())
            }
            PeerlinkEvent::CallerLanguage { code } => format!("Caller language: {}", code),
            PeerlinkEvent::CallerWaiting { caller_id } => {
                format!("Caller {} is waiting", caller_id)
            }
            PeerlinkEvent::WakeSent { receiver_id } => {
                format!("Wake notification sent to {}", receiver_id)
            }
            PeerlinkEvent::DeviceSwitched { label, trigger, .. } => {
                format!("Switched camera to {} ({:?})", label, trigger)
            }
            PeerlinkEvent::RecoveryStarted { reason, attempt } => {
                format!("Camera recovery attempt {} ({})", attempt, reason.as_str())
            }
            PeerlinkEvent::RecoveryExhausted { attempts } => {
                format!("Camera recovery exhausted after {} attempts", attempts)
            }
            PeerlinkEvent::Error { component, error } => {
                format!("Error in {}: {}", component, error)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            PeerlinkEvent::StateChanged { .. } => "state_changed",
            PeerlinkEvent::RemoteStream { .. } => "remote_stream",
            PeerlinkEvent::DataChannelStatusChanged { .. } => "data_channel_status",
            PeerlinkEvent::DataChannelMessage { .. } => "data_channel_message",
            PeerlinkEvent::CallerLanguage { .. } => "caller_language",
            PeerlinkEvent::CallerWaiting { .. } => "caller_waiting",
            PeerlinkEvent::WakeSent { .. } => "wake_sent",
            PeerlinkEvent::DeviceSwitched { .. } => "device_switched",
            PeerlinkEvent::RecoveryStarted { .. } => "recovery_started",
            PeerlinkEvent::RecoveryExhausted { .. } => "recovery_exhausted",
            PeerlinkEvent::Error { .. } => "error",
        }
    }
}

/// Broadcast event bus shared by every component of one participant
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<PeerlinkEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerlinkEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter applied on receive
    pub fn subscribe_filtered<S: Into<String>>(&self, filter: EventFilter, name: S) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.into())
    }

    /// Publish an event to all subscribers. Having no subscribers is not an
    /// error for the publisher; the count is returned for diagnostics.
    pub fn publish(&self, event: PeerlinkEvent) -> usize {
        match &event {
            PeerlinkEvent::Error { component, error } => {
                error!("Error in {}: {}", component, error);
            }
            PeerlinkEvent::RecoveryExhausted { attempts } => {
                warn!("Camera recovery exhausted after {} attempts", attempts);
            }
            PeerlinkEvent::StateChanged { .. } | PeerlinkEvent::DeviceSwitched { .. } => {
                info!("{}", event.description());
            }
            _ => debug!("Event: {}", event.description()),
        }

        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
    Custom(fn(&PeerlinkEvent) -> bool),
}

impl EventFilter {
    pub fn matches(&self, event: &PeerlinkEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<PeerlinkEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<PeerlinkEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next event that passes the filter
    pub async fn recv(&mut self) -> Result<PeerlinkEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<PeerlinkEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Drain everything currently queued that passes the filter
    pub fn drain(&mut self) -> Vec<PeerlinkEvent> {
        let mut events = Vec::new();
        while let Ok(Some(event)) = self.try_recv() {
            events.push(event);
        }
        events
    }
}
