use thiserror::Error;

#[derive(Error, Debug)]
pub enum PeerlinkError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Signaling error: {0}")]
    Signaling(#[from] SignalingError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Camera recovery exhausted after {attempts} attempts")]
    RecoveryExhausted { attempts: u32 },

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

/// Capture device failures. These are absorbed locally wherever possible:
/// the session keeps running audio/text-only.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DeviceError {
    #[error("Permission denied for capture device{}", device.as_ref().map(|d| format!(" {}", d)).unwrap_or_default())]
    PermissionDenied { device: Option<String> },

    #[error("Device enumeration failed: {details}")]
    Enumeration { details: String },

    #[error("Camera switching needs at least 2 devices, found {count}")]
    InsufficientDevices { count: usize },

    #[error("Capture device {device} not found")]
    NotFound { device: String },

    #[error("Failed to acquire stream from {device}: {details}")]
    Acquisition { device: String, details: String },

    #[error("Another camera switch is already in progress")]
    SwitchInProgress,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Not ready to start a call: {reason}")]
    NotReady { reason: String },

    #[error("Negotiation failed: {details}")]
    Negotiation { details: String },

    #[error("Operation {operation} is not valid in state {state}")]
    InvalidState { state: String, operation: String },

    #[error("Session is closed")]
    Closed,

    #[error("Transport error: {details}")]
    Transport { details: String },

    #[error("Data channel error: {details}")]
    DataChannel { details: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SignalingError {
    #[error("Request to {endpoint} failed: {details}")]
    Request { endpoint: String, details: String },

    #[error("Request to {endpoint} returned status {status}")]
    Status { endpoint: String, status: u16 },

    #[error("Invalid response from {endpoint}: {details}")]
    Decode { endpoint: String, details: String },

    #[error("Signaling channel closed")]
    ChannelClosed,

    #[error("Unknown peer {id}")]
    UnknownPeer { id: String },

    #[error("Wake notification failed: {details}")]
    WakeFailed { details: String },

    #[error("Operation cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

impl PeerlinkError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<C: Into<String>, M: Into<String>>(component: C, message: M) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Whether a retry (by whoever owns the failed operation) can succeed.
    pub fn is_recoverable(&self) -> bool {
        match self {
            PeerlinkError::Config(_) => false,
            PeerlinkError::Io(_) => true,
            PeerlinkError::Device(DeviceError::InsufficientDevices { .. }) => false,
            PeerlinkError::Device(_) => true,
            PeerlinkError::Session(SessionError::Closed) => false,
            PeerlinkError::Session(_) => true,
            PeerlinkError::Signaling(SignalingError::Cancelled) => false,
            PeerlinkError::Signaling(SignalingError::WakeFailed { .. }) => false,
            PeerlinkError::Signaling(_) => true,
            PeerlinkError::EventBus(_) => true,
            PeerlinkError::RecoveryExhausted { .. } => false,
            PeerlinkError::System { .. } => false,
            PeerlinkError::Component { .. } => true,
        }
    }
}

pub type Result<T> = std::result::Result<T, PeerlinkError>;
