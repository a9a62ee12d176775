pub mod call_flow;
pub mod config;
pub mod context;
pub mod demo;
pub mod devices;
pub mod environment;
pub mod error;
pub mod events;
pub mod health;
pub mod media;
pub mod orchestrator;
pub mod peer;
pub mod rendezvous;
pub mod signaling;

pub use call_flow::{
    derive_receiver_id, ephemeral_id, CallOutcome, CallTarget, CallerFlow, ReceiverFlow,
    ReceiverSession, ReceiverStatus,
};
pub use config::PeerlinkConfig;
pub use context::SessionContext;
pub use demo::{run_demo, DemoOptions, DemoReport};
pub use devices::{
    rank_devices, score_label, CameraSwitcher, DeviceRegistry, DeviceSnapshot, RankedDevice,
    SwitchOutcome, SwitchTrigger,
};
pub use environment::LoopbackEnvironment;
pub use error::{DeviceError, EventBusError, PeerlinkError, Result, SessionError, SignalingError};
pub use events::{EventBus, EventFilter, EventReceiver, PeerlinkEvent};
pub use health::{HealthMonitor, HealthState, RecoveryOutcome, RecoveryReason};
pub use media::{
    Device, MediaDevices, MediaStream, MediaTrack, RemoteStream, StreamRequest, TrackKind,
    TrackState, VirtualMediaDevices,
};
pub use orchestrator::ConnectionOrchestrator;
pub use peer::{
    CallMetadata, DataChannelStatus, LoopbackNetwork, PeerConnection, PeerConnectionFactory,
    PeerSession, ReplaceOutcome, Role, SessionState,
};
#[cfg(feature = "http")]
pub use rendezvous::HttpRendezvousClient;
pub use rendezvous::{
    CallRequest, InMemoryRendezvous, PushCredential, RendezvousService, WakeNotification,
    WakeNotifier, WantedStatus,
};
pub use signaling::{LocalSignalingHub, SignalingChannel};
