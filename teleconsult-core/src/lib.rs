//! # teleconsult-core
//!
//! Real-time peer session orchestration for live patient/provider
//! consultations.
//!
//! This crate contains:
//! - **Session**: `Session`, a single-writer actor owning the connection and
//!   signaling state machines, candidate buffering and event fan-out
//! - **Media**: `MediaPipeline` for profile-driven capture and camera/screen
//!   swapping over the `MediaDevices` seam
//! - **Quality**: `QualityMonitor`, fixed-threshold link classification and
//!   bitrate hints
//! - **Channel**: `SideChannel`, the ordered in-call message path
//! - **Probe**: `DeviceProbe` pre-flight diagnostics
//! - **Engine**: the `TransportEngine` seam and the in-process
//!   `LoopbackNetwork`
//! - **Signaling**: the `SignalingRelay` seam and `ChannelSignaling`
//! - **Error**: `ConsultError`, typed, `thiserror`-based error taxonomy

pub mod channel;
pub mod config;
pub mod engine;
pub mod error;
pub mod media;
pub mod probe;
pub mod quality;
pub mod session;
pub mod signaling;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use channel::{ChannelCounters, ChannelMessage, ChannelState, Envelope, SideChannel};
pub use config::{BundlePolicy, DataChannelConfig, IceServer, SessionConfig};
pub use engine::{
    EngineError, EngineEvent, EngineFactory, IceCandidate, IceState, LinkConditions,
    LoopbackFactory, LoopbackNetwork, SdpKind, SessionDescription, TransportEngine,
    TransportState,
};
pub use error::ConsultError;
pub use media::{
    DeviceError, DeviceKinds, MediaBundle, MediaDevices, MediaKind, MediaPipeline, MediaProfile,
    MediaTrack, NetworkHint, SyntheticDevices, TrackSource,
};
pub use probe::{DeviceProbe, SelfTestReport};
pub use quality::{QualityAssessment, QualityLevel, QualityMonitor, QualityUpdate};
pub use session::{EventReceiver, Session, SessionEvent, SessionInfo};
pub use signaling::{ChannelSignaling, SignalEndpoint, SignalMessage, SignalingRelay};
pub use state::{ConnectionState, Role, SignalingState};
