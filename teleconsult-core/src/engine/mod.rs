//! # Transport engine seam
//!
//! The orchestrator drives packet-level media transport through the narrow
//! [`TransportEngine`] interface and observes it through a queue of raw
//! [`EngineEvent`]s. Nothing above this module knows how media is encoded,
//! encrypted or delivered.
//!
//! ```text
//!            Session actor
//!   commands ──►  │  ◄── EngineEvent (unbounded mpsc)
//!                 ▼
//!         Arc<dyn TransportEngine>
//! ```
//!
//! [`loopback`] provides an in-process two-peer implementation used by the
//! self-test agent and the test suite.

pub mod loopback;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::{DataChannelConfig, SessionConfig};
use crate::error::ConsultError;
use crate::media::{MediaKind, MediaTrack};
use crate::quality::StatisticsSnapshot;

pub use loopback::{LinkConditions, LoopbackEngine, LoopbackFactory, LoopbackNetwork};

// ── Negotiation payloads ─────────────────────────────────────────

/// Offer or answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Opaque session-description payload exchanged once per negotiation round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A discovered network path fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default)]
    pub sdp_m_line_index: Option<u16>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_m_line_index: Some(0),
        }
    }
}

// ── Raw engine state ─────────────────────────────────────────────

/// Aggregate transport connection state as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// ICE agent state, surfaced to the application as-is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IceState {
    #[default]
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for IceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::New => "new",
            Self::Checking => "checking",
            Self::Connected => "connected",
            Self::Completed => "completed",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A track the remote party is sending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoteTrackInfo {
    pub track_id: String,
    pub kind: MediaKind,
}

/// Raw notifications from the engine to its owning session.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    ConnectionState(TransportState),
    IceState(IceState),
    LocalCandidate(IceCandidate),
    RemoteTrack(RemoteTrackInfo),
    DataChannelOpen(String),
    DataChannelMessage { label: String, data: Bytes },
    DataChannelClosed(String),
    NegotiationNeeded,
}

pub type EngineEventSender = mpsc::UnboundedSender<EngineEvent>;
pub type EngineEventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

// ── Errors ───────────────────────────────────────────────────────

/// An error reported by the transport engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

impl From<EngineError> for ConsultError {
    fn from(e: EngineError) -> Self {
        ConsultError::Engine(e.0)
    }
}

// ── Traits ───────────────────────────────────────────────────────

/// Control interface onto the platform's media transport.
#[async_trait]
pub trait TransportEngine: Send + Sync {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError>;

    /// Create an answer to the currently applied remote offer.
    async fn create_answer(&self) -> Result<SessionDescription, EngineError>;

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), EngineError>;

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), EngineError>;

    /// Only called once a remote description is in place.
    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), EngineError>;

    async fn add_track(&self, track: &MediaTrack) -> Result<(), EngineError>;

    async fn remove_track(&self, track_id: &str) -> Result<(), EngineError>;

    /// Whether [`replace_track`](Self::replace_track) can swap a sender's
    /// track without renegotiation.
    fn supports_replace_track(&self) -> bool;

    /// Swap the outgoing track of the same kind in place.
    async fn replace_track(&self, track: &MediaTrack) -> Result<(), EngineError>;

    async fn create_data_channel(&self, config: &DataChannelConfig) -> Result<(), EngineError>;

    async fn send_data(&self, label: &str, data: Bytes) -> Result<(), EngineError>;

    /// Cap the encoder bitrate for outgoing media of `kind`.
    async fn set_max_bitrate(&self, kind: MediaKind, bits_per_second: u64) -> Result<(), EngineError>;

    async fn stats(&self) -> Result<StatisticsSnapshot, EngineError>;

    /// Tear the transport down. Must be idempotent.
    async fn close(&self);
}

/// Builds one engine per session.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn create(
        &self,
        config: &SessionConfig,
        events: EngineEventSender,
    ) -> Result<Arc<dyn TransportEngine>, EngineError>;
}
