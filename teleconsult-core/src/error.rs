//! Error taxonomy for the session orchestrator.
//!
//! All fallible operations return `Result<T, ConsultError>`.
//! Variants map one-to-one onto the recovery policy the caller must apply:
//! fatal errors require a fresh [`Session`](crate::Session), everything else
//! can be retried or ignored.

use thiserror::Error;

use crate::media::{DeviceError, DeviceKinds};

/// The canonical error type for the orchestrator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConsultError {
    // ── Session Errors ───────────────────────────────────────────
    /// The transport engine could not be created or the configuration was
    /// rejected (`fatal`: the session is closed and unusable), or the
    /// session was already initialised (not fatal: the first
    /// initialisation stays in effect).
    #[error("session initialisation failed: {reason}")]
    InitFailure { reason: String, fatal: bool },

    /// An offer/answer step failed. The session stays open and the
    /// caller may retry the same step.
    #[error("negotiation failed: {0}")]
    NegotiationFailure(String),

    /// A remote ICE candidate could not be applied. Never session-ending.
    #[error("candidate rejected: {0}")]
    CandidateRejected(String),

    /// The operation raced with `close()` or was issued after it.
    #[error("operation cancelled: session closed")]
    Cancelled,

    /// The call is not valid in the session's current state.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    // ── Media Errors ─────────────────────────────────────────────
    /// Local capture could not be acquired.
    #[error("failed to acquire {devices}: {reason}")]
    AcquisitionFailure {
        devices: DeviceKinds,
        reason: DeviceError,
    },

    /// Screen capture could not be started; the prior video source is
    /// restored where possible.
    #[error("screen share failed: {0}")]
    ScreenShareFailure(DeviceError),

    /// The outgoing video track could not be swapped.
    #[error("video source replacement failed: {0}")]
    ReplaceFailure(String),

    // ── Plumbing Errors ──────────────────────────────────────────
    /// The session's command queue is gone.
    #[error("channel closed")]
    ChannelClosed,

    /// The underlying transport engine reported an error.
    #[error("transport engine error: {0}")]
    Engine(String),
}

impl ConsultError {
    /// Errors after which the session cannot be used any more.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::InitFailure { fatal: true, .. } | Self::ChannelClosed
        )
    }

    /// Errors the caller may retry (possibly with relaxed constraints).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::NegotiationFailure(_)
                | Self::AcquisitionFailure { .. }
                | Self::ScreenShareFailure(_)
                | Self::ReplaceFailure(_)
        )
    }

    /// A fatal initialisation failure.
    pub fn init(reason: impl Into<String>) -> Self {
        Self::InitFailure {
            reason: reason.into(),
            fatal: true,
        }
    }

    /// Rejection of a second `initialize` on a live session.
    pub fn already_initialized() -> Self {
        Self::InitFailure {
            reason: "session already initialized".into(),
            fatal: false,
        }
    }

    /// Shorthand for an acquisition failure on a single device class.
    pub fn acquisition(devices: DeviceKinds, reason: DeviceError) -> Self {
        Self::AcquisitionFailure { devices, reason }
    }
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ConsultError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ConsultError::ChannelClosed
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ConsultError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        ConsultError::ChannelClosed
    }
}

impl From<serde_json::Error> for ConsultError {
    fn from(e: serde_json::Error) -> Self {
        ConsultError::Engine(format!("encoding: {e}"))
    }
}
