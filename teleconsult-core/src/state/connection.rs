//! Session connection state machine.
//!
//! Raw transport-engine notifications are folded into a `ConnectionState`
//! with validated transitions that return `Result` instead of panicking.

use std::time::Instant;

use crate::engine::TransportState;
use crate::error::ConsultError;

// ── ConnectionState ──────────────────────────────────────────────

/// The lifecycle phase of a session's media connection.
///
/// ```text
///  New ──► Connecting ──► Connected ──► Disconnected ◄──► Recovering
///                            ▲                                │
///                            └────────────────────────────────┘
///  (any non-closed) ──► Failed            (any) ──► Closed
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Created, transport not yet started.
    #[default]
    New,

    /// ICE/DTLS in progress for the first time.
    Connecting,

    /// Media is flowing.
    Connected {
        /// When the session (re-)entered `Connected`.
        since: Instant,
    },

    /// Connectivity lost; the transport may still recover on its own.
    Disconnected,

    /// Transport is re-checking paths after a disconnect.
    Recovering,

    /// Transport gave up. The session will be closed.
    Failed,

    /// Terminal.
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected { .. } => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Recovering => write!(f, "connecting-recovery"),
            Self::Failed => write!(f, "failed"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// How long the session has been in `Connected`.
    pub fn connected_duration(&self) -> Option<std::time::Duration> {
        match self {
            Self::Connected { since } => Some(since.elapsed()),
            _ => None,
        }
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Fold a raw transport notification into the session state.
    ///
    /// Returns `Ok(true)` if the state changed, `Ok(false)` for a redundant
    /// notification.
    pub fn apply(&mut self, raw: TransportState) -> Result<bool, ConsultError> {
        let next = match (&*self, raw) {
            (Self::Closed, _) => return Ok(false),
            (_, TransportState::Closed) => Self::Closed,
            (Self::Failed, _) => return Ok(false),
            (_, TransportState::Failed) => Self::Failed,

            (_, TransportState::New) => return Ok(false),

            (Self::New, TransportState::Connecting) => Self::Connecting,
            (Self::Disconnected, TransportState::Connecting) => Self::Recovering,
            (Self::Connecting | Self::Recovering, TransportState::Connecting) => return Ok(false),

            (
                Self::New | Self::Connecting | Self::Recovering | Self::Disconnected,
                TransportState::Connected,
            ) => Self::Connected {
                since: Instant::now(),
            },
            (Self::Connected { .. }, TransportState::Connected) => return Ok(false),

            (Self::Connected { .. } | Self::Recovering, TransportState::Disconnected) => {
                Self::Disconnected
            }
            (Self::Disconnected, TransportState::Disconnected) => return Ok(false),

            (Self::Connected { .. }, TransportState::Connecting) => {
                return Err(ConsultError::InvalidState(
                    "cannot re-enter connecting while connected",
                ));
            }
            (Self::New | Self::Connecting, TransportState::Disconnected) => {
                return Err(ConsultError::InvalidState(
                    "cannot disconnect before connecting",
                ));
            }
        };
        *self = next;
        Ok(true)
    }

    /// Force the terminal state. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if self.is_closed() {
            return false;
        }
        *self = Self::Closed;
        true
    }
}

// ── Tests ────────────────────────────────────────────────────────
