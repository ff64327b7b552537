//! Signaling collaborator seam.
//!
//! The orchestrator never transports offers, answers or candidates itself. A
//! [`SignalingRelay`] delivers them to the remote party; inbound messages are
//! handed back to [`Session::handle_signal`](crate::Session::handle_signal).
//! Delivery is assumed exactly-once per logical message; deduplication is the
//! relay's job.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::engine::{IceCandidate, SessionDescription};
use crate::error::ConsultError;

/// One message on the signaling path.
///
/// ```text
/// {"kind":"offer","payload":{"type":"offer","sdp":"v=0..."}}
/// {"kind":"candidate","payload":{"candidate":"candidate:1 ...","sdpMid":"0","sdpMLineIndex":0}}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum SignalMessage {
    Offer(SessionDescription),
    Answer(SessionDescription),
    Candidate(IceCandidate),
}

impl SignalMessage {
    pub fn to_json(&self) -> Result<String, ConsultError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConsultError> {
        Ok(serde_json::from_str(raw)?)
    }
}

/// Carries signaling messages to the remote party.
#[async_trait]
pub trait SignalingRelay: Send + Sync {
    async fn send(&self, message: SignalMessage) -> Result<(), ConsultError>;
}

pub type SignalReceiver = mpsc::UnboundedReceiver<SignalMessage>;

/// In-process relay backed by an mpsc queue.
#[derive(Debug, Clone)]
pub struct ChannelSignaling {
    tx: mpsc::UnboundedSender<SignalMessage>,
}

impl ChannelSignaling {
    /// A relay and the receiving end of its queue.
    pub fn unbounded() -> (Self, SignalReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Two cross-wired endpoints: what `a` sends arrives in `b`'s inbox and
    /// the other way round.
    pub fn pair() -> (SignalEndpoint, SignalEndpoint) {
        let (to_b, b_inbox) = Self::unbounded();
        let (to_a, a_inbox) = Self::unbounded();
        (
            SignalEndpoint {
                relay: Arc::new(to_b),
                inbox: a_inbox,
            },
            SignalEndpoint {
                relay: Arc::new(to_a),
                inbox: b_inbox,
            },
        )
    }
}

#[async_trait]
impl SignalingRelay for ChannelSignaling {
    async fn send(&self, message: SignalMessage) -> Result<(), ConsultError> {
        self.tx.send(message)?;
        Ok(())
    }
}

/// One side of [`ChannelSignaling::pair`].
#[derive(Debug)]
pub struct SignalEndpoint {
    /// Outbound relay, to be attached to the local session.
    pub relay: Arc<ChannelSignaling>,
    /// Messages from the remote party.
    pub inbox: SignalReceiver,
}
