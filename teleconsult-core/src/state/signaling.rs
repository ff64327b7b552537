//! Offer/answer bookkeeping and the role-based collision policy.
//!
//! Only the party that sent the first offer (the initiator) may ever start
//! another offer round. A responder that needs renegotiation records it as
//! pending and waits for the initiator's next offer.

use serde::{Deserialize, Serialize};

use crate::error::ConsultError;

/// Offer/answer state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalingState {
    #[default]
    Stable,
    HaveLocalOffer,
    Closed,
}

impl std::fmt::Display for SignalingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stable => write!(f, "stable"),
            Self::HaveLocalOffer => write!(f, "have-local-offer"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Which side of the first negotiation round this session played.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Initiator,
    Responder,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initiator => write!(f, "initiator"),
            Self::Responder => write!(f, "responder"),
        }
    }
}

/// Tracks signaling state, role and renegotiation debt for one session.
#[derive(Debug, Clone, Default)]
pub struct Negotiation {
    state: SignalingState,
    role: Option<Role>,
    remote_description_set: bool,
    completed_rounds: u32,
    pending_renegotiation: bool,
}

impl Negotiation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Whether a remote description has been applied at least once.
    /// Remote candidates are buffered until this is true.
    pub fn has_remote_description(&self) -> bool {
        self.remote_description_set
    }

    pub fn completed_rounds(&self) -> u32 {
        self.completed_rounds
    }

    /// Responder-side renegotiation waiting for the initiator.
    pub fn has_pending_renegotiation(&self) -> bool {
        self.pending_renegotiation
    }

    // ── Initiator round ──────────────────────────────────────────

    /// Validate that a local offer may be created now.
    pub fn check_offer(&self) -> Result<(), ConsultError> {
        match (self.state, self.role) {
            (SignalingState::Closed, _) => Err(ConsultError::Cancelled),
            (SignalingState::HaveLocalOffer, _) => Err(ConsultError::NegotiationFailure(
                "an offer is already outstanding".into(),
            )),
            (SignalingState::Stable, Some(Role::Responder)) => {
                Err(ConsultError::NegotiationFailure(
                    "only the initiator may start a negotiation round".into(),
                ))
            }
            (SignalingState::Stable, _) => Ok(()),
        }
    }

    /// The local offer has been applied. Returns `true` if the state changed.
    pub fn offer_applied(&mut self) -> bool {
        self.role = Some(Role::Initiator);
        let changed = self.state != SignalingState::HaveLocalOffer;
        self.state = SignalingState::HaveLocalOffer;
        changed
    }

    /// Validate that a remote answer may be applied now.
    pub fn check_remote_answer(&self) -> Result<(), ConsultError> {
        match self.state {
            SignalingState::HaveLocalOffer => Ok(()),
            SignalingState::Closed => Err(ConsultError::Cancelled),
            SignalingState::Stable => Err(ConsultError::NegotiationFailure(
                "no local offer awaiting an answer".into(),
            )),
        }
    }

    /// The remote answer has been applied; the initiator round is complete.
    pub fn remote_answer_applied(&mut self) {
        self.state = SignalingState::Stable;
        self.remote_description_set = true;
        self.completed_rounds += 1;
    }

    // ── Responder round ──────────────────────────────────────────

    /// Validate that a remote offer may be answered now.
    pub fn check_answer(&self) -> Result<(), ConsultError> {
        match (self.state, self.role) {
            (SignalingState::Closed, _) => Err(ConsultError::Cancelled),
            (SignalingState::HaveLocalOffer, _) => Err(ConsultError::NegotiationFailure(
                "cannot answer while our own offer is outstanding".into(),
            )),
            (SignalingState::Stable, Some(Role::Initiator)) => {
                Err(ConsultError::NegotiationFailure(
                    "the initiator does not accept offers".into(),
                ))
            }
            (SignalingState::Stable, _) => Ok(()),
        }
    }

    /// Remote offer applied and local answer created, atomically.
    pub fn answer_applied(&mut self) {
        self.role = Some(Role::Responder);
        self.state = SignalingState::Stable;
        self.remote_description_set = true;
        self.completed_rounds += 1;
        self.pending_renegotiation = false;
    }

    // ── Renegotiation ────────────────────────────────────────────

    /// The local side needs a new round. Returns `true` if the application
    /// should be told to create a new offer now.
    pub fn negotiation_needed(&mut self) -> bool {
        match self.role {
            Some(Role::Initiator) => self.state != SignalingState::Closed,
            Some(Role::Responder) => {
                self.pending_renegotiation = true;
                false
            }
            // Nothing negotiated yet: the first offer will carry it.
            None => false,
        }
    }

    /// Terminal. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if self.state == SignalingState::Closed {
            return false;
        }
        self.state = SignalingState::Closed;
        true
    }
}
