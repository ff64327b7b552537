//! Read-only session snapshot, republished after every mutation.

use std::fmt::Display;
use std::time::SystemTime;

use serde::{Serialize, Serializer};
use uuid::Uuid;

use crate::channel::ChannelState;
use crate::engine::IceState;
use crate::state::{ConnectionState, Role, SignalingState};

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    /// Unset until the first negotiation round picks a side.
    pub role: Option<Role>,
    #[serde(serialize_with = "as_display")]
    pub connection_state: ConnectionState,
    pub ice_state: IceState,
    pub signaling_state: SignalingState,
    /// A responder-side renegotiation waiting for the initiator's offer.
    pub renegotiation_pending: bool,
    pub channel_state: ChannelState,
    pub created_at: SystemTime,
    pub connected_at: Option<SystemTime>,
    pub closed_at: Option<SystemTime>,
}

impl SessionInfo {
    pub(crate) fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            role: None,
            connection_state: ConnectionState::New,
            ice_state: IceState::New,
            signaling_state: SignalingState::Stable,
            renegotiation_pending: false,
            channel_state: ChannelState::Connecting,
            created_at: SystemTime::now(),
            connected_at: None,
            closed_at: None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed_at.is_some()
    }
}

fn as_display<T: Display, S: Serializer>(value: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}
