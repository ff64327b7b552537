//! Per-session notification fan-out.
//!
//! Every subscriber gets its own unbounded queue. Once the hub is closed no
//! further event is delivered and every subscriber queue ends.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::trace;

use crate::channel::{ChannelState, Envelope};
use crate::engine::{IceCandidate, IceState, RemoteTrackInfo, SessionDescription};
use crate::error::ConsultError;
use crate::media::MediaTrack;
use crate::quality::QualityUpdate;
use crate::state::{ConnectionState, SignalingState};

/// Everything the application can observe about a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Initialized,
    /// Local capture is ready; the tracks are observation handles.
    LocalMediaReady(Vec<MediaTrack>),
    RemoteMediaReceived(RemoteTrackInfo),
    ConnectionStateChange(ConnectionState),
    IceStateChange(IceState),
    SignalingStateChange(SignalingState),
    /// A local candidate to forward when no relay is attached.
    IceCandidateGathered(IceCandidate),
    OfferCreated(SessionDescription),
    AnswerCreated(SessionDescription),
    /// The initiator should start a new offer round.
    RenegotiationNeeded,
    QualityUpdate(QualityUpdate),
    DataChannelMessage(Envelope),
    DataChannelStateChange(ChannelState),
    /// A failure that ends the session. Always followed by `Closed`.
    Error(ConsultError),
    Closed,
}

impl SessionEvent {
    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::LocalMediaReady(_) => "localMediaReady",
            Self::RemoteMediaReceived(_) => "remoteMediaReceived",
            Self::ConnectionStateChange(_) => "connectionStateChange",
            Self::IceStateChange(_) => "iceStateChange",
            Self::SignalingStateChange(_) => "signalingStateChange",
            Self::IceCandidateGathered(_) => "iceCandidateGathered",
            Self::OfferCreated(_) => "offerCreated",
            Self::AnswerCreated(_) => "answerCreated",
            Self::RenegotiationNeeded => "renegotiationNeeded",
            Self::QualityUpdate(_) => "qualityUpdate",
            Self::DataChannelMessage(_) => "dataChannelMessage",
            Self::DataChannelStateChange(_) => "dataChannelStateChange",
            Self::Error(_) => "error",
            Self::Closed => "closed",
        }
    }
}

pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

#[derive(Default)]
struct HubState {
    subscribers: Vec<mpsc::UnboundedSender<SessionEvent>>,
    closed: bool,
}

/// Observer list scoped to one session.
#[derive(Clone, Default)]
pub struct EventHub {
    state: Arc<Mutex<HubState>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new subscriber queue. After close it is already ended.
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        if !state.closed {
            state.subscribers.push(tx);
        }
        rx
    }

    /// Deliver to every live subscriber. Returns `false` once closed.
    pub fn emit(&self, event: SessionEvent) -> bool {
        let mut state = self.lock();
        if state.closed {
            trace!(event = event.name(), "event after close suppressed");
            return false;
        }
        state.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        true
    }

    /// Deliver `Closed` and end every subscriber queue.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        for tx in state.subscribers.drain(..) {
            let _ = tx.send(SessionEvent::Closed);
        }
        state.closed = true;
        true
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
