//! # Side-channel messenger
//!
//! An ordered message path riding alongside the media session. Outbound
//! messages go through a queue drained by a single writer task, so the
//! order of `send` calls is the order on the wire.
//!
//! ```text
//!  send() ──► out queue ──► writer task ──► engine.send_data()
//!  engine DataChannelMessage ──► session actor ──► deliver() ──► handlers
//! ```
//!
//! `send` never blocks and never retries: it returns `false` when the channel
//! is not open, and `true` only means the message was handed to the writer.

pub mod message;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::TransportEngine;

pub use message::{ChannelMessage, Envelope};

type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync + 'static>;

/// Lifecycle of the side channel. Follows the session: opens once the
/// session is connected, closes with it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    #[default]
    Connecting,
    Open,
    Closed,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Sent/received message counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelCounters {
    pub sent: u64,
    pub received: u64,
    pub dropped_inbound: u64,
}

struct Inner {
    state: ChannelState,
    label: String,
    outbound: Option<mpsc::UnboundedSender<Bytes>>,
    handlers: Vec<MessageHandler>,
}

/// Cloneable handle onto a session's side channel.
#[derive(Clone)]
pub struct SideChannel {
    inner: Arc<Mutex<Inner>>,
    next_seq: Arc<AtomicU64>,
    sent: Arc<AtomicU64>,
    received: Arc<AtomicU64>,
    dropped: Arc<AtomicU64>,
}

impl fmt::Debug for SideChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("SideChannel")
            .field("label", &inner.label)
            .field("state", &inner.state)
            .field("handlers", &inner.handlers.len())
            .finish()
    }
}

impl SideChannel {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ChannelState::Connecting,
                label: label.into(),
                outbound: None,
                handlers: Vec::new(),
            })),
            next_seq: Arc::new(AtomicU64::new(1)),
            sent: Arc::new(AtomicU64::new(0)),
            received: Arc::new(AtomicU64::new(0)),
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn label(&self) -> String {
        self.lock().label.clone()
    }

    pub fn state(&self) -> ChannelState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn counters(&self) -> ChannelCounters {
        ChannelCounters {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            dropped_inbound: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Queue `message` for the peer.
    ///
    /// Returns `false` without side effects if the channel is not open.
    pub fn send(&self, message: ChannelMessage) -> bool {
        let inner = self.lock();
        if inner.state != ChannelState::Open {
            debug!(kind = message.kind(), state = %inner.state, "side channel not open, message not sent");
            return false;
        }
        let Some(outbound) = &inner.outbound else {
            return false;
        };

        let envelope = Envelope {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            message,
        };
        let data = match envelope.encode() {
            Ok(data) => data,
            Err(e) => {
                warn!("side channel encode failed: {e}");
                return false;
            }
        };
        if outbound.send(Bytes::from(data)).is_err() {
            return false;
        }
        self.sent.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Register a handler for inbound messages, called in peer send order.
    pub fn on_message<F>(&self, handler: F)
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        if inner.state == ChannelState::Closed {
            return;
        }
        inner.handlers.push(Arc::new(handler));
    }

    // ── Session-side plumbing ────────────────────────────────────

    /// Bind the channel to an engine and spawn its writer task.
    ///
    /// The writer exits when `cancel` fires or the channel is closed.
    pub(crate) fn attach(
        &self,
        engine: Arc<dyn TransportEngine>,
        label: &str,
        cancel: CancellationToken,
    ) {
        let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
        let label = label.to_string();
        {
            let mut inner = self.lock();
            inner.outbound = Some(tx);
            inner.label = label.clone();
        }

        tokio::spawn(async move {
            loop {
                let data = tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = rx.recv() => match next {
                        Some(data) => data,
                        None => break,
                    },
                };
                if let Err(e) = engine.send_data(&label, data).await {
                    warn!(channel = %label, "side channel send failed: {e}");
                }
            }
            debug!(channel = %label, "side channel writer stopped");
        });
    }

    /// Returns `true` if the state changed.
    pub(crate) fn mark_open(&self) -> bool {
        self.transition(ChannelState::Open)
    }

    /// The transport closed the channel. It may reopen on reconnect.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut inner = self.lock();
        if inner.state != ChannelState::Open {
            return false;
        }
        inner.state = ChannelState::Connecting;
        true
    }

    /// Terminal close: drop the writer queue and every handler.
    pub(crate) fn close(&self) -> bool {
        let mut inner = self.lock();
        if inner.state == ChannelState::Closed {
            return false;
        }
        inner.state = ChannelState::Closed;
        inner.outbound = None;
        inner.handlers.clear();
        true
    }

    /// Decode an inbound payload and dispatch it to the handlers.
    ///
    /// Undecodable payloads are logged and dropped.
    pub(crate) fn deliver(&self, data: &[u8]) -> Option<Envelope> {
        let envelope = match Envelope::decode(data) {
            Ok(env) => env,
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("dropping undecodable side channel message: {e}");
                return None;
            }
        };
        // Handlers run unlocked so they may call `send`.
        let handlers = {
            let inner = self.lock();
            if inner.state == ChannelState::Closed {
                return None;
            }
            inner.handlers.clone()
        };
        self.received.fetch_add(1, Ordering::Relaxed);
        for handler in &handlers {
            handler(&envelope);
        }
        Some(envelope)
    }

    fn transition(&self, next: ChannelState) -> bool {
        let mut inner = self.lock();
        if inner.state == ChannelState::Closed || inner.state == next {
            return false;
        }
        inner.state = next;
        true
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn send_before_open_returns_false() {
        let channel = SideChannel::new("consult");
        assert_eq!(channel.state(), ChannelState::Connecting);
        assert!(!channel.send(ChannelMessage::chat("too early")));
        assert_eq!(channel.counters().sent, 0);
    }

    #[test]
    fn handlers_see_inbound_in_order() {
        let channel = SideChannel::new("consult");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        channel.on_message(move |env| sink.lock().unwrap().push(env.seq));

        for seq in [1u64, 2, 3] {
            let env = Envelope {
                seq,
                message: ChannelMessage::Typing { active: true },
            };
            channel.deliver(&env.encode().unwrap()).unwrap();
        }
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(channel.counters().received, 3);
    }

    #[test]
    fn garbage_is_dropped_and_counted() {
        let channel = SideChannel::new("consult");
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        channel.on_message(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(channel.deliver(b"not json").is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(channel.counters().dropped_inbound, 1);
    }

    #[test]
    fn close_is_terminal() {
        let channel = SideChannel::new("consult");
        assert!(channel.mark_open());
        assert!(!channel.mark_open());
        assert!(channel.close());
        assert!(!channel.close());
        assert!(!channel.mark_open());
        assert!(!channel.send(ChannelMessage::chat("late")));

        let env = Envelope {
            seq: 1,
            message: ChannelMessage::chat("late"),
        };
        assert!(channel.deliver(&env.encode().unwrap()).is_none());
    }

    #[test]
    fn transport_close_allows_reopen() {
        let channel = SideChannel::new("consult");
        channel.mark_open();
        assert!(channel.mark_closed());
        assert_eq!(channel.state(), ChannelState::Connecting);
        assert!(channel.mark_open());
    }
}
