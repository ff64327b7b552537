//! # Session manager
//!
//! A [`Session`] is a cheap, cloneable handle onto one session actor. Every
//! call is turned into a command on the actor's queue and answered over a
//! oneshot, so all session state has exactly one writer.
//!
//! | Module       | Purpose                                        |
//! |--------------|------------------------------------------------|
//! | `actor`      | Command processing and engine event handling   |
//! | `candidates` | Remote candidates waiting for a description    |
//! | `events`     | Per-session observer fan-out                   |
//! | `info`       | Watchable session snapshot                     |
//!
//! ## Lifecycle
//!
//! ```text
//!  new() ──► initialize() ──► acquire_local_media() ──► offer/answer ──► connected
//!                                                                           │
//!                                              close() / transport failed ◄─┘
//! ```
//!
//! `close()` is terminal: afterwards every call returns
//! [`ConsultError::Cancelled`] and no event is delivered after `Closed`.

mod actor;
pub mod candidates;
pub mod events;
pub mod info;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::channel::SideChannel;
use crate::config::DataChannelConfig;
use crate::config::SessionConfig;
use crate::engine::{EngineFactory, IceCandidate, SessionDescription};
use crate::error::ConsultError;
use crate::media::{MediaBundle, MediaDevices, MediaPipeline, MediaProfile, NetworkHint};
use crate::quality::{QualityAssessment, QualityMonitor};
use crate::signaling::{SignalMessage, SignalingRelay};

use actor::{ActorParts, Command, Reply, SessionActor};

pub use events::{EventHub, EventReceiver, SessionEvent};
pub use info::SessionInfo;

/// Depth of the command queue.
const COMMAND_QUEUE: usize = 100;

/// Handle onto one peer session.
///
/// Must be created inside a Tokio runtime. The session is torn down when
/// [`close`](Self::close) is called or when the last handle is dropped.
#[derive(Clone)]
pub struct Session {
    id: Uuid,
    commands: mpsc::Sender<Command>,
    cancel: CancellationToken,
    hub: EventHub,
    info: watch::Receiver<SessionInfo>,
    quality: watch::Receiver<QualityAssessment>,
    channel: SideChannel,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Session {
    pub fn new(factory: Arc<dyn EngineFactory>, devices: Arc<dyn MediaDevices>) -> Self {
        Self::with_pipeline(factory, MediaPipeline::new(devices), None)
    }

    /// A session that pushes offers, answers and local candidates through
    /// `relay`.
    pub fn with_signaling(
        factory: Arc<dyn EngineFactory>,
        devices: Arc<dyn MediaDevices>,
        relay: Arc<dyn SignalingRelay>,
    ) -> Self {
        Self::with_pipeline(factory, MediaPipeline::new(devices), Some(relay))
    }

    /// Full control over the media pipeline (preferred devices, audio
    /// processing).
    pub fn with_pipeline(
        factory: Arc<dyn EngineFactory>,
        pipeline: MediaPipeline,
        relay: Option<Arc<dyn SignalingRelay>>,
    ) -> Self {
        let id = Uuid::new_v4();
        let (commands, rx) = mpsc::channel(COMMAND_QUEUE);
        let (info_tx, info) = watch::channel(SessionInfo::new(id));
        let cancel = CancellationToken::new();
        let hub = EventHub::new();
        let channel = SideChannel::new(DataChannelConfig::default().label);
        let monitor = QualityMonitor::new();
        let quality = monitor.subscribe();

        let actor = SessionActor::new(ActorParts {
            id,
            factory,
            relay,
            pipeline,
            monitor,
            channel: channel.clone(),
            hub: hub.clone(),
            info_tx,
            cancel: cancel.clone(),
        });
        tokio::spawn(actor.run(rx));

        Self {
            id,
            commands,
            cancel,
            hub,
            info,
            quality,
            channel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Latest snapshot of the session's state.
    pub fn info(&self) -> SessionInfo {
        self.info.borrow().clone()
    }

    /// Watch the session snapshot for changes.
    pub fn watch_info(&self) -> watch::Receiver<SessionInfo> {
        self.info.clone()
    }

    /// A new notification queue. It ends after [`SessionEvent::Closed`].
    pub fn subscribe(&self) -> EventReceiver {
        self.hub.subscribe()
    }

    /// Last quality classification, `Unknown` everywhere before the first
    /// sample.
    pub fn current_assessment(&self) -> QualityAssessment {
        *self.quality.borrow()
    }

    pub fn side_channel(&self) -> &SideChannel {
        &self.channel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Create the transport engine. An engine or config failure closes the
    /// session and returns a fatal [`ConsultError::InitFailure`]. A second
    /// call returns a non-fatal one and leaves the session as it was.
    pub async fn initialize(&self, config: SessionConfig) -> Result<(), ConsultError> {
        self.request(|reply| Command::Initialize { config, reply })
            .await
    }

    /// Release everything and enter the terminal state. Safe to call
    /// repeatedly. In-flight operations resolve with `Cancelled`.
    pub async fn close(&self) {
        self.cancel.cancel();
        let (reply, done) = oneshot::channel();
        if self.commands.send(Command::Close { reply }).await.is_ok() {
            let _ = done.await;
        }
    }

    // ── Media ────────────────────────────────────────────────────

    /// Acquire microphone and camera with the configured profile.
    pub async fn acquire_local_media(
        &self,
        hint: Option<NetworkHint>,
    ) -> Result<MediaBundle, ConsultError> {
        self.request(|reply| Command::AcquireMedia {
            profile: None,
            hint,
            reply,
        })
        .await
    }

    /// Acquire with an explicit profile, overriding the configured one.
    pub async fn acquire_local_media_with(
        &self,
        profile: MediaProfile,
        hint: Option<NetworkHint>,
    ) -> Result<MediaBundle, ConsultError> {
        self.request(|reply| Command::AcquireMedia {
            profile: Some(profile),
            hint,
            reply,
        })
        .await
    }

    /// Mute/unmute; `None` flips. Returns the resulting enabled state.
    pub async fn toggle_audio(&self, enabled: Option<bool>) -> Result<bool, ConsultError> {
        self.request(|reply| Command::ToggleAudio { enabled, reply })
            .await
    }

    pub async fn toggle_video(&self, enabled: Option<bool>) -> Result<bool, ConsultError> {
        self.request(|reply| Command::ToggleVideo { enabled, reply })
            .await
    }

    pub async fn switch_to_screen_share(&self) -> Result<MediaBundle, ConsultError> {
        self.request(|reply| Command::ScreenShare { reply }).await
    }

    pub async fn switch_to_camera(&self) -> Result<MediaBundle, ConsultError> {
        self.request(|reply| Command::Camera { reply }).await
    }

    /// Send the video track of `bundle` instead of the current one.
    ///
    /// Swaps in place when the engine can, otherwise the initiator is asked
    /// to renegotiate. On failure the previous source keeps sending. Any
    /// non-video track in `bundle` is stopped.
    pub async fn replace_video_source(&self, bundle: MediaBundle) -> Result<(), ConsultError> {
        self.request(|reply| Command::ReplaceVideo { bundle, reply })
            .await
    }

    /// Cap the outgoing video bitrate, e.g. from a quality update hint.
    pub async fn set_max_video_bitrate(&self, bits_per_second: u64) -> Result<(), ConsultError> {
        self.request(|reply| Command::SetVideoBitrate {
            bits_per_second,
            reply,
        })
        .await
    }

    // ── Negotiation ──────────────────────────────────────────────

    /// Start an offer round. Makes this session the initiator.
    pub async fn create_offer(&self) -> Result<SessionDescription, ConsultError> {
        self.request(|reply| Command::CreateOffer { reply }).await
    }

    /// Apply a remote offer and answer it in one step.
    pub async fn create_answer(
        &self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, ConsultError> {
        self.request(|reply| Command::CreateAnswer { offer, reply })
            .await
    }

    /// Complete the initiator's round.
    pub async fn apply_remote_answer(&self, answer: SessionDescription) -> Result<(), ConsultError> {
        self.request(|reply| Command::ApplyAnswer { answer, reply })
            .await
    }

    /// Apply a remote candidate, buffering it until a remote description is
    /// in place.
    ///
    /// After `close()` the candidate is discarded and the call returns
    /// [`ConsultError::Cancelled`]. Relay pumps should treat that as the end
    /// of the session, not as a rejected candidate.
    pub async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), ConsultError> {
        self.request(|reply| Command::AddCandidate { candidate, reply })
            .await
    }

    /// Dispatch an inbound signaling message.
    pub async fn handle_signal(&self, message: SignalMessage) -> Result<(), ConsultError> {
        match message {
            SignalMessage::Offer(offer) => self.create_answer(offer).await.map(|_| ()),
            SignalMessage::Answer(answer) => self.apply_remote_answer(answer).await,
            SignalMessage::Candidate(candidate) => self.add_remote_candidate(candidate).await,
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, ConsultError> {
        if self.cancel.is_cancelled() {
            return Err(ConsultError::Cancelled);
        }
        let (reply, response) = oneshot::channel();
        if self.commands.send(build(reply)).await.is_err() {
            return Err(self.gone());
        }
        response.await.unwrap_or_else(|_| Err(self.gone()))
    }

    fn gone(&self) -> ConsultError {
        if self.cancel.is_cancelled() {
            ConsultError::Cancelled
        } else {
            ConsultError::ChannelClosed
        }
    }
}
