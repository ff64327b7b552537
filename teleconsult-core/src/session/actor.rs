//! The session actor.
//!
//! One task per session owns every piece of mutable session state and
//! processes commands strictly one at a time, interleaved with raw engine
//! notifications. Anything that awaits (device opens, engine calls) races
//! the session's cancellation token so that `close()` resolves it with
//! [`ConsultError::Cancelled`] instead of letting it mutate a dead session.

use std::future::Future;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::channel::{ChannelState, SideChannel};
use crate::config::SessionConfig;
use crate::engine::{
    EngineError, EngineEvent, EngineEventReceiver, EngineEventSender, EngineFactory, IceCandidate,
    IceState, SdpKind, SessionDescription, TransportEngine, TransportState,
};
use crate::error::ConsultError;
use crate::media::{MediaBundle, MediaKind, MediaPipeline, MediaProfile, MediaTrack, NetworkHint};
use crate::quality::QualityMonitor;
use crate::session::candidates::CandidateBuffer;
use crate::session::events::{EventHub, SessionEvent};
use crate::session::info::SessionInfo;
use crate::signaling::{SignalMessage, SignalingRelay};
use crate::state::{ConnectionState, Negotiation, SignalingState};

pub(crate) type Reply<T> = oneshot::Sender<Result<T, ConsultError>>;

/// Requests from [`Session`](crate::Session) handles.
pub(crate) enum Command {
    Initialize {
        config: SessionConfig,
        reply: Reply<()>,
    },
    AcquireMedia {
        profile: Option<MediaProfile>,
        hint: Option<NetworkHint>,
        reply: Reply<MediaBundle>,
    },
    ToggleAudio {
        enabled: Option<bool>,
        reply: Reply<bool>,
    },
    ToggleVideo {
        enabled: Option<bool>,
        reply: Reply<bool>,
    },
    ScreenShare {
        reply: Reply<MediaBundle>,
    },
    Camera {
        reply: Reply<MediaBundle>,
    },
    ReplaceVideo {
        bundle: MediaBundle,
        reply: Reply<()>,
    },
    CreateOffer {
        reply: Reply<SessionDescription>,
    },
    CreateAnswer {
        offer: SessionDescription,
        reply: Reply<SessionDescription>,
    },
    ApplyAnswer {
        answer: SessionDescription,
        reply: Reply<()>,
    },
    AddCandidate {
        candidate: IceCandidate,
        reply: Reply<()>,
    },
    SetVideoBitrate {
        bits_per_second: u64,
        reply: Reply<()>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

impl Command {
    /// Answer without executing.
    fn reject(self, err: ConsultError) {
        match self {
            Self::Initialize { reply, .. }
            | Self::ReplaceVideo { reply, .. }
            | Self::ApplyAnswer { reply, .. }
            | Self::AddCandidate { reply, .. }
            | Self::SetVideoBitrate { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::AcquireMedia { reply, .. } | Self::ScreenShare { reply } | Self::Camera { reply } => {
                let _ = reply.send(Err(err));
            }
            Self::ToggleAudio { reply, .. } | Self::ToggleVideo { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::CreateOffer { reply } | Self::CreateAnswer { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Self::Close { reply } => {
                let _ = reply.send(());
            }
        }
    }
}

/// Race `fut` against session cancellation.
async fn guarded<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, ConsultError>>,
) -> Result<T, ConsultError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ConsultError::Cancelled),
        res = fut => res,
    }
}

async fn next_engine_event(rx: &mut Option<EngineEventReceiver>) -> Option<EngineEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn negotiation_failure(e: EngineError) -> ConsultError {
    ConsultError::NegotiationFailure(e.0)
}

fn init_failure(e: EngineError) -> ConsultError {
    ConsultError::init(e.0)
}

pub(crate) struct SessionActor {
    id: Uuid,
    factory: Arc<dyn EngineFactory>,
    relay: Option<Arc<dyn SignalingRelay>>,
    config: Option<SessionConfig>,
    engine: Option<Arc<dyn TransportEngine>>,
    engine_tx: Option<EngineEventSender>,
    engine_rx: Option<EngineEventReceiver>,
    pipeline: MediaPipeline,
    /// Local tracks currently attached to the engine.
    senders: Vec<MediaTrack>,
    negotiation: Negotiation,
    connection: ConnectionState,
    ice: IceState,
    candidates: CandidateBuffer,
    monitor: QualityMonitor,
    channel: SideChannel,
    hub: EventHub,
    info_tx: watch::Sender<SessionInfo>,
    cancel: CancellationToken,
    created_at: SystemTime,
    connected_at: Option<SystemTime>,
    closed_at: Option<SystemTime>,
    closed: bool,
}

/// Shared handles created alongside the actor.
pub(crate) struct ActorParts {
    pub id: Uuid,
    pub factory: Arc<dyn EngineFactory>,
    pub relay: Option<Arc<dyn SignalingRelay>>,
    pub pipeline: MediaPipeline,
    pub monitor: QualityMonitor,
    pub channel: SideChannel,
    pub hub: EventHub,
    pub info_tx: watch::Sender<SessionInfo>,
    pub cancel: CancellationToken,
}

impl SessionActor {
    pub(crate) fn new(parts: ActorParts) -> Self {
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        let created_at = parts.info_tx.borrow().created_at;
        Self {
            id: parts.id,
            factory: parts.factory,
            relay: parts.relay,
            config: None,
            engine: None,
            engine_tx: Some(engine_tx),
            engine_rx: Some(engine_rx),
            pipeline: parts.pipeline,
            senders: Vec::new(),
            negotiation: Negotiation::new(),
            connection: ConnectionState::New,
            ice: IceState::New,
            candidates: CandidateBuffer::new(),
            monitor: parts.monitor,
            channel: parts.channel,
            hub: parts.hub,
            info_tx: parts.info_tx,
            cancel: parts.cancel,
            created_at,
            connected_at: None,
            closed_at: None,
            closed: false,
        }
    }

    pub(crate) async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        debug!(session = %self.id, "session actor started");
        while !self.closed {
            tokio::select! {
                biased;
                cmd = commands.recv() => match cmd {
                    Some(cmd) => self.dispatch(cmd).await,
                    None => {
                        debug!(session = %self.id, "all handles dropped");
                        self.shutdown().await;
                    }
                },
                event = next_engine_event(&mut self.engine_rx) => match event {
                    Some(event) => self.on_engine_event(event).await,
                    None => self.engine_rx = None,
                },
            }
        }
        debug!(session = %self.id, "session actor stopped");
    }

    // ── Commands ─────────────────────────────────────────────────

    async fn dispatch(&mut self, cmd: Command) {
        if self.cancel.is_cancelled() && !matches!(cmd, Command::Close { .. }) {
            cmd.reject(ConsultError::Cancelled);
            return;
        }

        match cmd {
            Command::Initialize { config, reply } => {
                let _ = reply.send(self.initialize(config).await);
            }
            Command::AcquireMedia {
                profile,
                hint,
                reply,
            } => {
                let _ = reply.send(self.acquire_media(profile, hint).await);
            }
            Command::ToggleAudio { enabled, reply } => {
                let _ = reply.send(Ok(self.pipeline.toggle_audio(enabled)));
            }
            Command::ToggleVideo { enabled, reply } => {
                let _ = reply.send(Ok(self.pipeline.toggle_video(enabled)));
            }
            Command::ScreenShare { reply } => {
                let _ = reply.send(self.switch_video(true).await);
            }
            Command::Camera { reply } => {
                let _ = reply.send(self.switch_video(false).await);
            }
            Command::ReplaceVideo { bundle, reply } => {
                let _ = reply.send(self.replace_video(bundle).await);
            }
            Command::CreateOffer { reply } => {
                let _ = reply.send(self.create_offer().await);
            }
            Command::CreateAnswer { offer, reply } => {
                let _ = reply.send(self.create_answer(offer).await);
            }
            Command::ApplyAnswer { answer, reply } => {
                let _ = reply.send(self.apply_answer(answer).await);
            }
            Command::AddCandidate { candidate, reply } => {
                let _ = reply.send(self.add_candidate(candidate).await);
            }
            Command::SetVideoBitrate {
                bits_per_second,
                reply,
            } => {
                let _ = reply.send(self.set_video_bitrate(bits_per_second).await);
            }
            Command::Close { reply } => {
                self.shutdown().await;
                let _ = reply.send(());
            }
        }
    }

    async fn initialize(&mut self, config: SessionConfig) -> Result<(), ConsultError> {
        if self.config.is_some() {
            return Err(ConsultError::already_initialized());
        }

        match self.create_engine(&config).await {
            Ok(engine) => {
                self.channel
                    .attach(engine.clone(), &config.data_channel.label, self.cancel.child_token());
                info!(
                    session = %self.id,
                    servers = config.ice_servers.len(),
                    pool = config.candidate_pool_size,
                    profile = %config.media_profile,
                    "session initialized"
                );
                self.engine = Some(engine);
                self.config = Some(config);
                self.publish_info();
                self.hub.emit(SessionEvent::Initialized);
                Ok(())
            }
            Err(ConsultError::Cancelled) => Err(ConsultError::Cancelled),
            Err(err) => {
                self.fail(err.clone()).await;
                Err(err)
            }
        }
    }

    async fn create_engine(
        &mut self,
        config: &SessionConfig,
    ) -> Result<Arc<dyn TransportEngine>, ConsultError> {
        config.validate()?;
        let events = self
            .engine_tx
            .take()
            .ok_or_else(|| ConsultError::init("engine event queue already used"))?;

        let factory = self.factory.clone();
        let engine = guarded(&self.cancel, async {
            factory.create(config, events).await.map_err(init_failure)
        })
        .await?;

        let channel = config.data_channel.clone();
        let created = guarded(&self.cancel, async {
            engine.create_data_channel(&channel).await.map_err(init_failure)
        })
        .await;
        if let Err(err) = created {
            engine.close().await;
            return Err(err);
        }
        Ok(engine)
    }

    async fn acquire_media(
        &mut self,
        profile: Option<MediaProfile>,
        hint: Option<NetworkHint>,
    ) -> Result<MediaBundle, ConsultError> {
        let engine = self.engine()?;
        let profile = profile
            .or_else(|| self.config.as_ref().map(|c| c.media_profile))
            .unwrap_or_default();

        let acquired = guarded(&self.cancel, self.pipeline.acquire(profile, hint.as_ref())).await;
        if matches!(acquired, Err(ConsultError::Cancelled)) {
            return acquired;
        }
        // A failed re-acquire has already released the old bundle.
        self.sync_senders(&engine).await?;
        let bundle = acquired?;

        info!(session = %self.id, tracks = bundle.tracks().len(), "local media ready");
        self.hub
            .emit(SessionEvent::LocalMediaReady(bundle.tracks().to_vec()));
        Ok(bundle)
    }

    async fn switch_video(&mut self, to_screen: bool) -> Result<MediaBundle, ConsultError> {
        let engine = self.engine()?;
        let switched = if to_screen {
            guarded(&self.cancel, self.pipeline.switch_to_screen_share()).await
        } else {
            guarded(&self.cancel, self.pipeline.switch_to_camera()).await
        };
        if matches!(switched, Err(ConsultError::Cancelled)) {
            return switched;
        }
        // Even a failed switch may have swapped the track (camera fallback).
        if let Err(e) = self.sync_video(&engine).await {
            warn!(session = %self.id, "outgoing video not updated: {e}");
            if switched.is_ok() {
                return Err(ConsultError::ReplaceFailure(e.to_string()));
            }
        }
        switched
    }

    async fn replace_video(&mut self, bundle: MediaBundle) -> Result<(), ConsultError> {
        let engine = self.engine()?;
        let mut incoming = bundle;
        let next = incoming.take(MediaKind::Video);
        // Only the video track is adopted.
        incoming.release();

        let Some(next) = next else {
            return Err(ConsultError::ReplaceFailure(
                "bundle carries no video track".into(),
            ));
        };
        if !next.is_live() {
            return Err(ConsultError::ReplaceFailure("video track already stopped".into()));
        }

        let previous = self.pipeline.adopt_video(next.clone());
        match self.sync_video(&engine).await {
            Ok(()) => {
                if let Some(prev) = previous {
                    prev.stop();
                }
                info!(session = %self.id, source = ?next.source(), "video source replaced");
                Ok(())
            }
            Err(ConsultError::Cancelled) => {
                if let Some(prev) = previous {
                    prev.stop();
                }
                Err(ConsultError::Cancelled)
            }
            Err(err) => {
                warn!(session = %self.id, "video replacement failed, keeping previous source: {err}");
                match previous {
                    Some(prev) => self.pipeline.restore_video(prev),
                    None => {
                        self.pipeline.discard_video();
                    }
                }
                if let Err(e) = self.sync_video(&engine).await {
                    warn!(session = %self.id, "could not restore outgoing video: {e}");
                }
                Err(ConsultError::ReplaceFailure(err.to_string()))
            }
        }
    }

    async fn create_offer(&mut self) -> Result<SessionDescription, ConsultError> {
        let engine = self.engine()?;
        self.negotiation.check_offer()?;

        let offer = guarded(&self.cancel, async {
            let offer = engine.create_offer().await.map_err(negotiation_failure)?;
            engine
                .set_local_description(&offer)
                .await
                .map_err(negotiation_failure)?;
            Ok(offer)
        })
        .await?;

        if self.negotiation.offer_applied() {
            self.hub
                .emit(SessionEvent::SignalingStateChange(self.negotiation.state()));
        }
        self.publish_info();
        debug!(session = %self.id, "offer created");
        self.hub.emit(SessionEvent::OfferCreated(offer.clone()));
        self.relay(SignalMessage::Offer(offer.clone())).await;
        Ok(offer)
    }

    async fn create_answer(
        &mut self,
        offer: SessionDescription,
    ) -> Result<SessionDescription, ConsultError> {
        let engine = self.engine()?;
        self.negotiation.check_answer()?;
        if offer.kind != SdpKind::Offer {
            return Err(ConsultError::NegotiationFailure(
                "expected an offer description".into(),
            ));
        }

        let answer = guarded(&self.cancel, async {
            engine
                .set_remote_description(&offer)
                .await
                .map_err(negotiation_failure)?;
            let answer = engine.create_answer().await.map_err(negotiation_failure)?;
            engine
                .set_local_description(&answer)
                .await
                .map_err(negotiation_failure)?;
            Ok(answer)
        })
        .await?;

        self.negotiation.answer_applied();
        self.publish_info();
        debug!(session = %self.id, round = self.negotiation.completed_rounds(), "answer created");
        self.flush_candidates(&engine).await;
        self.hub.emit(SessionEvent::AnswerCreated(answer.clone()));
        self.relay(SignalMessage::Answer(answer.clone())).await;
        Ok(answer)
    }

    async fn apply_answer(&mut self, answer: SessionDescription) -> Result<(), ConsultError> {
        let engine = self.engine()?;
        self.negotiation.check_remote_answer()?;
        if answer.kind != SdpKind::Answer {
            return Err(ConsultError::NegotiationFailure(
                "expected an answer description".into(),
            ));
        }

        guarded(&self.cancel, async {
            engine
                .set_remote_description(&answer)
                .await
                .map_err(negotiation_failure)
        })
        .await?;

        self.negotiation.remote_answer_applied();
        self.publish_info();
        self.hub
            .emit(SessionEvent::SignalingStateChange(self.negotiation.state()));
        debug!(session = %self.id, round = self.negotiation.completed_rounds(), "remote answer applied");
        self.flush_candidates(&engine).await;
        Ok(())
    }

    async fn add_candidate(&mut self, candidate: IceCandidate) -> Result<(), ConsultError> {
        let engine = match &self.engine {
            Some(engine) if self.negotiation.has_remote_description() => engine.clone(),
            _ => {
                self.candidates.push(candidate);
                debug!(session = %self.id, buffered = self.candidates.len(), "remote candidate buffered");
                return Ok(());
            }
        };

        let applied = guarded(&self.cancel, async {
            engine
                .add_ice_candidate(&candidate)
                .await
                .map_err(|e| ConsultError::CandidateRejected(e.0))
        })
        .await;
        if let Err(ConsultError::CandidateRejected(reason)) = &applied {
            warn!(session = %self.id, "remote candidate rejected: {reason}");
        }
        applied
    }

    async fn set_video_bitrate(&mut self, bits_per_second: u64) -> Result<(), ConsultError> {
        let engine = self.engine()?;
        guarded(&self.cancel, async {
            engine
                .set_max_bitrate(MediaKind::Video, bits_per_second)
                .await
                .map_err(ConsultError::from)
        })
        .await?;
        debug!(session = %self.id, bits_per_second, "video bitrate capped");
        Ok(())
    }

    // ── Engine notifications ─────────────────────────────────────

    async fn on_engine_event(&mut self, event: EngineEvent) {
        if self.closed || self.cancel.is_cancelled() {
            return;
        }

        match event {
            EngineEvent::ConnectionState(raw) => self.on_transport_state(raw).await,
            EngineEvent::IceState(state) => {
                if self.ice != state {
                    self.ice = state;
                    self.publish_info();
                    self.hub.emit(SessionEvent::IceStateChange(state));
                }
            }
            EngineEvent::LocalCandidate(candidate) => {
                self.hub
                    .emit(SessionEvent::IceCandidateGathered(candidate.clone()));
                self.relay(SignalMessage::Candidate(candidate)).await;
            }
            EngineEvent::RemoteTrack(track) => {
                info!(session = %self.id, kind = %track.kind, "remote media received");
                self.hub.emit(SessionEvent::RemoteMediaReceived(track));
            }
            EngineEvent::DataChannelOpen(label) => {
                if label == self.channel.label() && self.channel.mark_open() {
                    self.on_channel_state(ChannelState::Open);
                }
            }
            EngineEvent::DataChannelMessage { label, data } => {
                if label != self.channel.label() {
                    debug!(session = %self.id, %label, "message on unknown channel ignored");
                    return;
                }
                if let Some(envelope) = self.channel.deliver(&data) {
                    self.hub.emit(SessionEvent::DataChannelMessage(envelope));
                }
            }
            EngineEvent::DataChannelClosed(label) => {
                if label == self.channel.label() && self.channel.mark_closed() {
                    self.on_channel_state(self.channel.state());
                }
            }
            EngineEvent::NegotiationNeeded => {
                if self.negotiation.negotiation_needed() {
                    self.hub.emit(SessionEvent::RenegotiationNeeded);
                } else {
                    debug!(
                        session = %self.id,
                        pending = self.negotiation.has_pending_renegotiation(),
                        "renegotiation deferred to initiator"
                    );
                    self.publish_info();
                }
            }
        }
    }

    async fn on_transport_state(&mut self, raw: TransportState) {
        match self.connection.apply(raw) {
            Ok(false) => return,
            Ok(true) => {}
            Err(e) => {
                warn!(session = %self.id, ?raw, "ignoring transport state: {e}");
                return;
            }
        }
        info!(session = %self.id, state = %self.connection, "connection state changed");

        match self.connection {
            ConnectionState::Connected { .. } => {
                self.connected_at.get_or_insert_with(SystemTime::now);
                if let Some(engine) = self.engine.clone() {
                    let hub = self.hub.clone();
                    self.monitor.start(engine, &self.cancel, move |update| {
                        hub.emit(SessionEvent::QualityUpdate(update));
                    });
                }
            }
            ConnectionState::Disconnected | ConnectionState::Failed => self.monitor.stop(),
            _ => {}
        }

        self.publish_info();
        self.hub
            .emit(SessionEvent::ConnectionStateChange(self.connection.clone()));

        if self.connection == ConnectionState::Failed {
            self.fail(ConsultError::Engine("transport connection failed".into()))
                .await;
        }
    }

    fn on_channel_state(&mut self, state: ChannelState) {
        debug!(session = %self.id, %state, "side channel state changed");
        self.publish_info();
        self.hub.emit(SessionEvent::DataChannelStateChange(state));
    }

    // ── Internal ─────────────────────────────────────────────────

    fn engine(&self) -> Result<Arc<dyn TransportEngine>, ConsultError> {
        self.engine
            .clone()
            .ok_or(ConsultError::InvalidState("session not initialized"))
    }

    async fn relay(&self, message: SignalMessage) {
        let Some(relay) = &self.relay else {
            return;
        };
        if let Err(e) = relay.send(message).await {
            warn!(session = %self.id, "signaling relay send failed: {e}");
        }
    }

    /// Apply every buffered remote candidate, in arrival order.
    async fn flush_candidates(&mut self, engine: &Arc<dyn TransportEngine>) {
        let pending = self.candidates.drain();
        if pending.is_empty() {
            return;
        }
        debug!(session = %self.id, count = pending.len(), "flushing buffered candidates");
        for candidate in pending {
            let applied = guarded(&self.cancel, async {
                engine.add_ice_candidate(&candidate).await.map_err(ConsultError::from)
            })
            .await;
            match applied {
                Ok(()) => {}
                Err(ConsultError::Cancelled) => return,
                Err(e) => warn!(session = %self.id, "buffered candidate rejected: {e}"),
            }
        }
    }

    /// Make the engine's senders match the pipeline's bundle.
    async fn sync_senders(&mut self, engine: &Arc<dyn TransportEngine>) -> Result<(), ConsultError> {
        let wanted: Vec<MediaTrack> = self.pipeline.bundle().tracks().to_vec();

        let stale: Vec<MediaTrack> = self
            .senders
            .iter()
            .filter(|s| !wanted.iter().any(|w| w.same_track(s)))
            .cloned()
            .collect();
        for track in stale {
            guarded(&self.cancel, async {
                engine.remove_track(track.id()).await.map_err(ConsultError::from)
            })
            .await?;
            self.senders.retain(|s| !s.same_track(&track));
        }

        for track in wanted {
            if self.senders.iter().any(|s| s.same_track(&track)) {
                continue;
            }
            guarded(&self.cancel, async {
                engine.add_track(&track).await.map_err(ConsultError::from)
            })
            .await?;
            self.senders.push(track);
        }
        Ok(())
    }

    /// Point the engine's video sender at the pipeline's current video
    /// track, in place when the engine supports it.
    async fn sync_video(&mut self, engine: &Arc<dyn TransportEngine>) -> Result<(), ConsultError> {
        let current = self.pipeline.bundle().video_track().cloned();
        let sending = self.senders.iter().position(|t| t.kind() == MediaKind::Video);

        match (sending, current) {
            (Some(i), Some(next)) if self.senders[i].same_track(&next) => Ok(()),
            (Some(i), Some(next)) if engine.supports_replace_track() => {
                guarded(&self.cancel, async {
                    engine.replace_track(&next).await.map_err(ConsultError::from)
                })
                .await?;
                debug!(session = %self.id, track = next.id(), "video sender replaced in place");
                self.senders[i] = next;
                Ok(())
            }
            (Some(_), _) | (None, Some(_)) => self.sync_senders(engine).await,
            (None, None) => Ok(()),
        }
    }

    fn publish_info(&self) {
        self.info_tx.send_replace(SessionInfo {
            session_id: self.id,
            role: self.negotiation.role(),
            connection_state: self.connection.clone(),
            ice_state: self.ice,
            signaling_state: self.negotiation.state(),
            renegotiation_pending: self.negotiation.has_pending_renegotiation(),
            channel_state: self.channel.state(),
            created_at: self.created_at,
            connected_at: self.connected_at,
            closed_at: self.closed_at,
        });
    }

    /// Surface a session-ending error once, then close.
    async fn fail(&mut self, err: ConsultError) {
        error!(session = %self.id, "session failed: {err}");
        self.hub.emit(SessionEvent::Error(err));
        self.shutdown().await;
    }

    /// Terminal teardown. Idempotent.
    async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.cancel.cancel();
        self.monitor.stop();

        let released = self.pipeline.release();
        self.senders.clear();
        self.channel.close();
        let dropped = self.candidates.clear();
        if let Some(engine) = self.engine.take() {
            engine.close().await;
        }
        self.engine_tx = None;
        self.engine_rx = None;

        let connection_changed = self.connection.close();
        let signaling_changed = self.negotiation.close();
        self.closed_at = Some(SystemTime::now());
        self.publish_info();

        if connection_changed {
            self.hub
                .emit(SessionEvent::ConnectionStateChange(ConnectionState::Closed));
        }
        if signaling_changed {
            self.hub
                .emit(SessionEvent::SignalingStateChange(SignalingState::Closed));
        }
        self.hub.close();
        info!(session = %self.id, released, dropped_candidates = dropped, "session closed");
    }
}
