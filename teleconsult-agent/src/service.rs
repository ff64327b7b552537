//! Loopback call self-test and device probe.
//!
//! The self-test runs a full provider/patient call in-process: two
//! sessions over a `LoopbackNetwork` with the configured link conditions,
//! signaling relayed by `ChannelSignaling`. It exercises negotiation,
//! quality monitoring, the side channel and a screen-share round trip,
//! then reports what each side saw.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use teleconsult_core::probe::{DeviceInventory, PermissionReport};
use teleconsult_core::{
    ChannelMessage, ChannelSignaling, ChannelState, ConsultError, DeviceProbe, EventReceiver,
    LoopbackNetwork, QualityAssessment, SelfTestReport, Session, SessionEvent, SessionInfo,
    SignalEndpoint, SyntheticDevices,
};

use crate::config::AgentConfig;

/// How long to wait for both parties to connect.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the provider keeps its screen shared.
const SCREEN_SHARE_HOLD: Duration = Duration::from_millis(500);

// ── Reports ──────────────────────────────────────────────────────

/// What one party observed on its event stream.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PartyReport {
    pub quality_updates: u32,
    pub last_assessment: Option<QualityAssessment>,
    pub last_bitrate_hint: Option<u64>,
    pub remote_tracks: u32,
    pub messages_received: u32,
    pub renegotiations: u32,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PartySummary {
    pub info: SessionInfo,
    pub events: PartyReport,
}

/// Final result of a loopback call.
#[derive(Debug, Clone, Serialize)]
pub struct CallSummary {
    pub duration_secs: f64,
    pub rtt_ms: u64,
    pub loss: f64,
    pub jitter_ms: u64,
    pub connected: bool,
    pub provider: PartySummary,
    pub patient: PartySummary,
}

/// `--probe` output.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub inventory: DeviceInventory,
    pub permissions: PermissionReport,
    pub self_test: SelfTestReport,
}

/// Run every device check against `devices`.
pub async fn probe(devices: Arc<SyntheticDevices>) -> ProbeReport {
    let probe = DeviceProbe::new(devices);
    ProbeReport {
        inventory: probe.list_devices().await,
        permissions: probe.check_permissions().await,
        self_test: probe.run_self_test().await,
    }
}

// ── SelfTestService ──────────────────────────────────────────────

/// Drives one loopback call from setup to teardown.
pub struct SelfTestService {
    config: AgentConfig,
    running: Arc<AtomicBool>,
}

struct Party {
    session: Session,
    watcher: JoinHandle<PartyReport>,
}

impl SelfTestService {
    pub fn new(config: AgentConfig) -> Self {
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Obtain a handle that ends the call early when set to `false`.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run the call until the configured duration elapses or the service
    /// is stopped.
    ///
    /// 1. Creates and initializes both sessions on one loopback network.
    /// 2. Acquires local media on both sides.
    /// 3. The provider offers; signaling flows through the relay pair.
    /// 4. Exchanges chat messages and shares the provider's screen briefly.
    /// 5. Closes both sessions and collects what each side saw.
    pub async fn run(&self) -> Result<CallSummary, ConsultError> {
        self.running.store(true, Ordering::SeqCst);
        let started = tokio::time::Instant::now();
        let test = &self.config.self_test;

        let network = LoopbackNetwork::with_link(test.link());
        network.set_replace_supported(test.replace_supported);
        let (provider_end, patient_end) = ChannelSignaling::pair();

        let provider = self.open_party("provider", &network, provider_end, true).await?;
        let patient = match self.open_party("patient", &network, patient_end, false).await {
            Ok(p) => p,
            Err(e) => {
                provider.session.close().await;
                return Err(e);
            }
        };

        let call = self.call(&provider.session, &patient.session).await;
        if let Err(e) = &call {
            warn!("self-test call failed: {e}");
        }

        provider.session.close().await;
        patient.session.close().await;
        self.running.store(false, Ordering::SeqCst);

        let provider = Self::finish(provider).await;
        let patient = Self::finish(patient).await;
        call?;

        let summary = CallSummary {
            duration_secs: started.elapsed().as_secs_f64(),
            rtt_ms: test.rtt_ms,
            loss: test.loss,
            jitter_ms: test.jitter_ms,
            connected: provider.info.connected_at.is_some() && patient.info.connected_at.is_some(),
            provider,
            patient,
        };
        info!(
            connected = summary.connected,
            secs = summary.duration_secs,
            "self-test finished"
        );
        Ok(summary)
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn open_party(
        &self,
        name: &'static str,
        network: &LoopbackNetwork,
        endpoint: SignalEndpoint,
        initiator: bool,
    ) -> Result<Party, ConsultError> {
        let session = Session::with_signaling(
            Arc::new(network.factory()),
            Arc::new(SyntheticDevices::new()),
            endpoint.relay,
        );
        let events = session.subscribe();
        let watcher = tokio::spawn(watch_events(name, session.clone(), events, initiator));

        if let Err(e) = self.prepare(&session, name).await {
            session.close().await;
            let _ = watcher.await;
            return Err(e);
        }

        let pump = session.clone();
        let mut inbox = endpoint.inbox;
        tokio::spawn(async move {
            while let Some(msg) = inbox.recv().await {
                debug!(party = name, "signal in: {msg:?}");
                if let Err(e) = pump.handle_signal(msg).await {
                    if e == ConsultError::Cancelled {
                        break;
                    }
                    warn!(party = name, "signal rejected: {e}");
                }
            }
        });

        Ok(Party { session, watcher })
    }

    async fn prepare(&self, session: &Session, name: &'static str) -> Result<(), ConsultError> {
        session.initialize(self.config.session.clone()).await?;
        let bundle = session
            .acquire_local_media(self.config.network.hint())
            .await?;
        if let Some(video) = bundle.video_track() {
            let s = video.settings();
            info!(
                party = name,
                width = s.width,
                height = s.height,
                fps = s.frame_rate,
                "local media ready"
            );
        }
        Ok(())
    }

    async fn call(&self, provider: &Session, patient: &Session) -> Result<(), ConsultError> {
        provider.create_offer().await?;

        for (name, session) in [("provider", provider), ("patient", patient)] {
            let mut info = session.watch_info();
            let connected = tokio::time::timeout(
                CONNECT_TIMEOUT,
                info.wait_for(|i| {
                    (i.connection_state.is_connected() && i.channel_state == ChannelState::Open)
                        || i.is_closed()
                }),
            )
            .await
            .map_err(|_| ConsultError::NegotiationFailure(format!("{name} never connected")))?
            .map_err(|_| ConsultError::ChannelClosed)?
            .connection_state
            .is_connected();
            if !connected {
                return Err(ConsultError::Cancelled);
            }
        }
        info!("both parties connected");

        patient.side_channel().on_message(|env| {
            info!(seq = env.seq, kind = env.message.kind(), "patient received message");
        });
        provider
            .side_channel()
            .send(ChannelMessage::chat("Hello, can you hear me?"));
        patient
            .side_channel()
            .send(ChannelMessage::chat("Yes, loud and clear."));

        match provider.switch_to_screen_share().await {
            Ok(_) => {
                tokio::time::sleep(SCREEN_SHARE_HOLD).await;
                provider.switch_to_camera().await?;
            }
            Err(e) => warn!("screen share unavailable: {e}"),
        }

        let remaining = self
            .config
            .self_test
            .duration()
            .saturating_sub(SCREEN_SHARE_HOLD);
        tokio::select! {
            _ = tokio::time::sleep(remaining) => {}
            _ = Self::wait_for_stop(&self.running) => info!("self-test stopped early"),
        }
        Ok(())
    }

    async fn finish(party: Party) -> PartySummary {
        let events = party.watcher.await.unwrap_or_else(|e| {
            warn!("event watcher failed: {e}");
            PartyReport::default()
        });
        PartySummary {
            info: party.session.info(),
            events,
        }
    }

    /// Async helper: resolves when `running` becomes false.
    async fn wait_for_stop(running: &Arc<AtomicBool>) {
        loop {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Log a party's notifications until its stream ends, reacting the way an
/// application would.
async fn watch_events(
    name: &'static str,
    session: Session,
    mut events: EventReceiver,
    initiator: bool,
) -> PartyReport {
    let mut report = PartyReport::default();
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::QualityUpdate(update) => {
                report.quality_updates += 1;
                report.last_assessment = Some(update.assessment);
                info!(
                    party = name,
                    video = %update.assessment.video,
                    audio = %update.assessment.audio,
                    connection = %update.assessment.connection,
                    rtt_ms = update.smoothed_rtt.map(|d| d.as_millis() as u64),
                    "quality"
                );
                if let Some(cap) = update.suggested_video_bitrate {
                    report.last_bitrate_hint = Some(cap);
                    if let Err(e) = session.set_max_video_bitrate(cap).await {
                        warn!(party = name, "could not apply bitrate hint: {e}");
                    }
                }
            }
            SessionEvent::RenegotiationNeeded => {
                report.renegotiations += 1;
                if initiator {
                    if let Err(e) = session.create_offer().await {
                        warn!(party = name, "renegotiation failed: {e}");
                    }
                }
            }
            SessionEvent::RemoteMediaReceived(track) => {
                report.remote_tracks += 1;
                info!(party = name, kind = %track.kind, id = %track.track_id, "remote track");
            }
            SessionEvent::DataChannelMessage(env) => {
                report.messages_received += 1;
                if let ChannelMessage::Chat { text } = &env.message {
                    info!(party = name, seq = env.seq, "chat: {text}");
                }
            }
            SessionEvent::ConnectionStateChange(state) => {
                info!(party = name, %state, "connection state");
            }
            SessionEvent::Error(e) => {
                warn!(party = name, "session error: {e}");
                report.errors.push(e.to_string());
            }
            SessionEvent::Closed => debug!(party = name, "closed"),
            other => debug!(party = name, event = other.name(), "event"),
        }
    }
    report
}

// ── Tests ────────────────────────────────────────────────────────
