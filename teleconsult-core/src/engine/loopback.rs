//! In-process two-peer transport engine.
//!
//! Two engines created from the same [`LoopbackNetwork`] negotiate with each
//! other exactly like remote peers would: descriptions must be exchanged,
//! connectivity is reported once both sides hold a local and a remote
//! description, and data-channel payloads are delivered to the other peer's
//! event queue. Link conditions (RTT, loss, jitter) are simulated in the
//! statistics so quality classification can be exercised end to end.
//!
//! ## Description format
//!
//! ```text
//! v=0
//! o=loopback <peer> <version> IN IP4 127.0.0.1
//! s=-
//! t=0 0
//! a=track:<audio|video> <track id>
//! a=channel:<label>
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::config::{DataChannelConfig, SessionConfig};
use crate::engine::{
    EngineError, EngineEvent, EngineEventSender, EngineFactory, IceCandidate, IceState,
    RemoteTrackInfo, SdpKind, SessionDescription, TransportEngine, TransportState,
};
use crate::media::{MediaKind, MediaTrack};
use crate::quality::{InboundRtpStats, OutboundRtpStats, StatisticsSnapshot};

// ── Constants ────────────────────────────────────────────────────

/// Packets per kind accounted for on every `stats()` call.
const AUDIO_PACKETS_PER_SAMPLE: u64 = 250;
const AUDIO_PACKET_BYTES: u64 = 160;
const VIDEO_PACKETS_PER_SAMPLE: u64 = 450;
const VIDEO_PACKET_BYTES: u64 = 1_100;

/// The loopback network connects exactly two peers.
const MAX_PEERS: usize = 2;

// ── LinkConditions ───────────────────────────────────────────────

/// Simulated path characteristics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkConditions {
    pub rtt: Duration,
    /// Fraction of packets lost, 0.0..=1.0.
    pub loss_ratio: f64,
    pub jitter: Duration,
}

impl Default for LinkConditions {
    fn default() -> Self {
        Self {
            rtt: Duration::from_millis(40),
            loss_ratio: 0.0,
            jitter: Duration::from_millis(5),
        }
    }
}

// ── Peer state ───────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    packets: u64,
    bytes: u64,
    lost: u64,
}

#[derive(Debug)]
struct PeerState {
    events: EngineEventSender,
    closed: bool,
    local: Option<SessionDescription>,
    remote: Option<SessionDescription>,
    version: u32,
    tracks: Vec<MediaTrack>,
    channels: Vec<String>,
    channels_open: bool,
    remote_candidates: Vec<IceCandidate>,
    candidate_gathered: bool,
    announced: HashSet<String>,
    checking: bool,
    connected: bool,
    max_bitrate: HashMap<MediaKind, u64>,
    outbound: HashMap<MediaKind, Counters>,
    inbound: HashMap<MediaKind, Counters>,
}

impl PeerState {
    fn new(events: EngineEventSender) -> Self {
        Self {
            events,
            closed: false,
            local: None,
            remote: None,
            version: 0,
            tracks: Vec::new(),
            channels: Vec::new(),
            channels_open: false,
            remote_candidates: Vec::new(),
            candidate_gathered: false,
            announced: HashSet::new(),
            checking: false,
            connected: false,
            max_bitrate: HashMap::new(),
            outbound: HashMap::new(),
            inbound: HashMap::new(),
        }
    }

    fn emit(&self, event: EngineEvent) {
        // The session may already be gone; nothing to do then.
        let _ = self.events.send(event);
    }

    fn has_both_descriptions(&self) -> bool {
        self.local.is_some() && self.remote.is_some()
    }

    fn is_ready(&self) -> bool {
        !self.closed && self.has_both_descriptions()
    }

    fn live_track(&self, kind: MediaKind) -> Option<&MediaTrack> {
        self.tracks.iter().find(|t| t.kind() == kind && t.is_live())
    }

    fn describe(&mut self, peer: usize, kind: SdpKind) -> SessionDescription {
        self.version += 1;
        let mut sdp = format!(
            "v=0\r\no=loopback {peer} {} IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n",
            self.version
        );
        for track in &self.tracks {
            sdp.push_str(&format!("a=track:{} {}\r\n", track.kind(), track.id()));
        }
        for label in &self.channels {
            sdp.push_str(&format!("a=channel:{label}\r\n"));
        }
        SessionDescription { kind, sdp }
    }

    /// Announce tracks listed in the remote description that were not yet
    /// reported.
    fn announce_remote_tracks(&mut self) {
        let Some(remote) = &self.remote else {
            return;
        };
        let fresh: Vec<RemoteTrackInfo> = parse_tracks(&remote.sdp)
            .into_iter()
            .filter(|t| !self.announced.contains(&t.track_id))
            .collect();
        for info in fresh {
            self.announced.insert(info.track_id.clone());
            self.emit(EngineEvent::RemoteTrack(info));
        }
    }
}

fn parse_tracks(sdp: &str) -> Vec<RemoteTrackInfo> {
    sdp.lines()
        .filter_map(|line| line.strip_prefix("a=track:"))
        .filter_map(|rest| {
            let (kind, id) = rest.split_once(' ')?;
            let kind = match kind {
                "audio" => MediaKind::Audio,
                "video" => MediaKind::Video,
                _ => return None,
            };
            Some(RemoteTrackInfo {
                track_id: id.trim().to_string(),
                kind,
            })
        })
        .collect()
}

fn validate(desc: &SessionDescription) -> Result<(), EngineError> {
    let mut lines = desc.sdp.lines();
    if lines.next() != Some("v=0") {
        return Err(EngineError::new("malformed session description: missing v=0"));
    }
    if !lines.any(|l| l.starts_with("o=loopback ")) {
        return Err(EngineError::new("malformed session description: missing origin"));
    }
    Ok(())
}

#[derive(Debug, Default)]
struct NetworkState {
    peers: Vec<PeerState>,
    link: LinkConditions,
    replace_unsupported: bool,
    fail_next_create: Option<String>,
}

impl NetworkState {
    fn peer(&mut self, id: usize) -> Result<&mut PeerState, EngineError> {
        match self.peers.get_mut(id) {
            Some(p) if !p.closed => Ok(p),
            _ => Err(EngineError::new("engine closed")),
        }
    }

    fn other(&self, id: usize) -> Option<usize> {
        let other = if id == 0 { 1 } else { 0 };
        match self.peers.get(other) {
            Some(p) if !p.closed => Some(other),
            _ => None,
        }
    }

    /// Bring peers up once both sides hold both descriptions.
    fn try_connect(&mut self, id: usize) {
        if let Some(peer) = self.peers.get_mut(id) {
            if peer.is_ready() && !peer.checking && !peer.connected {
                peer.checking = true;
                peer.emit(EngineEvent::IceState(IceState::Checking));
                peer.emit(EngineEvent::ConnectionState(TransportState::Connecting));
            }
        }

        let Some(other) = self.other(id) else {
            return;
        };
        if !(self.peers[id].is_ready() && self.peers[other].is_ready()) {
            return;
        }

        for pid in [id, other] {
            let peer = &mut self.peers[pid];
            if peer.connected {
                peer.announce_remote_tracks();
                continue;
            }
            peer.connected = true;
            peer.checking = false;
            peer.emit(EngineEvent::IceState(IceState::Connected));
            peer.emit(EngineEvent::ConnectionState(TransportState::Connected));
            if !peer.channels_open {
                peer.channels_open = true;
                for label in peer.channels.clone() {
                    peer.emit(EngineEvent::DataChannelOpen(label));
                }
            }
            peer.announce_remote_tracks();
        }
    }
}

// ── LoopbackNetwork ──────────────────────────────────────────────

/// Shared medium connecting two loopback engines.
#[derive(Debug, Clone, Default)]
pub struct LoopbackNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl LoopbackNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_link(link: LinkConditions) -> Self {
        let network = Self::new();
        network.set_link(link);
        network
    }

    /// Factory handing out engines attached to this network.
    pub fn factory(&self) -> LoopbackFactory {
        LoopbackFactory {
            network: self.clone(),
        }
    }

    pub fn set_link(&self, link: LinkConditions) {
        self.lock().link = link;
    }

    pub fn link(&self) -> LinkConditions {
        self.lock().link
    }

    /// Disable in-place track replacement, forcing renegotiation.
    pub fn set_replace_supported(&self, supported: bool) {
        self.lock().replace_unsupported = !supported;
    }

    /// Make the next engine creation fail.
    pub fn fail_next_create(&self, reason: impl Into<String>) {
        self.lock().fail_next_create = Some(reason.into());
    }

    /// Push a raw connection state to every live peer, as a flaky path would.
    pub fn set_transport_state(&self, state: TransportState) {
        let ice = match state {
            TransportState::New => IceState::New,
            TransportState::Connecting => IceState::Checking,
            TransportState::Connected => IceState::Connected,
            TransportState::Disconnected => IceState::Disconnected,
            TransportState::Failed => IceState::Failed,
            TransportState::Closed => IceState::Closed,
        };
        let mut net = self.lock();
        for peer in net.peers.iter_mut().filter(|p| !p.closed) {
            peer.connected = state == TransportState::Connected;
            peer.emit(EngineEvent::IceState(ice));
            peer.emit(EngineEvent::ConnectionState(state));
        }
    }

    /// Remote candidates peer `peer` has accepted, in arrival order.
    pub fn remote_candidates(&self, peer: usize) -> Vec<IceCandidate> {
        self.lock()
            .peers
            .get(peer)
            .map(|p| p.remote_candidates.clone())
            .unwrap_or_default()
    }

    /// Bitrate cap last set by peer `peer` for `kind`.
    pub fn max_bitrate(&self, peer: usize, kind: MediaKind) -> Option<u64> {
        self.lock()
            .peers
            .get(peer)
            .and_then(|p| p.max_bitrate.get(&kind).copied())
    }

    /// Ids of the tracks peer `peer` is currently sending.
    pub fn sending_tracks(&self, peer: usize) -> Vec<String> {
        self.lock()
            .peers
            .get(peer)
            .map(|p| p.tracks.iter().map(|t| t.id().to_string()).collect())
            .unwrap_or_default()
    }

    pub fn peer_count(&self) -> usize {
        self.lock().peers.len()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── LoopbackFactory ──────────────────────────────────────────────

/// [`EngineFactory`] for a [`LoopbackNetwork`].
#[derive(Debug, Clone)]
pub struct LoopbackFactory {
    network: LoopbackNetwork,
}

#[async_trait]
impl EngineFactory for LoopbackFactory {
    async fn create(
        &self,
        config: &SessionConfig,
        events: EngineEventSender,
    ) -> Result<Arc<dyn TransportEngine>, EngineError> {
        let mut net = self.network.lock();
        if let Some(reason) = net.fail_next_create.take() {
            return Err(EngineError::new(reason));
        }
        if net.peers.len() >= MAX_PEERS {
            return Err(EngineError::new("loopback network already has two peers"));
        }
        let id = net.peers.len();
        net.peers.push(PeerState::new(events));
        debug!(
            peer = id,
            servers = config.ice_servers.len(),
            bundle = ?config.bundle_policy,
            "loopback engine created"
        );
        Ok(Arc::new(LoopbackEngine {
            id,
            network: self.network.clone(),
        }))
    }
}

// ── LoopbackEngine ───────────────────────────────────────────────

/// One side of a [`LoopbackNetwork`].
#[derive(Debug)]
pub struct LoopbackEngine {
    id: usize,
    network: LoopbackNetwork,
}

impl LoopbackEngine {
    pub fn peer_id(&self) -> usize {
        self.id
    }
}

#[async_trait]
impl TransportEngine for LoopbackEngine {
    async fn create_offer(&self) -> Result<SessionDescription, EngineError> {
        let mut net = self.network.lock();
        let peer = net.peer(self.id)?;
        Ok(peer.describe(self.id, SdpKind::Offer))
    }

    async fn create_answer(&self) -> Result<SessionDescription, EngineError> {
        let mut net = self.network.lock();
        let peer = net.peer(self.id)?;
        match &peer.remote {
            Some(d) if d.kind == SdpKind::Offer => {}
            _ => return Err(EngineError::new("no remote offer to answer")),
        }
        Ok(peer.describe(self.id, SdpKind::Answer))
    }

    async fn set_local_description(&self, desc: &SessionDescription) -> Result<(), EngineError> {
        validate(desc)?;
        let mut net = self.network.lock();
        let id = self.id;
        let peer = net.peer(id)?;
        if desc.kind == SdpKind::Answer
            && !matches!(&peer.remote, Some(d) if d.kind == SdpKind::Offer)
        {
            return Err(EngineError::new("local answer without remote offer"));
        }
        peer.local = Some(desc.clone());
        if !peer.candidate_gathered {
            peer.candidate_gathered = true;
            let candidate = IceCandidate::new(format!(
                "candidate:{} 1 udp 2130706431 127.0.0.1 {} typ host",
                id + 1,
                50_000 + id
            ));
            peer.emit(EngineEvent::LocalCandidate(candidate));
        }
        net.try_connect(id);
        Ok(())
    }

    async fn set_remote_description(&self, desc: &SessionDescription) -> Result<(), EngineError> {
        validate(desc)?;
        let mut net = self.network.lock();
        let id = self.id;
        let peer = net.peer(id)?;
        if desc.kind == SdpKind::Answer
            && !matches!(&peer.local, Some(d) if d.kind == SdpKind::Offer)
        {
            return Err(EngineError::new("remote answer without local offer"));
        }
        peer.remote = Some(desc.clone());
        net.try_connect(id);
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<(), EngineError> {
        let mut net = self.network.lock();
        let peer = net.peer(self.id)?;
        if peer.remote.is_none() {
            return Err(EngineError::new("candidate before remote description"));
        }
        if !candidate.candidate.starts_with("candidate:") {
            return Err(EngineError::new(format!(
                "unparseable candidate: {}",
                candidate.candidate
            )));
        }
        peer.remote_candidates.push(candidate.clone());
        Ok(())
    }

    async fn add_track(&self, track: &MediaTrack) -> Result<(), EngineError> {
        let mut net = self.network.lock();
        let peer = net.peer(self.id)?;
        if peer.tracks.iter().any(|t| t.id() == track.id()) {
            return Err(EngineError::new("track already added"));
        }
        peer.tracks.push(track.clone());
        if peer.has_both_descriptions() {
            peer.emit(EngineEvent::NegotiationNeeded);
        }
        Ok(())
    }

    async fn remove_track(&self, track_id: &str) -> Result<(), EngineError> {
        let mut net = self.network.lock();
        let peer = net.peer(self.id)?;
        let before = peer.tracks.len();
        peer.tracks.retain(|t| t.id() != track_id);
        if peer.tracks.len() == before {
            return Err(EngineError::new("no such track"));
        }
        if peer.has_both_descriptions() {
            peer.emit(EngineEvent::NegotiationNeeded);
        }
        Ok(())
    }

    fn supports_replace_track(&self) -> bool {
        !self.network.lock().replace_unsupported
    }

    async fn replace_track(&self, track: &MediaTrack) -> Result<(), EngineError> {
        let mut net = self.network.lock();
        if net.replace_unsupported {
            return Err(EngineError::new("in-place track replacement not supported"));
        }
        let peer = net.peer(self.id)?;
        let slot = peer
            .tracks
            .iter_mut()
            .find(|t| t.kind() == track.kind())
            .ok_or_else(|| EngineError::new(format!("no {} sender to replace", track.kind())))?;
        *slot = track.clone();
        Ok(())
    }

    async fn create_data_channel(&self, config: &DataChannelConfig) -> Result<(), EngineError> {
        let mut net = self.network.lock();
        let peer = net.peer(self.id)?;
        if peer.channels.contains(&config.label) {
            return Err(EngineError::new(format!(
                "data channel {} already exists",
                config.label
            )));
        }
        peer.channels.push(config.label.clone());
        if peer.channels_open {
            peer.emit(EngineEvent::DataChannelOpen(config.label.clone()));
        }
        Ok(())
    }

    async fn send_data(&self, label: &str, data: Bytes) -> Result<(), EngineError> {
        let mut net = self.network.lock();
        let peer = net.peer(self.id)?;
        if !peer.channels_open || !peer.channels.iter().any(|l| l == label) {
            return Err(EngineError::new(format!("data channel {label} is not open")));
        }
        let other = net
            .other(self.id)
            .ok_or_else(|| EngineError::new("remote peer gone"))?;
        let remote = &net.peers[other];
        if remote.channels_open && remote.channels.iter().any(|l| l == label) {
            remote.emit(EngineEvent::DataChannelMessage {
                label: label.to_string(),
                data,
            });
        }
        Ok(())
    }

    async fn set_max_bitrate(&self, kind: MediaKind, bits_per_second: u64) -> Result<(), EngineError> {
        let mut net = self.network.lock();
        let peer = net.peer(self.id)?;
        peer.max_bitrate.insert(kind, bits_per_second);
        Ok(())
    }

    async fn stats(&self) -> Result<StatisticsSnapshot, EngineError> {
        let mut net = self.network.lock();
        let link = net.link;
        let other = net.other(self.id);
        let peer = net.peer(self.id)?;
        if !peer.connected {
            return Ok(StatisticsSnapshot::empty());
        }

        let mut snapshot = StatisticsSnapshot {
            captured_at: Instant::now(),
            round_trip_time: Some(link.rtt),
            ..StatisticsSnapshot::empty()
        };

        // Outbound: every live, enabled local track sends a sample's worth.
        for kind in [MediaKind::Audio, MediaKind::Video] {
            let sending = peer.live_track(kind).is_some_and(MediaTrack::is_enabled);
            if peer.live_track(kind).is_none() {
                continue;
            }
            let (pkts, size) = per_sample(kind);
            let c = peer.outbound.entry(kind).or_default();
            if sending {
                c.packets += pkts;
                c.bytes += pkts * size;
            }
            let out = OutboundRtpStats {
                packets_sent: c.packets,
                bytes_sent: c.bytes,
            };
            match kind {
                MediaKind::Audio => snapshot.outbound_audio = Some(out),
                MediaKind::Video => snapshot.outbound_video = Some(out),
            }
        }

        // Inbound: what the other side is sending, degraded by the link.
        let remote_sending: Vec<MediaKind> = match other {
            Some(o) => [MediaKind::Audio, MediaKind::Video]
                .into_iter()
                .filter(|k| net.peers[o].live_track(*k).is_some())
                .collect(),
            None => Vec::new(),
        };
        let peer = net.peer(self.id)?;
        for kind in remote_sending {
            let (pkts, size) = per_sample(kind);
            let lost = (pkts as f64 * link.loss_ratio.clamp(0.0, 1.0)).round() as u64;
            let c = peer.inbound.entry(kind).or_default();
            c.packets += pkts - lost;
            c.lost += lost;
            c.bytes += (pkts - lost) * size;
            let inbound = InboundRtpStats {
                packets_received: c.packets,
                packets_lost: c.lost,
                bytes_received: c.bytes,
                jitter: Some(link.jitter.as_secs_f64()),
            };
            match kind {
                MediaKind::Audio => snapshot.inbound_audio = Some(inbound),
                MediaKind::Video => snapshot.inbound_video = Some(inbound),
            }
        }

        Ok(snapshot)
    }

    async fn close(&self) {
        let mut net = self.network.lock();
        let Some(peer) = net.peers.get_mut(self.id) else {
            return;
        };
        if peer.closed {
            return;
        }
        peer.closed = true;
        peer.connected = false;
        peer.channels_open = false;
        for track in &peer.tracks {
            debug!(track = track.id(), "loopback sender detached");
        }
        peer.tracks.clear();

        if let Some(other) = net.other(self.id) {
            let remote = &mut net.peers[other];
            if remote.connected {
                remote.connected = false;
                remote.emit(EngineEvent::IceState(IceState::Disconnected));
                remote.emit(EngineEvent::ConnectionState(TransportState::Disconnected));
            }
            if remote.channels_open {
                remote.channels_open = false;
                for label in remote.channels.clone() {
                    remote.emit(EngineEvent::DataChannelClosed(label));
                }
            }
        }
    }
}

fn per_sample(kind: MediaKind) -> (u64, u64) {
    match kind {
        MediaKind::Audio => (AUDIO_PACKETS_PER_SAMPLE, AUDIO_PACKET_BYTES),
        MediaKind::Video => (VIDEO_PACKETS_PER_SAMPLE, VIDEO_PACKET_BYTES),
    }
}

// ── Tests ────────────────────────────────────────────────────────
