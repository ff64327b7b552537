//! Integration tests: full session lifecycle, negotiation, candidate
//! buffering, media swapping and teardown over the in-process loopback
//! engine and synthetic devices.

use std::sync::Arc;
use std::time::Duration;

use teleconsult_core::{
    ChannelMessage, ChannelSignaling, ChannelState, ConnectionState, ConsultError, DeviceError,
    DeviceKinds, EventReceiver, IceCandidate, LinkConditions, LoopbackNetwork, MediaBundle,
    MediaDevices, MediaKind, MediaProfile, QualityLevel, Role, SdpKind, Session, SessionConfig,
    SessionDescription, SessionEvent, SignalingState, SyntheticDevices, TrackSource,
    TransportState,
};
use teleconsult_core::media::CaptureRequest;
use teleconsult_core::quality::{InboundRtpStats, QualityAssessment, StatisticsSnapshot};
use tokio_test::{assert_err, assert_ok};

// ── Helpers ──────────────────────────────────────────────────────

const EVENT_TIMEOUT: Duration = Duration::from_secs(7);

struct Peer {
    session: Session,
    events: EventReceiver,
    devices: Arc<SyntheticDevices>,
}

/// Two initialized sessions on one loopback network. The provider is
/// always loopback peer 0, the patient peer 1.
async fn peers(network: &LoopbackNetwork) -> (Peer, Peer) {
    let factory = Arc::new(network.factory());
    let mut out = Vec::new();
    for _ in 0..2 {
        let devices = Arc::new(SyntheticDevices::new());
        let session = Session::new(factory.clone(), devices.clone());
        let events = session.subscribe();
        session.initialize(SessionConfig::default()).await.unwrap();
        out.push(Peer {
            session,
            events,
            devices,
        });
    }
    let patient = out.pop().unwrap();
    let provider = out.pop().unwrap();
    (provider, patient)
}

async fn acquire_both(provider: &Peer, patient: &Peer) {
    provider.session.acquire_local_media(None).await.unwrap();
    patient.session.acquire_local_media(None).await.unwrap();
}

/// One complete offer/answer round, provider as initiator.
async fn negotiate(provider: &Peer, patient: &Peer) {
    let offer = provider.session.create_offer().await.unwrap();
    let answer = patient.session.create_answer(offer).await.unwrap();
    provider.session.apply_remote_answer(answer).await.unwrap();
}

async fn wait_for(
    events: &mut EventReceiver,
    what: &str,
    pred: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        loop {
            match events.recv().await {
                Some(ev) if pred(&ev) => return ev,
                Some(_) => continue,
                None => panic!("event stream ended while waiting for {what}"),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"))
}

async fn wait_connected(peer: &mut Peer) {
    wait_for(&mut peer.events, "connected", |ev| {
        matches!(ev, SessionEvent::ConnectionStateChange(s) if s.is_connected())
    })
    .await;
}

/// Drain the stream until it ends, returning everything seen.
async fn drain_to_end(events: &mut EventReceiver) -> Vec<SessionEvent> {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        let mut seen = Vec::new();
        while let Some(ev) = events.recv().await {
            seen.push(ev);
        }
        seen
    })
    .await
    .expect("event stream did not end")
}

fn candidate(n: u8) -> IceCandidate {
    IceCandidate::new(format!("candidate:{n} 1 udp 2122260223 10.0.0.{n} 9{n} typ host"))
}

// ── Negotiation scenario ─────────────────────────────────────────

#[tokio::test]
async fn test_full_round_connects_and_reports_quality() {
    let network = LoopbackNetwork::new();
    let (mut provider, mut patient) = peers(&network).await;
    acquire_both(&provider, &patient).await;

    let offer = provider.session.create_offer().await.unwrap();
    assert_eq!(offer.kind, SdpKind::Offer);
    assert_eq!(
        provider.session.info().signaling_state,
        SignalingState::HaveLocalOffer
    );

    let answer = patient.session.create_answer(offer).await.unwrap();
    assert_eq!(answer.kind, SdpKind::Answer);
    assert_eq!(patient.session.info().signaling_state, SignalingState::Stable);

    provider.session.apply_remote_answer(answer).await.unwrap();
    assert_eq!(provider.session.info().signaling_state, SignalingState::Stable);

    wait_connected(&mut provider).await;
    wait_connected(&mut patient).await;

    let info = provider.session.info();
    assert!(info.connection_state.is_connected());
    assert!(info.connected_at.is_some());
    assert_eq!(info.role, Some(Role::Initiator));
    assert_eq!(patient.session.info().role, Some(Role::Responder));

    // First sample is taken as soon as the session connects.
    let update = wait_for(&mut provider.events, "quality update", |ev| {
        matches!(ev, SessionEvent::QualityUpdate(_))
    })
    .await;
    let SessionEvent::QualityUpdate(update) = update else {
        unreachable!()
    };
    assert_eq!(update.assessment.connection, QualityLevel::Excellent);
    assert_eq!(provider.session.current_assessment(), update.assessment);

    provider.session.close().await;
    patient.session.close().await;
}

#[tokio::test]
async fn test_remote_media_is_announced() {
    let network = LoopbackNetwork::new();
    let (mut provider, patient) = peers(&network).await;
    acquire_both(&provider, &patient).await;
    negotiate(&provider, &patient).await;

    let mut kinds = Vec::new();
    for _ in 0..2 {
        let ev = wait_for(&mut provider.events, "remote media", |ev| {
            matches!(ev, SessionEvent::RemoteMediaReceived(_))
        })
        .await;
        if let SessionEvent::RemoteMediaReceived(info) = ev {
            kinds.push(info.kind);
        }
    }
    kinds.sort_by_key(|k| *k == MediaKind::Video);
    assert_eq!(kinds, vec![MediaKind::Audio, MediaKind::Video]);
}

#[tokio::test]
async fn test_signaling_relay_drives_negotiation() {
    let network = LoopbackNetwork::new();
    let factory = Arc::new(network.factory());
    let (provider_end, patient_end) = ChannelSignaling::pair();

    let provider = Session::with_signaling(
        factory.clone(),
        Arc::new(SyntheticDevices::new()),
        provider_end.relay.clone(),
    );
    let patient = Session::with_signaling(
        factory,
        Arc::new(SyntheticDevices::new()),
        patient_end.relay.clone(),
    );
    let mut provider_events = provider.subscribe();
    let mut patient_events = patient.subscribe();

    provider.initialize(SessionConfig::default()).await.unwrap();
    patient.initialize(SessionConfig::default()).await.unwrap();

    for (mut inbox, session) in [
        (provider_end.inbox, provider.clone()),
        (patient_end.inbox, patient.clone()),
    ] {
        tokio::spawn(async move {
            while let Some(msg) = inbox.recv().await {
                let _ = session.handle_signal(msg).await;
            }
        });
    }

    provider.create_offer().await.unwrap();

    for events in [&mut provider_events, &mut patient_events] {
        wait_for(events, "connected", |ev| {
            matches!(ev, SessionEvent::ConnectionStateChange(s) if s.is_connected())
        })
        .await;
    }
    assert_eq!(provider.info().signaling_state, SignalingState::Stable);

    // Gathered candidates crossed the relay too.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(network.remote_candidates(0).len(), 1);
    assert_eq!(network.remote_candidates(1).len(), 1);

    provider.close().await;
    patient.close().await;
}

// ── Candidate buffering ──────────────────────────────────────────

#[tokio::test]
async fn test_no_candidate_lost_regardless_of_arrival_order() {
    let network = LoopbackNetwork::new();
    let (provider, patient) = peers(&network).await;

    // Responder side: candidates before the offer arrives.
    for n in 1..=3 {
        assert_ok!(patient.session.add_remote_candidate(candidate(n)).await);
    }
    assert!(network.remote_candidates(1).is_empty());

    let offer = provider.session.create_offer().await.unwrap();

    // Initiator side: candidates between offer and answer.
    for n in 10..=11 {
        assert_ok!(provider.session.add_remote_candidate(candidate(n)).await);
    }
    assert!(network.remote_candidates(0).is_empty());

    let answer = patient.session.create_answer(offer).await.unwrap();
    assert_eq!(network.remote_candidates(1).len(), 3);

    provider.session.apply_remote_answer(answer).await.unwrap();
    assert_eq!(network.remote_candidates(0).len(), 2);

    // And after the descriptions are in place.
    assert_ok!(patient.session.add_remote_candidate(candidate(4)).await);
    assert_ok!(provider.session.add_remote_candidate(candidate(12)).await);

    let patient_side: Vec<_> = network.remote_candidates(1);
    assert_eq!(
        patient_side,
        vec![candidate(1), candidate(2), candidate(3), candidate(4)]
    );
    let provider_side: Vec<_> = network.remote_candidates(0);
    assert_eq!(
        provider_side,
        vec![candidate(10), candidate(11), candidate(12)]
    );
}

#[tokio::test]
async fn test_bad_candidate_is_rejected_but_session_survives() {
    let network = LoopbackNetwork::new();
    let (mut provider, mut patient) = peers(&network).await;
    negotiate(&provider, &patient).await;

    let res = provider
        .session
        .add_remote_candidate(IceCandidate::new("garbage"))
        .await;
    assert!(matches!(assert_err!(res), ConsultError::CandidateRejected(_)));

    wait_connected(&mut provider).await;
    wait_connected(&mut patient).await;
    assert!(!provider.session.is_closed());
}

// ── Collision policy ─────────────────────────────────────────────

#[tokio::test]
async fn test_second_offer_is_rejected_without_state_change() {
    let network = LoopbackNetwork::new();
    let (provider, patient) = peers(&network).await;

    let offer = provider.session.create_offer().await.unwrap();
    let err = assert_err!(provider.session.create_offer().await);
    assert!(matches!(err, ConsultError::NegotiationFailure(_)));
    assert_eq!(
        provider.session.info().signaling_state,
        SignalingState::HaveLocalOffer
    );

    // The outstanding round still completes.
    let answer = patient.session.create_answer(offer).await.unwrap();
    assert_ok!(provider.session.apply_remote_answer(answer).await);
    assert_eq!(provider.session.info().signaling_state, SignalingState::Stable);
}

#[tokio::test]
async fn test_responder_cannot_start_a_round() {
    let network = LoopbackNetwork::new();
    let (provider, patient) = peers(&network).await;
    negotiate(&provider, &patient).await;

    let err = assert_err!(patient.session.create_offer().await);
    assert!(matches!(err, ConsultError::NegotiationFailure(_)));
    assert_eq!(patient.session.info().signaling_state, SignalingState::Stable);

    // The initiator may renegotiate.
    let offer = provider.session.create_offer().await.unwrap();
    let answer = patient.session.create_answer(offer).await.unwrap();
    assert_ok!(provider.session.apply_remote_answer(answer).await);
}

#[tokio::test]
async fn test_malformed_answer_is_recoverable() {
    let network = LoopbackNetwork::new();
    let (provider, patient) = peers(&network).await;

    let offer = provider.session.create_offer().await.unwrap();
    let err = assert_err!(
        provider
            .session
            .apply_remote_answer(SessionDescription::answer("not a description"))
            .await
    );
    assert!(err.is_recoverable());
    assert_eq!(
        provider.session.info().signaling_state,
        SignalingState::HaveLocalOffer
    );

    let answer = patient.session.create_answer(offer).await.unwrap();
    assert_ok!(provider.session.apply_remote_answer(answer).await);
}

#[tokio::test]
async fn test_responder_renegotiation_waits_for_initiator() {
    let network = LoopbackNetwork::new();
    network.set_replace_supported(false);
    let (mut provider, mut patient) = peers(&network).await;
    acquire_both(&provider, &patient).await;
    negotiate(&provider, &patient).await;
    wait_connected(&mut provider).await;
    wait_connected(&mut patient).await;

    let bundle = patient.session.switch_to_screen_share().await.unwrap();
    let screen_id = bundle.video_track().unwrap().id().to_string();

    let mut info = patient.session.watch_info();
    tokio::time::timeout(EVENT_TIMEOUT, info.wait_for(|i| i.renegotiation_pending))
        .await
        .expect("timeout")
        .unwrap();

    // The initiator's next round carries the new track and clears the debt.
    let offer = provider.session.create_offer().await.unwrap();
    let answer = patient.session.create_answer(offer).await.unwrap();
    provider.session.apply_remote_answer(answer).await.unwrap();
    assert!(!patient.session.info().renegotiation_pending);

    wait_for(&mut provider.events, "screen track", |ev| {
        matches!(ev, SessionEvent::RemoteMediaReceived(t) if t.track_id == screen_id)
    })
    .await;

    // The responder never asked its application to offer.
    patient.session.close().await;
    let seen = drain_to_end(&mut patient.events).await;
    assert!(!seen
        .iter()
        .any(|ev| matches!(ev, SessionEvent::RenegotiationNeeded)));
}

#[tokio::test]
async fn test_initiator_is_told_to_renegotiate() {
    let network = LoopbackNetwork::new();
    network.set_replace_supported(false);
    let (mut provider, patient) = peers(&network).await;
    acquire_both(&provider, &patient).await;
    negotiate(&provider, &patient).await;
    wait_connected(&mut provider).await;

    provider.session.switch_to_screen_share().await.unwrap();
    wait_for(&mut provider.events, "renegotiation needed", |ev| {
        matches!(ev, SessionEvent::RenegotiationNeeded)
    })
    .await;
}

// ── Terminal state ───────────────────────────────────────────────

#[tokio::test]
async fn test_close_is_terminal() {
    let network = LoopbackNetwork::new();
    let (mut provider, mut patient) = peers(&network).await;
    acquire_both(&provider, &patient).await;
    negotiate(&provider, &patient).await;
    wait_connected(&mut provider).await;
    wait_connected(&mut patient).await;

    let session = &provider.session;
    session.close().await;
    session.close().await;

    assert!(session.is_closed());
    let info = session.info();
    assert!(info.closed_at.is_some());
    assert_eq!(info.connection_state, ConnectionState::Closed);
    assert_eq!(info.signaling_state, SignalingState::Closed);
    assert_eq!(provider.devices.live_tracks(MediaKind::Audio), 0);
    assert_eq!(provider.devices.live_tracks(MediaKind::Video), 0);

    assert_eq!(
        session.create_offer().await.unwrap_err(),
        ConsultError::Cancelled
    );
    assert_eq!(
        session.create_answer(SessionDescription::offer("v=0")).await.unwrap_err(),
        ConsultError::Cancelled
    );
    assert_eq!(
        session
            .apply_remote_answer(SessionDescription::answer("v=0"))
            .await
            .unwrap_err(),
        ConsultError::Cancelled
    );
    assert_eq!(
        session.add_remote_candidate(candidate(1)).await.unwrap_err(),
        ConsultError::Cancelled
    );
    assert_eq!(
        session.acquire_local_media(None).await.unwrap_err(),
        ConsultError::Cancelled
    );
    assert_eq!(session.toggle_audio(None).await.unwrap_err(), ConsultError::Cancelled);
    assert_eq!(
        session.switch_to_screen_share().await.unwrap_err(),
        ConsultError::Cancelled
    );
    assert_eq!(
        session.initialize(SessionConfig::default()).await.unwrap_err(),
        ConsultError::Cancelled
    );
    assert!(!session.side_channel().send(ChannelMessage::chat("late")));

    // Closed is the very last notification, then the stream ends.
    let seen = drain_to_end(&mut provider.events).await;
    assert!(matches!(seen.last(), Some(SessionEvent::Closed)));
    assert_eq!(
        seen.iter()
            .filter(|ev| matches!(ev, SessionEvent::Closed))
            .count(),
        1
    );
    let mut late = session.subscribe();
    assert!(late.recv().await.is_none());

    // The remote side notices.
    wait_for(&mut patient.events, "disconnected", |ev| {
        matches!(ev, SessionEvent::ConnectionStateChange(ConnectionState::Disconnected))
    })
    .await;
}

#[tokio::test]
async fn test_close_cancels_in_flight_acquisition() {
    let network = LoopbackNetwork::new();
    let (provider, _patient) = peers(&network).await;
    provider.devices.set_open_delay(Duration::from_millis(500));

    let session = provider.session.clone();
    let acquisition = tokio::spawn(async move { session.acquire_local_media(None).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    provider.session.close().await;

    let res = acquisition.await.unwrap();
    assert_eq!(res.unwrap_err(), ConsultError::Cancelled);
    assert_eq!(provider.devices.live_tracks(MediaKind::Video), 0);
    assert_eq!(provider.devices.live_tracks(MediaKind::Audio), 0);
}

#[tokio::test]
async fn test_close_releases_device_that_opened_before_cancel() {
    let network = LoopbackNetwork::new();
    let (provider, _patient) = peers(&network).await;
    provider
        .devices
        .set_source_delay(TrackSource::Camera, Duration::from_millis(500));

    let session = provider.session.clone();
    let acquisition = tokio::spawn(async move { session.acquire_local_media(None).await });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(provider.devices.live_tracks(MediaKind::Audio), 1);
    provider.session.close().await;

    let res = acquisition.await.unwrap();
    assert_eq!(res.unwrap_err(), ConsultError::Cancelled);
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(provider.devices.live_tracks(MediaKind::Audio), 0);
    assert_eq!(provider.devices.live_tracks(MediaKind::Video), 0);
}

#[tokio::test]
async fn test_dropping_every_handle_releases_media() {
    let network = LoopbackNetwork::new();
    let (provider, _patient) = peers(&network).await;
    provider.session.acquire_local_media(None).await.unwrap();
    assert_eq!(provider.devices.live_tracks(MediaKind::Video), 1);

    let Peer {
        session,
        mut events,
        devices,
    } = provider;
    drop(session);

    let seen = drain_to_end(&mut events).await;
    assert!(matches!(seen.last(), Some(SessionEvent::Closed)));
    assert_eq!(devices.live_tracks(MediaKind::Video), 0);
}

// ── Failure surfacing ────────────────────────────────────────────

#[tokio::test]
async fn test_initialize_twice_fails_on_second_call() {
    let network = LoopbackNetwork::new();
    let (provider, _patient) = peers(&network).await;

    let err = assert_err!(provider.session.initialize(SessionConfig::default()).await);
    assert!(matches!(err, ConsultError::InitFailure { fatal: false, .. }));
    assert!(!err.is_fatal());

    // The first initialization is untouched.
    assert!(!provider.session.is_closed());
    assert_ok!(provider.session.create_offer().await);
}

#[tokio::test]
async fn test_engine_init_failure_is_fatal() {
    let network = LoopbackNetwork::new();
    network.fail_next_create("no transport available");
    let session = Session::new(
        Arc::new(network.factory()),
        Arc::new(SyntheticDevices::new()),
    );
    let mut events = session.subscribe();

    let err = assert_err!(session.initialize(SessionConfig::default()).await);
    assert!(err.is_fatal());

    let seen = drain_to_end(&mut events).await;
    let errors = seen
        .iter()
        .filter(|ev| matches!(ev, SessionEvent::Error(ConsultError::InitFailure { .. })))
        .count();
    assert_eq!(errors, 1);
    assert!(matches!(seen.last(), Some(SessionEvent::Closed)));
    assert_eq!(session.create_offer().await.unwrap_err(), ConsultError::Cancelled);
}

#[tokio::test]
async fn test_invalid_config_is_an_init_failure() {
    let network = LoopbackNetwork::new();
    let session = Session::new(
        Arc::new(network.factory()),
        Arc::new(SyntheticDevices::new()),
    );
    let config = SessionConfig {
        ice_servers: Vec::new(),
        ..SessionConfig::default()
    };
    let err = assert_err!(session.initialize(config).await);
    assert!(matches!(err, ConsultError::InitFailure { .. }));
    assert!(session.is_closed());
    assert_eq!(network.peer_count(), 0);
}

#[tokio::test]
async fn test_transport_failure_surfaces_once_then_closes() {
    let network = LoopbackNetwork::new();
    let (mut provider, mut patient) = peers(&network).await;
    acquire_both(&provider, &patient).await;
    negotiate(&provider, &patient).await;
    wait_connected(&mut provider).await;
    wait_connected(&mut patient).await;

    network.set_transport_state(TransportState::Failed);

    let seen = drain_to_end(&mut provider.events).await;
    let errors = seen
        .iter()
        .filter(|ev| matches!(ev, SessionEvent::Error(_)))
        .count();
    assert_eq!(errors, 1);
    assert!(seen
        .iter()
        .any(|ev| matches!(ev, SessionEvent::ConnectionStateChange(ConnectionState::Failed))));
    assert!(matches!(seen.last(), Some(SessionEvent::Closed)));
    assert!(provider.session.is_closed());
    assert_eq!(provider.devices.live_tracks(MediaKind::Video), 0);
}

#[tokio::test]
async fn test_disconnect_then_recovery() {
    let network = LoopbackNetwork::new();
    let (mut provider, patient) = peers(&network).await;
    negotiate(&provider, &patient).await;
    wait_connected(&mut provider).await;

    network.set_transport_state(TransportState::Disconnected);
    wait_for(&mut provider.events, "disconnected", |ev| {
        matches!(ev, SessionEvent::ConnectionStateChange(ConnectionState::Disconnected))
    })
    .await;

    network.set_transport_state(TransportState::Connecting);
    wait_for(&mut provider.events, "recovering", |ev| {
        matches!(ev, SessionEvent::ConnectionStateChange(ConnectionState::Recovering))
    })
    .await;
    assert_eq!(
        provider.session.info().connection_state.to_string(),
        "connecting-recovery"
    );

    network.set_transport_state(TransportState::Connected);
    wait_connected(&mut provider).await;
    assert!(!provider.session.is_closed());
}

// ── Media ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_screen_share_then_camera_leaves_one_video_track() {
    let network = LoopbackNetwork::new();
    let (provider, patient) = peers(&network).await;
    acquire_both(&provider, &patient).await;
    negotiate(&provider, &patient).await;

    let session = &provider.session;
    let (screen, camera) = tokio::join!(session.switch_to_screen_share(), session.switch_to_camera());
    assert_eq!(
        screen.unwrap().video_track().unwrap().source(),
        TrackSource::Screen
    );
    let camera = camera.unwrap();
    assert_eq!(camera.video_track().unwrap().source(), TrackSource::Camera);

    assert_eq!(provider.devices.live_tracks(MediaKind::Video), 1);
    let sending = network.sending_tracks(0);
    assert_eq!(sending.len(), 2);
    assert!(sending.contains(&camera.video_track().unwrap().id().to_string()));
}

#[tokio::test]
async fn test_screen_share_failure_falls_back_to_camera() {
    let network = LoopbackNetwork::new();
    let (provider, patient) = peers(&network).await;
    acquire_both(&provider, &patient).await;
    provider
        .devices
        .fail(TrackSource::Screen, DeviceError::PermissionDenied);

    let err = assert_err!(provider.session.switch_to_screen_share().await);
    assert_eq!(err, ConsultError::ScreenShareFailure(DeviceError::PermissionDenied));
    assert_eq!(provider.devices.live_tracks(MediaKind::Video), 1);

    // The restored camera is what the engine sends.
    let sending = network.sending_tracks(0);
    assert_eq!(sending.len(), 2);
}

#[tokio::test]
async fn test_acquisition_failures_name_the_device_and_reason() {
    let network = LoopbackNetwork::new();
    let (provider, patient) = peers(&network).await;

    provider
        .devices
        .fail(TrackSource::Camera, DeviceError::DeviceBusy);
    let err = assert_err!(provider.session.acquire_local_media(None).await);
    assert_eq!(
        err,
        ConsultError::AcquisitionFailure {
            devices: DeviceKinds::CAMERA,
            reason: DeviceError::DeviceBusy,
        }
    );
    assert_eq!(provider.devices.live_tracks(MediaKind::Audio), 0);

    patient
        .devices
        .fail(TrackSource::Microphone, DeviceError::PermissionDenied);
    patient.devices.fail(TrackSource::Camera, DeviceError::NotFound);
    let err = assert_err!(patient.session.acquire_local_media(None).await);
    assert_eq!(
        err,
        ConsultError::AcquisitionFailure {
            devices: DeviceKinds::CAMERA | DeviceKinds::MICROPHONE,
            reason: DeviceError::PermissionDenied,
        }
    );

    // Retry after the user fixes things.
    provider.devices.recover(TrackSource::Camera);
    assert_ok!(provider.session.acquire_local_media(None).await);
}

#[tokio::test]
async fn test_profile_selects_capture_constraints() {
    let network = LoopbackNetwork::new();
    let (provider, _patient) = peers(&network).await;
    let bundle = provider
        .session
        .acquire_local_media_with(MediaProfile::High, None)
        .await
        .unwrap();
    assert_eq!(bundle.video_track().unwrap().settings().width, Some(1280));

    // Default profile is auto; no hint means medium.
    let bundle = provider.session.acquire_local_media(None).await.unwrap();
    assert_eq!(bundle.video_track().unwrap().settings().height, Some(480));
    assert_eq!(bundle.video_track().unwrap().settings().frame_rate, Some(30));
    assert_eq!(provider.devices.live_tracks(MediaKind::Video), 1);
    assert_eq!(network.sending_tracks(0).len(), 2);
}

#[tokio::test]
async fn test_toggles_keep_tracks_allocated() {
    let network = LoopbackNetwork::new();
    let (provider, _patient) = peers(&network).await;
    provider.session.acquire_local_media(None).await.unwrap();

    assert!(!provider.session.toggle_audio(None).await.unwrap());
    assert!(provider.session.toggle_audio(Some(true)).await.unwrap());
    assert!(!provider.session.toggle_video(Some(false)).await.unwrap());
    assert_eq!(provider.devices.live_tracks(MediaKind::Video), 1);
    assert_eq!(provider.devices.live_tracks(MediaKind::Audio), 1);
}

#[tokio::test]
async fn test_replace_video_source() {
    let network = LoopbackNetwork::new();
    let (provider, patient) = peers(&network).await;
    acquire_both(&provider, &patient).await;
    negotiate(&provider, &patient).await;

    // No video in the bundle: rejected, nothing changes.
    let mic = provider
        .devices
        .open(CaptureRequest::Microphone {
            device_id: None,
            constraints: Default::default(),
        })
        .await
        .unwrap();
    let err = assert_err!(
        provider
            .session
            .replace_video_source(MediaBundle::from_tracks([mic.clone()]))
            .await
    );
    assert!(matches!(err, ConsultError::ReplaceFailure(_)));
    assert!(!mic.is_live());

    // A screen capture acquired by the application.
    let screen = provider.devices.open(CaptureRequest::Screen).await.unwrap();
    assert_ok!(
        provider
            .session
            .replace_video_source(MediaBundle::from_tracks([screen.clone()]))
            .await
    );
    assert!(network.sending_tracks(0).contains(&screen.id().to_string()));
    assert_eq!(provider.devices.live_tracks(MediaKind::Video), 1);
}

#[tokio::test]
async fn test_failed_replacement_keeps_previous_source() {
    let network = LoopbackNetwork::new();
    let (provider, patient) = peers(&network).await;
    acquire_both(&provider, &patient).await;
    negotiate(&provider, &patient).await;
    let before = network.sending_tracks(0);

    // A track already stopped cannot be sent.
    let screen = provider.devices.open(CaptureRequest::Screen).await.unwrap();
    screen.stop();
    let err = assert_err!(
        provider
            .session
            .replace_video_source(MediaBundle::from_tracks([screen]))
            .await
    );
    assert!(matches!(err, ConsultError::ReplaceFailure(_)));
    assert_eq!(network.sending_tracks(0), before);
    assert_eq!(provider.devices.live_tracks(MediaKind::Video), 1);
}

// ── Quality ──────────────────────────────────────────────────────

fn vector(rtt_ms: u64, loss: f64, jitter: f64) -> StatisticsSnapshot {
    let lost = (loss * 1000.0).round() as u64;
    StatisticsSnapshot {
        round_trip_time: Some(Duration::from_millis(rtt_ms)),
        inbound_video: Some(InboundRtpStats {
            packets_received: 1000 - lost,
            packets_lost: lost,
            ..Default::default()
        }),
        inbound_audio: Some(InboundRtpStats {
            jitter: Some(jitter),
            ..Default::default()
        }),
        ..StatisticsSnapshot::empty()
    }
}

#[test]
fn test_classification_vectors() {
    let healthy = QualityAssessment::from_snapshot(&vector(80, 0.005, 0.01));
    assert_eq!(healthy.connection, QualityLevel::Excellent);
    assert_eq!(healthy.video, QualityLevel::Excellent);
    assert_eq!(healthy.audio, QualityLevel::Excellent);

    let degraded = QualityAssessment::from_snapshot(&vector(400, 0.07, 0.07));
    assert_eq!(degraded.connection, QualityLevel::Fair);
    assert_eq!(degraded.video, QualityLevel::Fair);
    assert_eq!(degraded.audio, QualityLevel::Fair);
}

#[tokio::test]
async fn test_degraded_link_is_classified_fair_end_to_end() {
    let network = LoopbackNetwork::with_link(LinkConditions {
        rtt: Duration::from_millis(400),
        loss_ratio: 0.07,
        jitter: Duration::from_millis(70),
    });
    let (mut provider, patient) = peers(&network).await;
    acquire_both(&provider, &patient).await;
    negotiate(&provider, &patient).await;

    let ev = wait_for(&mut provider.events, "quality update", |ev| {
        matches!(ev, SessionEvent::QualityUpdate(_))
    })
    .await;
    let SessionEvent::QualityUpdate(update) = ev else {
        unreachable!()
    };
    assert_eq!(update.assessment.connection, QualityLevel::Fair);
    assert_eq!(update.assessment.video, QualityLevel::Fair);
    assert_eq!(update.assessment.audio, QualityLevel::Fair);

    assert_ok!(provider.session.set_max_video_bitrate(300_000).await);
    assert_eq!(network.max_bitrate(0, MediaKind::Video), Some(300_000));
}

#[tokio::test]
async fn test_monitor_stops_when_disconnected() {
    let network = LoopbackNetwork::new();
    let (mut provider, patient) = peers(&network).await;
    negotiate(&provider, &patient).await;
    wait_for(&mut provider.events, "quality update", |ev| {
        matches!(ev, SessionEvent::QualityUpdate(_))
    })
    .await;

    network.set_transport_state(TransportState::Disconnected);
    wait_for(&mut provider.events, "disconnected", |ev| {
        matches!(ev, SessionEvent::ConnectionStateChange(ConnectionState::Disconnected))
    })
    .await;

    // Longer than one sampling interval: nothing more is sampled.
    let next = tokio::time::timeout(Duration::from_secs(6), async {
        loop {
            match provider.events.recv().await {
                Some(SessionEvent::QualityUpdate(_)) => return true,
                Some(_) => continue,
                None => return false,
            }
        }
    })
    .await;
    assert!(next.is_err(), "quality sampled while disconnected");
}

// ── Side channel ─────────────────────────────────────────────────

#[tokio::test]
async fn test_side_channel_send_before_open_returns_false() {
    let network = LoopbackNetwork::new();
    let (provider, _patient) = peers(&network).await;

    let channel = provider.session.side_channel();
    assert_eq!(channel.state(), ChannelState::Connecting);
    assert!(!channel.send(ChannelMessage::chat("hello?")));
    assert_eq!(channel.counters().sent, 0);
}

#[tokio::test]
async fn test_side_channel_delivers_in_order() {
    let network = LoopbackNetwork::new();
    let (mut provider, mut patient) = peers(&network).await;
    negotiate(&provider, &patient).await;

    wait_for(&mut provider.events, "channel open", |ev| {
        matches!(ev, SessionEvent::DataChannelStateChange(ChannelState::Open))
    })
    .await;
    wait_for(&mut patient.events, "channel open", |ev| {
        matches!(ev, SessionEvent::DataChannelStateChange(ChannelState::Open))
    })
    .await;

    let (tx, mut handled) = tokio::sync::mpsc::unbounded_channel();
    patient.session.side_channel().on_message(move |env| {
        let _ = tx.send(env.message.clone());
    });

    let channel = provider.session.side_channel();
    assert!(channel.send(ChannelMessage::Typing { active: true }));
    assert!(channel.send(ChannelMessage::chat("How are you feeling today?")));
    assert!(channel.send(ChannelMessage::status("vitals", "shared")));

    let mut seqs = Vec::new();
    for _ in 0..3 {
        let ev = wait_for(&mut patient.events, "channel message", |ev| {
            matches!(ev, SessionEvent::DataChannelMessage(_))
        })
        .await;
        if let SessionEvent::DataChannelMessage(env) = ev {
            seqs.push(env.seq);
        }
    }
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(
        handled.recv().await,
        Some(ChannelMessage::Typing { active: true })
    );
    assert_eq!(
        handled.recv().await,
        Some(ChannelMessage::chat("How are you feeling today?"))
    );
    assert_eq!(channel.counters().sent, 3);
    assert_eq!(patient.session.side_channel().counters().received, 3);
}
