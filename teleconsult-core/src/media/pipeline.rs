//! Local capture acquisition and video-source swapping.
//!
//! The pipeline owns the local [`MediaBundle`]. Swapping the video source
//! always stops the previous video track *before* opening the next one so a
//! single-camera device is never asked for two handles at once.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::error::ConsultError;
use crate::media::bundle::MediaBundle;
use crate::media::device::{CaptureRequest, DeviceError, DeviceKinds, MediaDevices};
use crate::media::profile::{AudioConstraints, MediaProfile, NetworkHint, VideoConstraints};
use crate::media::track::{MediaKind, MediaTrack, TrackSource};

/// Acquires and manages the local capture tracks.
pub struct MediaPipeline {
    devices: Arc<dyn MediaDevices>,
    bundle: MediaBundle,
    video_constraints: VideoConstraints,
    audio_constraints: AudioConstraints,
    camera_device: Option<String>,
    microphone_device: Option<String>,
}

impl MediaPipeline {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self {
            devices,
            bundle: MediaBundle::new(),
            video_constraints: VideoConstraints::MEDIUM,
            audio_constraints: AudioConstraints::default(),
            camera_device: None,
            microphone_device: None,
        }
    }

    /// Pin specific device ids instead of the platform defaults.
    pub fn with_preferred_devices(
        mut self,
        camera: Option<String>,
        microphone: Option<String>,
    ) -> Self {
        self.camera_device = camera;
        self.microphone_device = microphone;
        self
    }

    pub fn with_audio_constraints(mut self, constraints: AudioConstraints) -> Self {
        self.audio_constraints = constraints;
        self
    }

    /// The currently owned bundle (observation handle).
    pub fn bundle(&self) -> &MediaBundle {
        &self.bundle
    }

    /// Constraints chosen at the last acquisition.
    pub fn video_constraints(&self) -> VideoConstraints {
        self.video_constraints
    }

    /// Source of the current outgoing video track, if any.
    pub fn video_source(&self) -> Option<TrackSource> {
        self.bundle.video_track().map(MediaTrack::source)
    }

    /// Open microphone and camera according to `profile`.
    ///
    /// If either device fails, whatever did open is released again and the
    /// error names every device that failed.
    pub async fn acquire(
        &mut self,
        profile: MediaProfile,
        hint: Option<&NetworkHint>,
    ) -> Result<MediaBundle, ConsultError> {
        if !self.bundle.is_empty() {
            debug!("re-acquiring: releasing previous bundle");
            self.release();
        }

        self.video_constraints = profile.video_constraints(hint);
        info!(
            %profile,
            width = self.video_constraints.width,
            height = self.video_constraints.height,
            fps = self.video_constraints.frame_rate,
            "acquiring local media"
        );

        // Dropping this future mid-join (session close) must not leak
        // whichever device already opened.
        let pending = PendingTracks::default();
        let (audio, video) = futures::join!(
            pending.open(&self.devices, self.microphone_request()),
            pending.open(&self.devices, self.camera_request()),
        );
        pending.commit();

        match (audio, video) {
            (Ok(mic), Ok(cam)) => {
                self.bundle = MediaBundle::from_tracks([mic, cam]);
                Ok(self.bundle.clone())
            }
            (Err(audio_err), Err(video_err)) => {
                Err(ConsultError::acquisition(
                    DeviceKinds::all(),
                    Self::dominant(audio_err, video_err),
                ))
            }
            (Ok(mic), Err(err)) => {
                mic.stop();
                Err(ConsultError::acquisition(DeviceKinds::CAMERA, err))
            }
            (Err(err), Ok(cam)) => {
                cam.stop();
                Err(ConsultError::acquisition(DeviceKinds::MICROPHONE, err))
            }
        }
    }

    /// Mute or unmute the microphone. `None` flips the current state.
    ///
    /// Returns the resulting enabled state (`false` when there is no track).
    pub fn toggle_audio(&self, enabled: Option<bool>) -> bool {
        self.toggle(MediaKind::Audio, enabled)
    }

    /// Pause or resume outgoing video. `None` flips the current state.
    pub fn toggle_video(&self, enabled: Option<bool>) -> bool {
        self.toggle(MediaKind::Video, enabled)
    }

    /// Replace the camera with a screen capture.
    ///
    /// On failure the camera is re-opened (best effort) and
    /// [`ConsultError::ScreenShareFailure`] is returned.
    pub async fn switch_to_screen_share(&mut self) -> Result<MediaBundle, ConsultError> {
        if self.video_source() == Some(TrackSource::Screen) {
            return Ok(self.bundle.clone());
        }
        let had_camera = self.stop_video();

        match self.devices.open(CaptureRequest::Screen).await {
            Ok(screen) => {
                info!("screen share started");
                self.bundle.push(screen);
                Ok(self.bundle.clone())
            }
            Err(err) => {
                warn!("screen share failed: {err}");
                if had_camera {
                    match self.devices.open(self.camera_request()).await {
                        Ok(cam) => self.bundle.push(cam),
                        Err(e) => warn!("could not restore camera after failed screen share: {e}"),
                    }
                }
                Err(ConsultError::ScreenShareFailure(err))
            }
        }
    }

    /// Return from screen share (or a lost camera) to the camera.
    pub async fn switch_to_camera(&mut self) -> Result<MediaBundle, ConsultError> {
        if self.video_source() == Some(TrackSource::Camera) {
            return Ok(self.bundle.clone());
        }
        self.stop_video();

        let cam = self
            .devices
            .open(self.camera_request())
            .await
            .map_err(|e| ConsultError::acquisition(DeviceKinds::CAMERA, e))?;
        info!("camera restored");
        self.bundle.push(cam);
        Ok(self.bundle.clone())
    }

    /// Install an externally acquired video track.
    ///
    /// The previous video track is handed back *without* being stopped so
    /// the caller can keep it if the swap fails downstream.
    pub fn adopt_video(&mut self, track: MediaTrack) -> Option<MediaTrack> {
        let previous = self.bundle.take(MediaKind::Video);
        self.bundle.push(track);
        previous
    }

    /// Put a previously detached video track back in place of the current
    /// one, stopping the current one.
    pub fn restore_video(&mut self, track: MediaTrack) {
        self.stop_video();
        self.bundle.push(track);
    }

    /// Stop and drop the current video track, if any.
    pub fn discard_video(&mut self) -> bool {
        match self.bundle.take(MediaKind::Video) {
            Some(track) => track.stop(),
            None => false,
        }
    }

    /// Stop every owned track. Double release is a no-op.
    pub fn release(&mut self) -> usize {
        let released = self.bundle.release();
        if released > 0 {
            debug!(released, "local media released");
        }
        self.bundle = MediaBundle::new();
        released
    }

    // ── Internal ─────────────────────────────────────────────────

    fn toggle(&self, kind: MediaKind, enabled: Option<bool>) -> bool {
        let Some(track) = self.bundle.tracks().iter().find(|t| t.kind() == kind) else {
            return false;
        };
        let target = enabled.unwrap_or(!track.is_enabled());
        self.bundle.set_enabled(kind, target)
    }

    /// Stop and drop the current video track. Returns `true` if it was a
    /// camera.
    fn stop_video(&mut self) -> bool {
        match self.bundle.take(MediaKind::Video) {
            Some(track) => {
                track.stop();
                track.source() == TrackSource::Camera
            }
            None => false,
        }
    }

    fn camera_request(&self) -> CaptureRequest {
        CaptureRequest::Camera {
            device_id: self.camera_device.clone(),
            constraints: self.video_constraints,
        }
    }

    fn microphone_request(&self) -> CaptureRequest {
        CaptureRequest::Microphone {
            device_id: self.microphone_device.clone(),
            constraints: self.audio_constraints,
        }
    }

    /// Pick the more actionable reason when both devices fail.
    fn dominant(audio: DeviceError, video: DeviceError) -> DeviceError {
        match (&audio, &video) {
            (DeviceError::PermissionDenied, _) | (_, DeviceError::PermissionDenied) => {
                DeviceError::PermissionDenied
            }
            (DeviceError::DeviceBusy, _) | (_, DeviceError::DeviceBusy) => DeviceError::DeviceBusy,
            _ => video,
        }
    }
}

/// Tracks opened by an acquisition that has not finished yet. Anything
/// still held on drop is stopped.
#[derive(Default)]
struct PendingTracks(Mutex<Vec<MediaTrack>>);

impl PendingTracks {
    async fn open(
        &self,
        devices: &Arc<dyn MediaDevices>,
        request: CaptureRequest,
    ) -> Result<MediaTrack, DeviceError> {
        let opened = devices.open(request).await;
        if let Ok(track) = &opened {
            self.lock().push(track.clone());
        }
        opened
    }

    /// Hand ownership of every held track to the caller.
    fn commit(self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, Vec<MediaTrack>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for PendingTracks {
    fn drop(&mut self) {
        for track in self.lock().drain(..) {
            if track.stop() {
                debug!(source = ?track.source(), "abandoned acquisition: track stopped");
            }
        }
    }
}

impl Drop for MediaPipeline {
    fn drop(&mut self) {
        self.bundle.release();
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::profile::ConnectionClass;
    use crate::media::synthetic::SyntheticDevices;
    use std::time::Duration;

    fn pipeline() -> (Arc<SyntheticDevices>, MediaPipeline) {
        let devices = Arc::new(SyntheticDevices::new());
        let pipeline = MediaPipeline::new(devices.clone());
        (devices, pipeline)
    }

    #[tokio::test]
    async fn acquire_opens_both_devices() {
        let (devices, mut p) = pipeline();
        let bundle = p.acquire(MediaProfile::High, None).await.unwrap();
        assert!(bundle.has_audio() && bundle.has_video());
        assert_eq!(bundle.video_track().unwrap().settings().width, Some(1280));
        assert_eq!(devices.live_tracks(MediaKind::Video), 1);
        assert_eq!(devices.live_tracks(MediaKind::Audio), 1);
    }

    #[tokio::test]
    async fn auto_profile_uses_hint() {
        let (_, mut p) = pipeline();
        let hint = NetworkHint::new(ConnectionClass::Cellular3g);
        p.acquire(MediaProfile::Auto, Some(&hint)).await.unwrap();
        assert_eq!(p.video_constraints(), VideoConstraints::CONSTRAINED);
    }

    #[tokio::test]
    async fn camera_failure_releases_microphone() {
        let (devices, mut p) = pipeline();
        devices.fail(TrackSource::Camera, DeviceError::DeviceBusy);
        let err = p.acquire(MediaProfile::Medium, None).await.unwrap_err();
        assert_eq!(
            err,
            ConsultError::acquisition(DeviceKinds::CAMERA, DeviceError::DeviceBusy)
        );
        assert_eq!(devices.live_tracks(MediaKind::Audio), 0);
        assert!(p.bundle().is_empty());
    }

    #[tokio::test]
    async fn abandoned_acquisition_stops_opened_microphone() {
        let (devices, mut p) = pipeline();
        devices.set_source_delay(TrackSource::Camera, Duration::from_millis(500));

        let res = tokio::time::timeout(
            Duration::from_millis(50),
            p.acquire(MediaProfile::Medium, None),
        )
        .await;
        assert!(res.is_err());
        assert_eq!(devices.opened_count(), 1);
        assert_eq!(devices.live_tracks(MediaKind::Audio), 0);
        assert!(p.bundle().is_empty());
    }

    #[tokio::test]
    async fn both_failing_reports_both() {
        let (devices, mut p) = pipeline();
        devices.fail(TrackSource::Camera, DeviceError::NotFound);
        devices.fail(TrackSource::Microphone, DeviceError::PermissionDenied);
        match p.acquire(MediaProfile::Low, None).await {
            Err(ConsultError::AcquisitionFailure { devices, reason }) => {
                assert_eq!(devices, DeviceKinds::all());
                assert_eq!(reason, DeviceError::PermissionDenied);
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[tokio::test]
    async fn toggles_do_not_release() {
        let (devices, mut p) = pipeline();
        p.acquire(MediaProfile::Medium, None).await.unwrap();
        assert!(!p.toggle_audio(None));
        assert!(p.toggle_audio(None));
        assert!(!p.toggle_video(Some(false)));
        assert_eq!(devices.live_tracks(MediaKind::Video), 1);
    }

    #[tokio::test]
    async fn screen_share_round_trip_keeps_one_video_track() {
        let (devices, mut p) = pipeline();
        p.acquire(MediaProfile::Medium, None).await.unwrap();

        p.switch_to_screen_share().await.unwrap();
        assert_eq!(p.video_source(), Some(TrackSource::Screen));
        assert_eq!(devices.live_tracks(MediaKind::Video), 1);

        p.switch_to_camera().await.unwrap();
        assert_eq!(p.video_source(), Some(TrackSource::Camera));
        assert_eq!(devices.live_tracks(MediaKind::Video), 1);
        assert_eq!(p.bundle().live_count(MediaKind::Video), 1);
    }

    #[tokio::test]
    async fn failed_screen_share_restores_camera() {
        let (devices, mut p) = pipeline();
        p.acquire(MediaProfile::Medium, None).await.unwrap();
        devices.fail(TrackSource::Screen, DeviceError::PermissionDenied);

        let err = p.switch_to_screen_share().await.unwrap_err();
        assert_eq!(err, ConsultError::ScreenShareFailure(DeviceError::PermissionDenied));
        assert_eq!(p.video_source(), Some(TrackSource::Camera));
        assert_eq!(devices.live_tracks(MediaKind::Video), 1);
    }

    #[tokio::test]
    async fn release_twice_is_noop() {
        let (devices, mut p) = pipeline();
        p.acquire(MediaProfile::Medium, None).await.unwrap();
        assert_eq!(p.release(), 2);
        assert_eq!(p.release(), 0);
        assert_eq!(devices.live_tracks(MediaKind::Video), 0);
    }

    #[tokio::test]
    async fn adopt_video_hands_back_previous() {
        let (devices, mut p) = pipeline();
        p.acquire(MediaProfile::Medium, None).await.unwrap();
        let external = devices.open(CaptureRequest::Screen).await.unwrap();
        let previous = p.adopt_video(external).unwrap();
        assert!(previous.is_live());
        assert_eq!(p.video_source(), Some(TrackSource::Screen));

        p.restore_video(previous);
        assert_eq!(p.video_source(), Some(TrackSource::Camera));
        assert_eq!(devices.live_tracks(MediaKind::Video), 1);
    }
}
