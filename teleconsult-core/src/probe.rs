//! Pre-flight device diagnostics.
//!
//! Every probe acquisition is short-lived and released before the call
//! returns, whatever the outcome.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::media::{
    AudioConstraints, CaptureRequest, DeviceClass, DeviceError, DeviceInfo, MediaDevices,
    MediaTrack, VideoConstraints,
};

/// Window over which the microphone level is sampled.
const LEVEL_WINDOW: Duration = Duration::from_millis(250);

/// Devices grouped by class.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceInventory {
    pub video_inputs: Vec<DeviceInfo>,
    pub audio_inputs: Vec<DeviceInfo>,
    pub audio_outputs: Vec<DeviceInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PermissionReport {
    pub camera: bool,
    pub microphone: bool,
    /// The first failure, phrased for the UI.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CameraCheck {
    pub working: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MicrophoneCheck {
    pub working: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeakerCheck {
    pub working: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelfTestReport {
    pub camera: CameraCheck,
    pub microphone: MicrophoneCheck,
    pub speaker: SpeakerCheck,
}

/// Runs device checks before a session is created.
pub struct DeviceProbe {
    devices: Arc<dyn MediaDevices>,
}

impl DeviceProbe {
    pub fn new(devices: Arc<dyn MediaDevices>) -> Self {
        Self { devices }
    }

    /// Enumerate devices grouped by class. Enumeration failure yields an
    /// empty inventory.
    pub async fn list_devices(&self) -> DeviceInventory {
        let all = match self.devices.enumerate().await {
            Ok(list) => list,
            Err(e) => {
                debug!("device enumeration failed: {e}");
                return DeviceInventory::default();
            }
        };

        let mut inventory = DeviceInventory::default();
        for device in all {
            match device.class {
                DeviceClass::VideoInput => inventory.video_inputs.push(device),
                DeviceClass::AudioInput => inventory.audio_inputs.push(device),
                DeviceClass::AudioOutput => inventory.audio_outputs.push(device),
            }
        }
        inventory
    }

    /// Try opening camera and microphone once each.
    pub async fn check_permissions(&self) -> PermissionReport {
        let camera = self.open_briefly(Self::camera_request()).await;
        let microphone = self.open_briefly(Self::microphone_request()).await;

        let error = match (&camera, &microphone) {
            (Err(e), _) => Some(Self::describe("camera", e)),
            (_, Err(e)) => Some(Self::describe("microphone", e)),
            _ => None,
        };

        PermissionReport {
            camera: camera.is_ok(),
            microphone: microphone.is_ok(),
            error,
        }
    }

    /// Exercise camera, microphone and speaker.
    pub async fn run_self_test(&self) -> SelfTestReport {
        let camera = match self.devices.open(Self::camera_request()).await {
            Ok(track) => {
                let s = track.settings();
                track.stop();
                CameraCheck {
                    working: true,
                    resolution: s.width.zip(s.height),
                }
            }
            Err(e) => {
                debug!("camera self-test failed: {e}");
                CameraCheck {
                    working: false,
                    resolution: None,
                }
            }
        };

        let microphone = match self.devices.open(Self::microphone_request()).await {
            Ok(track) => {
                let level = self.devices.measure_level(&track, LEVEL_WINDOW).await;
                track.stop();
                match level {
                    Ok(level) => MicrophoneCheck {
                        working: true,
                        level: Some(level),
                    },
                    Err(e) => {
                        debug!("microphone level check failed: {e}");
                        MicrophoneCheck {
                            working: false,
                            level: None,
                        }
                    }
                }
            }
            Err(e) => {
                debug!("microphone self-test failed: {e}");
                MicrophoneCheck {
                    working: false,
                    level: None,
                }
            }
        };

        let speaker = SpeakerCheck {
            working: self.devices.test_output(None).await.is_ok(),
        };

        SelfTestReport {
            camera,
            microphone,
            speaker,
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    async fn open_briefly(&self, request: CaptureRequest) -> Result<(), DeviceError> {
        let track: MediaTrack = self.devices.open(request).await?;
        track.stop();
        Ok(())
    }

    fn camera_request() -> CaptureRequest {
        CaptureRequest::Camera {
            device_id: None,
            constraints: VideoConstraints::LOW,
        }
    }

    fn microphone_request() -> CaptureRequest {
        CaptureRequest::Microphone {
            device_id: None,
            constraints: AudioConstraints::default(),
        }
    }

    fn describe(device: &str, err: &DeviceError) -> String {
        match err {
            DeviceError::PermissionDenied => format!("{device} access was denied"),
            DeviceError::DeviceBusy => format!("{device} is in use by another application"),
            DeviceError::NotFound => format!("no {device} found"),
            DeviceError::Unsupported => format!("{device} is not supported on this device"),
            DeviceError::Other(msg) => format!("{device} error: {msg}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaKind, SyntheticDevices, TrackSource};

    #[tokio::test]
    async fn inventory_groups_by_class() {
        let probe = DeviceProbe::new(Arc::new(SyntheticDevices::new()));
        let inv = probe.list_devices().await;
        assert_eq!(inv.video_inputs.len(), 1);
        assert_eq!(inv.audio_inputs.len(), 1);
        assert_eq!(inv.audio_outputs.len(), 1);
    }

    #[tokio::test]
    async fn busy_microphone_is_named() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.fail(TrackSource::Microphone, DeviceError::DeviceBusy);
        let probe = DeviceProbe::new(devices.clone());

        let report = probe.check_permissions().await;
        assert!(report.camera);
        assert!(!report.microphone);
        assert_eq!(
            report.error.as_deref(),
            Some("microphone is in use by another application")
        );
        assert_eq!(devices.live_tracks(MediaKind::Video), 0);
    }

    #[tokio::test]
    async fn self_test_releases_everything() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.set_input_level(0.5);
        let probe = DeviceProbe::new(devices.clone());

        let report = probe.run_self_test().await;
        assert!(report.camera.working);
        assert_eq!(report.camera.resolution, Some((320, 240)));
        assert_eq!(report.microphone.level, Some(0.5));
        assert!(report.speaker.working);
        assert_eq!(devices.live_tracks(MediaKind::Audio), 0);
        assert_eq!(devices.live_tracks(MediaKind::Video), 0);
    }

    #[tokio::test]
    async fn denied_camera_reported_in_self_test() {
        let devices = Arc::new(SyntheticDevices::new());
        devices.fail(TrackSource::Camera, DeviceError::PermissionDenied);
        devices.fail_output(DeviceError::NotFound);
        let report = DeviceProbe::new(devices).run_self_test().await;
        assert!(!report.camera.working);
        assert!(report.camera.resolution.is_none());
        assert!(report.microphone.working);
        assert!(!report.speaker.working);
    }
}
