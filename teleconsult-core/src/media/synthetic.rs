//! In-process virtual device set.
//!
//! Used by the agent's self-test and by tests. Every opened track is kept
//! so callers can assert how many device handles are live at any moment.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::media::device::{
    CaptureRequest, DeviceClass, DeviceError, DeviceInfo, MediaDevices,
};
use crate::media::track::{MediaKind, MediaTrack, TrackSettings, TrackSource};

#[derive(Debug, Default)]
struct SyntheticState {
    failures: HashMap<TrackSource, DeviceError>,
    output_failure: Option<DeviceError>,
    opened: Vec<MediaTrack>,
    open_delay: Duration,
    source_delays: HashMap<TrackSource, Duration>,
    input_level: f32,
}

/// A virtual camera, microphone, speaker and display.
#[derive(Debug)]
pub struct SyntheticDevices {
    devices: Vec<DeviceInfo>,
    state: Mutex<SyntheticState>,
}

impl SyntheticDevices {
    /// One device of every class.
    pub fn new() -> Self {
        Self::with_devices(vec![
            DeviceInfo {
                device_id: "synthetic-camera-0".into(),
                label: "Synthetic Camera".into(),
                class: DeviceClass::VideoInput,
            },
            DeviceInfo {
                device_id: "synthetic-mic-0".into(),
                label: "Synthetic Microphone".into(),
                class: DeviceClass::AudioInput,
            },
            DeviceInfo {
                device_id: "synthetic-speaker-0".into(),
                label: "Synthetic Speaker".into(),
                class: DeviceClass::AudioOutput,
            },
        ])
    }

    pub fn with_devices(devices: Vec<DeviceInfo>) -> Self {
        Self {
            devices,
            state: Mutex::new(SyntheticState {
                input_level: 0.42,
                ..Default::default()
            }),
        }
    }

    /// Make every subsequent `open` of `source` fail with `error`.
    pub fn fail(&self, source: TrackSource, error: DeviceError) {
        self.lock().failures.insert(source, error);
    }

    /// Clear an injected failure.
    pub fn recover(&self, source: TrackSource) {
        self.lock().failures.remove(&source);
    }

    pub fn fail_output(&self, error: DeviceError) {
        self.lock().output_failure = Some(error);
    }

    /// Delay every `open` by `delay`.
    pub fn set_open_delay(&self, delay: Duration) {
        self.lock().open_delay = delay;
    }

    /// Delay `open` of `source` by `delay`, overriding the shared delay.
    pub fn set_source_delay(&self, source: TrackSource, delay: Duration) {
        self.lock().source_delays.insert(source, delay);
    }

    pub fn set_input_level(&self, level: f32) {
        self.lock().input_level = level.clamp(0.0, 1.0);
    }

    /// Number of live device handles of `kind`.
    pub fn live_tracks(&self, kind: MediaKind) -> usize {
        self.lock()
            .opened
            .iter()
            .filter(|t| t.kind() == kind && t.is_live())
            .count()
    }

    /// Total number of `open` calls that succeeded.
    pub fn opened_count(&self) -> usize {
        self.lock().opened.len()
    }

    fn has_class(&self, class: DeviceClass) -> bool {
        self.devices.iter().any(|d| d.class == class)
    }

    fn label_for(&self, class: DeviceClass, device_id: Option<&str>) -> Option<String> {
        self.devices
            .iter()
            .filter(|d| d.class == class)
            .find(|d| device_id.is_none_or(|id| d.device_id == id))
            .map(|d| d.label.clone())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SyntheticState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SyntheticDevices {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaDevices for SyntheticDevices {
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError> {
        Ok(self.devices.clone())
    }

    async fn open(&self, request: CaptureRequest) -> Result<MediaTrack, DeviceError> {
        let source = request.source();
        let delay = {
            let state = self.lock();
            state.source_delays.get(&source).copied().unwrap_or(state.open_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(err) = self.lock().failures.get(&source) {
            return Err(err.clone());
        }

        let track = match request {
            CaptureRequest::Microphone { device_id, .. } => {
                let label = self
                    .label_for(DeviceClass::AudioInput, device_id.as_deref())
                    .ok_or(DeviceError::NotFound)?;
                MediaTrack::new(source, label, TrackSettings::default())
            }
            CaptureRequest::Camera {
                device_id,
                constraints,
            } => {
                let label = self
                    .label_for(DeviceClass::VideoInput, device_id.as_deref())
                    .ok_or(DeviceError::NotFound)?;
                let settings = TrackSettings {
                    width: Some(constraints.width),
                    height: Some(constraints.height),
                    frame_rate: Some(constraints.frame_rate),
                };
                MediaTrack::new(source, label, settings)
            }
            CaptureRequest::Screen => {
                let settings = TrackSettings {
                    width: Some(1920),
                    height: Some(1080),
                    frame_rate: Some(15),
                };
                MediaTrack::new(source, "Synthetic Display", settings)
            }
        };

        self.lock().opened.push(track.clone());
        Ok(track)
    }

    async fn measure_level(&self, track: &MediaTrack, window: Duration) -> Result<f32, DeviceError> {
        if track.kind() != MediaKind::Audio {
            return Err(DeviceError::Other("level metering needs an audio track".into()));
        }
        if !track.is_live() {
            return Err(DeviceError::Other("track already stopped".into()));
        }
        tokio::time::sleep(window).await;
        Ok(self.lock().input_level)
    }

    async fn test_output(&self, device_id: Option<&str>) -> Result<(), DeviceError> {
        if let Some(err) = self.lock().output_failure.clone() {
            return Err(err);
        }
        if !self.has_class(DeviceClass::AudioOutput) {
            return Err(DeviceError::NotFound);
        }
        if let Some(id) = device_id {
            if self.label_for(DeviceClass::AudioOutput, Some(id)).is_none() {
                return Err(DeviceError::NotFound);
            }
        }
        Ok(())
    }
}
