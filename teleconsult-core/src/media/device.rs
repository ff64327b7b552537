//! Capture/playback device platform seam.
//!
//! The orchestrator never talks to cameras or sound cards directly; it goes
//! through a [`MediaDevices`] backend. Backends must report failures with a
//! [`DeviceError`] precise enough for the UI to tell "permission denied"
//! from "device busy" from "no device found".

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::profile::{AudioConstraints, VideoConstraints};
use crate::media::track::{MediaTrack, TrackSource};

// ── DeviceKinds ──────────────────────────────────────────────────

bitflags! {
    /// The set of capture devices an acquisition failure applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceKinds: u8 {
        const CAMERA = 0b01;
        const MICROPHONE = 0b10;
    }
}

impl fmt::Display for DeviceKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.contains(Self::CAMERA | Self::MICROPHONE) {
            write!(f, "camera and microphone")
        } else if self.contains(Self::CAMERA) {
            write!(f, "camera")
        } else if self.contains(Self::MICROPHONE) {
            write!(f, "microphone")
        } else {
            write!(f, "no device")
        }
    }
}

impl From<TrackSource> for DeviceKinds {
    fn from(source: TrackSource) -> Self {
        match source {
            TrackSource::Microphone => Self::MICROPHONE,
            TrackSource::Camera | TrackSource::Screen => Self::CAMERA,
        }
    }
}

// ── DeviceError ──────────────────────────────────────────────────

/// Why a device could not be opened.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", content = "detail", rename_all = "kebab-case")]
pub enum DeviceError {
    /// The user or OS refused access.
    #[error("permission denied")]
    PermissionDenied,

    /// Another application holds the device.
    #[error("device in use by another application")]
    DeviceBusy,

    /// No device of the requested class exists.
    #[error("no device found")]
    NotFound,

    /// The platform cannot provide this kind of capture.
    #[error("not supported on this platform")]
    Unsupported,

    #[error("{0}")]
    Other(String),
}

// ── Device inventory ─────────────────────────────────────────────

/// Device class, as reported by enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceClass {
    VideoInput,
    AudioInput,
    AudioOutput,
}

/// One enumerated device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub label: String,
    pub class: DeviceClass,
}

/// What to open.
#[derive(Debug, Clone, PartialEq)]
pub enum CaptureRequest {
    Microphone {
        device_id: Option<String>,
        constraints: AudioConstraints,
    },
    Camera {
        device_id: Option<String>,
        constraints: VideoConstraints,
    },
    Screen,
}

impl CaptureRequest {
    pub fn source(&self) -> TrackSource {
        match self {
            Self::Microphone { .. } => TrackSource::Microphone,
            Self::Camera { .. } => TrackSource::Camera,
            Self::Screen => TrackSource::Screen,
        }
    }
}

// ── MediaDevices ─────────────────────────────────────────────────

/// Platform capture capability.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// List every capture and playback device.
    async fn enumerate(&self) -> Result<Vec<DeviceInfo>, DeviceError>;

    /// Open a capture stream. The returned track is live and enabled.
    async fn open(&self, request: CaptureRequest) -> Result<MediaTrack, DeviceError>;

    /// Peak input level (0.0..=1.0) observed on an audio track over `window`.
    async fn measure_level(&self, track: &MediaTrack, window: Duration) -> Result<f32, DeviceError>;

    /// Play a short test tone on an output device.
    async fn test_output(&self, device_id: Option<&str>) -> Result<(), DeviceError>;
}
