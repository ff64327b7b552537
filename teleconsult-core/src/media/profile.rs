//! Capture quality profiles.
//!
//! `auto` is resolved once, at acquisition time, from a downlink hint.
//! Continuous adaptation is left to bitrate hints from the quality monitor.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Requested capture quality.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaProfile {
    Low,
    Medium,
    High,
    #[default]
    Auto,
}

impl fmt::Display for MediaProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Auto => write!(f, "auto"),
        }
    }
}

/// Coarse downlink classification supplied by the host platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionClass {
    Slow2g,
    Cellular2g,
    Cellular3g,
    Cellular4g,
    Broadband,
}

/// Externally supplied network-quality hint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkHint {
    pub class: ConnectionClass,
    /// Estimated downlink in megabits per second, if known.
    #[serde(default)]
    pub downlink_mbps: Option<f64>,
}

impl NetworkHint {
    pub fn new(class: ConnectionClass) -> Self {
        Self {
            class,
            downlink_mbps: None,
        }
    }

    /// Broadband or fast cellular.
    pub fn is_high_bandwidth(&self) -> bool {
        matches!(
            self.class,
            ConnectionClass::Cellular4g | ConnectionClass::Broadband
        )
    }
}

/// Target video capture settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoConstraints {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
}

impl VideoConstraints {
    pub const LOW: Self = Self::new(320, 240, 15);
    pub const MEDIUM: Self = Self::new(640, 480, 30);
    pub const HIGH: Self = Self::new(1280, 720, 30);
    /// `auto` on anything slower than fast cellular.
    pub const CONSTRAINED: Self = Self::new(640, 480, 15);

    pub const fn new(width: u32, height: u32, frame_rate: u32) -> Self {
        Self {
            width,
            height,
            frame_rate,
        }
    }
}

/// Audio processing switches requested from the capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
}

impl Default for AudioConstraints {
    fn default() -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression: true,
            auto_gain_control: true,
        }
    }
}

impl MediaProfile {
    /// Resolve the profile to concrete video constraints.
    ///
    /// `Auto` without a hint behaves like `Medium`.
    pub fn video_constraints(self, hint: Option<&NetworkHint>) -> VideoConstraints {
        match self {
            Self::Low => VideoConstraints::LOW,
            Self::Medium => VideoConstraints::MEDIUM,
            Self::High => VideoConstraints::HIGH,
            Self::Auto => match hint {
                None => VideoConstraints::MEDIUM,
                Some(h) if h.is_high_bandwidth() => VideoConstraints::HIGH,
                Some(_) => VideoConstraints::CONSTRAINED,
            },
        }
    }
}
