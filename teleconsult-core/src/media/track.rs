//! Capture track handles.
//!
//! A [`MediaTrack`] is a cheap, cloneable handle onto one capture stream.
//! Every clone observes the same enabled/live flags, so the device backend,
//! the transport engine and the owning bundle all agree on whether the
//! underlying device handle is still held.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── MediaKind ────────────────────────────────────────────────────

/// Audio or video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Where a track's samples come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    Microphone,
    Camera,
    Screen,
}

impl TrackSource {
    pub const fn kind(self) -> MediaKind {
        match self {
            Self::Microphone => MediaKind::Audio,
            Self::Camera | Self::Screen => MediaKind::Video,
        }
    }
}

/// Settings the device actually granted (may differ from the request).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<u32>,
}

// ── MediaTrack ───────────────────────────────────────────────────

#[derive(Debug)]
struct TrackState {
    enabled: AtomicBool,
    live: AtomicBool,
}

/// Handle onto a single capture stream.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    label: String,
    source: TrackSource,
    settings: TrackSettings,
    state: Arc<TrackState>,
}

impl MediaTrack {
    /// Create a live, enabled track. Called by device backends.
    pub fn new(source: TrackSource, label: impl Into<String>, settings: TrackSettings) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            source,
            settings,
            state: Arc::new(TrackState {
                enabled: AtomicBool::new(true),
                live: AtomicBool::new(true),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-readable device label.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn source(&self) -> TrackSource {
        self.source
    }

    pub fn kind(&self) -> MediaKind {
        self.source.kind()
    }

    pub fn settings(&self) -> TrackSettings {
        self.settings
    }

    /// Whether samples are currently being sent. A disabled track keeps
    /// its device handle.
    pub fn is_enabled(&self) -> bool {
        self.state.enabled.load(Ordering::SeqCst)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.state.enabled.store(enabled, Ordering::SeqCst);
    }

    /// Whether the device handle is still held.
    pub fn is_live(&self) -> bool {
        self.state.live.load(Ordering::SeqCst)
    }

    /// Release the device handle. Returns `false` if it was already stopped.
    pub fn stop(&self) -> bool {
        self.state.live.swap(false, Ordering::SeqCst)
    }

    /// `true` if both handles refer to the same capture stream.
    pub fn same_track(&self, other: &MediaTrack) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}
