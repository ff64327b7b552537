//! Link-quality classification.
//!
//! A pure function of one [`StatisticsSnapshot`]. Thresholds are fixed.
//! A metric missing from the snapshot classifies as `Unknown`; nothing is
//! inferred from the other metrics.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::quality::snapshot::StatisticsSnapshot;

/// Bounded quality scale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityLevel {
    #[default]
    Unknown,
    Poor,
    Fair,
    Good,
    Excellent,
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Poor => "poor",
            Self::Fair => "fair",
            Self::Good => "good",
            Self::Excellent => "excellent",
        };
        f.write_str(s)
    }
}

/// Derived link health. Recomputed every sampling tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QualityAssessment {
    pub video: QualityLevel,
    pub audio: QualityLevel,
    pub connection: QualityLevel,
}

impl QualityAssessment {
    /// Classify a snapshot.
    pub fn from_snapshot(snapshot: &StatisticsSnapshot) -> Self {
        Self {
            connection: snapshot
                .round_trip_time
                .map_or(QualityLevel::Unknown, classify_rtt),
            video: snapshot
                .inbound_video
                .and_then(|s| s.loss_ratio())
                .map_or(QualityLevel::Unknown, classify_loss),
            audio: snapshot
                .inbound_audio
                .and_then(|s| s.jitter)
                .map_or(QualityLevel::Unknown, classify_jitter),
        }
    }

    /// The worst known level, or `Unknown` if nothing is known.
    pub fn overall(&self) -> QualityLevel {
        [self.video, self.audio, self.connection]
            .into_iter()
            .filter(|l| *l != QualityLevel::Unknown)
            .min()
            .unwrap_or(QualityLevel::Unknown)
    }
}

impl fmt::Display for QualityAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "connection={} video={} audio={}",
            self.connection, self.video, self.audio
        )
    }
}

/// Connection quality from round-trip time.
pub fn classify_rtt(rtt: Duration) -> QualityLevel {
    let ms = rtt.as_secs_f64() * 1000.0;
    if ms < 100.0 {
        QualityLevel::Excellent
    } else if ms < 300.0 {
        QualityLevel::Good
    } else if ms < 500.0 {
        QualityLevel::Fair
    } else {
        QualityLevel::Poor
    }
}

/// Video quality from inbound packet-loss ratio (0.0..=1.0).
pub fn classify_loss(ratio: f64) -> QualityLevel {
    if ratio < 0.01 {
        QualityLevel::Excellent
    } else if ratio < 0.05 {
        QualityLevel::Good
    } else if ratio < 0.10 {
        QualityLevel::Fair
    } else {
        QualityLevel::Poor
    }
}

/// Audio quality from jitter in seconds.
pub fn classify_jitter(jitter: f64) -> QualityLevel {
    if jitter < 0.02 {
        QualityLevel::Excellent
    } else if jitter < 0.05 {
        QualityLevel::Good
    } else if jitter < 0.10 {
        QualityLevel::Fair
    } else {
        QualityLevel::Poor
    }
}
