//! Point-in-time transport counters.

use std::time::{Duration, Instant};

use crate::media::MediaKind;

/// Receive-side RTP counters for one media kind.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InboundRtpStats {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub bytes_received: u64,
    /// Interarrival jitter in seconds.
    pub jitter: Option<f64>,
}

impl InboundRtpStats {
    /// `lost / (lost + received)`, or `None` before any packet was expected.
    pub fn loss_ratio(&self) -> Option<f64> {
        let expected = self.packets_lost + self.packets_received;
        if expected == 0 {
            return None;
        }
        Some(self.packets_lost as f64 / expected as f64)
    }
}

/// Send-side RTP counters for one media kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutboundRtpStats {
    pub packets_sent: u64,
    pub bytes_sent: u64,
}

/// Immutable read of the transport's counters, scoped per kind and direction.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsSnapshot {
    pub captured_at: Instant,
    /// Current round-trip time of the selected candidate pair.
    pub round_trip_time: Option<Duration>,
    pub inbound_audio: Option<InboundRtpStats>,
    pub inbound_video: Option<InboundRtpStats>,
    pub outbound_audio: Option<OutboundRtpStats>,
    pub outbound_video: Option<OutboundRtpStats>,
}

impl StatisticsSnapshot {
    /// A snapshot with no metrics at all.
    pub fn empty() -> Self {
        Self {
            captured_at: Instant::now(),
            round_trip_time: None,
            inbound_audio: None,
            inbound_video: None,
            outbound_audio: None,
            outbound_video: None,
        }
    }

    pub fn inbound(&self, kind: MediaKind) -> Option<&InboundRtpStats> {
        match kind {
            MediaKind::Audio => self.inbound_audio.as_ref(),
            MediaKind::Video => self.inbound_video.as_ref(),
        }
    }

    pub fn outbound(&self, kind: MediaKind) -> Option<&OutboundRtpStats> {
        match kind {
            MediaKind::Audio => self.outbound_audio.as_ref(),
            MediaKind::Video => self.outbound_video.as_ref(),
        }
    }
}
