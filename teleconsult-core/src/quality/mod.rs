//! # Quality monitoring
//!
//! | Module     | Purpose                                           |
//! |------------|---------------------------------------------------|
//! | `snapshot` | Per-kind, per-direction transport counters        |
//! | `assess`   | Fixed-threshold classification into levels        |
//! | `bitrate`  | Send-rate estimation and bitrate hints            |
//! | `monitor`  | Cancellable 5-second sampling loop                |

pub mod assess;
pub mod bitrate;
pub mod monitor;
pub mod snapshot;

pub use assess::{QualityAssessment, QualityLevel, classify_jitter, classify_loss, classify_rtt};
pub use bitrate::BitrateEstimator;
pub use monitor::{QualityMonitor, QualityUpdate, SAMPLING_INTERVAL};
pub use snapshot::{InboundRtpStats, OutboundRtpStats, StatisticsSnapshot};
