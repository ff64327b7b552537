//! Periodic link-quality sampling.
//!
//! The only background task in a session. It is started when the session
//! enters `connected`, stopped when it leaves, and is bound to a child of
//! the session's cancellation token so it can never outlive the session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::engine::TransportEngine;
use crate::media::MediaKind;
use crate::quality::assess::QualityAssessment;
use crate::quality::bitrate::BitrateEstimator;

/// Fixed sampling interval.
pub const SAMPLING_INTERVAL: Duration = Duration::from_secs(5);

/// One tick's output.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityUpdate {
    pub assessment: QualityAssessment,
    /// Suggested cap for outgoing video, when quality warrants lowering it.
    pub suggested_video_bitrate: Option<u64>,
    /// Smoothed round-trip time.
    pub smoothed_rtt: Option<Duration>,
}

/// Samples engine statistics and classifies them on a fixed interval.
pub struct QualityMonitor {
    interval: Duration,
    current_tx: watch::Sender<QualityAssessment>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<()>>,
}

impl QualityMonitor {
    pub fn new() -> Self {
        Self::with_interval(SAMPLING_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        let (current_tx, _) = watch::channel(QualityAssessment::default());
        Self {
            interval,
            current_tx,
            cancel: None,
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| !t.is_cancelled())
    }

    /// The last computed assessment.
    pub fn current_assessment(&self) -> QualityAssessment {
        *self.current_tx.borrow()
    }

    /// Watch the assessment as a live gauge.
    pub fn subscribe(&self) -> watch::Receiver<QualityAssessment> {
        self.current_tx.subscribe()
    }

    /// Begin sampling. A second `start` while running is a no-op.
    ///
    /// The first sample is taken immediately; `publish` is called once per
    /// tick from the sampling task.
    pub fn start<F>(
        &mut self,
        engine: Arc<dyn TransportEngine>,
        parent: &CancellationToken,
        publish: F,
    ) where
        F: Fn(QualityUpdate) + Send + 'static,
    {
        if self.is_running() {
            return;
        }
        let token = parent.child_token();
        let current_tx = self.current_tx.clone();
        let period = self.interval;
        let loop_token = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut bitrate = BitrateEstimator::new();

            loop {
                tokio::select! {
                    _ = loop_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let snapshot = tokio::select! {
                    _ = loop_token.cancelled() => break,
                    res = engine.stats() => match res {
                        Ok(s) => s,
                        Err(e) => {
                            warn!("stats read failed: {e}");
                            continue;
                        }
                    },
                };

                let assessment = QualityAssessment::from_snapshot(&snapshot);
                if let Some(out) = snapshot.outbound(MediaKind::Video) {
                    bitrate.record_at(snapshot.captured_at, out.bytes_sent);
                }
                if let Some(rtt) = snapshot.round_trip_time {
                    bitrate.record_rtt(rtt);
                }

                let update = QualityUpdate {
                    assessment,
                    suggested_video_bitrate: bitrate.hint(assessment.video),
                    smoothed_rtt: snapshot.round_trip_time.map(|_| bitrate.latency()),
                };
                debug!(%assessment, "quality sample");

                current_tx.send_replace(assessment);
                if loop_token.is_cancelled() {
                    break;
                }
                publish(update);
            }
        });

        self.cancel = Some(token);
        self.handle = Some(handle);
    }

    /// Cancel the sampling loop. Safe to call when not running.
    pub fn stop(&mut self) {
        if let Some(token) = self.cancel.take() {
            token.cancel();
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Default for QualityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for QualityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
