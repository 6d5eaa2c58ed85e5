use std::time::{Duration, Instant};

use tracing::debug;

/// Tracks billable recording time across pause/resume cycles.
///
/// Invariant: `is_recording() ⇔ an open segment exists`. Duration reflects
/// recording time, not connection time, except for the legacy fallback below.
#[derive(Debug)]
pub struct RecordingMeter {
    session_start: Instant,
    total: Duration,
    segment_start: Option<Instant>,
    first_start: Option<Instant>,
    closed_segments: usize,
}

impl RecordingMeter {
    pub fn new() -> Self {
        Self {
            session_start: Instant::now(),
            total: Duration::ZERO,
            segment_start: None,
            first_start: None,
            closed_segments: 0,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.segment_start.is_some()
    }

    /// True once any recording segment has existed, open or closed.
    pub fn has_recorded(&self) -> bool {
        self.first_start.is_some()
    }

    pub fn start(&mut self) {
        if self.segment_start.is_some() {
            debug!("recording already started, ignoring");
            return;
        }
        let now = Instant::now();
        self.segment_start = Some(now);
        self.first_start.get_or_insert(now);
    }

    pub fn stop(&mut self) {
        let Some(started) = self.segment_start.take() else {
            debug!("recording not started, ignoring stop");
            return;
        };
        self.total += started.elapsed();
        self.closed_segments += 1;
    }

    /// Accumulated milliseconds across closed segments plus the running one.
    ///
    /// Sessions that never recorded fall back to time since connect; clients
    /// predating the start/stop protocol stream without ever signalling.
    pub fn current_duration_ms(&self) -> u64 {
        if !self.has_recorded() {
            return self.session_start.elapsed().as_millis() as u64;
        }
        let running = self
            .segment_start
            .map(|s| s.elapsed())
            .unwrap_or(Duration::ZERO);
        (self.total + running).as_millis() as u64
    }

    /// Milliseconds since recording first started, if it ever did. Stamps
    /// finalized transcript segments.
    pub fn recording_elapsed_ms(&self) -> Option<u64> {
        self.first_start.map(|s| s.elapsed().as_millis() as u64)
    }
}

impl Default for RecordingMeter {
    fn default() -> Self {
        Self::new()
    }
}
