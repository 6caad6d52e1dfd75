//! Satellite fix tracking.
//!
//! The device delivers location updates roughly once per second while it
//! holds a fix. The tracker derives a binary fix flag from the gap between
//! the last location update and each satellite status event.
//!
//! Notification is explicit: [`FixStatusTracker::notification`] reports the
//! current flag every time it is called. Nothing here detects edges, so the
//! caller decides when a notification is due. Calling it on every satellite
//! status event delivers the same state repeatedly.

use capture_protocol::{CaptureEvent, FixState};

use crate::config::DEFAULT_FIX_THRESHOLD_MS;

#[derive(Debug, Clone)]
pub struct FixStatusTracker {
    threshold_ms: i64,
    has_fix: bool,
    time_of_last_update: Option<i64>,
}

impl Default for FixStatusTracker {
    fn default() -> Self {
        Self::new(DEFAULT_FIX_THRESHOLD_MS)
    }
}

impl FixStatusTracker {
    pub fn new(threshold_ms: u64) -> Self {
        Self {
            threshold_ms: i64::try_from(threshold_ms).unwrap_or(i64::MAX),
            has_fix: false,
            time_of_last_update: None,
        }
    }

    pub fn record_location_update(&mut self, at_ms: i64) {
        self.time_of_last_update = Some(at_ms);
    }

    pub fn time_of_last_update(&self) -> Option<i64> {
        self.time_of_last_update
    }

    /// Recomputes the fix flag for a satellite status event at `now_ms`.
    ///
    /// The fix holds while the last location update is strictly younger than
    /// the threshold. Returns the new flag; no listener is notified.
    pub fn handle_satellite_status(&mut self, now_ms: i64) -> bool {
        self.has_fix = match self.time_of_last_update {
            Some(last) => now_ms.saturating_sub(last) < self.threshold_ms,
            None => false,
        };
        self.has_fix
    }

    /// The device reported its first fix. Sets the flag regardless of timing.
    pub fn handle_first_fix(&mut self, now_ms: i64) -> CaptureEvent {
        self.has_fix = true;
        if self.time_of_last_update.is_none() {
            self.time_of_last_update = Some(now_ms);
        }
        self.notification()
    }

    pub fn notification(&self) -> CaptureEvent {
        if self.has_fix {
            CaptureEvent::FixAcquired
        } else {
            CaptureEvent::FixLost
        }
    }

    pub fn has_fix(&self) -> bool {
        self.has_fix
    }

    pub fn state(&self) -> FixState {
        if self.has_fix {
            FixState::Fix
        } else {
            FixState::NoFix
        }
    }
}
