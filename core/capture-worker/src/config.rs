//! Tunables for the capture worker.

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_FIX_THRESHOLD_MS: u64 = 2000;
pub const DEFAULT_SENSOR_FLUSH_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_DISK_CHECK_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_LOW_DISK_THRESHOLD_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Maximum gap between location updates for the fix to be held.
    #[serde(default = "default_fix_threshold_ms")]
    pub fix_threshold_ms: u64,
    /// Sensor batches are flushed at this cadence while there is no fix.
    #[serde(default = "default_sensor_flush_interval_ms")]
    pub sensor_flush_interval_ms: u64,
    #[serde(default = "default_disk_check_interval_ms")]
    pub disk_check_interval_ms: u64,
    #[serde(default = "default_low_disk_threshold_bytes")]
    pub low_disk_threshold_bytes: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            fix_threshold_ms: default_fix_threshold_ms(),
            sensor_flush_interval_ms: default_sensor_flush_interval_ms(),
            disk_check_interval_ms: default_disk_check_interval_ms(),
            low_disk_threshold_bytes: default_low_disk_threshold_bytes(),
        }
    }
}

impl WorkerConfig {
    pub fn sensor_flush_interval(&self) -> Duration {
        Duration::from_millis(self.sensor_flush_interval_ms.max(1))
    }

    pub fn disk_check_interval(&self) -> Duration {
        Duration::from_millis(self.disk_check_interval_ms.max(1))
    }
}

fn default_fix_threshold_ms() -> u64 {
    DEFAULT_FIX_THRESHOLD_MS
}

fn default_sensor_flush_interval_ms() -> u64 {
    DEFAULT_SENSOR_FLUSH_INTERVAL_MS
}

fn default_disk_check_interval_ms() -> u64 {
    DEFAULT_DISK_CHECK_INTERVAL_MS
}

fn default_low_disk_threshold_bytes() -> u64 {
    DEFAULT_LOW_DISK_THRESHOLD_BYTES
}
