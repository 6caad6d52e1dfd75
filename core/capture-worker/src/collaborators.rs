//! Interfaces of the collaborators the worker hands its output to.
//!
//! Durable storage, the ongoing-capture indicator and the low-space policy
//! live outside this crate. The worker only sees these traits. The in-memory
//! and logging implementations here back the CLI and the tests.

use capture_protocol::{DiskConsumption, GeoLocation, SensorBatch, VehicleMode};
use std::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store is full: {0}")]
    Full(String),
}

/// Persistence collaborator. Appends are fire-and-forget from the worker's
/// point of view; durability is not guaranteed when they return.
pub trait MeasurementStore: Send + Sync {
    fn append_location(&self, location: &GeoLocation) -> Result<(), StoreError>;
    fn append_sensor_batch(&self, batch: &SensorBatch) -> Result<(), StoreError>;

    /// `None` when the store cannot tell.
    fn disk_consumption(&self) -> Option<DiskConsumption> {
        None
    }
}

/// Renders the ongoing-capture indicator.
pub trait CapturingIndicator: Send + Sync {
    fn show(&self, vehicle: VehicleMode);
    fn hide(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpaceWarningAction {
    Continue,
    StopSampling,
}

/// Reaction to a low disk space warning raised by the worker.
pub trait EventHandlingStrategy: Send + Sync {
    fn handle_space_warning(&self, consumption: &DiskConsumption) -> SpaceWarningAction;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyOnly;

impl EventHandlingStrategy for NotifyOnly {
    fn handle_space_warning(&self, _consumption: &DiskConsumption) -> SpaceWarningAction {
        SpaceWarningAction::Continue
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StopOnLowSpace;

impl EventHandlingStrategy for StopOnLowSpace {
    fn handle_space_warning(&self, consumption: &DiskConsumption) -> SpaceWarningAction {
        warn!(
            available_bytes = consumption.available_bytes,
            "Halting sampling on low disk space"
        );
        SpaceWarningAction::StopSampling
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopIndicator;

impl CapturingIndicator for NoopIndicator {
    fn show(&self, _vehicle: VehicleMode) {}
    fn hide(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingIndicator;

impl CapturingIndicator for LoggingIndicator {
    fn show(&self, vehicle: VehicleMode) {
        info!(vehicle = %vehicle, "Capturing indicator shown");
    }

    fn hide(&self) {
        info!("Capturing indicator hidden");
    }
}

// Rough on-disk row sizes, used to estimate consumption.
const LOCATION_ROW_BYTES: u64 = 48;
const POINT_ROW_BYTES: u64 = 24;

#[derive(Default)]
struct MemoryStoreState {
    locations: Vec<GeoLocation>,
    batches: Vec<SensorBatch>,
    consumed_bytes: u64,
}

/// In-memory store. With a capacity it reports disk consumption against it
/// and rejects appends once the capacity is used up.
#[derive(Default)]
pub struct MemoryStore {
    capacity_bytes: Option<u64>,
    state: Mutex<MemoryStoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity_bytes: u64) -> Self {
        Self {
            capacity_bytes: Some(capacity_bytes),
            state: Mutex::default(),
        }
    }

    pub fn locations(&self) -> Vec<GeoLocation> {
        self.lock().locations.clone()
    }

    pub fn batches(&self) -> Vec<SensorBatch> {
        self.lock().batches.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryStoreState> {
        // A poisoned store still holds valid rows.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reserve(&self, state: &mut MemoryStoreState, bytes: u64) -> Result<(), StoreError> {
        let next = state.consumed_bytes.saturating_add(bytes);
        if let Some(capacity) = self.capacity_bytes {
            if next > capacity {
                return Err(StoreError::Full(format!(
                    "{} of {} bytes used",
                    state.consumed_bytes, capacity
                )));
            }
        }
        state.consumed_bytes = next;
        Ok(())
    }
}

impl MeasurementStore for MemoryStore {
    fn append_location(&self, location: &GeoLocation) -> Result<(), StoreError> {
        let mut state = self.lock();
        self.reserve(&mut state, LOCATION_ROW_BYTES)?;
        state.locations.push(location.clone());
        Ok(())
    }

    fn append_sensor_batch(&self, batch: &SensorBatch) -> Result<(), StoreError> {
        let mut state = self.lock();
        self.reserve(&mut state, POINT_ROW_BYTES * batch.len() as u64)?;
        state.batches.push(batch.clone());
        Ok(())
    }

    fn disk_consumption(&self) -> Option<DiskConsumption> {
        let capacity = self.capacity_bytes?;
        let consumed = self.lock().consumed_bytes;
        Some(DiskConsumption {
            consumed_bytes: consumed,
            available_bytes: capacity.saturating_sub(consumed),
        })
    }
}
