//! Message and event types shared by the capture worker and its controller.
//!
//! This crate is shared by the worker and the client-facing controller to
//! prevent schema drift. The worker remains the authority on what it emits,
//! but both sides reuse the same types to build and match messages.

use chrono::Utc;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const ERROR_TRANSPORT_FAILURE: &str = "transport_failure";
pub const ERROR_SOURCE_FAILURE: &str = "source_failure";
pub const ERROR_PERSISTENCE_FAILURE: &str = "persistence_failure";

fn make_id(prefix: &str) -> String {
    let mut random = rand::thread_rng();
    let rand = random.next_u64();
    format!("{}-{}-{:x}", prefix, Utc::now().timestamp_millis(), rand)
}

/// Identifier of one capture attempt, from `start` until a successful `stop`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(String);

impl SessionHandle {
    pub fn generate() -> Self {
        Self(make_id("session"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token correlating one liveness probe with its acknowledgment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationToken(String);

impl CorrelationToken {
    pub fn generate() -> Self {
        Self(make_id("ping"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CorrelationToken {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for CorrelationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ping {
    pub token: CorrelationToken,
}

impl Ping {
    pub fn new() -> Self {
        Self {
            token: CorrelationToken::generate(),
        }
    }
}

impl Default for Ping {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pong {
    pub token: CorrelationToken,
}

impl Pong {
    pub fn echo(ping: &Ping) -> Self {
        Self {
            token: ping.token.clone(),
        }
    }

    pub fn answers(&self, ping: &Ping) -> bool {
        self.token == ping.token
    }
}

/// Mode of transport the capture is recorded for. Opaque to the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleMode {
    #[default]
    Unknown,
    Bicycle,
    Car,
    Motorbike,
    Bus,
    Train,
    Walking,
}

impl VehicleMode {
    pub const ALL: [VehicleMode; 7] = [
        VehicleMode::Unknown,
        VehicleMode::Bicycle,
        VehicleMode::Car,
        VehicleMode::Motorbike,
        VehicleMode::Bus,
        VehicleMode::Train,
        VehicleMode::Walking,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleMode::Unknown => "unknown",
            VehicleMode::Bicycle => "bicycle",
            VehicleMode::Car => "car",
            VehicleMode::Motorbike => "motorbike",
            VehicleMode::Bus => "bus",
            VehicleMode::Train => "train",
            VehicleMode::Walking => "walking",
        }
    }
}

impl fmt::Display for VehicleMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VehicleMode {
    type Err = ErrorInfo;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        VehicleMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| {
                ErrorInfo::new(
                    "invalid_vehicle",
                    format!("unknown vehicle mode: {}", value),
                )
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixState {
    NoFix,
    Fix,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub timestamp_ms: i64,
    /// Meters per second.
    pub speed: f64,
    /// Meters.
    pub accuracy: f64,
}

impl GeoLocation {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if !self.latitude.is_finite() || !(-90.0..=90.0).contains(&self.latitude) {
            return Err(ErrorInfo::new(
                "invalid_latitude",
                format!("latitude out of range: {}", self.latitude),
            ));
        }
        if !self.longitude.is_finite() || !(-180.0..=180.0).contains(&self.longitude) {
            return Err(ErrorInfo::new(
                "invalid_longitude",
                format!("longitude out of range: {}", self.longitude),
            ));
        }
        require_non_negative(self.speed, "speed")?;
        require_non_negative(self.accuracy, "accuracy")?;
        Ok(())
    }
}

fn require_non_negative(value: f64, field: &str) -> Result<(), ErrorInfo> {
    if value.is_finite() && value >= 0.0 {
        return Ok(());
    }
    Err(ErrorInfo::new(
        "invalid_measurement",
        format!("{} must be a non-negative number", field),
    ))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InertialKind {
    Acceleration,
    Rotation,
    Direction,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InertialSample {
    pub kind: InertialKind,
    pub point: Point3D,
}

/// Accelerations, rotations and directions captured over one location fix
/// interval, or over one flush interval while there is no fix.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorBatch {
    pub accelerations: Vec<Point3D>,
    pub rotations: Vec<Point3D>,
    pub directions: Vec<Point3D>,
}

impl SensorBatch {
    pub fn push(&mut self, sample: InertialSample) {
        match sample.kind {
            InertialKind::Acceleration => self.accelerations.push(sample.point),
            InertialKind::Rotation => self.rotations.push(sample.point),
            InertialKind::Direction => self.directions.push(sample.point),
        }
    }

    pub fn len(&self) -> usize {
        self.accelerations.len() + self.rotations.len() + self.directions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskConsumption {
    pub consumed_bytes: u64,
    pub available_bytes: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Capability set every capture listener implements.
///
/// All methods are mandatory. Implementations are invoked from a delivery
/// thread owned by the controller, never from the caller's thread.
pub trait CaptureListener: Send + Sync {
    fn on_fix_acquired(&self);
    fn on_fix_lost(&self);
    fn on_new_geo_location_acquired(&self, location: &GeoLocation);
    fn on_new_sensor_data_acquired(&self, batch: &SensorBatch);
    fn on_low_disk_space(&self, consumption: &DiskConsumption);
    fn on_synchronization_successful(&self);
    fn on_error_state(&self, error: &ErrorInfo);
}

/// One event emitted by the worker and fanned out to listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum CaptureEvent {
    FixAcquired,
    FixLost,
    GeoLocationAcquired(GeoLocation),
    SensorDataAcquired(SensorBatch),
    LowDiskSpace(DiskConsumption),
    SynchronizationSuccessful,
    ErrorState(ErrorInfo),
}

impl CaptureEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CaptureEvent::FixAcquired => "fix_acquired",
            CaptureEvent::FixLost => "fix_lost",
            CaptureEvent::GeoLocationAcquired(_) => "geo_location_acquired",
            CaptureEvent::SensorDataAcquired(_) => "sensor_data_acquired",
            CaptureEvent::LowDiskSpace(_) => "low_disk_space",
            CaptureEvent::SynchronizationSuccessful => "synchronization_successful",
            CaptureEvent::ErrorState(_) => "error_state",
        }
    }

    pub fn dispatch(&self, listener: &dyn CaptureListener) {
        match self {
            CaptureEvent::FixAcquired => listener.on_fix_acquired(),
            CaptureEvent::FixLost => listener.on_fix_lost(),
            CaptureEvent::GeoLocationAcquired(location) => {
                listener.on_new_geo_location_acquired(location)
            }
            CaptureEvent::SensorDataAcquired(batch) => listener.on_new_sensor_data_acquired(batch),
            CaptureEvent::LowDiskSpace(consumption) => listener.on_low_disk_space(consumption),
            CaptureEvent::SynchronizationSuccessful => listener.on_synchronization_successful(),
            CaptureEvent::ErrorState(error) => listener.on_error_state(error),
        }
    }
}
