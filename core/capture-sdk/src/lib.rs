//! # capture-sdk
//!
//! Client-facing half of the capture SDK: the session controller that starts,
//! stops, detaches from and re-attaches to a background capture worker, and
//! the liveness probe that asks the worker whether it is still alive.
//!
//! ## Design Principles
//!
//! - **Synchronous**: plain threads and channels, no async runtime.
//! - **Thread-safe**: a `SessionController` can be shared across threads;
//!   lifecycle calls are serialized internally.
//! - **Idempotent where it is safe**: repeated `start` and `reconnect` calls
//!   are no-ops, while `stop` and `disconnect` report `NotConnected`.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use capture_sdk::{SessionController, VehicleMode};
//!
//! let controller = SessionController::default();
//! let session = controller.start(listener, VehicleMode::Bicycle)?;
//! controller.disconnect()?;
//! controller.reconnect()?;
//! controller.stop()?;
//! ```

pub mod config;
pub mod controller;
mod delivery;
pub mod error;
pub mod probe;

pub use config::{load_config, CaptureConfig, ControllerConfig};
pub use controller::{AttachmentState, CaptureServices, SessionController, SourceFactory};
pub use error::{CaptureError, Result};
pub use probe::{IsRunningCallback, LivenessProbe, ProbeOutcome};

// Protocol types every client needs alongside the controller
pub use capture_protocol::{
    CaptureEvent, CaptureListener, DiskConsumption, ErrorInfo, GeoLocation, SensorBatch,
    SessionHandle, VehicleMode,
};
