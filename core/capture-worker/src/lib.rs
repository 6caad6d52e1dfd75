//! # capture-worker
//!
//! The background half of a capture session: a dedicated thread that samples
//! a location source, tracks satellite fix status, hands samples to the
//! persistence collaborator and fans capture events out to attached
//! listeners.
//!
//! ## Design Principles
//!
//! - **Message passing only**: the worker shares no state with its
//!   controller. Commands, pongs and events all travel over channels.
//! - **Independent lifetime**: detaching every listener does not stop
//!   sampling. Only an explicit stop, or the controller dropping its command
//!   channel, ends the worker.
//! - **Faults are events**: runtime failures inside the worker reach
//!   listeners as `ErrorState` events and are never returned to the caller.

pub mod collaborators;
pub mod config;
pub mod fanout;
pub mod fix_status;
pub mod source;
pub mod worker;

pub use collaborators::{
    CapturingIndicator, EventHandlingStrategy, LoggingIndicator, MeasurementStore, MemoryStore,
    NoopIndicator, NotifyOnly, SpaceWarningAction, StopOnLowSpace, StoreError,
};
pub use config::WorkerConfig;
pub use fanout::{ChannelSink, DeliveryError, DeliveryReport, EventSink, FanOutRegistry, SubscriptionId};
pub use fix_status::FixStatusTracker;
pub use source::{
    LocationSource, SimulatedSource, SimulatedSourceConfig, SourceError, SourceEvent, SourceHandle,
};
pub use worker::{
    spawn, AttachAck, WorkerCommand, WorkerGone, WorkerHandle, WorkerServices, WorkerSpawn,
};
