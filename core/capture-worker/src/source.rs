//! Location source capability consumed by the worker.
//!
//! A source pushes raw device events through the [`SourceHandle`] it receives
//! on `subscribe`. The worker never learns how the events are obtained.

use capture_protocol::{GeoLocation, InertialKind, InertialSample, Point3D};
use chrono::Utc;
use crossbeam_channel::{RecvTimeoutError, Sender};
use rand::Rng;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    Location(GeoLocation),
    /// Satellite status changed. Arrives at the device's update cadence.
    SatelliteStatus,
    FirstFix,
    Inertial(InertialSample),
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("location source unavailable: {0}")]
    Unavailable(String),

    #[error("location source already subscribed")]
    AlreadySubscribed,

    #[error("failed to start location source thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Callback side handed to a source. Every method returns `false` once the
/// worker has stopped listening.
#[derive(Debug, Clone)]
pub struct SourceHandle {
    sender: Sender<SourceEvent>,
}

impl SourceHandle {
    pub fn new(sender: Sender<SourceEvent>) -> Self {
        Self { sender }
    }

    pub fn on_update(&self, location: GeoLocation) -> bool {
        self.send(SourceEvent::Location(location))
    }

    pub fn on_first_fix(&self) -> bool {
        self.send(SourceEvent::FirstFix)
    }

    pub fn on_satellite_status(&self) -> bool {
        self.send(SourceEvent::SatelliteStatus)
    }

    pub fn on_inertial(&self, sample: InertialSample) -> bool {
        self.send(SourceEvent::Inertial(sample))
    }

    fn send(&self, event: SourceEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

pub trait LocationSource: Send {
    fn subscribe(&mut self, handle: SourceHandle) -> Result<(), SourceError>;
    fn unsubscribe(&mut self);
}

#[derive(Debug, Clone)]
pub struct SimulatedSourceConfig {
    pub start_latitude: f64,
    pub start_longitude: f64,
    pub update_interval: Duration,
    /// Inertial samples per kind emitted between two location updates.
    pub inertial_samples_per_update: usize,
    pub speed_mps: f64,
}

impl Default for SimulatedSourceConfig {
    fn default() -> Self {
        Self {
            start_latitude: 51.0504,
            start_longitude: 13.7373,
            update_interval: Duration::from_secs(1),
            inertial_samples_per_update: 5,
            speed_mps: 5.0,
        }
    }
}

struct Running {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// Emits a jittered straight-line track at a fixed cadence.
pub struct SimulatedSource {
    config: SimulatedSourceConfig,
    running: Option<Running>,
}

impl SimulatedSource {
    pub fn new(config: SimulatedSourceConfig) -> Self {
        Self {
            config,
            running: None,
        }
    }
}

impl Default for SimulatedSource {
    fn default() -> Self {
        Self::new(SimulatedSourceConfig::default())
    }
}

impl LocationSource for SimulatedSource {
    fn subscribe(&mut self, handle: SourceHandle) -> Result<(), SourceError> {
        if self.running.is_some() {
            return Err(SourceError::AlreadySubscribed);
        }

        let (stop, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let config = self.config.clone();
        let thread = thread::Builder::new()
            .name("simulated-source".to_string())
            .spawn(move || {
                let mut rng = rand::thread_rng();
                let mut latitude = config.start_latitude;
                let mut longitude = config.start_longitude;
                let mut first = true;
                // Degrees of latitude travelled per update at the configured speed.
                let step =
                    config.speed_mps * config.update_interval.as_secs_f64() / 111_320.0;

                loop {
                    let now = Utc::now().timestamp_millis();
                    for kind in [
                        InertialKind::Acceleration,
                        InertialKind::Rotation,
                        InertialKind::Direction,
                    ] {
                        for _ in 0..config.inertial_samples_per_update {
                            let sample = InertialSample {
                                kind,
                                point: Point3D {
                                    x: rng.gen_range(-0.5..0.5),
                                    y: rng.gen_range(-0.5..0.5),
                                    z: rng.gen_range(9.3..10.3),
                                    timestamp_ms: now,
                                },
                            };
                            if !handle.on_inertial(sample) {
                                return;
                            }
                        }
                    }

                    latitude += step;
                    longitude += rng.gen_range(-step..=step) * 0.1;
                    let location = GeoLocation {
                        latitude,
                        longitude,
                        timestamp_ms: now,
                        speed: (config.speed_mps + rng.gen_range(-0.5..0.5)).max(0.0),
                        accuracy: rng.gen_range(3.0..12.0),
                    };
                    if !handle.on_update(location) {
                        return;
                    }
                    if first {
                        first = false;
                        handle.on_first_fix();
                    }
                    handle.on_satellite_status();

                    match stop_rx.recv_timeout(config.update_interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                    }
                }
            })
            .map_err(SourceError::Spawn)?;

        debug!(interval_ms = self.config.update_interval.as_millis() as u64, "Simulated source started");
        self.running = Some(Running { stop, thread });
        Ok(())
    }

    fn unsubscribe(&mut self) {
        if let Some(running) = self.running.take() {
            let _ = running.stop.try_send(());
            if running.thread.join().is_err() {
                warn!("Simulated source thread panicked");
            }
            debug!("Simulated source stopped");
        }
    }
}

impl Drop for SimulatedSource {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
