//! The `simulate` subcommand.

use capture_protocol::{
    CaptureEvent, CaptureListener, DiskConsumption, ErrorInfo, GeoLocation, SensorBatch,
    VehicleMode,
};
use capture_sdk::config::load_config;
use capture_sdk::{CaptureError, CaptureServices, IsRunningCallback, SessionController};
use capture_worker::{LoggingIndicator, SimulatedSourceConfig, WorkerServices};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

pub struct SimulateArgs {
    pub vehicle: VehicleMode,
    pub duration_secs: u64,
    pub interval_ms: u64,
    pub detach_at_secs: Option<u64>,
    pub json: bool,
    pub config: Option<PathBuf>,
}

/// Prints every event the session delivers.
struct PrintingListener {
    json: bool,
}

impl PrintingListener {
    fn print(&self, event: CaptureEvent) {
        if self.json {
            match serde_json::to_string(&event) {
                Ok(line) => println!("{}", line),
                Err(err) => warn!(error = %err, kind = event.kind(), "Failed to encode event"),
            }
            return;
        }

        match &event {
            CaptureEvent::FixAcquired => println!("fix acquired"),
            CaptureEvent::FixLost => println!("fix lost"),
            CaptureEvent::GeoLocationAcquired(location) => println!(
                "location {:.6},{:.6} speed={:.1}m/s accuracy={:.1}m",
                location.latitude, location.longitude, location.speed, location.accuracy
            ),
            CaptureEvent::SensorDataAcquired(batch) => println!(
                "sensors accelerations={} rotations={} directions={}",
                batch.accelerations.len(),
                batch.rotations.len(),
                batch.directions.len()
            ),
            CaptureEvent::LowDiskSpace(consumption) => println!(
                "low disk space: {} bytes available",
                consumption.available_bytes
            ),
            CaptureEvent::SynchronizationSuccessful => println!("synchronization successful"),
            CaptureEvent::ErrorState(error) => println!("error {}", error),
        }
    }
}

impl CaptureListener for PrintingListener {
    fn on_fix_acquired(&self) {
        self.print(CaptureEvent::FixAcquired);
    }
    fn on_fix_lost(&self) {
        self.print(CaptureEvent::FixLost);
    }
    fn on_new_geo_location_acquired(&self, location: &GeoLocation) {
        self.print(CaptureEvent::GeoLocationAcquired(location.clone()));
    }
    fn on_new_sensor_data_acquired(&self, batch: &SensorBatch) {
        self.print(CaptureEvent::SensorDataAcquired(batch.clone()));
    }
    fn on_low_disk_space(&self, consumption: &DiskConsumption) {
        self.print(CaptureEvent::LowDiskSpace(*consumption));
    }
    fn on_synchronization_successful(&self) {
        self.print(CaptureEvent::SynchronizationSuccessful);
    }
    fn on_error_state(&self, error: &ErrorInfo) {
        self.print(CaptureEvent::ErrorState(error.clone()));
    }
}

struct StatusLogger;

impl IsRunningCallback for StatusLogger {
    fn is_running(&self) {
        info!("Capture worker is running");
    }

    fn timed_out(&self) {
        warn!("Capture worker did not answer the liveness probe");
    }
}

pub fn run(args: SimulateArgs) -> Result<(), CaptureError> {
    let config = load_config(args.config)?;
    let services = CaptureServices::simulated(SimulatedSourceConfig {
        update_interval: Duration::from_millis(args.interval_ms.max(1)),
        ..SimulatedSourceConfig::default()
    })
    .with_worker_services(WorkerServices {
        indicator: Arc::new(LoggingIndicator),
        ..WorkerServices::default()
    });
    let controller = SessionController::new(config, services);
    let probe_timeout = controller.default_probe_timeout();

    let listener = Arc::new(PrintingListener { json: args.json });
    let session = controller.start(listener, args.vehicle)?;
    info!(session = %session, vehicle = %args.vehicle, "Simulation started");

    let duration = Duration::from_secs(args.duration_secs);
    let mut elapsed = Duration::ZERO;

    if let Some(detach_at) = args.detach_at_secs.map(Duration::from_secs) {
        if detach_at < duration {
            thread::sleep(detach_at);
            controller.disconnect()?;
            controller.is_running(probe_timeout, &StatusLogger);

            let reattach_at = detach_at + (duration - detach_at) / 2;
            thread::sleep(reattach_at - detach_at);
            controller.reconnect()?;
            elapsed = reattach_at;
        } else {
            warn!(
                detach_at_secs = detach_at.as_secs(),
                duration_secs = duration.as_secs(),
                "Detach point is past the end of the session; ignoring"
            );
        }
    }

    thread::sleep(duration.saturating_sub(elapsed));
    controller.is_running(probe_timeout, &StatusLogger);
    controller.stop()?;
    controller.is_running(probe_timeout, &StatusLogger);
    info!(session = %session, "Simulation finished");
    Ok(())
}
