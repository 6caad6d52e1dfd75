//! The capture worker actor.
//!
//! One dedicated thread per session owns the fix tracker, the fan-out
//! registry, the pending sensor batch and the collaborators. It keeps
//! sampling whether or not any listener is attached, and talks to the outside
//! only through channels: commands in, pongs and capture events out.
//!
//! Satellite status updates only announce fix changes; a first fix is always
//! announced. A panicking collaborator is reported as an `ErrorState` event
//! and the worker keeps running.

use capture_protocol::{
    CaptureEvent, ErrorInfo, FixState, Ping, Pong, SensorBatch, SessionHandle, VehicleMode,
    ERROR_PERSISTENCE_FAILURE, ERROR_SOURCE_FAILURE, ERROR_TRANSPORT_FAILURE,
};
use chrono::Utc;
use crossbeam_channel::{select, Receiver, Sender};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

use crate::collaborators::{
    CapturingIndicator, EventHandlingStrategy, MeasurementStore, MemoryStore, NoopIndicator,
    NotifyOnly, SpaceWarningAction,
};
use crate::config::WorkerConfig;
use crate::fanout::{EventSink, FanOutRegistry, SubscriptionId};
use crate::fix_status::FixStatusTracker;
use crate::source::{LocationSource, SourceEvent, SourceHandle};

pub enum WorkerCommand {
    /// Register a listener sink. `ack` is answered once it is registered;
    /// for bootstrap attaches, once sampling has started as well.
    Attach {
        subscription: SubscriptionId,
        sink: Box<dyn EventSink>,
        ack: Option<Sender<AttachAck>>,
    },
    /// Stop delivering to a subscription without halting sampling.
    Detach { subscription: SubscriptionId },
    Ping(Ping),
    SynchronizationSuccessful,
    Stop,
}

impl fmt::Debug for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerCommand::Attach {
                subscription, ack, ..
            } => f
                .debug_struct("Attach")
                .field("subscription", subscription)
                .field("ack", &ack.is_some())
                .finish(),
            WorkerCommand::Detach { subscription } => f
                .debug_struct("Detach")
                .field("subscription", subscription)
                .finish(),
            WorkerCommand::Ping(ping) => f.debug_tuple("Ping").field(ping).finish(),
            WorkerCommand::SynchronizationSuccessful => f.write_str("SynchronizationSuccessful"),
            WorkerCommand::Stop => f.write_str("Stop"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachAck {
    pub subscription: SubscriptionId,
    pub fix: FixState,
}

#[derive(Debug, thiserror::Error)]
#[error("capture worker is no longer running")]
pub struct WorkerGone;

#[derive(Clone)]
pub struct WorkerServices {
    pub store: Arc<dyn MeasurementStore>,
    pub indicator: Arc<dyn CapturingIndicator>,
    pub strategy: Arc<dyn EventHandlingStrategy>,
}

impl Default for WorkerServices {
    fn default() -> Self {
        Self {
            store: Arc::new(MemoryStore::new()),
            indicator: Arc::new(NoopIndicator),
            strategy: Arc::new(NotifyOnly),
        }
    }
}

pub struct WorkerSpawn {
    pub session: SessionHandle,
    pub vehicle: VehicleMode,
    pub config: WorkerConfig,
    pub source: Box<dyn LocationSource>,
    pub services: WorkerServices,
    /// Where pongs go. Scoped to the one controller that spawned the worker.
    pub pongs: Sender<Pong>,
    /// Commands handled before sampling starts.
    pub bootstrap: Vec<WorkerCommand>,
}

/// Controller-side handle of a running worker thread.
pub struct WorkerHandle {
    session: SessionHandle,
    commands: Sender<WorkerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn commands(&self) -> Sender<WorkerCommand> {
        self.commands.clone()
    }

    pub fn send(&self, command: WorkerCommand) -> Result<(), WorkerGone> {
        self.commands.send(command).map_err(|_| WorkerGone)
    }

    pub fn is_finished(&self) -> bool {
        self.thread
            .as_ref()
            .map(|thread| thread.is_finished())
            .unwrap_or(true)
    }

    /// Asks the worker to stop and waits for its thread to exit.
    /// Returns `false` if the thread panicked.
    pub fn stop(mut self) -> bool {
        if self.commands.send(WorkerCommand::Stop).is_err() {
            debug!(session = %self.session, "Worker already gone before stop");
        }
        match self.thread.take() {
            Some(thread) => thread.join().is_ok(),
            None => true,
        }
    }
}

pub fn spawn(request: WorkerSpawn) -> std::io::Result<WorkerHandle> {
    let (commands, command_rx) = crossbeam_channel::unbounded();
    let session = request.session.clone();
    let worker = CaptureWorker::new(
        request.session,
        request.vehicle,
        request.config,
        request.source,
        request.services,
        request.pongs,
    );
    let bootstrap = request.bootstrap;

    let thread = thread::Builder::new()
        .name("capture-worker".to_string())
        .spawn(move || worker.run(bootstrap, command_rx))?;

    Ok(WorkerHandle {
        session,
        commands,
        thread: Some(thread),
    })
}

enum Step {
    Continue,
    SamplingHalted,
    Shutdown,
}

struct CaptureWorker {
    session: SessionHandle,
    vehicle: VehicleMode,
    config: WorkerConfig,
    source: Box<dyn LocationSource>,
    services: WorkerServices,
    pongs: Sender<Pong>,
    tracker: FixStatusTracker,
    registry: FanOutRegistry,
    batch: SensorBatch,
    announced_fix: FixState,
    sampling: bool,
    low_space_warned: bool,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl CaptureWorker {
    fn new(
        session: SessionHandle,
        vehicle: VehicleMode,
        config: WorkerConfig,
        source: Box<dyn LocationSource>,
        services: WorkerServices,
        pongs: Sender<Pong>,
    ) -> Self {
        Self {
            tracker: FixStatusTracker::new(config.fix_threshold_ms),
            session,
            vehicle,
            config,
            source,
            services,
            pongs,
            registry: FanOutRegistry::new(),
            batch: SensorBatch::default(),
            announced_fix: FixState::NoFix,
            sampling: false,
            low_space_warned: false,
        }
    }

    fn run(mut self, bootstrap: Vec<WorkerCommand>, commands: Receiver<WorkerCommand>) {
        info!(session = %self.session, vehicle = %self.vehicle, "Capture worker started");

        // Bootstrap listeners are registered first so they hear about setup
        // faults, and acknowledged only once the worker is capturing.
        let mut shutdown = false;
        let mut pending_acks = Vec::new();
        for command in bootstrap {
            let command = match command {
                WorkerCommand::Attach {
                    subscription,
                    sink,
                    ack: Some(ack),
                } => {
                    pending_acks.push((subscription, ack));
                    WorkerCommand::Attach {
                        subscription,
                        sink,
                        ack: None,
                    }
                }
                other => other,
            };
            if let Step::Shutdown = self.handle_command(command) {
                shutdown = true;
            }
        }

        self.guarded(ERROR_TRANSPORT_FAILURE, "indicator.show", |worker| {
            worker.services.indicator.show(worker.vehicle)
        });
        let mut source_events = if shutdown {
            crossbeam_channel::never()
        } else {
            self.start_sampling()
        };
        for (subscription, ack) in pending_acks {
            let _ = ack.send(AttachAck {
                subscription,
                fix: self.tracker.state(),
            });
        }
        let flush = crossbeam_channel::tick(self.config.sensor_flush_interval());
        let disk = crossbeam_channel::tick(self.config.disk_check_interval());

        while !shutdown {
            let step = select! {
                recv(commands) -> message => match message {
                    Ok(command) => self.handle_command(command),
                    Err(_) => {
                        warn!(session = %self.session, "Controller channel closed; stopping worker");
                        Step::Shutdown
                    }
                },
                recv(source_events) -> message => match message {
                    Ok(event) => {
                        self.handle_source_event(event);
                        Step::Continue
                    }
                    Err(_) => {
                        debug!(session = %self.session, "Location source closed its channel");
                        Step::SamplingHalted
                    }
                },
                recv(flush) -> _ => {
                    self.flush_without_fix();
                    Step::Continue
                },
                recv(disk) -> _ => self.check_disk_space(),
            };

            match step {
                Step::Continue => {}
                Step::SamplingHalted => source_events = crossbeam_channel::never(),
                Step::Shutdown => shutdown = true,
            }
        }

        self.shutdown();
    }

    fn start_sampling(&mut self) -> Receiver<SourceEvent> {
        let (sender, receiver) = crossbeam_channel::unbounded();
        let subscribed = panic::catch_unwind(AssertUnwindSafe(|| {
            self.source.subscribe(SourceHandle::new(sender))
        }));
        match subscribed {
            Ok(Ok(())) => {
                self.sampling = true;
                receiver
            }
            Ok(Err(err)) => {
                self.report_fault(ERROR_SOURCE_FAILURE, &err);
                crossbeam_channel::never()
            }
            Err(payload) => {
                self.report_panic(ERROR_SOURCE_FAILURE, "source.subscribe", payload.as_ref());
                crossbeam_channel::never()
            }
        }
    }

    fn stop_sampling(&mut self) {
        if !self.sampling {
            return;
        }
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| self.source.unsubscribe())) {
            self.report_panic(ERROR_SOURCE_FAILURE, "source.unsubscribe", payload.as_ref());
        }
        self.sampling = false;
        self.flush_batch();
        info!(session = %self.session, "Sampling halted");
    }

    fn handle_command(&mut self, command: WorkerCommand) -> Step {
        match command {
            WorkerCommand::Attach {
                subscription,
                sink,
                ack,
            } => {
                self.registry.register(subscription, sink);
                info!(
                    session = %self.session,
                    subscription = %subscription,
                    listeners = self.registry.len(),
                    "Listener attached"
                );
                if let Some(ack) = ack {
                    let _ = ack.send(AttachAck {
                        subscription,
                        fix: self.tracker.state(),
                    });
                }
                Step::Continue
            }
            WorkerCommand::Detach { subscription } => {
                if self.registry.unregister(subscription) {
                    info!(session = %self.session, subscription = %subscription, "Listener detached");
                } else {
                    debug!(subscription = %subscription, "Detach for unknown subscription");
                }
                Step::Continue
            }
            WorkerCommand::Ping(ping) => {
                debug!(token = %ping.token, "Ping received");
                if self.pongs.send(Pong::echo(&ping)).is_err() {
                    debug!(token = %ping.token, "Pong receiver gone");
                }
                Step::Continue
            }
            WorkerCommand::SynchronizationSuccessful => {
                self.broadcast(CaptureEvent::SynchronizationSuccessful);
                Step::Continue
            }
            WorkerCommand::Stop => {
                info!(session = %self.session, "Stop requested");
                Step::Shutdown
            }
        }
    }

    fn handle_source_event(&mut self, event: SourceEvent) {
        match event {
            SourceEvent::Location(location) => {
                if let Err(err) = location.validate() {
                    warn!(code = %err.code, message = %err.message, "Dropping invalid location");
                    return;
                }
                self.tracker.record_location_update(now_millis());
                let stored = self.guarded(ERROR_PERSISTENCE_FAILURE, "store.append_location", |worker| {
                    worker.services.store.append_location(&location)
                });
                if let Some(Err(err)) = stored {
                    self.report_fault(ERROR_PERSISTENCE_FAILURE, &err);
                }
                self.broadcast(CaptureEvent::GeoLocationAcquired(location));
                self.flush_batch();
            }
            SourceEvent::SatelliteStatus => {
                self.tracker.handle_satellite_status(now_millis());
                let state = self.tracker.state();
                if state != self.announced_fix {
                    self.announced_fix = state;
                    info!(session = %self.session, fix = ?state, "Fix state changed");
                    let event = self.tracker.notification();
                    self.broadcast(event);
                }
            }
            SourceEvent::FirstFix => {
                let event = self.tracker.handle_first_fix(now_millis());
                self.announced_fix = self.tracker.state();
                info!(session = %self.session, "First fix acquired");
                self.broadcast(event);
            }
            SourceEvent::Inertial(sample) => self.batch.push(sample),
        }
    }

    fn flush_without_fix(&mut self) {
        if !self.tracker.has_fix() {
            self.flush_batch();
        }
    }

    fn flush_batch(&mut self) {
        if self.batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut self.batch);
        let stored = self.guarded(ERROR_PERSISTENCE_FAILURE, "store.append_sensor_batch", |worker| {
            worker.services.store.append_sensor_batch(&batch)
        });
        if let Some(Err(err)) = stored {
            self.report_fault(ERROR_PERSISTENCE_FAILURE, &err);
        }
        self.broadcast(CaptureEvent::SensorDataAcquired(batch));
    }

    fn check_disk_space(&mut self) -> Step {
        let measured = self.guarded(ERROR_PERSISTENCE_FAILURE, "store.disk_consumption", |worker| {
            worker.services.store.disk_consumption()
        });
        let consumption = match measured {
            Some(Some(consumption)) => consumption,
            _ => return Step::Continue,
        };

        if consumption.available_bytes >= self.config.low_disk_threshold_bytes {
            if self.low_space_warned {
                info!(
                    available_bytes = consumption.available_bytes,
                    "Disk space recovered"
                );
                self.low_space_warned = false;
            }
            return Step::Continue;
        }
        if self.low_space_warned {
            return Step::Continue;
        }

        self.low_space_warned = true;
        warn!(
            session = %self.session,
            available_bytes = consumption.available_bytes,
            threshold_bytes = self.config.low_disk_threshold_bytes,
            "Low disk space"
        );
        self.broadcast(CaptureEvent::LowDiskSpace(consumption));

        let action = self.guarded(ERROR_TRANSPORT_FAILURE, "strategy.handle_space_warning", |worker| {
            worker.services.strategy.handle_space_warning(&consumption)
        });
        match action.unwrap_or(SpaceWarningAction::Continue) {
            SpaceWarningAction::Continue => Step::Continue,
            SpaceWarningAction::StopSampling => {
                self.stop_sampling();
                Step::SamplingHalted
            }
        }
    }

    /// Runs a collaborator call, reporting a panic as `ErrorState` instead of
    /// unwinding the worker thread.
    fn guarded<R>(
        &mut self,
        code: &str,
        operation: &'static str,
        call: impl FnOnce(&Self) -> R,
    ) -> Option<R> {
        match panic::catch_unwind(AssertUnwindSafe(|| call(self))) {
            Ok(value) => Some(value),
            Err(payload) => {
                self.report_panic(code, operation, payload.as_ref());
                None
            }
        }
    }

    fn report_panic(&mut self, code: &str, operation: &'static str, payload: &(dyn Any + Send)) {
        let message = format!("{} panicked: {}", operation, panic_message(payload));
        error!(session = %self.session, code, operation, "Collaborator panicked");
        self.broadcast(CaptureEvent::ErrorState(ErrorInfo::new(code, message)));
    }

    fn report_fault(&mut self, code: &str, err: &dyn std::error::Error) {
        error!(session = %self.session, code, error = %err, "Capture worker fault");
        self.broadcast(CaptureEvent::ErrorState(ErrorInfo::new(code, err.to_string())));
    }

    fn broadcast(&mut self, event: CaptureEvent) {
        let report = self.registry.broadcast(&event);
        if report.failed > 0 {
            debug!(
                kind = event.kind(),
                delivered = report.delivered,
                failed = report.failed,
                "Partial event delivery"
            );
        }
    }

    fn shutdown(&mut self) {
        self.stop_sampling();
        self.guarded(ERROR_TRANSPORT_FAILURE, "indicator.hide", |worker| {
            worker.services.indicator.hide()
        });
        let listeners = self.registry.len();
        self.registry.clear();
        info!(session = %self.session, listeners, "Capture worker stopped");
    }
}
