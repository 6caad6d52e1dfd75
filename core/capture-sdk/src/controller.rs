//! SessionController - the client-facing lifecycle API.
//!
//! A controller owns at most one capture session. The session's worker lives
//! on its own thread and keeps sampling across `disconnect`/`reconnect`; only
//! `stop` ends it.
//!
//! ## State Machine
//!
//! ```text
//!              start                 disconnect
//! NoSession ─────────▶ Attached ─────────────────▶ Detached
//!     ▲                 │   ▲                         │
//!     └──── stop ───────┘   └──────── reconnect ──────┘
//! ```
//!
//! `start` and `reconnect` are idempotent. `stop` and `disconnect` are strict
//! and return `NotConnected` outside the Attached state. Every transition runs
//! under one lock. `is_running` never takes it: the live worker's command
//! channel is published separately, so a probe stays bounded by its timeout
//! while `start` or `stop` is blocked on the worker.

use capture_protocol::{
    CaptureListener, ErrorInfo, SessionHandle, VehicleMode, ERROR_TRANSPORT_FAILURE,
};
use capture_worker::{
    spawn, LocationSource, SimulatedSource, SimulatedSourceConfig, SubscriptionId,
    WorkerCommand, WorkerHandle, WorkerServices, WorkerSpawn,
};
use crossbeam_channel::Sender;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::CaptureConfig;
use crate::delivery::{spawn_delivery, DeliveryGate};
use crate::error::{CaptureError, Result};
use crate::probe::{IsRunningCallback, LivenessProbe, ProbeOutcome};

/// Builds a fresh location source for each session.
pub type SourceFactory = Arc<dyn Fn() -> Box<dyn LocationSource> + Send + Sync>;

/// Collaborators handed to every worker this controller spawns.
#[derive(Clone)]
pub struct CaptureServices {
    pub source_factory: SourceFactory,
    pub worker: WorkerServices,
}

impl CaptureServices {
    pub fn new<F>(source_factory: F) -> Self
    where
        F: Fn() -> Box<dyn LocationSource> + Send + Sync + 'static,
    {
        Self {
            source_factory: Arc::new(source_factory),
            worker: WorkerServices::default(),
        }
    }

    pub fn simulated(config: SimulatedSourceConfig) -> Self {
        Self::new(move || Box::new(SimulatedSource::new(config.clone())) as Box<dyn LocationSource>)
    }

    pub fn with_worker_services(mut self, worker: WorkerServices) -> Self {
        self.worker = worker;
        self
    }
}

impl Default for CaptureServices {
    fn default() -> Self {
        Self::simulated(SimulatedSourceConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentState {
    Attached,
    Detached,
}

struct Session {
    handle: SessionHandle,
    vehicle: VehicleMode,
    worker: WorkerHandle,
    listener: Arc<dyn CaptureListener>,
    subscription: SubscriptionId,
    gate: DeliveryGate,
    next_subscription: u64,
}

impl Session {
    fn allocate_subscription(&mut self) -> SubscriptionId {
        let id = SubscriptionId::new(self.next_subscription);
        self.next_subscription += 1;
        id
    }
}

enum SessionState {
    NoSession,
    Attached(Session),
    Detached(Session),
}

impl SessionState {
    fn session(&self) -> Option<&Session> {
        match self {
            SessionState::NoSession => None,
            SessionState::Attached(session) | SessionState::Detached(session) => Some(session),
        }
    }
}

pub struct SessionController {
    config: CaptureConfig,
    services: CaptureServices,
    probe: LivenessProbe,
    state: Mutex<SessionState>,
    // Written only while `state` is held; read by `probe` without it.
    probe_target: Mutex<Option<Sender<WorkerCommand>>>,
}

impl Default for SessionController {
    fn default() -> Self {
        Self::new(CaptureConfig::default(), CaptureServices::default())
    }
}

impl SessionController {
    pub fn new(config: CaptureConfig, services: CaptureServices) -> Self {
        Self {
            config,
            services,
            probe: LivenessProbe::new(),
            state: Mutex::new(SessionState::NoSession),
            probe_target: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Probe timeout used when the caller has no preference.
    pub fn default_probe_timeout(&self) -> Duration {
        self.config.controller.default_probe_timeout()
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_probe_target(&self, commands: Option<Sender<WorkerCommand>>) {
        *self
            .probe_target
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = commands;
    }

    fn probe_target(&self) -> Option<Sender<WorkerCommand>> {
        self.probe_target
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Starts a capture session and attaches `listener` to it.
    ///
    /// Calling `start` while attached returns the running session's handle
    /// and leaves the session untouched. Calling it while detached is an
    /// error: `reconnect` or `stop` the existing session first.
    pub fn start(
        &self,
        listener: Arc<dyn CaptureListener>,
        vehicle: VehicleMode,
    ) -> Result<SessionHandle> {
        let mut state = self.lock_state();
        match &*state {
            SessionState::Attached(session) => {
                debug!(session = %session.handle, "Start while attached; keeping session");
                return Ok(session.handle.clone());
            }
            SessionState::Detached(session) => {
                warn!(session = %session.handle, "Start while detached");
                return Err(CaptureError::NotConnected { operation: "start" });
            }
            SessionState::NoSession => {}
        }

        let session = self.spawn_session(listener, vehicle)?;
        let handle = session.handle.clone();
        info!(session = %handle, vehicle = %vehicle, "Capture session started");
        self.set_probe_target(Some(session.worker.commands()));
        *state = SessionState::Attached(session);
        Ok(handle)
    }

    fn spawn_session(
        &self,
        listener: Arc<dyn CaptureListener>,
        vehicle: VehicleMode,
    ) -> Result<Session> {
        let handle = SessionHandle::generate();
        let subscription = SubscriptionId::new(1);
        let (sink, gate) = spawn_delivery(subscription, listener.clone()).map_err(|err| {
            CaptureError::SetupFailure {
                reason: format!("spawning listener delivery: {}", err),
            }
        })?;

        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        let worker = spawn(WorkerSpawn {
            session: handle.clone(),
            vehicle,
            config: self.config.worker.clone(),
            source: (self.services.source_factory)(),
            services: self.services.worker.clone(),
            pongs: self.probe.acknowledgments(),
            bootstrap: vec![WorkerCommand::Attach {
                subscription,
                sink: Box::new(sink),
                ack: Some(ack_tx),
            }],
        })
        .map_err(|err| CaptureError::SetupFailure {
            reason: format!("spawning capture worker: {}", err),
        })?;

        let attach_timeout = self.config.controller.attach_timeout();
        match ack_rx.recv_timeout(attach_timeout) {
            Ok(ack) => debug!(session = %handle, fix = ?ack.fix, "Listener attach acknowledged"),
            Err(_) => {
                error!(
                    session = %handle,
                    timeout_ms = attach_timeout.as_millis() as u64,
                    "Capture worker never acknowledged attach"
                );
                gate.close();
                worker.stop();
                return Err(CaptureError::SetupFailure {
                    reason: format!(
                        "worker did not acknowledge attach within {} ms",
                        attach_timeout.as_millis()
                    ),
                });
            }
        }

        Ok(Session {
            handle,
            vehicle,
            worker,
            listener,
            subscription,
            gate,
            next_subscription: subscription.value() + 1,
        })
    }

    /// Stops the attached session and waits for its worker to exit.
    pub fn stop(&self) -> Result<()> {
        let mut state = self.lock_state();
        let session = match std::mem::replace(&mut *state, SessionState::NoSession) {
            SessionState::Attached(session) => session,
            other => {
                debug!(detached = other.session().is_some(), "Stop without attached session");
                *state = other;
                return Err(CaptureError::NotConnected { operation: "stop" });
            }
        };

        let Session {
            handle,
            worker,
            gate,
            ..
        } = session;
        self.set_probe_target(None);
        if !worker.stop() {
            warn!(session = %handle, "Capture worker exited abnormally");
        }
        gate.close();
        info!(session = %handle, "Capture session stopped");
        Ok(())
    }

    /// Detaches the listener. The worker keeps sampling.
    ///
    /// No callback starts after this returns, but one already running on the
    /// listener's delivery thread is left to finish. A listener may call back
    /// into the controller from its callbacks, so it is not joined here.
    pub fn disconnect(&self) -> Result<()> {
        let mut state = self.lock_state();
        let session = match std::mem::replace(&mut *state, SessionState::NoSession) {
            SessionState::Attached(session) => session,
            other => {
                *state = other;
                return Err(CaptureError::NotConnected {
                    operation: "disconnect",
                });
            }
        };

        session.gate.close();
        let detach = WorkerCommand::Detach {
            subscription: session.subscription,
        };
        if session.worker.send(detach).is_err() {
            debug!(session = %session.handle, "Worker gone during disconnect");
        }
        info!(
            session = %session.handle,
            subscription = %session.subscription,
            "Listener detached"
        );
        *state = SessionState::Detached(session);
        Ok(())
    }

    /// Re-attaches the session's listener to the still-running worker.
    ///
    /// Never fails. Outside the Detached state this does nothing. If the
    /// worker has died meanwhile, the listener hears about it through
    /// `on_error_state` and the controller returns to having no session.
    pub fn reconnect(&self) -> Result<()> {
        let mut state = self.lock_state();
        let mut session = match std::mem::replace(&mut *state, SessionState::NoSession) {
            SessionState::Detached(session) => session,
            other => {
                debug!(attached = other.session().is_some(), "Reconnect with nothing detached");
                *state = other;
                return Ok(());
            }
        };

        let subscription = session.allocate_subscription();
        let (sink, gate) = match spawn_delivery(subscription, session.listener.clone()) {
            Ok(delivery) => delivery,
            Err(err) => {
                error!(session = %session.handle, error = %err, "Failed to spawn listener delivery");
                let listener = session.listener.clone();
                *state = SessionState::Detached(session);
                drop(state);
                notify_transport_failure(listener.as_ref(), format!("reconnect failed: {}", err));
                return Ok(());
            }
        };

        let attach = WorkerCommand::Attach {
            subscription,
            sink: Box::new(sink),
            ack: None,
        };
        if session.worker.send(attach).is_err() {
            gate.close();
            warn!(session = %session.handle, "Capture worker gone; dropping session");
            let Session {
                handle,
                worker,
                listener,
                ..
            } = session;
            self.set_probe_target(None);
            worker.stop();
            drop(state);
            notify_transport_failure(
                listener.as_ref(),
                format!("capture worker for {} is no longer running", handle),
            );
            return Ok(());
        }

        session.subscription = subscription;
        session.gate = gate;
        info!(
            session = %session.handle,
            subscription = %subscription,
            vehicle = %session.vehicle,
            "Listener reattached"
        );
        *state = SessionState::Attached(session);
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────

    /// Asks the worker whether it is alive. Exactly one callback method
    /// fires, after at most `timeout`.
    pub fn is_running(&self, timeout: Duration, callback: &dyn IsRunningCallback) {
        match self.probe(timeout) {
            ProbeOutcome::Running => callback.is_running(),
            ProbeOutcome::TimedOut => callback.timed_out(),
        }
    }

    pub fn probe(&self, timeout: Duration) -> ProbeOutcome {
        let commands = self.probe_target();
        self.probe.probe(commands.as_ref(), timeout)
    }

    pub fn attachment_state(&self) -> Option<AttachmentState> {
        match &*self.lock_state() {
            SessionState::NoSession => None,
            SessionState::Attached(_) => Some(AttachmentState::Attached),
            SessionState::Detached(_) => Some(AttachmentState::Detached),
        }
    }

    pub fn session(&self) -> Option<SessionHandle> {
        self.lock_state()
            .session()
            .map(|session| session.handle.clone())
    }

    /// Forwards a completed upload to every attached listener.
    pub fn report_synchronization_successful(&self) -> Result<()> {
        let state = self.lock_state();
        let session = state.session().ok_or(CaptureError::NotConnected {
            operation: "report_synchronization_successful",
        })?;
        if session
            .worker
            .send(WorkerCommand::SynchronizationSuccessful)
            .is_err()
        {
            debug!(session = %session.handle, "Worker gone; synchronization not forwarded");
        }
        Ok(())
    }
}

fn notify_transport_failure(listener: &dyn CaptureListener, message: String) {
    let info = ErrorInfo::new(ERROR_TRANSPORT_FAILURE, message);
    if panic::catch_unwind(AssertUnwindSafe(|| listener.on_error_state(&info))).is_err() {
        warn!("Listener panicked while handling transport failure");
    }
}
