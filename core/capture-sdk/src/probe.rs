//! Controller side of the ping/pong liveness probe.
//!
//! Each controller owns one pong channel and hands its sending half to the
//! workers it spawns, so acknowledgments are scoped to that pair. A probe
//! accepts only the pong carrying its own token; pongs left over from earlier
//! probes that already timed out are discarded.

use capture_protocol::{Ping, Pong};
use capture_worker::WorkerCommand;
use crossbeam_channel::{Receiver, Sender};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Running,
    TimedOut,
}

/// Receives the result of `SessionController::is_running`. Exactly one
/// method fires per call.
pub trait IsRunningCallback {
    fn is_running(&self);
    fn timed_out(&self);
}

const LOCK_RETRY: Duration = Duration::from_millis(2);

pub struct LivenessProbe {
    acknowledgments: Sender<Pong>,
    // Held for the whole wait so concurrent probes cannot take each other's pongs.
    pongs: Mutex<Receiver<Pong>>,
}

impl Default for LivenessProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessProbe {
    pub fn new() -> Self {
        let (acknowledgments, pongs) = crossbeam_channel::unbounded();
        Self {
            acknowledgments,
            pongs: Mutex::new(pongs),
        }
    }

    /// Sending half for the worker to answer pings on.
    pub fn acknowledgments(&self) -> Sender<Pong> {
        self.acknowledgments.clone()
    }

    pub fn probe(&self, worker: Option<&Sender<WorkerCommand>>, timeout: Duration) -> ProbeOutcome {
        let worker = match worker {
            Some(worker) => worker,
            None => {
                debug!("No capture worker to probe");
                return ProbeOutcome::TimedOut;
            }
        };

        let deadline = Instant::now() + timeout;
        let pongs = match self.lock_pongs(deadline) {
            Some(pongs) => pongs,
            None => {
                debug!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Liveness probe timed out waiting for an earlier probe"
                );
                return ProbeOutcome::TimedOut;
            }
        };
        let ping = Ping::new();
        if worker.send(WorkerCommand::Ping(ping.clone())).is_err() {
            debug!(token = %ping.token, "Capture worker gone; probe not sent");
            return ProbeOutcome::TimedOut;
        }

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match pongs.recv_timeout(remaining) {
                Ok(pong) if pong.answers(&ping) => return ProbeOutcome::Running,
                Ok(stale) => {
                    debug!(
                        token = %stale.token,
                        expected = %ping.token,
                        "Discarding stale pong"
                    );
                }
                Err(_) => {
                    debug!(
                        token = %ping.token,
                        timeout_ms = timeout.as_millis() as u64,
                        "Liveness probe timed out"
                    );
                    return ProbeOutcome::TimedOut;
                }
            }
        }
    }

    /// Waits for the pong receiver, giving up at `deadline`.
    fn lock_pongs(&self, deadline: Instant) -> Option<MutexGuard<'_, Receiver<Pong>>> {
        loop {
            match self.pongs.try_lock() {
                Ok(pongs) => return Some(pongs),
                Err(TryLockError::Poisoned(poisoned)) => return Some(poisoned.into_inner()),
                Err(TryLockError::WouldBlock) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    thread::sleep(LOCK_RETRY.min(deadline - now));
                }
            }
        }
    }
}
