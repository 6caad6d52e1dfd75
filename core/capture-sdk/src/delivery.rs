//! Listener delivery threads.
//!
//! Each attachment gets its own thread draining the subscription channel, so
//! events reach one listener in emission order while a slow listener never
//! holds up the worker or any other listener. The thread ends once the worker
//! drops the sink on detach or stop.
//!
//! Closing the gate stops dispatch of every event not yet started; events
//! still queued when the worker processes the detach are drained silently. A
//! callback already running when the gate closes is not interrupted or
//! waited for, so it may finish after `disconnect` returns.

use capture_protocol::CaptureListener;
use capture_worker::{ChannelSink, SubscriptionId};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub(crate) struct DeliveryGate(Arc<AtomicBool>);

impl DeliveryGate {
    fn open() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub(crate) fn close(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_open(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) fn spawn_delivery(
    subscription: SubscriptionId,
    listener: Arc<dyn CaptureListener>,
) -> std::io::Result<(ChannelSink, DeliveryGate)> {
    let (sink, events) = ChannelSink::channel();
    let gate = DeliveryGate::open();
    let thread_gate = gate.clone();
    thread::Builder::new()
        .name(format!("capture-listener-{}", subscription.value()))
        .spawn(move || {
            for event in events.iter() {
                if !thread_gate.is_open() {
                    continue;
                }
                let outcome =
                    panic::catch_unwind(AssertUnwindSafe(|| event.dispatch(listener.as_ref())));
                if outcome.is_err() {
                    warn!(
                        subscription = %subscription,
                        kind = event.kind(),
                        "Listener panicked while handling event"
                    );
                }
            }
            debug!(subscription = %subscription, "Listener delivery ended");
        })?;
    Ok((sink, gate))
}
