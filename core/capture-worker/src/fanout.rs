//! Listener fan-out registry.
//!
//! Holds the sinks of every attached listener in registration order and
//! broadcasts each capture event to all of them. Delivery is fire-and-forget:
//! one failing or panicking sink never keeps the event from later sinks, and
//! nothing a sink does can stall the worker beyond its own `deliver` call.

use capture_protocol::CaptureEvent;
use crossbeam_channel::{Receiver, Sender};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// The receiving side is gone; the subscription can be dropped.
    #[error("subscriber disconnected")]
    Disconnected,

    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Destination for the events of one subscription.
pub trait EventSink: Send {
    fn deliver(&self, event: &CaptureEvent) -> Result<(), DeliveryError>;
}

/// Sink backed by an unbounded channel, so delivery never blocks the worker.
pub struct ChannelSink {
    sender: Sender<CaptureEvent>,
}

impl ChannelSink {
    pub fn new(sender: Sender<CaptureEvent>) -> Self {
        Self { sender }
    }

    pub fn channel() -> (Self, Receiver<CaptureEvent>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self::new(sender), receiver)
    }
}

impl EventSink for ChannelSink {
    fn deliver(&self, event: &CaptureEvent) -> Result<(), DeliveryError> {
        self.sender
            .send(event.clone())
            .map_err(|_| DeliveryError::Disconnected)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
    pub pruned: usize,
}

struct Subscription {
    id: SubscriptionId,
    sink: Box<dyn EventSink>,
}

#[derive(Default)]
pub struct FanOutRegistry {
    entries: Vec<Subscription>,
}

impl FanOutRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a subscription. Re-registering an id swaps its sink in place
    /// and keeps its position.
    pub fn register(&mut self, id: SubscriptionId, sink: Box<dyn EventSink>) {
        if let Some(entry) = self.entries.iter_mut().find(|entry| entry.id == id) {
            debug!(subscription = %id, "Replacing sink of existing subscription");
            entry.sink = sink;
            return;
        }
        self.entries.push(Subscription { id, sink });
    }

    pub fn unregister(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.id != id);
        self.entries.len() != before
    }

    pub fn contains(&self, id: SubscriptionId) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn ids(&self) -> Vec<SubscriptionId> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn broadcast(&mut self, event: &CaptureEvent) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let mut disconnected = Vec::new();

        for entry in &self.entries {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry.sink.deliver(event)));
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(DeliveryError::Disconnected)) => {
                    report.failed += 1;
                    disconnected.push(entry.id);
                }
                Ok(Err(err)) => {
                    report.failed += 1;
                    warn!(
                        subscription = %entry.id,
                        kind = event.kind(),
                        error = %err,
                        "Event delivery failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    warn!(
                        subscription = %entry.id,
                        kind = event.kind(),
                        "Event sink panicked during delivery"
                    );
                }
            }
        }

        if !disconnected.is_empty() {
            self.entries.retain(|entry| !disconnected.contains(&entry.id));
            report.pruned = disconnected.len();
            debug!(pruned = report.pruned, "Pruned disconnected subscriptions");
        }

        report
    }
}
