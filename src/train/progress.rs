//! Live progress from the training worker to a single observer.
//!
//! The channel is best-effort: with no subscriber attached, events are
//! dropped; with a slow subscriber, the oldest unread event is evicted once
//! the buffer is full. Publishing never blocks on the consumer and never
//! fails.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One progress record emitted by the worker. Epochs and batches are 1-based,
/// accuracies are fractions in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Running averages since the start of the epoch.
    BatchUpdate {
        epoch: usize,
        batch: usize,
        loss: f64,
        accuracy: f64,
    },
    EpochComplete {
        epoch: usize,
        loss: f64,
        accuracy: f64,
        val_loss: f64,
        val_accuracy: f64,
        elapsed_ms: u64,
    },
    /// Inference on a fixed sample of the test split.
    TrainingComplete {
        epoch: usize,
        images: Vec<Vec<f64>>,
        predictions: Vec<usize>,
        true_labels: Vec<usize>,
    },
    Error {
        epoch: usize,
        message: String,
    },
}

impl ProgressEvent {
    /// Event name as used on the wire (`event:` field of an SSE frame).
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::BatchUpdate { .. } => "batch_update",
            ProgressEvent::EpochComplete { .. } => "epoch_complete",
            ProgressEvent::TrainingComplete { .. } => "training_complete",
            ProgressEvent::Error { .. } => "error",
        }
    }

    pub fn epoch(&self) -> usize {
        match self {
            ProgressEvent::BatchUpdate { epoch, .. }
            | ProgressEvent::EpochComplete { epoch, .. }
            | ProgressEvent::TrainingComplete { epoch, .. }
            | ProgressEvent::Error { epoch, .. } => *epoch,
        }
    }

    /// `training_complete` and `error` end a stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::TrainingComplete { .. } | ProgressEvent::Error { .. })
    }
}

struct Inner {
    buffer: VecDeque<ProgressEvent>,
    subscriber: Option<u64>,
    next_id: u64,
    closed: bool,
    dropped: u64,
}

struct Shared {
    inner: Mutex<Inner>,
    ready: Condvar,
    capacity: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bounded, ordered, single-subscriber progress pipe. Cheap to clone; all
/// clones share the same buffer.
#[derive(Clone)]
pub struct ProgressChannel {
    shared: Arc<Shared>,
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        ProgressChannel {
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    buffer: VecDeque::with_capacity(capacity.max(1)),
                    subscriber: None,
                    next_id: 0,
                    closed: false,
                    dropped: 0,
                }),
                ready: Condvar::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// A channel that is already closed; its subscriptions end immediately.
    pub fn closed() -> Self {
        let channel = ProgressChannel::new(1);
        channel.close();
        channel
    }

    /// Producer side. Drops the event when nobody is subscribed or the
    /// channel is closed; evicts the oldest unread event when full.
    pub fn publish(&self, event: ProgressEvent) {
        let mut inner = self.shared.lock();
        if inner.closed || inner.subscriber.is_none() {
            return;
        }
        if inner.buffer.len() == self.shared.capacity {
            inner.buffer.pop_front();
            inner.dropped += 1;
            debug!(dropped = inner.dropped, "Progress buffer full, evicted oldest event");
        }
        inner.buffer.push_back(event);
        drop(inner);
        self.shared.ready.notify_all();
    }

    /// Attaches a subscriber, detaching any previous one. Events still
    /// buffered for the previous subscriber are handed to the new one.
    pub fn subscribe(&self) -> Subscription {
        let mut inner = self.shared.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscriber = Some(id);
        drop(inner);
        // Wake a detached subscriber blocked in recv so it can notice.
        self.shared.ready.notify_all();
        Subscription { shared: self.shared.clone(), id }
    }

    /// No more events will be accepted. The subscriber drains what is
    /// buffered and then sees the end of the stream.
    pub fn close(&self) {
        self.shared.lock().closed = true;
        self.shared.ready.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }

    pub fn has_subscriber(&self) -> bool {
        self.shared.lock().subscriber.is_some()
    }

    /// Events evicted because the subscriber fell behind.
    pub fn dropped(&self) -> u64 {
        self.shared.lock().dropped
    }
}

/// Outcome of `Subscription::recv_timeout`.
#[derive(Debug, Clone, PartialEq)]
pub enum Recv {
    Event(ProgressEvent),
    Timeout,
    /// Channel closed and drained, or this subscription was replaced.
    Closed,
}

/// Consumer side of a `ProgressChannel`. Dropping it detaches the subscriber.
pub struct Subscription {
    shared: Arc<Shared>,
    id: u64,
}

impl Subscription {
    /// Waits up to `timeout` for the next event.
    pub fn recv_timeout(&self, timeout: Duration) -> Recv {
        let deadline = Instant::now() + timeout;
        let mut inner = self.shared.lock();
        loop {
            if inner.subscriber != Some(self.id) {
                return Recv::Closed;
            }
            if let Some(event) = inner.buffer.pop_front() {
                return Recv::Event(event);
            }
            if inner.closed {
                return Recv::Closed;
            }
            let now = Instant::now();
            if now >= deadline {
                return Recv::Timeout;
            }
            inner = self.shared.ready
                .wait_timeout(inner, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Blocks until the next event, or `None` at the end of the stream.
    pub fn recv(&self) -> Option<ProgressEvent> {
        let mut inner = self.shared.lock();
        loop {
            if inner.subscriber != Some(self.id) {
                return None;
            }
            if let Some(event) = inner.buffer.pop_front() {
                return Some(event);
            }
            if inner.closed {
                return None;
            }
            inner = self.shared.ready.wait(inner).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl Iterator for Subscription {
    type Item = ProgressEvent;

    fn next(&mut self) -> Option<ProgressEvent> {
        self.recv()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let mut inner = self.shared.lock();
        if inner.subscriber == Some(self.id) {
            inner.subscriber = None;
            inner.buffer.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn batch(epoch: usize, batch: usize) -> ProgressEvent {
        ProgressEvent::BatchUpdate { epoch, batch, loss: 1.0, accuracy: 0.5 }
    }

    #[test]
    fn events_without_subscriber_are_dropped() {
        let ch = ProgressChannel::new(4);
        ch.publish(batch(1, 1));
        let sub = ch.subscribe();
        ch.publish(batch(1, 2));
        ch.close();
        let got: Vec<_> = sub.collect();
        assert_eq!(got, vec![batch(1, 2)]);
    }

    #[test]
    fn full_buffer_evicts_oldest() {
        let ch = ProgressChannel::new(2);
        let sub = ch.subscribe();
        for b in 1..=4 {
            ch.publish(batch(1, b));
        }
        ch.close();
        assert_eq!(sub.collect::<Vec<_>>(), vec![batch(1, 3), batch(1, 4)]);
        assert_eq!(ch.dropped(), 2);
    }

    #[test]
    fn order_is_preserved_across_threads() {
        let ch = ProgressChannel::new(1024);
        let sub = ch.subscribe();
        let producer = ch.clone();
        let handle = thread::spawn(move || {
            for b in 1..=100 {
                producer.publish(batch(1, b));
            }
            producer.close();
        });
        let batches: Vec<usize> = sub
            .map(|e| match e {
                ProgressEvent::BatchUpdate { batch, .. } => batch,
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        handle.join().unwrap();
        assert_eq!(batches, (1..=100).collect::<Vec<_>>());
    }

    #[test]
    fn new_subscriber_replaces_old() {
        let ch = ProgressChannel::new(8);
        let first = ch.subscribe();
        ch.publish(batch(1, 1));
        let second = ch.subscribe();
        assert_eq!(first.recv_timeout(Duration::from_millis(10)), Recv::Closed);
        assert_eq!(second.recv_timeout(Duration::from_millis(10)), Recv::Event(batch(1, 1)));
        drop(first);
        assert!(ch.has_subscriber());
    }

    #[test]
    fn dropping_subscriber_detaches() {
        let ch = ProgressChannel::new(8);
        let sub = ch.subscribe();
        drop(sub);
        assert!(!ch.has_subscriber());
        ch.publish(batch(1, 1));
    }

    #[test]
    fn recv_timeout_reports_timeout_then_closed() {
        let ch = ProgressChannel::new(8);
        let sub = ch.subscribe();
        assert_eq!(sub.recv_timeout(Duration::from_millis(5)), Recv::Timeout);
        ch.close();
        assert_eq!(sub.recv_timeout(Duration::from_millis(5)), Recv::Closed);
        assert_eq!(ProgressChannel::closed().subscribe().recv(), None);
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(batch(2, 7)).unwrap();
        assert_eq!(json["type"], "batch_update");
        assert_eq!(json["epoch"], 2);
        assert_eq!(json["batch"], 7);
        let err = ProgressEvent::Error { epoch: 3, message: "boom".into() };
        assert!(err.is_terminal());
        assert_eq!(err.kind(), "error");
    }
}
