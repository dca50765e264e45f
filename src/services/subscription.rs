//! Delivery handles for violation and movement subscribers
//!
//! Two kinds of handle exist:
//! - `OneShot` - resolved exactly once with a violation or a cancellation,
//!   then discarded. The waiting side holds a `OneShotReceiver`.
//! - `StreamSubscription` - long-lived, filtered by a mutable interest set,
//!   fed through a bounded per-subscription queue drained by a `StreamReceiver`.
//!
//! Both sides are non-blocking for the producer: resolving a one-shot and
//! pushing to a stream never wait on the consumer.

use crate::domain::types::{MovementNotification, SubjectId, ViolationEvent};
use parking_lot::RwLock;
use rustc_hash::FxHashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

/// Terminal outcome of a one-shot subscription
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// The subject breached its curfew
    Violation(ViolationEvent),
    /// The subscription was cancelled (state reset or the handle was dropped)
    Cancelled,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Violation(_) => "violation",
            Resolution::Cancelled => "cancelled",
        }
    }
}

/// Registry-side half of a one-shot subscription
#[derive(Debug)]
pub struct OneShot {
    subject_id: SubjectId,
    registered_at: Instant,
    tx: oneshot::Sender<Resolution>,
}

impl OneShot {
    /// Create a linked handle/receiver pair for `subject_id`
    pub fn channel(subject_id: SubjectId) -> (OneShot, OneShotReceiver) {
        let (tx, rx) = oneshot::channel();
        let handle = OneShot { subject_id, registered_at: Instant::now(), tx };
        (handle, OneShotReceiver { subject_id, rx })
    }

    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    /// Milliseconds since registration
    pub fn age_ms(&self) -> u64 {
        self.registered_at.elapsed().as_millis() as u64
    }

    /// True once the waiting side has gone away
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolve the subscription, consuming it
    ///
    /// Returns false if nobody was waiting any more.
    pub fn resolve(self, resolution: Resolution) -> bool {
        self.tx.send(resolution).is_ok()
    }
}

/// Waiting half of a one-shot subscription
///
/// Resolves to `Resolution::Cancelled` if the handle is dropped unresolved.
#[derive(Debug)]
pub struct OneShotReceiver {
    subject_id: SubjectId,
    rx: oneshot::Receiver<Resolution>,
}

impl OneShotReceiver {
    pub fn subject_id(&self) -> SubjectId {
        self.subject_id
    }

    /// Non-blocking check; `None` while still registered
    pub fn try_resolution(&mut self) -> Option<Resolution> {
        match self.rx.try_recv() {
            Ok(resolution) => Some(resolution),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Resolution::Cancelled),
        }
    }
}

impl Future for OneShotReceiver {
    type Output = Resolution;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| result.unwrap_or(Resolution::Cancelled))
    }
}

/// Identifier of a stream subscription (UUID v7, time-ordered)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for StreamId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(StreamId)
    }
}

/// Result of pushing a notification to a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Queued for the transport
    Delivered,
    /// Queue full; notification dropped for this subscriber only
    Full,
    /// Transport side has gone away
    Closed,
}

/// Registry-side half of a persistent push subscription
#[derive(Debug)]
pub struct StreamSubscription {
    id: StreamId,
    interest: RwLock<FxHashSet<SubjectId>>,
    tx: mpsc::Sender<MovementNotification>,
}

impl StreamSubscription {
    /// Create a subscription with an empty interest set and a queue of `buffer_size`
    pub fn channel(buffer_size: usize) -> (Arc<StreamSubscription>, StreamReceiver) {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        let id = StreamId::new();
        let sub = Arc::new(StreamSubscription { id, interest: RwLock::new(FxHashSet::default()), tx });
        (sub, StreamReceiver { id, rx })
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Replace the interest set
    pub fn set_interest<I: IntoIterator<Item = SubjectId>>(&self, subjects: I) {
        let next: FxHashSet<SubjectId> = subjects.into_iter().collect();
        *self.interest.write() = next;
    }

    pub fn is_interested_in(&self, subject_id: SubjectId) -> bool {
        self.interest.read().contains(&subject_id)
    }

    /// Current interest set, sorted
    pub fn interest(&self) -> Vec<SubjectId> {
        let mut ids: Vec<SubjectId> = self.interest.read().iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Queue a notification without waiting on the transport
    pub fn push(&self, notification: MovementNotification) -> PushOutcome {
        match self.tx.try_send(notification) {
            Ok(()) => PushOutcome::Delivered,
            Err(TrySendError::Full(_)) => PushOutcome::Full,
            Err(TrySendError::Closed(_)) => PushOutcome::Closed,
        }
    }

    /// True once the receiver has been dropped
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Transport-side half of a stream subscription
#[derive(Debug)]
pub struct StreamReceiver {
    id: StreamId,
    rx: mpsc::Receiver<MovementNotification>,
}

impl StreamReceiver {
    pub fn id(&self) -> StreamId {
        self.id
    }

    /// Wait for the next notification; `None` once the subscription is gone
    pub async fn recv(&mut self) -> Option<MovementNotification> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MovementNotification> {
        self.rx.try_recv().ok()
    }

    pub fn poll_recv(&mut self, cx: &mut Context<'_>) -> Poll<Option<MovementNotification>> {
        self.rx.poll_recv(cx)
    }
}
