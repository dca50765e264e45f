//! Movement dispatch - violation evaluation and subscriber delivery
//!
//! `on_movement` hands the work to the executor and returns immediately.
//! Inside the job:
//! 1. The movement is evaluated against the subject's curfew
//! 2. On a violation, the subject's one-shots are detached and each resolved
//! 3. Every stream interested in the subject gets the movement, violating or not
//!
//! Delivery to one subscriber never affects delivery to another: failures are
//! logged and counted, never retried.

use crate::domain::types::{Curfew, Movement, MovementNotification, SubjectId, ViolationEvent};
use crate::infra::metrics::Metrics;
use crate::services::curfew::is_violation;
use crate::services::executor::TaskExecutor;
use crate::services::registry::SubscriptionRegistry;
use crate::services::subscription::{PushOutcome, Resolution};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What a single dispatch did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    /// The movement breached the curfew
    pub violation: bool,
    /// One-shots resolved with the violation
    pub resolved: usize,
    /// One-shots whose waiting side had already gone
    pub failed: usize,
    /// Streams the movement was queued to
    pub pushed: usize,
    /// Streams whose queue was full
    pub dropped: usize,
    /// Streams found disconnected and removed
    pub disconnected: usize,
}

/// Evaluates movements and notifies subscribers off the caller's path
pub struct NotificationDispatcher {
    registry: Arc<SubscriptionRegistry>,
    executor: Arc<dyn TaskExecutor>,
    metrics: Arc<Metrics>,
}

impl NotificationDispatcher {
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        executor: Arc<dyn TaskExecutor>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { registry, executor, metrics }
    }

    /// Signal a newly recorded movement. Never blocks; no result.
    pub fn on_movement(&self, subject_id: SubjectId, movement: Movement, curfew: Option<Curfew>) {
        self.metrics.record_movement();

        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        let enqueued_at = Instant::now();

        let accepted = self.executor.execute(Box::new(move || {
            dispatch(&registry, &metrics, subject_id, &movement, curfew.as_ref());
            metrics.record_dispatch_latency(enqueued_at.elapsed().as_micros() as u64);
        }));

        if !accepted {
            self.metrics.record_dispatch_rejected();
            warn!(subject_id = %subject_id, "movement_dispatch_rejected");
        }
    }
}

/// Evaluate one movement and deliver to matching subscribers
pub fn dispatch(
    registry: &SubscriptionRegistry,
    metrics: &Metrics,
    subject_id: SubjectId,
    movement: &Movement,
    curfew: Option<&Curfew>,
) -> DispatchReport {
    let mut report = DispatchReport::default();

    if is_violation(curfew, movement) {
        report.violation = true;
        metrics.record_violation();

        let event = ViolationEvent { subject_id, location: movement.position };
        let handles = registry.snapshot_and_detach_one_shots(subject_id);

        info!(
            subject_id = %subject_id,
            location = %movement.position,
            timestamp = %movement.timestamp,
            subscribers = %handles.len(),
            "violation_detected"
        );

        for handle in handles {
            let age_ms = handle.age_ms();
            if handle.resolve(Resolution::Violation(event)) {
                report.resolved += 1;
                metrics.record_one_shot_resolved();
                debug!(subject_id = %subject_id, waited_ms = %age_ms, "one_shot_resolved");
            } else {
                report.failed += 1;
                metrics.record_one_shot_failed();
                debug!(subject_id = %subject_id, waited_ms = %age_ms, "one_shot_receiver_gone");
            }
        }
    }

    let notification = MovementNotification { subject_id, movement: *movement };
    for stream in registry.all_streams() {
        if !stream.is_interested_in(subject_id) {
            continue;
        }

        match stream.push(notification) {
            PushOutcome::Delivered => {
                report.pushed += 1;
                metrics.record_stream_push();
            }
            PushOutcome::Full => {
                report.dropped += 1;
                metrics.record_stream_drop();
                debug!(stream_id = %stream.id(), subject_id = %subject_id, "stream_queue_full");
            }
            PushOutcome::Closed => {
                // Transport went away without deregistering
                if registry.remove_stream(stream.id()) {
                    report.disconnected += 1;
                    metrics.record_stream_disconnected();
                    debug!(stream_id = %stream.id(), "stream_closed_on_push");
                }
            }
        }
    }

    report
}
