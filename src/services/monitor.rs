//! Curfew monitor - the entry point to violation detection and delivery
//!
//! Owns the subscription registry, the dispatcher and the reset coordinator,
//! and hands out subscriber handles. Constructed once at startup and shared
//! behind an `Arc`; `shutdown` drains the worker pool when one is in use.

use crate::domain::types::{Curfew, Movement, SubjectId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::dispatcher::NotificationDispatcher;
use crate::services::executor::{TaskExecutor, WorkerPool};
use crate::services::registry::SubscriptionRegistry;
use crate::services::reset::ResetCoordinator;
use crate::services::subscription::{
    OneShot, OneShotReceiver, StreamId, StreamReceiver, StreamSubscription,
};
use std::sync::Arc;
use tracing::{debug, info};

pub struct CurfewMonitor {
    registry: Arc<SubscriptionRegistry>,
    dispatcher: NotificationDispatcher,
    reset: ResetCoordinator,
    /// Set when the monitor owns a worker pool that must be drained on shutdown
    pool: Option<Arc<WorkerPool>>,
    stream_buffer_size: usize,
    metrics: Arc<Metrics>,
}

impl CurfewMonitor {
    /// Build a monitor backed by a worker pool sized from config
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: &Config, metrics: Arc<Metrics>) -> Self {
        let pool = Arc::new(WorkerPool::new(
            config.dispatch_workers(),
            config.dispatch_queue_size(),
            metrics.clone(),
        ));
        let mut monitor =
            Self::with_executor(pool.clone(), config.stream_buffer_size(), metrics);
        monitor.pool = Some(pool);
        monitor
    }

    /// Build a monitor over an arbitrary executor
    pub fn with_executor(
        executor: Arc<dyn TaskExecutor>,
        stream_buffer_size: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let dispatcher = NotificationDispatcher::new(registry.clone(), executor, metrics.clone());
        let reset = ResetCoordinator::new(registry.clone(), metrics.clone());

        Self { registry, dispatcher, reset, pool: None, stream_buffer_size, metrics }
    }

    /// Signal a newly recorded movement. Returns immediately.
    pub fn on_movement(&self, subject_id: SubjectId, movement: Movement, curfew: Option<Curfew>) {
        self.dispatcher.on_movement(subject_id, movement, curfew);
    }

    /// Wait for the next violation by `subject_id`
    pub fn subscribe_one_shot(&self, subject_id: SubjectId) -> OneShotReceiver {
        let (handle, rx) = OneShot::channel(subject_id);
        self.registry.add_one_shot(subject_id, handle);
        self.metrics.record_one_shot_registered();
        rx
    }

    /// Open a movement stream with an empty interest set
    pub fn subscribe_stream(&self) -> (Arc<StreamSubscription>, StreamReceiver) {
        let (sub, rx) = StreamSubscription::channel(self.stream_buffer_size);
        self.registry.add_stream(sub.clone());
        self.metrics.record_stream_connected();
        info!(stream_id = %sub.id(), "stream_connected");
        (sub, rx)
    }

    /// Close a movement stream. Returns false if it was not connected.
    pub fn unsubscribe_stream(&self, id: StreamId) -> bool {
        let removed = self.registry.remove_stream(id);
        if removed {
            self.metrics.record_stream_disconnected();
            info!(stream_id = %id, "stream_disconnected");
        }
        removed
    }

    pub fn find_stream(&self, id: StreamId) -> Option<Arc<StreamSubscription>> {
        self.registry.find_stream(id)
    }

    /// Cancel every pending one-shot subscription
    pub fn reset_all(&self) -> usize {
        self.reset.reset_all()
    }

    /// Drop one-shots whose waiter has gone away
    pub fn prune_abandoned(&self) -> usize {
        let pruned = self.registry.prune_abandoned_one_shots().len();
        if pruned > 0 {
            self.metrics.record_one_shots_pruned(pruned as u64);
            debug!(pruned = %pruned, "one_shots_pruned");
        }
        pruned
    }

    /// Refresh registry and queue gauges
    pub fn sample_gauges(&self) {
        self.metrics.set_registry_sizes(
            self.registry.pending_one_shot_total() as u64,
            self.registry.stream_count() as u64,
        );
        if let Some(pool) = &self.pool {
            self.metrics.set_dispatch_queue_depth(pool.queue_depth() as u64);
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Stop accepting dispatch work and wait for queued work to finish
    pub async fn shutdown(&self) {
        if let Some(pool) = &self.pool {
            pool.shutdown().await;
        }
    }
}
