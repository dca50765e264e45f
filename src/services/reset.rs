//! Global reset of pending one-shot subscriptions
//!
//! Every pending one-shot is detached in one step and resolved as cancelled.
//! Subscriptions registered while a reset is running may survive it.

use crate::infra::metrics::Metrics;
use crate::services::registry::SubscriptionRegistry;
use crate::services::subscription::Resolution;
use std::sync::Arc;
use tracing::info;

pub struct ResetCoordinator {
    registry: Arc<SubscriptionRegistry>,
    metrics: Arc<Metrics>,
}

impl ResetCoordinator {
    pub fn new(registry: Arc<SubscriptionRegistry>, metrics: Arc<Metrics>) -> Self {
        Self { registry, metrics }
    }

    /// Cancel every pending one-shot. Returns how many were cancelled.
    ///
    /// Stream subscriptions are left connected.
    pub fn reset_all(&self) -> usize {
        let handles = self.registry.cancel_all_one_shots();
        let total = handles.len();

        let mut delivered = 0;
        for handle in handles {
            if handle.resolve(Resolution::Cancelled) {
                delivered += 1;
            }
            self.metrics.record_one_shot_cancelled();
        }

        info!(cancelled = %total, delivered = %delivered, "reset_all");
        total
    }
}
