//! Subscription registry
//!
//! Holds pending one-shot subscriptions keyed by subject, plus the set of
//! connected stream subscriptions. A single mutex guards both maps and is
//! held only for O(1) map work: every operation that hands handles back to a
//! caller moves or copies them out under the lock, so delivery always happens
//! with the lock released.

use crate::domain::types::SubjectId;
use crate::services::subscription::{OneShot, StreamId, StreamSubscription};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::debug;

/// Most subjects have one or two waiters at a time
type OneShotList = SmallVec<[OneShot; 2]>;

#[derive(Default)]
struct RegistryState {
    /// Pending one-shots per subject, in registration order
    one_shots: FxHashMap<SubjectId, OneShotList>,
    /// Connected streams by id
    streams: FxHashMap<StreamId, Arc<StreamSubscription>>,
}

/// Concurrent registry of one-shot and stream subscriptions
#[derive(Default)]
pub struct SubscriptionRegistry {
    state: Mutex<RegistryState>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a one-shot subscription for `subject_id`
    pub fn add_one_shot(&self, subject_id: SubjectId, handle: OneShot) {
        let pending = {
            let mut state = self.state.lock();
            let list = state.one_shots.entry(subject_id).or_default();
            list.push(handle);
            list.len()
        };
        debug!(subject_id = %subject_id, pending = %pending, "one_shot_registered");
    }

    /// Atomically remove and return every one-shot registered for `subject_id`
    ///
    /// A handle returned here is invisible to any later or concurrent caller,
    /// so each one-shot is delivered at most once.
    pub fn snapshot_and_detach_one_shots(&self, subject_id: SubjectId) -> Vec<OneShot> {
        let detached = self.state.lock().one_shots.remove(&subject_id);
        detached.map(SmallVec::into_vec).unwrap_or_default()
    }

    /// Atomically remove and return every one-shot for every subject
    pub fn cancel_all_one_shots(&self) -> Vec<OneShot> {
        let drained = std::mem::take(&mut self.state.lock().one_shots);
        drained.into_values().flatten().collect()
    }

    /// Remove and return one-shots whose waiting side has gone away
    pub fn prune_abandoned_one_shots(&self) -> Vec<OneShot> {
        let mut pruned = Vec::new();
        let mut state = self.state.lock();
        state.one_shots.retain(|_, list| {
            let mut i = 0;
            while i < list.len() {
                if list[i].is_abandoned() {
                    pruned.push(list.remove(i));
                } else {
                    i += 1;
                }
            }
            !list.is_empty()
        });
        pruned
    }

    /// Register a connected stream subscription
    pub fn add_stream(&self, handle: Arc<StreamSubscription>) {
        let id = handle.id();
        let count = {
            let mut state = self.state.lock();
            state.streams.insert(id, handle);
            state.streams.len()
        };
        debug!(stream_id = %id, streams = %count, "stream_registered");
    }

    /// Deregister a stream subscription. Returns false if it was not registered.
    pub fn remove_stream(&self, id: StreamId) -> bool {
        let removed = self.state.lock().streams.remove(&id).is_some();
        if removed {
            debug!(stream_id = %id, "stream_deregistered");
        }
        removed
    }

    /// Look up a connected stream by id
    pub fn find_stream(&self, id: StreamId) -> Option<Arc<StreamSubscription>> {
        self.state.lock().streams.get(&id).cloned()
    }

    /// Snapshot of connected streams for lock-free iteration
    pub fn all_streams(&self) -> Vec<Arc<StreamSubscription>> {
        self.state.lock().streams.values().cloned().collect()
    }

    /// Pending one-shots for a single subject
    pub fn pending_one_shots(&self, subject_id: SubjectId) -> usize {
        self.state.lock().one_shots.get(&subject_id).map_or(0, |list| list.len())
    }

    /// Pending one-shots across all subjects
    pub fn pending_one_shot_total(&self) -> usize {
        self.state.lock().one_shots.values().map(|list| list.len()).sum()
    }

    pub fn stream_count(&self) -> usize {
        self.state.lock().streams.len()
    }
}
