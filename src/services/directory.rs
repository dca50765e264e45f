//! In-memory subject directory
//!
//! Per-subject curfew and latest known movement. Movements arriving out of
//! order never replace a later one.

use crate::domain::types::{Curfew, Movement, SubjectId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

#[derive(Debug, Default, Clone, Copy)]
struct SubjectRecord {
    curfew: Option<Curfew>,
    latest: Option<Movement>,
}

#[derive(Debug, Default)]
pub struct SubjectDirectory {
    subjects: RwLock<FxHashMap<SubjectId, SubjectRecord>>,
}

impl SubjectDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_curfew(&self, subject_id: SubjectId, curfew: Curfew) {
        self.subjects.write().entry(subject_id).or_default().curfew = Some(curfew);
    }

    /// Returns false if the subject had no curfew
    pub fn remove_curfew(&self, subject_id: SubjectId) -> bool {
        self.subjects
            .write()
            .get_mut(&subject_id)
            .and_then(|record| record.curfew.take())
            .is_some()
    }

    pub fn curfew(&self, subject_id: SubjectId) -> Option<Curfew> {
        self.subjects.read().get(&subject_id).and_then(|record| record.curfew)
    }

    /// Record a movement and return the curfew in force for the subject
    pub fn record_movement(&self, subject_id: SubjectId, movement: Movement) -> Option<Curfew> {
        let mut subjects = self.subjects.write();
        let record = subjects.entry(subject_id).or_default();
        match record.latest {
            Some(latest) if latest.timestamp > movement.timestamp => {}
            _ => record.latest = Some(movement),
        }
        record.curfew
    }

    /// Most recent movement by timestamp
    pub fn latest_movement(&self, subject_id: SubjectId) -> Option<Movement> {
        self.subjects.read().get(&subject_id).and_then(|record| record.latest)
    }

    /// Forget every subject. Returns how many were known.
    pub fn clear(&self) -> usize {
        let mut subjects = self.subjects.write();
        let count = subjects.len();
        subjects.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.subjects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.read().is_empty()
    }
}
