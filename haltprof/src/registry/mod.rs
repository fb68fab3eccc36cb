//! Registry of threads that may be profiled
//!
//! Threads register once and stay in registration order. The sampler only
//! reads records; registration, filtering and deletion happen through
//! [`crate::Profiler`] while the shared state lock is held.

pub mod activity;

use std::sync::Arc;
use std::time::Instant;

use crate::domain::Tid;

pub use activity::{SleepScope, ThreadActivity};

/// Key of one registration (TIDs can be reused by the OS)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegistrationId(pub u64);

/// Everything the sampler knows about one registered thread
#[derive(Debug)]
pub struct ThreadRecord<H> {
    id: RegistrationId,
    tid: Tid,
    name: String,
    /// `None` if the OS handle could not be opened
    handle: Option<H>,
    activity: Arc<ThreadActivity>,
    has_profile: bool,
    pending_delete: bool,
    last_responsiveness: Option<Instant>,
}

impl<H> ThreadRecord<H> {
    #[must_use]
    pub fn id(&self) -> RegistrationId {
        self.id
    }

    #[must_use]
    pub fn tid(&self) -> Tid {
        self.tid
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn handle(&self) -> Option<&H> {
        self.handle.as_ref()
    }

    #[must_use]
    pub fn activity(&self) -> &ThreadActivity {
        &self.activity
    }

    /// Whether the current session selected this thread
    #[must_use]
    pub fn has_profile(&self) -> bool {
        self.has_profile
    }

    /// The thread unregistered while a session was running
    #[must_use]
    pub fn is_pending_delete(&self) -> bool {
        self.pending_delete
    }

    /// Record that the sampler reached this thread
    pub fn update_responsiveness(&mut self, now: Instant) {
        self.last_responsiveness = Some(now);
    }

    #[must_use]
    pub fn last_responsiveness(&self) -> Option<Instant> {
        self.last_responsiveness
    }

    /// Whether the sampler should look at this thread at all
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.has_profile && !self.pending_delete
    }
}

/// Registered threads in registration order
#[derive(Debug)]
pub struct ThreadRegistry<H> {
    records: Vec<ThreadRecord<H>>,
    next_id: u64,
}

impl<H> Default for ThreadRegistry<H> {
    fn default() -> Self {
        Self { records: Vec::new(), next_id: 0 }
    }
}

impl<H> ThreadRegistry<H> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return its key
    pub fn register(
        &mut self,
        tid: Tid,
        name: impl Into<String>,
        handle: Option<H>,
        activity: Arc<ThreadActivity>,
        has_profile: bool,
    ) -> RegistrationId {
        let id = RegistrationId(self.next_id);
        self.next_id += 1;
        self.records.push(ThreadRecord {
            id,
            tid,
            name: name.into(),
            handle,
            activity,
            has_profile,
            pending_delete: false,
            last_responsiveness: None,
        });
        id
    }

    /// Remove a record now, releasing its handle
    pub fn remove(&mut self, id: RegistrationId) -> bool {
        let before = self.records.len();
        self.records.retain(|record| record.id != id);
        self.records.len() != before
    }

    /// Keep a record until the session ends but stop sampling it
    pub fn mark_pending_delete(&mut self, id: RegistrationId) -> bool {
        match self.records.iter_mut().find(|record| record.id == id) {
            Some(record) => {
                record.pending_delete = true;
                true
            }
            None => false,
        }
    }

    /// Drop every pending-delete record; returns how many were removed
    pub fn discard_pending_deletes(&mut self) -> usize {
        let before = self.records.len();
        self.records.retain(|record| !record.pending_delete);
        before - self.records.len()
    }

    /// Re-evaluate which threads the session wants, by name filter
    pub fn apply_filters(&mut self, filters: &[String]) {
        for record in &mut self.records {
            record.has_profile = thread_selected(&record.name, filters);
        }
    }

    /// Stop profiling every thread (no session running)
    pub fn clear_profiles(&mut self) {
        for record in &mut self.records {
            record.has_profile = false;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ThreadRecord<H>> {
        self.records.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut ThreadRecord<H>> {
        self.records.iter_mut()
    }

    #[must_use]
    pub fn get(&self, id: RegistrationId) -> Option<&ThreadRecord<H>> {
        self.records.iter().find(|record| record.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A thread is selected if there are no filters or its name contains one of
/// them, ignoring case
#[must_use]
pub fn thread_selected(name: &str, filters: &[String]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let name = name.to_lowercase();
    filters.iter().any(|filter| name.contains(&filter.to_lowercase()))
}
