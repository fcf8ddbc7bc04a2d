//! Pending-write tracking for one aggregate instance.

use std::sync::Arc;

use streamledger_core::{ExpectedVersion, Id};

use crate::message::Event;

/// Events produced by one aggregate instance that are not persisted yet.
#[derive(Debug, Clone)]
pub struct Changeset {
    stream_id: Id,
    events: Vec<Arc<dyn Event>>,
    is_new: bool,
    loaded_version: u64,
}

impl Changeset {
    pub fn stream_id(&self) -> Id {
        self.stream_id
    }

    pub fn events(&self) -> &[Arc<dyn Event>] {
        &self.events
    }

    pub fn into_events(self) -> Vec<Arc<dyn Event>> {
        self.events
    }

    /// `true` when the aggregate has no stream yet.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Stream version the aggregate was loaded from (0 for a new aggregate).
    pub fn loaded_version(&self) -> u64 {
        self.loaded_version
    }

    /// Version the stream must still be at for these changes to apply.
    pub fn expected_version(&self) -> ExpectedVersion {
        if self.is_new {
            ExpectedVersion::NO_STREAM
        } else {
            ExpectedVersion::Exact(self.loaded_version)
        }
    }
}

/// Change-tracking collaborator of an aggregate root.
///
/// Only [`clear`](Self::clear) turns "new" into "existing"; it must be called
/// once the store has durably committed the pending events.
#[derive(Debug)]
pub struct ChangeTracker {
    stream_id: Id,
    pending: Vec<Arc<dyn Event>>,
    is_new: bool,
    version: u64,
}

impl ChangeTracker {
    pub fn new(stream_id: Id) -> Self {
        Self {
            stream_id,
            pending: Vec::new(),
            is_new: true,
            version: 0,
        }
    }

    pub fn record(&mut self, event: Arc<dyn Event>) {
        self.pending.push(event);
    }

    /// Account for `count` events replayed from the store.
    pub fn restored(&mut self, count: u64) {
        self.version += count;
        self.is_new = false;
    }

    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Persisted stream version (excludes pending events).
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn has_changes(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn changes(&self) -> Changeset {
        Changeset {
            stream_id: self.stream_id,
            events: self.pending.clone(),
            is_new: self.is_new,
            loaded_version: self.version,
        }
    }

    pub fn clear(&mut self) {
        self.version += self.pending.len() as u64;
        self.pending.clear();
        self.is_new = false;
    }
}
