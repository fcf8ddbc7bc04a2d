use core::any::TypeId;
use std::sync::Arc;

use streamledger_core::Id;

use crate::message::Event;
use crate::metadata::Metadata;

/// A persisted event as returned by store reads.
///
/// Notes:
/// - `position` is the 0-based, permanent index within the owning stream.
/// - `sequence` is the 0-based store-wide order, used for projection catch-up.
/// - `commit` identifies the atomic append the event was part of.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    stream_id: Id,
    position: u64,
    sequence: u64,
    commit: u64,
    event: Arc<dyn Event>,
    metadata: Arc<Metadata>,
}

impl RecordedEvent {
    pub fn new(
        stream_id: Id,
        position: u64,
        sequence: u64,
        commit: u64,
        event: Arc<dyn Event>,
        metadata: Arc<Metadata>,
    ) -> Self {
        Self {
            stream_id,
            position,
            sequence,
            commit,
            event,
            metadata,
        }
    }

    pub fn stream_id(&self) -> Id {
        self.stream_id
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn commit(&self) -> u64 {
        self.commit
    }

    pub fn event(&self) -> &dyn Event {
        self.event.as_ref()
    }

    pub fn shared_event(&self) -> Arc<dyn Event> {
        Arc::clone(&self.event)
    }

    pub fn event_type(&self) -> &'static str {
        self.event.message_type()
    }

    pub fn event_type_id(&self) -> TypeId {
        self.event().concrete_type_id()
    }

    pub fn downcast<E: Event>(&self) -> Option<&E> {
        self.event().downcast_ref::<E>()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }
}
