use std::sync::Arc;

use streamledger_core::{ExpectedVersion, Id};
use streamledger_events::{Changeset, Event, RecordedEvent};

use super::r#trait::EventStoreError;

/// An event ready to be appended to a stream (not yet assigned a position).
#[derive(Debug, Clone)]
pub struct UncommittedEvent {
    pub stream_id: Id,
    pub event: Arc<dyn Event>,
}

impl UncommittedEvent {
    pub fn new<E: Event>(stream_id: Id, event: E) -> Self {
        Self {
            stream_id,
            event: Arc::new(event),
        }
    }

    pub fn shared(stream_id: Id, event: Arc<dyn Event>) -> Self {
        Self { stream_id, event }
    }
}

/// Atomic unit of persistence: a non-empty, ordered run of events for
/// exactly one stream.
///
/// Construction validates the batch, so a value of this type never reaches a
/// store empty or with mixed streams.
#[derive(Debug, Clone)]
pub struct EventBatch {
    stream_id: Id,
    events: Vec<Arc<dyn Event>>,
    expected_version: ExpectedVersion,
}

impl EventBatch {
    pub fn new(
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Self, EventStoreError> {
        let stream_id = events
            .first()
            .map(|e| e.stream_id)
            .ok_or_else(|| EventStoreError::validation("event batch is empty"))?;

        if let Some((idx, e)) = events.iter().enumerate().find(|(_, e)| e.stream_id != stream_id) {
            return Err(EventStoreError::validation(format!(
                "batch for stream {stream_id} contains an event for stream {} (index {idx})",
                e.stream_id
            )));
        }

        Ok(Self {
            stream_id,
            events: events.into_iter().map(|e| e.event).collect(),
            expected_version,
        })
    }

    pub fn for_stream(
        stream_id: Id,
        events: Vec<Arc<dyn Event>>,
        expected_version: ExpectedVersion,
    ) -> Result<Self, EventStoreError> {
        if events.is_empty() {
            return Err(EventStoreError::validation(format!(
                "event batch for stream {stream_id} is empty"
            )));
        }
        Ok(Self {
            stream_id,
            events,
            expected_version,
        })
    }

    /// Pending events of an aggregate, expecting the version it was loaded at.
    pub fn from_changeset(changeset: Changeset) -> Result<Self, EventStoreError> {
        let stream_id = changeset.stream_id();
        let expected = changeset.expected_version();
        Self::for_stream(stream_id, changeset.into_events(), expected)
    }

    pub fn stream_id(&self) -> Id {
        self.stream_id
    }

    pub fn events(&self) -> &[Arc<dyn Event>] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn expected_version(&self) -> ExpectedVersion {
        self.expected_version
    }
}

/// Events of one stream written by one commit, as returned by global reads.
#[derive(Debug, Clone)]
pub struct CommittedBatch {
    pub stream_id: Id,
    pub commit: u64,
    pub events: Vec<RecordedEvent>,
}
