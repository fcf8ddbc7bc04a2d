use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use streamledger_core::{ExpectedVersion, Id};
use streamledger_events::{Metadata, RecordedEvent};

use super::batch::{CommittedBatch, EventBatch};
use super::criteria::Criteria;

/// Lazily evaluated, ordered sequence of recorded events.
///
/// Evaluation is bounded by the store contents at the time the read was
/// started; events committed afterwards are not observed.
pub type RecordedEvents = Box<dyn Iterator<Item = Result<RecordedEvent, EventStoreError>> + Send>;

/// Lazily evaluated sequence of committed batches in global order.
pub type CommittedBatches = Box<dyn Iterator<Item = Result<CommittedBatch, EventStoreError>> + Send>;

/// Event store operation error.
///
/// These are infrastructure errors (validation, concurrency, storage) as
/// opposed to domain errors raised by aggregates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    #[error("invalid batch: {0}")]
    Validation(String),

    #[error("optimistic concurrency check failed for stream {stream_id} (expected: {expected:?}, actual: {actual})")]
    Concurrency {
        stream_id: Id,
        expected: ExpectedVersion,
        actual: u64,
    },

    #[error("transaction is already closed")]
    TransactionClosed,

    #[error("event store lock poisoned")]
    Poisoned,

    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl EventStoreError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

/// Append-only event store.
///
/// ## Streams
///
/// Events are organized into streams, one per aggregate instance. Within a
/// stream every event has a permanent, 0-based position; the stream version is
/// the number of events it holds.
///
/// ## Writes
///
/// All writes go through an [`EventTransaction`]. Batches staged in one
/// transaction become visible together on commit, or not at all. Each batch
/// carries an [`ExpectedVersion`] that is verified when staged and again,
/// atomically, when committed.
///
/// ## Reads
///
/// Reads return lazy sequences ([`RecordedEvents`]). A sequence observes the
/// store as of the moment the read was issued and can be re-issued to
/// re-enumerate from the start.
///
/// ## Implementation requirements
///
/// - never interleave events of two commits within one stream
/// - assign positions densely (no gaps, no duplicates)
/// - keep the global order consistent with per-stream order
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Open a transaction scope for one or more batches.
    async fn begin(&self) -> Result<Box<dyn EventTransaction>, EventStoreError>;

    /// `true` when at least one event has been committed for the stream.
    async fn exists(&self, stream_id: Id) -> Result<bool, EventStoreError>;

    /// Number of committed events in the stream (0 when it does not exist).
    async fn stream_version(&self, stream_id: Id) -> Result<u64, EventStoreError>;

    /// Events of one stream, in append order.
    async fn get(&self, stream_id: Id) -> Result<RecordedEvents, EventStoreError>;

    /// Events matching the criteria, in global commit order.
    async fn query(&self, criteria: &Criteria) -> Result<RecordedEvents, EventStoreError>;

    /// Matching events grouped by the commit and stream that wrote them.
    async fn query_batches(&self, criteria: &Criteria) -> Result<CommittedBatches, EventStoreError>;

    /// Append a single batch in its own transaction.
    async fn save(&self, batch: EventBatch, metadata: Metadata) -> Result<Vec<RecordedEvent>, EventStoreError> {
        let mut tx = self.begin().await?;
        tx.save(batch, metadata).await?;
        tx.commit().await
    }
}

/// A unit of work against an [`EventStore`].
///
/// Dropping an open transaction discards everything staged in it.
#[async_trait]
pub trait EventTransaction: Send + Sync {
    /// Stage a batch. The expected version is checked against committed
    /// events plus whatever this transaction already staged for the stream.
    async fn save(&mut self, batch: EventBatch, metadata: Metadata) -> Result<(), EventStoreError>;

    /// Number of events staged so far.
    fn staged(&self) -> usize;

    /// Make every staged batch visible atomically.
    async fn commit(&mut self) -> Result<Vec<RecordedEvent>, EventStoreError>;

    /// Discard staged batches and close the transaction.
    async fn abort(&mut self);
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn begin(&self) -> Result<Box<dyn EventTransaction>, EventStoreError> {
        (**self).begin().await
    }

    async fn exists(&self, stream_id: Id) -> Result<bool, EventStoreError> {
        (**self).exists(stream_id).await
    }

    async fn stream_version(&self, stream_id: Id) -> Result<u64, EventStoreError> {
        (**self).stream_version(stream_id).await
    }

    async fn get(&self, stream_id: Id) -> Result<RecordedEvents, EventStoreError> {
        (**self).get(stream_id).await
    }

    async fn query(&self, criteria: &Criteria) -> Result<RecordedEvents, EventStoreError> {
        (**self).query(criteria).await
    }

    async fn query_batches(&self, criteria: &Criteria) -> Result<CommittedBatches, EventStoreError> {
        (**self).query_batches(criteria).await
    }

    async fn save(&self, batch: EventBatch, metadata: Metadata) -> Result<Vec<RecordedEvent>, EventStoreError> {
        (**self).save(batch, metadata).await
    }
}
