//! Append-only event store boundary.
//!
//! Streams of recorded events, transactional appends with optimistic
//! concurrency, and lazy global reads filtered by [`Criteria`].

pub mod batch;
pub mod criteria;
pub mod in_memory;
pub mod r#trait;

pub use batch::{CommittedBatch, EventBatch, UncommittedEvent};
pub use criteria::{Criteria, CriteriaBuilder};
pub use in_memory::{InMemoryEventStore, InMemoryTransaction};
pub use r#trait::{CommittedBatches, EventStore, EventStoreError, EventTransaction, RecordedEvents};
