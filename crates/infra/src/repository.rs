//! Loading and persisting aggregate roots through an [`EventStore`].
//!
//! ```text
//! load:  store.get(stream) -> validate positions -> Root::from_history
//! save:  Root::changes() -> EventBatch -> store/transaction -> Root::clear_changes()
//! ```
//!
//! A root's pending changes are cleared only once the store has committed
//! them, so a failed save can be retried with the same changeset.

use std::sync::Arc;

use thiserror::Error;

use streamledger_core::Id;
use streamledger_events::{
    Aggregate, DispatchError, ExecutionContext, MetadataProvider, RecordedEvent, Root,
};

use crate::event_store::{EventBatch, EventStore, EventStoreError, EventTransaction};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    /// A recorded event could not be routed while rebuilding the aggregate.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The store returned a stream that is not densely positioned.
    #[error("stream {stream_id} is corrupt: expected position {expected}, found {found}")]
    CorruptStream { stream_id: Id, expected: u64, found: u64 },
}

/// Rebuild an aggregate from its stream, or `None` when the stream does not exist.
pub async fn load_aggregate<A, S>(store: &S, id: Id) -> Result<Option<Root<A>>, RepositoryError>
where
    A: Aggregate,
    S: EventStore + ?Sized,
{
    let mut history = Vec::new();
    for recorded in store.get(id).await? {
        let recorded = recorded?;
        let expected = history.len() as u64;
        if recorded.position() != expected {
            return Err(RepositoryError::CorruptStream {
                stream_id: id,
                expected,
                found: recorded.position(),
            });
        }
        history.push(recorded.shared_event());
    }

    if history.is_empty() {
        return Ok(None);
    }
    Ok(Some(Root::from_history(id, history)?))
}

/// Stage the root's pending changes in `tx`. Returns the number of staged events.
///
/// The root is not cleared: the caller owns the commit and clears afterwards.
pub async fn stage_changes<A: Aggregate>(
    tx: &mut dyn EventTransaction,
    root: &Root<A>,
    metadata: &dyn MetadataProvider,
    context: &ExecutionContext,
) -> Result<usize, RepositoryError> {
    if !root.has_changes() {
        return Ok(0);
    }
    let batch = EventBatch::from_changeset(root.changes())?;
    let staged = batch.len();
    tx.save(batch, metadata.metadata(context)).await?;
    Ok(staged)
}

/// Aggregate-level access to an [`EventStore`].
pub struct Repository<S> {
    store: S,
    metadata: Arc<dyn MetadataProvider>,
}

impl<S> Repository<S>
where
    S: EventStore,
{
    pub fn new(store: S, metadata: Arc<dyn MetadataProvider>) -> Self {
        Self { store, metadata }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn exists(&self, id: Id) -> Result<bool, RepositoryError> {
        Ok(self.store.exists(id).await?)
    }

    pub async fn load<A: Aggregate>(&self, id: Id) -> Result<Option<Root<A>>, RepositoryError> {
        load_aggregate(&self.store, id).await
    }

    /// Load an existing aggregate, or start a new one at its initial state.
    pub async fn load_or_new<A: Aggregate>(&self, id: Id) -> Result<Root<A>, RepositoryError> {
        Ok(self.load(id).await?.unwrap_or_else(|| Root::new(id)))
    }

    /// Persist the root's pending changes in one atomic append.
    ///
    /// The metadata provider is consulted once for the whole changeset.
    pub async fn save<A: Aggregate>(
        &self,
        root: &mut Root<A>,
        context: &ExecutionContext,
    ) -> Result<Vec<RecordedEvent>, RepositoryError> {
        if !root.has_changes() {
            return Ok(Vec::new());
        }
        let batch = EventBatch::from_changeset(root.changes())?;
        let committed = match self.store.save(batch, self.metadata.metadata(context)).await {
            Ok(committed) => committed,
            Err(err) => {
                if err.is_concurrency() {
                    tracing::warn!(
                        aggregate = A::AGGREGATE_TYPE,
                        stream_id = %root.id(),
                        error = %err,
                        "concurrency conflict on save"
                    );
                }
                return Err(err.into());
            }
        };
        root.clear_changes();

        tracing::debug!(
            aggregate = A::AGGREGATE_TYPE,
            stream_id = %root.id(),
            version = root.version(),
            "aggregate saved"
        );
        Ok(committed)
    }
}

impl<S: std::fmt::Debug> std::fmt::Debug for Repository<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository").field("store", &self.store).finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::InMemoryEventStore;
    use crate::test_support::{Account, CodeAssigned, Created};
    use streamledger_core::ExpectedVersion;
    use streamledger_events::SystemMetadataProvider;

    fn repository() -> Repository<InMemoryEventStore> {
        Repository::new(
            InMemoryEventStore::new(),
            Arc::new(SystemMetadataProvider::new().with_header("source", "test")),
        )
    }

    #[tokio::test]
    async fn missing_stream_loads_as_none() {
        let repo = repository();
        assert!(repo.load::<Account>(Id::new()).await.unwrap().is_none());
        let fresh = repo.load_or_new::<Account>(Id::new()).await.unwrap();
        assert!(fresh.is_new());
    }

    #[tokio::test]
    async fn save_then_load_rebuilds_state() {
        let repo = repository();
        let id = Id::from_u128(1);
        let mut root = Root::<Account>::new(id);
        root.apply_change(Created::new("A")).unwrap();
        root.apply_change(CodeAssigned::new("1234")).unwrap();

        let committed = repo.save(&mut root, &ExecutionContext::system()).await.unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(committed[0].metadata().header("source"), Some(&serde_json::json!("test")));
        assert!(!root.has_changes());
        assert!(!root.is_new());

        let loaded = repo.load::<Account>(id).await.unwrap().unwrap();
        assert_eq!(loaded.state().name, "A");
        assert_eq!(loaded.state().code.as_deref(), Some("1234"));
        assert_eq!(loaded.version(), 2);
    }

    #[tokio::test]
    async fn concurrent_writers_conflict_and_keep_changes() {
        let repo = repository();
        let id = Id::new();
        let mut root = Root::<Account>::new(id);
        root.apply_change(Created::new("A")).unwrap();
        repo.save(&mut root, &ExecutionContext::system()).await.unwrap();

        let mut first = repo.load::<Account>(id).await.unwrap().unwrap();
        let mut second = repo.load::<Account>(id).await.unwrap().unwrap();
        first.apply_change(CodeAssigned::new("1111")).unwrap();
        second.apply_change(CodeAssigned::new("2222")).unwrap();

        repo.save(&mut first, &ExecutionContext::system()).await.unwrap();
        let err = repo.save(&mut second, &ExecutionContext::system()).await.unwrap_err();
        assert_eq!(
            err,
            RepositoryError::Store(EventStoreError::Concurrency {
                stream_id: id,
                expected: ExpectedVersion::Exact(1),
                actual: 2,
            })
        );
        // The loser's changeset survives for a retry.
        assert_eq!(second.changes().len(), 1);
    }

    #[tokio::test]
    async fn saving_without_changes_is_a_no_op() {
        let repo = repository();
        let mut root = Root::<Account>::new(Id::new());
        assert!(repo.save(&mut root, &ExecutionContext::system()).await.unwrap().is_empty());
        assert!(repo.store().is_empty());
    }
}
