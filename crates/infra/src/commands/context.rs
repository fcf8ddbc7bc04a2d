use std::sync::Arc;

use streamledger_core::{Id, Ref};
use streamledger_events::{Aggregate, AnyCommand, ExecutionContext, MetadataProvider, RecordedEvent, Root};

use super::command::Command;
use super::handler::HandlerFault;
use crate::event_store::{EventStore, EventStoreError, EventTransaction};
use crate::repository::{self, RepositoryError};

/// Unit of work handed to a [`CommandHandler`](super::CommandHandler).
///
/// Reads see committed events only. Saves are staged in one transaction
/// that the queue commits after the handler returns successfully.
pub struct CommandContext {
    command_id: Id,
    target: Option<Id>,
    execution: ExecutionContext,
    store: Arc<dyn EventStore>,
    metadata: Arc<dyn MetadataProvider>,
    tx: Box<dyn EventTransaction>,
}

impl CommandContext {
    pub(crate) fn new(
        command: &Command,
        store: Arc<dyn EventStore>,
        metadata: Arc<dyn MetadataProvider>,
        tx: Box<dyn EventTransaction>,
    ) -> Self {
        Self {
            command_id: command.command_ref().id(),
            target: command.target(),
            execution: command.execution_context(),
            store,
            metadata,
            tx,
        }
    }

    pub fn command_id(&self) -> Id {
        self.command_id
    }

    /// Reference to use as the parent of commands issued from this handler.
    pub fn command_ref(&self) -> Ref<AnyCommand> {
        Ref::new(self.command_id)
    }

    pub fn target(&self) -> Option<Id> {
        self.target
    }

    pub fn require_target(&self) -> Result<Id, HandlerFault> {
        self.target
            .ok_or_else(|| HandlerFault::new(format!("command {} has no target", self.command_id)))
    }

    pub fn execution(&self) -> &ExecutionContext {
        &self.execution
    }

    pub async fn exists(&self, id: Id) -> Result<bool, RepositoryError> {
        Ok(self.store.exists(id).await?)
    }

    pub async fn load<A: Aggregate>(&self, id: Id) -> Result<Option<Root<A>>, RepositoryError> {
        repository::load_aggregate(self.store.as_ref(), id).await
    }

    pub async fn load_or_new<A: Aggregate>(&self, id: Id) -> Result<Root<A>, RepositoryError> {
        Ok(self.load(id).await?.unwrap_or_else(|| Root::new(id)))
    }

    /// Stage the root's pending changes in this command's transaction.
    ///
    /// The changes move into the transaction: the root is cleared so it can
    /// keep changing and be saved again within the same command.
    pub async fn save<A: Aggregate>(&mut self, root: &mut Root<A>) -> Result<usize, RepositoryError> {
        let staged = repository::stage_changes(
            self.tx.as_mut(),
            root,
            self.metadata.as_ref(),
            &self.execution,
        )
        .await?;
        if staged > 0 {
            root.clear_changes();
        }
        Ok(staged)
    }

    /// Number of events staged so far.
    pub fn staged(&self) -> usize {
        self.tx.staged()
    }

    pub(crate) async fn commit(mut self) -> Result<Vec<RecordedEvent>, EventStoreError> {
        self.tx.commit().await
    }

    pub(crate) async fn abort(mut self) {
        self.tx.abort().await;
    }
}

impl std::fmt::Debug for CommandContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandContext")
            .field("command_id", &self.command_id)
            .field("target", &self.target)
            .field("staged", &self.tx.staged())
            .finish_non_exhaustive()
    }
}
