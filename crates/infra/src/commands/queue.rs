//! Command queue and processor.
//!
//! ```text
//! enqueue ─▶ resolve handler ─▶ reserve id ─▶ command stream exists? ─▶ append Queued
//!                                                                          │
//!            spawned task:  append Started ─▶ handler ─▶ commit ─▶ append Succeeded | Failed
//! ```
//!
//! A command id is executed at most once. Within one queue, concurrent
//! submissions of the same id share the first submission's completion;
//! across queues on the same store, the `Queued` append (expected
//! version 0) picks a single winner.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use streamledger_core::{Entity, Id};
use streamledger_events::{
    DispatchError, Event, ExecutionContext, Message, MetadataProvider, Root, SystemMetadataProvider,
};

use super::command::Command;
use super::context::CommandContext;
use super::handler::{CommandHandler, ErasedHandler, HandlerFault, HandlerRegistry};
use super::lifecycle::{
    CommandFailed, CommandQueued, CommandRecord, CommandStarted, CommandStatus, CommandSucceeded,
    FailureInfo,
};
use crate::config::QueueConfig;
use crate::event_store::EventStore;
use crate::repository::{Repository, RepositoryError};

/// How an enqueue request was resolved.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum QueueResultType {
    /// Accepted; the completion resolves when processing finishes.
    SuccessfullyQueued,
    /// The id was seen before; the completion reflects the earlier outcome.
    AlreadyExecuted,
    /// Not accepted (capacity or admission failure); nothing was recorded.
    Rejected,
}

/// Final (or last known) outcome of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Succeeded,
    Failed(FailureInfo),
    Rejected,
    /// Recorded by an earlier run that did not reach a terminal state.
    Unfinished(CommandStatus),
    /// Processing stopped before reporting an outcome.
    Abandoned,
}

impl CommandOutcome {
    fn from_record(record: &CommandRecord) -> Self {
        match record.status {
            CommandStatus::Succeeded => Self::Succeeded,
            CommandStatus::Failed => Self::Failed(record.failure.clone().unwrap_or(FailureInfo {
                message: "failure details were not recorded".to_string(),
                error_type: None,
                backtrace: None,
            })),
            status => Self::Unfinished(status),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

type OutcomeRx = watch::Receiver<Option<CommandOutcome>>;
type OutcomeTx = watch::Sender<Option<CommandOutcome>>;

/// Awaitable handle on a command's outcome.
///
/// Dropping it does not cancel processing.
#[derive(Debug, Clone)]
pub struct Completion {
    rx: OutcomeRx,
}

impl Completion {
    fn pending() -> (OutcomeTx, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx })
    }

    fn resolved(outcome: CommandOutcome) -> Self {
        let (_, rx) = watch::channel(Some(outcome));
        Self { rx }
    }

    /// The outcome, if already known.
    pub fn outcome(&self) -> Option<CommandOutcome> {
        self.rx.borrow().clone()
    }

    pub fn is_finished(&self) -> bool {
        self.rx.borrow().is_some()
    }

    pub async fn wait(mut self) -> CommandOutcome {
        loop {
            if let Some(outcome) = self.rx.borrow_and_update().clone() {
                return outcome;
            }
            if self.rx.changed().await.is_err() {
                return self.rx.borrow().clone().unwrap_or(CommandOutcome::Abandoned);
            }
        }
    }
}

/// Result of [`CommandQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct QueueCommandResult {
    pub kind: QueueResultType,
    pub completion: Completion,
}

impl QueueCommandResult {
    fn new(kind: QueueResultType, completion: Completion) -> Self {
        Self { kind, completion }
    }

    fn rejected() -> Self {
        Self::new(QueueResultType::Rejected, Completion::resolved(CommandOutcome::Rejected))
    }
}

/// Queue runtime statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub admitted: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub in_flight: usize,
}

/// Builder for [`CommandQueue`].
pub struct CommandQueueBuilder {
    store: Arc<dyn EventStore>,
    metadata: Arc<dyn MetadataProvider>,
    config: QueueConfig,
    handlers: HandlerRegistry,
}

impl CommandQueueBuilder {
    pub fn metadata(mut self, provider: impl MetadataProvider + 'static) -> Self {
        self.metadata = Arc::new(provider);
        self
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the handler for messages of type `M`.
    ///
    /// Panics if `M` already has a handler.
    pub fn handler<M, H>(mut self, handler: H) -> Self
    where
        M: Message,
        H: CommandHandler<M>,
    {
        self.handlers.register::<M, H>(handler);
        self
    }

    pub fn build(self) -> CommandQueue {
        info!(
            queue = %self.config.name,
            handlers = self.handlers.len(),
            max_in_flight = self.config.max_in_flight,
            "command queue ready"
        );
        CommandQueue {
            inner: Arc::new(Inner {
                repository: Repository::new(self.store, Arc::clone(&self.metadata)),
                metadata: self.metadata,
                config: self.config,
                handlers: self.handlers,
                in_flight: Mutex::new(HashMap::new()),
                stats: Mutex::new(QueueStats::default()),
            }),
        }
    }
}

/// Admits commands and processes each one in its own task.
///
/// Must be used from within a tokio runtime. Clones share the same queue.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<Inner>,
}

impl CommandQueue {
    pub fn builder(store: Arc<dyn EventStore>) -> CommandQueueBuilder {
        CommandQueueBuilder {
            store,
            metadata: Arc::new(SystemMetadataProvider::new()),
            config: QueueConfig::default(),
            handlers: HandlerRegistry::default(),
        }
    }

    /// Enqueue `message` under the caller-chosen command id.
    ///
    /// Returns `Err` only when no handler is registered for the message type,
    /// in which case nothing is recorded.
    pub async fn enqueue<M: Message>(&self, id: Id, message: M) -> Result<QueueCommandResult, DispatchError> {
        self.submit(Command::with_id(id, message)).await
    }

    pub async fn submit(&self, command: Command) -> Result<QueueCommandResult, DispatchError> {
        let inner = &self.inner;
        let handler = inner
            .handlers
            .resolve(command.message())
            .ok_or_else(|| DispatchError::handler_not_found(command.message_type()))?;
        let id = command.id();

        let (sender, completion) = match inner.reserve(id) {
            Reservation::Reserved(sender, completion) => (sender, completion),
            Reservation::Duplicate(completion) => {
                debug!(queue = %inner.config.name, command_id = %id, "command already in flight");
                inner.count(|s| s.duplicates += 1);
                return Ok(QueueCommandResult::new(QueueResultType::AlreadyExecuted, completion));
            }
            Reservation::Full => {
                // A finished command is still answered from its record.
                if let Ok(Some(outcome)) = inner.existing(id).await {
                    debug!(queue = %inner.config.name, command_id = %id, ?outcome, "command already executed");
                    inner.count(|s| s.duplicates += 1);
                    return Ok(QueueCommandResult::new(
                        QueueResultType::AlreadyExecuted,
                        Completion::resolved(outcome),
                    ));
                }
                warn!(
                    queue = %inner.config.name,
                    command_id = %id,
                    max_in_flight = inner.config.max_in_flight,
                    "command rejected: queue is full"
                );
                inner.count(|s| s.rejected += 1);
                return Ok(QueueCommandResult::rejected());
            }
        };

        match inner.admit(&command).await {
            Admission::Queued(record) => {
                debug!(
                    queue = %inner.config.name,
                    command_id = %id,
                    message_type = command.message_type(),
                    "command queued"
                );
                inner.count(|s| s.admitted += 1);
                tokio::spawn(Arc::clone(inner).process(command, record, handler, sender));
                Ok(QueueCommandResult::new(QueueResultType::SuccessfullyQueued, completion))
            }
            Admission::Existing(outcome) => {
                debug!(queue = %inner.config.name, command_id = %id, ?outcome, "command already executed");
                inner.count(|s| s.duplicates += 1);
                inner.release(id, &sender, outcome);
                Ok(QueueCommandResult::new(QueueResultType::AlreadyExecuted, completion))
            }
            Admission::Failed(err) => {
                warn!(queue = %inner.config.name, command_id = %id, error = %err, "command rejected");
                inner.count(|s| s.rejected += 1);
                inner.release(id, &sender, CommandOutcome::Rejected);
                Ok(QueueCommandResult::new(QueueResultType::Rejected, completion))
            }
        }
    }

    /// Lifecycle status as recorded in the store (`Created` if never recorded).
    pub async fn status(&self, id: Id) -> Result<CommandStatus, RepositoryError> {
        Ok(self
            .record(id)
            .await?
            .map_or(CommandStatus::Created, |record| record.status))
    }

    pub async fn record(&self, id: Id) -> Result<Option<CommandRecord>, RepositoryError> {
        let root = self.inner.repository.load::<CommandRecord>(id).await?;
        Ok(root.map(|root| root.state().clone()))
    }

    /// Wait until every command admitted so far has finished.
    pub async fn idle(&self) {
        let pending: Vec<OutcomeRx> = self.inner.table().values().cloned().collect();
        for rx in pending {
            Completion { rx }.wait().await;
        }
    }

    pub fn stats(&self) -> QueueStats {
        let mut stats = self.inner.stats.lock().unwrap_or_else(PoisonError::into_inner).clone();
        stats.in_flight = self.inner.table().len();
        stats
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("config", &self.inner.config)
            .field("handlers", &self.inner.handlers.len())
            .finish_non_exhaustive()
    }
}

enum Reservation {
    Reserved(OutcomeTx, Completion),
    Duplicate(Completion),
    Full,
}

enum Admission {
    Queued(Root<CommandRecord>),
    Existing(CommandOutcome),
    Failed(RepositoryError),
}

struct Inner {
    config: QueueConfig,
    repository: Repository<Arc<dyn EventStore>>,
    metadata: Arc<dyn MetadataProvider>,
    handlers: HandlerRegistry,
    in_flight: Mutex<HashMap<Id, OutcomeRx>>,
    stats: Mutex<QueueStats>,
}

impl Inner {
    fn table(&self) -> std::sync::MutexGuard<'_, HashMap<Id, OutcomeRx>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn count(&self, f: impl FnOnce(&mut QueueStats)) {
        f(&mut self.stats.lock().unwrap_or_else(PoisonError::into_inner));
    }

    fn reserve(&self, id: Id) -> Reservation {
        let mut table = self.table();
        if let Some(rx) = table.get(&id) {
            return Reservation::Duplicate(Completion { rx: rx.clone() });
        }
        if table.len() >= self.config.max_in_flight {
            return Reservation::Full;
        }
        let (sender, completion) = Completion::pending();
        table.insert(id, completion.rx.clone());
        Reservation::Reserved(sender, completion)
    }

    /// Publish the outcome to every waiter, then free the slot.
    fn release(&self, id: Id, sender: &OutcomeTx, outcome: CommandOutcome) {
        sender.send_replace(Some(outcome));
        self.table().remove(&id);
    }

    async fn admit(&self, command: &Command) -> Admission {
        let id = command.id();
        match self.existing(id).await {
            Ok(Some(outcome)) => return Admission::Existing(outcome),
            Ok(None) => {}
            Err(err) => return Admission::Failed(err),
        }

        let mut record = Root::<CommandRecord>::new(id);
        let queued = CommandQueued {
            message_type: command.message_type().to_string(),
            target: command.target(),
        };
        match self.transition(&mut record, queued, &command.execution_context()).await {
            Ok(()) => Admission::Queued(record),
            // Another queue on the same store recorded this id first.
            Err(RepositoryError::Store(err)) if err.is_concurrency() => match self.existing(id).await {
                Ok(outcome) => Admission::Existing(
                    outcome.unwrap_or(CommandOutcome::Unfinished(CommandStatus::Queued)),
                ),
                Err(err) => Admission::Failed(err),
            },
            Err(err) => Admission::Failed(err),
        }
    }

    async fn existing(&self, id: Id) -> Result<Option<CommandOutcome>, RepositoryError> {
        let record = self.repository.load::<CommandRecord>(id).await?;
        Ok(record.map(|root| CommandOutcome::from_record(root.state())))
    }

    async fn transition<E: Event>(
        &self,
        record: &mut Root<CommandRecord>,
        event: E,
        context: &ExecutionContext,
    ) -> Result<(), RepositoryError> {
        record.apply_change(event)?;
        if let Err(err) = self.repository.save(record, context).await {
            self.rewind(record).await;
            return Err(err);
        }
        Ok(())
    }

    /// Drop an unsaved transition by reloading the record from the store.
    async fn rewind(&self, record: &mut Root<CommandRecord>) {
        let id = record.id();
        match self.repository.load::<CommandRecord>(id).await {
            Ok(Some(stored)) => *record = stored,
            Ok(None) => *record = Root::new(id),
            Err(err) => {
                error!(command_id = %id, error = %err, "failed to reload command record");
                record.clear_changes();
            }
        }
    }

    async fn process(
        self: Arc<Self>,
        command: Command,
        mut record: Root<CommandRecord>,
        handler: Arc<dyn ErasedHandler>,
        sender: OutcomeTx,
    ) {
        let id = command.id();
        let outcome = self.execute(&command, &mut record, handler).await;

        match &outcome {
            CommandOutcome::Failed(failure) => {
                warn!(
                    queue = %self.config.name,
                    command_id = %id,
                    error = %failure.message,
                    error_type = ?failure.error_type,
                    "command failed"
                );
                self.count(|s| s.failed += 1);
            }
            CommandOutcome::Succeeded => {
                info!(queue = %self.config.name, command_id = %id, "command succeeded");
                self.count(|s| s.succeeded += 1);
            }
            other => debug!(queue = %self.config.name, command_id = %id, outcome = ?other, "command finished"),
        }

        self.release(id, &sender, outcome);
    }

    async fn execute(
        &self,
        command: &Command,
        record: &mut Root<CommandRecord>,
        handler: Arc<dyn ErasedHandler>,
    ) -> CommandOutcome {
        let context = command.execution_context();

        if let Err(err) = self.transition(record, CommandStarted, &context).await {
            error!(command_id = %command.id(), error = %err, "failed to record command start");
            return self.fail(record, HandlerFault::from(err), &context).await;
        }

        match self.invoke(command, handler).await {
            Ok(committed) => {
                debug!(command_id = %command.id(), events = committed, "command changes committed");
                if let Err(err) = self.transition(record, CommandSucceeded, &context).await {
                    error!(command_id = %command.id(), error = %err, "failed to record command success");
                }
                CommandOutcome::Succeeded
            }
            Err(fault) => self.fail(record, fault, &context).await,
        }
    }

    async fn fail(
        &self,
        record: &mut Root<CommandRecord>,
        fault: HandlerFault,
        context: &ExecutionContext,
    ) -> CommandOutcome {
        let failure = fault.into_failure();
        let event = CommandFailed {
            failure: failure.clone(),
        };
        if let Err(err) = self.transition(record, event, context).await {
            error!(command_id = %record.id(), error = %err, "failed to record command failure");
        }
        CommandOutcome::Failed(failure)
    }

    /// Run the handler in its own task so a panic is contained, then commit
    /// whatever it staged. Returns the number of committed events.
    async fn invoke(&self, command: &Command, handler: Arc<dyn ErasedHandler>) -> Result<usize, HandlerFault> {
        let store = Arc::clone(self.repository.store());
        let tx = store.begin().await?;
        let ctx = CommandContext::new(command, store, Arc::clone(&self.metadata), tx);
        let message = command.shared_message();

        let task = tokio::spawn(async move {
            let mut ctx = ctx;
            let result = handler.handle_dyn(&mut ctx, message.as_ref()).await;
            (ctx, result)
        });

        match task.await {
            Ok((ctx, Ok(()))) => Ok(ctx.commit().await?.len()),
            Ok((ctx, Err(fault))) => {
                ctx.abort().await;
                Err(fault)
            }
            Err(join) if join.is_panic() => Err(HandlerFault::from_panic(join.into_panic())),
            Err(join) => Err(HandlerFault::new(format!("handler task did not complete: {join}"))),
        }
    }
}
