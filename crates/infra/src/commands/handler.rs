use core::any::{Any, TypeId, type_name};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use streamledger_core::DomainError;
use streamledger_events::{DispatchError, Message, ProjectionError};

use super::context::CommandContext;
use super::lifecycle::FailureInfo;
use crate::event_store::EventStoreError;
use crate::repository::RepositoryError;

/// Error type reported as the failure type of a panicking handler.
pub const PANIC_ERROR_TYPE: &str = "panic";

/// Failure raised by a command handler.
///
/// Keeps the message, the originating error type and (when enabled through
/// `RUST_BACKTRACE`) a backtrace, so the failure can be recorded faithfully.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerFault {
    message: String,
    error_type: Option<String>,
    stack: Option<String>,
}

impl HandlerFault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            stack: capture_backtrace(),
        }
    }

    /// Fault carrying the type name of `err`.
    pub fn from_error<E>(err: &E) -> Self
    where
        E: std::error::Error + 'static,
    {
        Self {
            message: err.to_string(),
            error_type: Some(type_name::<E>().to_string()),
            stack: capture_backtrace(),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "handler panicked".to_string()
        };
        Self {
            message,
            error_type: Some(PANIC_ERROR_TYPE.to_string()),
            stack: None,
        }
    }

    pub fn with_error_type(mut self, error_type: impl Into<String>) -> Self {
        self.error_type = Some(error_type.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error_type(&self) -> Option<&str> {
        self.error_type.as_deref()
    }

    pub fn backtrace(&self) -> Option<&str> {
        self.stack.as_deref()
    }

    pub fn into_failure(self) -> FailureInfo {
        FailureInfo {
            message: self.message,
            error_type: self.error_type,
            backtrace: self.stack,
        }
    }
}

fn capture_backtrace() -> Option<String> {
    let bt = Backtrace::capture();
    match bt.status() {
        BacktraceStatus::Captured => Some(bt.to_string()),
        _ => None,
    }
}

impl From<DomainError> for HandlerFault {
    fn from(err: DomainError) -> Self {
        Self::from_error(&err)
    }
}

impl From<EventStoreError> for HandlerFault {
    fn from(err: EventStoreError) -> Self {
        Self::from_error(&err)
    }
}

impl From<DispatchError> for HandlerFault {
    fn from(err: DispatchError) -> Self {
        Self::from_error(&err)
    }
}

impl From<ProjectionError> for HandlerFault {
    fn from(err: ProjectionError) -> Self {
        Self::from_error(&err)
    }
}

impl From<RepositoryError> for HandlerFault {
    fn from(err: RepositoryError) -> Self {
        // Report the underlying error type rather than the wrapper.
        match err {
            RepositoryError::Store(e) => Self::from_error(&e),
            RepositoryError::Dispatch(e) => Self::from_error(&e),
            other => Self::from_error(&other),
        }
    }
}

impl From<anyhow::Error> for HandlerFault {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: format!("{err:#}"),
            error_type: Some(type_name::<anyhow::Error>().to_string()),
            stack: capture_backtrace(),
        }
    }
}

/// Executes one message type inside a [`CommandContext`].
///
/// Aggregates saved through the context are committed together once the
/// handler returns `Ok`; on error nothing the handler saved is persisted.
#[async_trait]
pub trait CommandHandler<M: Message>: Send + Sync + 'static {
    async fn handle(&self, ctx: &mut CommandContext, message: &M) -> Result<(), HandlerFault>;
}

#[async_trait]
pub(crate) trait ErasedHandler: Send + Sync {
    async fn handle_dyn(&self, ctx: &mut CommandContext, message: &dyn Message) -> Result<(), HandlerFault>;
}

struct Typed<M, H> {
    handler: H,
    _message: PhantomData<fn() -> M>,
}

#[async_trait]
impl<M, H> ErasedHandler for Typed<M, H>
where
    M: Message,
    H: CommandHandler<M>,
{
    async fn handle_dyn(&self, ctx: &mut CommandContext, message: &dyn Message) -> Result<(), HandlerFault> {
        let Some(typed) = message.downcast_ref::<M>() else {
            return Err(HandlerFault::new(format!(
                "handler for {} received {}",
                type_name::<M>(),
                message.message_type()
            )));
        };
        self.handler.handle(ctx, typed).await
    }
}

/// One handler per message type, resolved by the concrete type of a message.
#[derive(Default)]
pub(crate) struct HandlerRegistry {
    handlers: HashMap<TypeId, Arc<dyn ErasedHandler>>,
}

impl HandlerRegistry {
    /// Panics if a handler for `M` is already registered.
    pub(crate) fn register<M, H>(&mut self, handler: H)
    where
        M: Message,
        H: CommandHandler<M>,
    {
        let previous = self.handlers.insert(
            TypeId::of::<M>(),
            Arc::new(Typed {
                handler,
                _message: PhantomData::<fn() -> M>,
            }),
        );
        assert!(
            previous.is_none(),
            "a command handler for {} is already registered",
            type_name::<M>()
        );
    }

    pub(crate) fn resolve(&self, message: &dyn Message) -> Option<Arc<dyn ErasedHandler>> {
        self.handlers.get(&message.concrete_type_id()).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.handlers.len()
    }
}
