//! Command queue & processor.
//!
//! Commands are messages with an identity. Each accepted command records its
//! lifecycle (`Queued`, `Started`, `Succeeded`/`Failed`) in its own stream,
//! keyed by the command id, which makes execution at-most-once.

pub mod command;
pub mod context;
pub mod handler;
pub mod lifecycle;
pub mod queue;

pub use command::Command;
pub use context::CommandContext;
pub use handler::{CommandHandler, HandlerFault, PANIC_ERROR_TYPE};
pub use lifecycle::{
    CommandFailed, CommandQueued, CommandRecord, CommandStarted, CommandStatus, CommandSucceeded,
    FailureInfo,
};
pub use queue::{
    CommandOutcome, CommandQueue, CommandQueueBuilder, Completion, QueueCommandResult, QueueResultType,
    QueueStats,
};
