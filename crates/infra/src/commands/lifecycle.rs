//! Lifecycle of a queued command, recorded as events in the command's own stream.
//!
//! ```text
//! Created ──▶ Queued ──▶ Started ──▶ Succeeded
//!                                └──▶ Failed
//! ```
//!
//! `Created` is never recorded: it is the state of a command that has not
//! reached the store. Any recorded lifecycle event means the command has been
//! accepted once and must not be executed again.

use serde::{Deserialize, Serialize};

use streamledger_core::Id;
use streamledger_events::{Aggregate, Event, EventRouter, Message};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Created,
    Queued,
    Started,
    Succeeded,
    Failed,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// Failure details captured when a handler errors or panics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
    pub message: String,
    /// Fully qualified type of the originating error, or `"panic"`.
    pub error_type: Option<String>,
    pub backtrace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandQueued {
    pub message_type: String,
    pub target: Option<Id>,
}

impl Message for CommandQueued {
    fn message_type(&self) -> &'static str {
        "command.queued"
    }
}
impl Event for CommandQueued {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStarted;

impl Message for CommandStarted {
    fn message_type(&self) -> &'static str {
        "command.started"
    }
}
impl Event for CommandStarted {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSucceeded;

impl Message for CommandSucceeded {
    fn message_type(&self) -> &'static str {
        "command.succeeded"
    }
}
impl Event for CommandSucceeded {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFailed {
    pub failure: FailureInfo,
}

impl Message for CommandFailed {
    fn message_type(&self) -> &'static str {
        "command.failed"
    }
}
impl Event for CommandFailed {}

/// State of a command rebuilt from its lifecycle stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub id: Id,
    pub status: CommandStatus,
    pub message_type: Option<String>,
    pub target: Option<Id>,
    pub failure: Option<FailureInfo>,
}

impl Aggregate for CommandRecord {
    const AGGREGATE_TYPE: &'static str = "command";

    fn initial(id: Id) -> Self {
        Self {
            id,
            status: CommandStatus::Created,
            message_type: None,
            target: None,
            failure: None,
        }
    }

    fn routes(router: &mut EventRouter<Self>) {
        router
            .on(|c: &mut CommandRecord, e: &CommandQueued| {
                c.status = CommandStatus::Queued;
                c.message_type = Some(e.message_type.clone());
                c.target = e.target;
            })
            .on(|c: &mut CommandRecord, _: &CommandStarted| c.status = CommandStatus::Started)
            .on(|c: &mut CommandRecord, _: &CommandSucceeded| c.status = CommandStatus::Succeeded)
            .on(|c: &mut CommandRecord, e: &CommandFailed| {
                c.status = CommandStatus::Failed;
                c.failure = Some(e.failure.clone());
            });
    }
}
