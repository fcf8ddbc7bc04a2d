use std::sync::Arc;

use streamledger_core::{Entity, Id, Ref};
use streamledger_events::{AnyCommand, ExecutionContext, Message};

/// A request to run a message against the handler registered for its type.
///
/// The identifier doubles as the command's stream identifier and as its
/// idempotency key: a command id is executed at most once.
#[derive(Debug, Clone)]
pub struct Command {
    id: Id,
    target: Option<Id>,
    parent: Option<Ref<AnyCommand>>,
    message: Arc<dyn Message>,
}

impl Command {
    /// Command with a freshly generated identifier.
    pub fn new<M: Message>(message: M) -> Self {
        Self::with_id(Id::new(), message)
    }

    pub fn with_id<M: Message>(id: Id, message: M) -> Self {
        Self::shared(id, Arc::new(message))
    }

    pub fn shared(id: Id, message: Arc<dyn Message>) -> Self {
        Self {
            id,
            target: None,
            parent: None,
            message,
        }
    }

    /// The aggregate this command is expected to act on.
    pub fn targeting(mut self, target: Id) -> Self {
        self.target = Some(target);
        self
    }

    /// The command that issued this one.
    pub fn caused_by(mut self, parent: Ref<AnyCommand>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn target(&self) -> Option<Id> {
        self.target
    }

    pub fn parent(&self) -> Option<Ref<AnyCommand>> {
        self.parent
    }

    pub fn message(&self) -> &dyn Message {
        self.message.as_ref()
    }

    pub fn shared_message(&self) -> Arc<dyn Message> {
        Arc::clone(&self.message)
    }

    pub fn message_type(&self) -> &'static str {
        self.message.message_type()
    }

    /// Context stamped on every event written while this command runs.
    pub fn execution_context(&self) -> ExecutionContext {
        let ctx = ExecutionContext::for_command(self.id);
        match self.parent {
            Some(parent) => ctx.with_parent(parent),
            None => ctx,
        }
    }
}

impl Entity for Command {
    fn id(&self) -> Id {
        self.id
    }
}

impl Command {
    pub fn command_ref(&self) -> Ref<AnyCommand> {
        Ref::new(self.id)
    }
}
