//! Event-sourced aggregate roots.
//!
//! An aggregate is plain state (`A`) plus two collaborators owned by its
//! [`Root`]: a [`ChangeTracker`] holding pending writes and the routers that
//! map event/message types to `A`'s handlers.
//!
//! ```text
//! apply_change(e) ─► EventRouter ─► A::on_e(&mut state)   (+ pending)
//! restore(history) ─► EventRouter ─► A::on_e(&mut state)  (no pending)
//! send(m)         ─► MessageRouter ─► handler(&mut Root<A>) ─► R
//! ```

use std::sync::Arc;

use streamledger_core::{Entity, Id, Ref};

use crate::changes::{ChangeTracker, Changeset};
use crate::dispatch::{DispatchError, EventRouter, MessageRouter};
use crate::message::{Event, Message};

/// State of an event-sourced entity.
///
/// State changes only through events routed by the handlers registered in
/// [`routes`](Aggregate::routes). Handlers must be deterministic: replaying
/// the same history always yields the same state.
pub trait Aggregate: Sized + Send + Sync + 'static {
    /// Aggregate type name (e.g. "users.user"), used in logs.
    const AGGREGATE_TYPE: &'static str;

    /// Initial state before any event has been applied.
    fn initial(id: Id) -> Self;

    /// Register one handler per event type this aggregate accepts.
    fn routes(router: &mut EventRouter<Self>);

    /// Register request/response handlers. None by default.
    fn messages(_router: &mut MessageRouter<Root<Self>>) {}
}

/// An aggregate instance together with its pending changes.
pub struct Root<A: Aggregate> {
    id: Id,
    state: A,
    changes: ChangeTracker,
    events: EventRouter<A>,
    messages: Arc<MessageRouter<Root<A>>>,
}

impl<A: Aggregate> Root<A> {
    /// A brand-new aggregate with no stream yet.
    pub fn new(id: Id) -> Self {
        let mut events = EventRouter::new();
        A::routes(&mut events);
        let mut messages = MessageRouter::new();
        A::messages(&mut messages);

        Self {
            id,
            state: A::initial(id),
            changes: ChangeTracker::new(id),
            events,
            messages: Arc::new(messages),
        }
    }

    /// Rebuild an aggregate from its recorded history.
    pub fn from_history<I>(id: Id, history: I) -> Result<Self, DispatchError>
    where
        I: IntoIterator<Item = Arc<dyn Event>>,
    {
        let mut root = Self::new(id);
        root.restore(history)?;
        Ok(root)
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn reference(&self) -> Ref<A> {
        Ref::new(self.id)
    }

    pub fn state(&self) -> &A {
        &self.state
    }

    /// Persisted stream version (pending events excluded).
    pub fn version(&self) -> u64 {
        self.changes.version()
    }

    pub fn is_new(&self) -> bool {
        self.changes.is_new()
    }

    pub fn has_changes(&self) -> bool {
        self.changes.has_changes()
    }

    /// Record `event` as pending and apply it to the in-memory state.
    ///
    /// An event type without a handler is rejected and nothing is recorded.
    pub fn apply_change<E: Event>(&mut self, event: E) -> Result<(), DispatchError> {
        self.apply_shared(Arc::new(event))
    }

    pub fn apply_shared(&mut self, event: Arc<dyn Event>) -> Result<(), DispatchError> {
        self.events.route(&mut self.state, event.as_ref())?;
        tracing::trace!(
            aggregate = A::AGGREGATE_TYPE,
            stream_id = %self.id,
            event_type = event.message_type(),
            "change applied"
        );
        self.changes.record(event);
        Ok(())
    }

    /// Replay persisted events without marking them as pending.
    ///
    /// Call once, right after loading and before any new change.
    pub fn restore<I>(&mut self, history: I) -> Result<(), DispatchError>
    where
        I: IntoIterator<Item = Arc<dyn Event>>,
    {
        let mut count = 0u64;
        for event in history {
            self.events.route(&mut self.state, event.as_ref())?;
            count += 1;
        }
        self.changes.restored(count);
        Ok(())
    }

    /// Route a request to its handler and return the typed result.
    pub fn send<M: Message, R: 'static>(&mut self, message: &M) -> Result<R, DispatchError> {
        self.send_dyn(message)
    }

    pub fn send_dyn<R: 'static>(&mut self, message: &dyn Message) -> Result<R, DispatchError> {
        let messages = Arc::clone(&self.messages);
        messages.send(self, message)
    }

    /// `Ok(None)` when no handler is registered for the message type.
    pub fn try_send<M: Message, R: 'static>(&mut self, message: &M) -> Result<Option<R>, DispatchError> {
        let messages = Arc::clone(&self.messages);
        messages.try_send(self, message)
    }

    pub fn changes(&self) -> Changeset {
        self.changes.changes()
    }

    /// Drop pending events after they were committed.
    pub fn clear_changes(&mut self) {
        self.changes.clear();
    }
}

impl<A: Aggregate> Entity for Root<A> {
    fn id(&self) -> Id {
        self.id
    }
}

impl<A: Aggregate + core::fmt::Debug> core::fmt::Debug for Root<A> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Root")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("changes", &self.changes)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamledger_core::DomainError;

    #[derive(Debug, Default, PartialEq)]
    struct Account {
        name: String,
        code: Option<String>,
    }

    #[derive(Debug)]
    struct Created {
        name: String,
    }

    impl Message for Created {
        fn message_type(&self) -> &'static str {
            "account.created"
        }
    }
    impl Event for Created {}

    #[derive(Debug)]
    struct CodeAssigned {
        code: String,
    }

    impl Message for CodeAssigned {
        fn message_type(&self) -> &'static str {
            "account.code_assigned"
        }
    }
    impl Event for CodeAssigned {}

    #[derive(Debug)]
    struct Closed;

    impl Message for Closed {
        fn message_type(&self) -> &'static str {
            "account.closed"
        }
    }
    impl Event for Closed {}

    #[derive(Debug)]
    struct AssignCode(String);

    impl Message for AssignCode {
        fn message_type(&self) -> &'static str {
            "account.assign_code"
        }
    }

    impl Aggregate for Account {
        const AGGREGATE_TYPE: &'static str = "account";

        fn initial(_id: Id) -> Self {
            Self::default()
        }

        fn routes(router: &mut EventRouter<Self>) {
            router
                .on(|a: &mut Account, e: &Created| a.name = e.name.clone())
                .on(|a: &mut Account, e: &CodeAssigned| a.code = Some(e.code.clone()));
        }

        fn messages(router: &mut MessageRouter<Root<Self>>) {
            router.on(|root: &mut Root<Account>, m: &AssignCode| -> Result<usize, DomainError> {
                if m.0.len() != 4 {
                    return Err(DomainError::validation("code must have 4 digits"));
                }
                root.apply_change(CodeAssigned { code: m.0.clone() })
                    .map_err(|e| DomainError::invariant(e.to_string()))?;
                Ok(root.changes().len())
            });
        }
    }

    fn history() -> Vec<Arc<dyn Event>> {
        vec![
            Arc::new(Created { name: "A".into() }),
            Arc::new(CodeAssigned { code: "1234".into() }),
        ]
    }

    #[test]
    fn apply_change_records_and_mutates() {
        let mut root = Root::<Account>::new(Id::new());
        root.apply_change(Created { name: "A".into() }).unwrap();

        assert_eq!(root.state().name, "A");
        let changes = root.changes();
        assert!(changes.is_new());
        assert_eq!(changes.len(), 1);
        assert_eq!(changes.events()[0].message_type(), "account.created");
    }

    #[test]
    fn unhandled_event_is_not_recorded() {
        let mut root = Root::<Account>::new(Id::new());
        let err = root.apply_change(Closed).unwrap_err();
        assert!(matches!(err, DispatchError::HandlerNotFound { .. }));
        assert!(!root.has_changes());
    }

    #[test]
    fn restore_leaves_an_empty_not_new_changeset() {
        let root = Root::<Account>::from_history(Id::new(), history()).unwrap();

        assert_eq!(root.state().code.as_deref(), Some("1234"));
        let changes = root.changes();
        assert!(changes.is_empty());
        assert!(!changes.is_new());
        assert_eq!(root.version(), 2);
    }

    #[test]
    fn clear_changes_advances_version_and_clears_new_flag() {
        let mut root = Root::<Account>::new(Id::new());
        root.apply_change(Created { name: "A".into() }).unwrap();
        assert_eq!(root.changes().expected_version(), streamledger_core::ExpectedVersion::NO_STREAM);

        root.clear_changes();
        assert!(!root.is_new());
        assert_eq!(root.version(), 1);

        root.apply_change(CodeAssigned { code: "9999".into() }).unwrap();
        assert_eq!(
            root.changes().expected_version(),
            streamledger_core::ExpectedVersion::Exact(1)
        );
    }

    #[test]
    fn send_routes_request_through_root() {
        let mut root = Root::<Account>::from_history(Id::new(), history()).unwrap();

        let pending: Result<usize, DomainError> = root.send(&AssignCode("4321".into())).unwrap();
        assert_eq!(pending, Ok(1));
        assert_eq!(root.state().code.as_deref(), Some("4321"));

        let rejected: Result<usize, DomainError> = root.send(&AssignCode("1".into())).unwrap();
        assert!(rejected.is_err());
        assert_eq!(root.changes().len(), 1);
    }

    #[test]
    fn try_send_without_handler_is_none() {
        #[derive(Debug)]
        struct Unknown;
        impl Message for Unknown {
            fn message_type(&self) -> &'static str {
                "unknown"
            }
        }

        let mut root = Root::<Account>::new(Id::new());
        assert_eq!(root.try_send::<_, ()>(&Unknown).unwrap(), None);
        assert!(root.send::<_, ()>(&Unknown).is_err());
    }
}
