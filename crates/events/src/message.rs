use core::any::{Any, TypeId};
use core::fmt;

/// Object-safe access to the concrete value behind a trait object.
///
/// Implemented for every `'static` type; [`Message`] and [`Event`] inherit it
/// so routers can recover the concrete type of a `&dyn Event`.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A routable, immutable message (command payload or request).
///
/// Messages are:
/// - **owned** (`'static`, no borrowed data)
/// - **thread-safe** (they cross task boundaries inside `Arc`)
/// - **named** by a stable type string used in logs and failure records
pub trait Message: AsAny + fmt::Debug + Send + Sync + 'static {
    /// Stable message name (e.g. "users.rename").
    fn message_type(&self) -> &'static str;
}

/// A domain-agnostic event.
///
/// Events are facts: never mutated once recorded. Routing is by exact
/// runtime type, there is no fallback to a "parent" event type.
pub trait Event: Message + 'static {}

impl dyn Message {
    /// `TypeId` of the concrete message.
    pub fn concrete_type_id(&self) -> TypeId {
        self.as_any().type_id()
    }

    pub fn is<M: Message>(&self) -> bool {
        self.as_any().is::<M>()
    }

    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        self.as_any().downcast_ref::<M>()
    }
}

impl dyn Event {
    /// `TypeId` of the concrete event.
    pub fn concrete_type_id(&self) -> TypeId {
        self.as_any().type_id()
    }

    pub fn is<E: Event>(&self) -> bool {
        self.as_any().is::<E>()
    }

    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[derive(Debug)]
    struct Created;

    impl Message for Created {
        fn message_type(&self) -> &'static str {
            "test.created"
        }
    }
    impl Event for Created {}

    #[derive(Debug)]
    struct Renamed;

    impl Message for Renamed {
        fn message_type(&self) -> &'static str {
            "test.renamed"
        }
    }
    impl Event for Renamed {}

    #[test]
    fn type_id_is_the_concrete_type_behind_an_arc() {
        let event: Arc<dyn Event> = Arc::new(Created);
        assert_eq!(event.as_ref().concrete_type_id(), TypeId::of::<Created>());
        assert!(event.as_ref().is::<Created>());
        assert!(event.as_ref().downcast_ref::<Renamed>().is_none());
        assert_eq!(event.message_type(), "test.created");
    }
}
