//! Type-indexed routing of events and messages.
//!
//! Routing is closed-world: every router is filled once when its owner is
//! constructed and looked up by the exact `TypeId` of the value being routed.

use core::any::{Any, TypeId, type_name};
use std::collections::HashMap;

use thiserror::Error;

use crate::message::{Event, Message};

/// Routing failure. Always a programming/configuration error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no handler registered for {message_type}")]
    HandlerNotFound { message_type: String },

    #[error("handler for {message_type} does not return {expected}")]
    ResultTypeMismatch {
        message_type: String,
        expected: &'static str,
    },
}

impl DispatchError {
    pub fn handler_not_found(message_type: impl Into<String>) -> Self {
        Self::HandlerNotFound {
            message_type: message_type.into(),
        }
    }
}

type ApplyFn<S> = Box<dyn Fn(&mut S, &dyn Any) + Send + Sync>;

/// Event type → state mutation.
pub struct EventRouter<S> {
    routes: HashMap<TypeId, ApplyFn<S>>,
}

impl<S: 'static> EventRouter<S> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Register the handler for events of type `E`.
    ///
    /// # Panics
    ///
    /// Panics if `E` already has a handler.
    pub fn on<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: Event,
        F: Fn(&mut S, &E) + Send + Sync + 'static,
    {
        let previous = self.routes.insert(
            TypeId::of::<E>(),
            Box::new(move |state: &mut S, event: &dyn Any| {
                if let Some(event) = event.downcast_ref::<E>() {
                    handler(state, event);
                }
            }),
        );
        assert!(
            previous.is_none(),
            "event handler for {} registered twice",
            type_name::<E>()
        );
        self
    }

    pub fn handles(&self, event: &dyn Event) -> bool {
        self.routes.contains_key(&event.concrete_type_id())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Apply `event` to `state` through its registered handler.
    pub fn route(&self, state: &mut S, event: &dyn Event) -> Result<(), DispatchError> {
        let apply = self
            .routes
            .get(&event.concrete_type_id())
            .ok_or_else(|| DispatchError::handler_not_found(event.message_type()))?;
        apply(state, event.as_any());
        Ok(())
    }
}

impl<S: 'static> Default for EventRouter<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> core::fmt::Debug for EventRouter<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventRouter")
            .field("routes", &self.routes.len())
            .finish()
    }
}

type SendFn<T> = Box<dyn Fn(&mut T, &dyn Any) -> Box<dyn Any + Send> + Send + Sync>;

/// Message type → request/response handler over a target `T`.
pub struct MessageRouter<T> {
    routes: HashMap<TypeId, SendFn<T>>,
}

impl<T: 'static> MessageRouter<T> {
    pub fn new() -> Self {
        Self {
            routes: HashMap::new(),
        }
    }

    /// Register the handler for messages of type `M`.
    ///
    /// # Panics
    ///
    /// Panics if `M` already has a handler.
    pub fn on<M, R, F>(&mut self, handler: F) -> &mut Self
    where
        M: Message,
        R: Send + 'static,
        F: Fn(&mut T, &M) -> R + Send + Sync + 'static,
    {
        let previous = self.routes.insert(
            TypeId::of::<M>(),
            Box::new(move |target: &mut T, message: &dyn Any| match message.downcast_ref::<M>() {
                Some(message) => Box::new(handler(target, message)) as Box<dyn Any + Send>,
                None => Box::new(()) as Box<dyn Any + Send>,
            }),
        );
        assert!(
            previous.is_none(),
            "message handler for {} registered twice",
            type_name::<M>()
        );
        self
    }

    pub fn handles(&self, message: &dyn Message) -> bool {
        self.routes.contains_key(&message.concrete_type_id())
    }

    /// Route `message` to its single handler and return the typed result.
    pub fn send<R: 'static>(&self, target: &mut T, message: &dyn Message) -> Result<R, DispatchError> {
        let handler = self
            .routes
            .get(&message.concrete_type_id())
            .ok_or_else(|| DispatchError::handler_not_found(message.message_type()))?;
        let result: Box<dyn Any + Send> = handler(target, message.as_any());
        result
            .downcast::<R>()
            .map(|boxed| *boxed)
            .map_err(|_| DispatchError::ResultTypeMismatch {
                message_type: message.message_type().to_string(),
                expected: type_name::<R>(),
            })
    }

    /// Like [`send`](Self::send), but `None` when no handler is registered.
    ///
    /// A handler that exists but returns another type is still an error.
    pub fn try_send<R: 'static>(
        &self,
        target: &mut T,
        message: &dyn Message,
    ) -> Result<Option<R>, DispatchError> {
        if !self.handles(message) {
            return Ok(None);
        }
        self.send(target, message).map(Some)
    }
}

impl<T: 'static> Default for MessageRouter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> core::fmt::Debug for MessageRouter<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageRouter")
            .field("routes", &self.routes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        value: i64,
    }

    #[derive(Debug)]
    struct Incremented(i64);

    impl Message for Incremented {
        fn message_type(&self) -> &'static str {
            "counter.incremented"
        }
    }
    impl Event for Incremented {}

    #[derive(Debug)]
    struct Reset;

    impl Message for Reset {
        fn message_type(&self) -> &'static str {
            "counter.reset"
        }
    }
    impl Event for Reset {}

    #[derive(Debug)]
    struct GetValue;

    impl Message for GetValue {
        fn message_type(&self) -> &'static str {
            "counter.get"
        }
    }

    #[test]
    fn routes_event_to_its_handler() {
        let mut router = EventRouter::<Counter>::new();
        router.on(|c: &mut Counter, e: &Incremented| c.value += e.0);

        let mut counter = Counter::default();
        router.route(&mut counter, &Incremented(3)).unwrap();
        router.route(&mut counter, &Incremented(4)).unwrap();
        assert_eq!(counter.value, 7);
    }

    #[test]
    fn unknown_event_is_handler_not_found() {
        let mut router = EventRouter::<Counter>::new();
        router.on(|c: &mut Counter, e: &Incremented| c.value += e.0);

        let err = router.route(&mut Counter::default(), &Reset).unwrap_err();
        assert_eq!(err, DispatchError::handler_not_found("counter.reset"));
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn duplicate_registration_panics() {
        let mut router = EventRouter::<Counter>::new();
        router.on(|_: &mut Counter, _: &Reset| {});
        router.on(|_: &mut Counter, _: &Reset| {});
    }

    #[test]
    fn send_returns_typed_result() {
        let mut router = MessageRouter::<Counter>::new();
        router.on(|c: &mut Counter, _: &GetValue| c.value);

        let mut counter = Counter { value: 11 };
        let value: i64 = router.send(&mut counter, &GetValue).unwrap();
        assert_eq!(value, 11);

        let wrong = router.send::<String>(&mut counter, &GetValue).unwrap_err();
        assert!(matches!(wrong, DispatchError::ResultTypeMismatch { .. }));
    }

    #[test]
    fn try_send_distinguishes_missing_handler_from_default_value() {
        let mut router = MessageRouter::<Counter>::new();
        router.on(|c: &mut Counter, _: &GetValue| c.value);

        let mut counter = Counter::default();
        assert_eq!(router.try_send::<i64>(&mut counter, &GetValue).unwrap(), Some(0));
        assert_eq!(router.try_send::<i64>(&mut counter, &Reset).unwrap(), None);
        assert!(matches!(
            router.send::<i64>(&mut counter, &Reset),
            Err(DispatchError::HandlerNotFound { .. })
        ));
    }
}
