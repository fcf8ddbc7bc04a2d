//! Read models folded from recorded events.
//!
//! A [`Projection`] is a closed table of per-event-type handlers over some
//! state `S` (usually a [`ReadModel`]). Running it threads the state through
//! the events in store order:
//!
//! - events with a handler mutate the state
//! - events without one are skipped
//! - a handler error halts the run and is returned as is
//!
//! Projections never write to the event store; they can be rebuilt from
//! scratch at any time and yield the same state for the same history.

use core::any::{Any, TypeId, type_name};
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use streamledger_core::Id;

use crate::message::Event;
use crate::recorded::RecordedEvent;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProjectionError {
    #[error("read model entry {0} not found")]
    EntryNotFound(Id),

    #[error("projection {projection} failed on {event_type}: {message}")]
    Handler {
        projection: String,
        event_type: String,
        message: String,
    },

    #[error("non-monotonic sequence (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

impl ProjectionError {
    /// Failure raised from inside a handler; the projection fills in context.
    pub fn handler(message: impl Into<String>) -> Self {
        Self::Handler {
            projection: String::new(),
            event_type: String::new(),
            message: message.into(),
        }
    }
}

type ProjectFn<S> =
    Box<dyn Fn(&mut S, &dyn Any, &RecordedEvent) -> Result<(), ProjectionError> + Send + Sync>;

/// Per-event-type handlers folding recorded events into state `S`.
pub struct Projection<S> {
    name: String,
    handlers: HashMap<TypeId, ProjectFn<S>>,
}

impl<S: 'static> Projection<S> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handlers: HashMap::new(),
        }
    }

    /// Register the handler for events of type `E`.
    ///
    /// # Panics
    ///
    /// Panics if `E` already has a handler.
    pub fn on<E, F>(mut self, handler: F) -> Self
    where
        E: Event,
        F: Fn(&mut S, &E, &RecordedEvent) -> Result<(), ProjectionError> + Send + Sync + 'static,
    {
        let previous = self.handlers.insert(
            TypeId::of::<E>(),
            Box::new(move |state: &mut S, event: &dyn Any, recorded: &RecordedEvent| {
                match event.downcast_ref::<E>() {
                    Some(event) => handler(state, event, recorded),
                    None => Ok(()),
                }
            }),
        );
        assert!(
            previous.is_none(),
            "projection handler for {} registered twice",
            type_name::<E>()
        );
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Event types with a handler; used to narrow store reads.
    pub fn handled_types(&self) -> Vec<TypeId> {
        self.handlers.keys().copied().collect()
    }

    pub fn handles(&self, event: &dyn Event) -> bool {
        self.handlers.contains_key(&event.concrete_type_id())
    }

    /// Apply one event. Returns `false` when the event type has no handler.
    pub fn apply(&self, state: &mut S, recorded: &RecordedEvent) -> Result<bool, ProjectionError> {
        let Some(handler) = self.handlers.get(&recorded.event_type_id()) else {
            return Ok(false);
        };

        handler(state, recorded.event().as_any(), recorded).map_err(|err| match err {
            ProjectionError::Handler { message, .. } => ProjectionError::Handler {
                projection: self.name.clone(),
                event_type: recorded.event_type().to_string(),
                message,
            },
            other => other,
        })?;
        Ok(true)
    }

    /// Fold `events` into `initial`, in the order given.
    pub fn run<I>(&self, initial: S, events: I) -> Result<S, ProjectionError>
    where
        I: IntoIterator<Item = RecordedEvent>,
    {
        let mut state = initial;
        for recorded in events {
            self.apply(&mut state, &recorded)?;
        }
        Ok(state)
    }
}

impl<S> core::fmt::Debug for Projection<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Projection")
            .field("name", &self.name)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Keyed collection of read-model entries.
///
/// Ordered by key so two rebuilds compare equal entry by entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadModel<V> {
    entries: BTreeMap<Id, V>,
}

impl<V> ReadModel<V> {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Add a new entry (replacing any previous one under the same key).
    pub fn insert(&mut self, key: Id, entry: V) -> Option<V> {
        self.entries.insert(key, entry)
    }

    pub fn get(&self, key: &Id) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &Id) -> Option<&mut V> {
        self.entries.get_mut(key)
    }

    /// Mutate an existing entry located by key.
    pub fn update<F>(&mut self, key: &Id, f: F) -> Result<(), ProjectionError>
    where
        F: FnOnce(&mut V),
    {
        let entry = self
            .entries
            .get_mut(key)
            .ok_or(ProjectionError::EntryNotFound(*key))?;
        f(entry);
        Ok(())
    }

    pub fn remove(&mut self, key: &Id) -> Option<V> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &Id) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Id, &V)> {
        self.entries.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.values()
    }
}

impl<V> Default for ReadModel<V> {
    fn default() -> Self {
        Self::new()
    }
}
