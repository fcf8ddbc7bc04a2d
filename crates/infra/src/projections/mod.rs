//! Projection/query engine over the event store.
//!
//! Read models are disposable: they can always be rebuilt from the events,
//! or caught up incrementally through a [`ProjectionRunner`](streamledger_events::ProjectionRunner).

pub mod query;

pub use query::{CatchUp, Query, ReplayError};
