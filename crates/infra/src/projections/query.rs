//! Running projections against an [`EventStore`].
//!
//! A query folds recorded events into read-model state. Only the event types
//! the projection handles are fetched, in global commit order.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use streamledger_events::{Projection, ProjectionError, ProjectionRunner};

use crate::event_store::{Criteria, EventStore, EventStoreError};

/// Error type for projection queries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("projection error: {0}")]
    Projection(#[from] ProjectionError),
}

/// Summary of a catch-up pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CatchUp {
    /// Events applied in this pass.
    pub applied: usize,
    /// Cursor after the pass.
    pub cursor: Option<u64>,
}

/// Executes projections over the events of a store.
#[derive(Clone)]
pub struct Query {
    store: Arc<dyn EventStore>,
}

impl Query {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Criteria selecting exactly the events `projection` handles.
    pub fn criteria_for<S: 'static>(projection: &Projection<S>) -> Criteria {
        Criteria::builder().of_types(projection.handled_types()).build()
    }

    /// Fold every handled event in the store into `initial`.
    pub async fn run<S: 'static>(&self, projection: &Projection<S>, initial: S) -> Result<S, ReplayError> {
        self.run_with(projection, initial, &Self::criteria_for(projection)).await
    }

    /// Fold the events selected by `criteria` into `initial`.
    ///
    /// Events the projection does not handle are skipped.
    pub async fn run_with<S: 'static>(
        &self,
        projection: &Projection<S>,
        initial: S,
        criteria: &Criteria,
    ) -> Result<S, ReplayError> {
        let events = self.store.query(criteria).await?;
        let mut state = initial;
        let mut applied = 0usize;
        for recorded in events {
            if projection.apply(&mut state, &recorded?)? {
                applied += 1;
            }
        }
        tracing::debug!(projection = projection.name(), applied, "projection query complete");
        Ok(state)
    }

    /// Apply everything committed after the runner's cursor.
    pub async fn catch_up<S: 'static>(&self, runner: &mut ProjectionRunner<S>) -> Result<CatchUp, ReplayError> {
        let mut builder = Criteria::builder().of_types(runner.projection().handled_types());
        if let Some(cursor) = runner.cursor() {
            builder = builder.after_sequence(cursor);
        }
        let events = self.store.query(&builder.build()).await?;

        let mut applied = 0usize;
        for recorded in events {
            runner.apply(&recorded?)?;
            applied += 1;
        }

        if applied > 0 {
            tracing::debug!(
                projection = runner.projection().name(),
                applied,
                cursor = ?runner.cursor(),
                "projection caught up"
            );
        }
        Ok(CatchUp {
            applied,
            cursor: runner.cursor(),
        })
    }
}

impl std::fmt::Debug for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query").finish_non_exhaustive()
    }
}
