//! Projection runner utilities (read model builders).
//!
//! Read models are **disposable**; events are the source of truth.
//! This module adds cursor tracking on top of [`Projection`] so a read model
//! can be caught up incrementally instead of rebuilt.

use crate::projection::{Projection, ProjectionError};
use crate::recorded::RecordedEvent;

/// Owns a projection, its state and the global sequence of the last event seen.
#[derive(Debug)]
pub struct ProjectionRunner<S> {
    projection: Projection<S>,
    state: S,
    cursor: Option<u64>,
}

impl<S: 'static> ProjectionRunner<S> {
    pub fn new(projection: Projection<S>, initial: S) -> Self {
        Self {
            projection,
            state: initial,
            cursor: None,
        }
    }

    pub fn projection(&self) -> &Projection<S> {
        &self.projection
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }

    /// Global sequence of the last event applied or skipped, if any.
    pub fn cursor(&self) -> Option<u64> {
        self.cursor
    }

    /// Apply a single event, enforcing strictly increasing store order.
    pub fn apply(&mut self, recorded: &RecordedEvent) -> Result<(), ProjectionError> {
        let found = recorded.sequence();
        if let Some(last) = self.cursor {
            if found <= last {
                return Err(ProjectionError::NonMonotonicSequence { last, found });
            }
        }

        self.projection.apply(&mut self.state, recorded)?;
        self.cursor = Some(found);
        Ok(())
    }

    /// Apply many events in order.
    pub fn run<I>(&mut self, events: I) -> Result<usize, ProjectionError>
    where
        I: IntoIterator<Item = RecordedEvent>,
    {
        let mut applied = 0;
        for recorded in events {
            self.apply(&recorded)?;
            applied += 1;
        }
        Ok(applied)
    }

    /// Rebuild a projection from scratch by replaying the full event history.
    pub fn rebuild_from_scratch<I>(
        projection: Projection<S>,
        initial: S,
        events: I,
    ) -> Result<(S, Option<u64>), ProjectionError>
    where
        I: IntoIterator<Item = RecordedEvent>,
    {
        let mut runner = ProjectionRunner::new(projection, initial);
        runner.run(events)?;
        Ok((runner.state, runner.cursor))
    }
}
