//! Filter criteria for global event reads.

use core::any::TypeId;
use std::collections::HashSet;

use chrono::{DateTime, Utc};

use streamledger_core::Id;
use streamledger_events::{Event, RecordedEvent};

/// Filter for [`EventStore::query`](super::EventStore::query).
///
/// Every populated field narrows the selection; an empty criteria matches
/// every event in the store.
#[derive(Debug, Clone, Default)]
pub struct Criteria {
    event_types: Option<HashSet<TypeId>>,
    streams: Option<HashSet<Id>>,
    after_sequence: Option<u64>,
    occurred_after: Option<DateTime<Utc>>,
    occurred_before: Option<DateTime<Utc>>,
}

impl Criteria {
    /// Matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn builder() -> CriteriaBuilder {
        CriteriaBuilder::default()
    }

    /// Only events with a global sequence greater than this one are selected.
    pub fn after_sequence(&self) -> Option<u64> {
        self.after_sequence
    }

    pub fn streams(&self) -> Option<&HashSet<Id>> {
        self.streams.as_ref()
    }

    pub fn matches(&self, recorded: &RecordedEvent) -> bool {
        if let Some(after) = self.after_sequence {
            if recorded.sequence() <= after {
                return false;
            }
        }
        if let Some(types) = &self.event_types {
            if !types.contains(&recorded.event_type_id()) {
                return false;
            }
        }
        if let Some(streams) = &self.streams {
            if !streams.contains(&recorded.stream_id()) {
                return false;
            }
        }
        let at = recorded.metadata().timestamp;
        if self.occurred_after.is_some_and(|after| at <= after) {
            return false;
        }
        if self.occurred_before.is_some_and(|before| at >= before) {
            return false;
        }
        true
    }
}

/// Builder for [`Criteria`].
#[derive(Debug, Clone, Default)]
pub struct CriteriaBuilder {
    criteria: Criteria,
}

impl CriteriaBuilder {
    /// Include events of type `E`. May be called repeatedly.
    pub fn of_type<E: Event>(self) -> Self {
        self.of_types([TypeId::of::<E>()])
    }

    pub fn of_types(mut self, types: impl IntoIterator<Item = TypeId>) -> Self {
        self.criteria
            .event_types
            .get_or_insert_with(HashSet::new)
            .extend(types);
        self
    }

    /// Include events of this stream. May be called repeatedly.
    pub fn in_stream(self, stream_id: Id) -> Self {
        self.in_streams([stream_id])
    }

    pub fn in_streams(mut self, streams: impl IntoIterator<Item = Id>) -> Self {
        self.criteria
            .streams
            .get_or_insert_with(HashSet::new)
            .extend(streams);
        self
    }

    pub fn after_sequence(mut self, sequence: u64) -> Self {
        self.criteria.after_sequence = Some(sequence);
        self
    }

    pub fn occurred_after(mut self, at: DateTime<Utc>) -> Self {
        self.criteria.occurred_after = Some(at);
        self
    }

    pub fn occurred_before(mut self, at: DateTime<Utc>) -> Self {
        self.criteria.occurred_before = Some(at);
        self
    }

    pub fn build(self) -> Criteria {
        self.criteria
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Duration;
    use streamledger_events::{ExecutionContext, Message, Metadata};

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

    fn recorded(stream: Id, sequence: u64, event: Arc<dyn Event>, at: DateTime<Utc>) -> RecordedEvent {
        let metadata = Metadata::new(at, &ExecutionContext::system());
        RecordedEvent::new(stream, 0, sequence, sequence, event, Arc::new(metadata))
    }

    #[test]
    fn empty_criteria_matches_everything() {
        let e = recorded(Id::new(), 0, Arc::new(Created), Utc::now());
        assert!(Criteria::all().matches(&e));
    }

    #[test]
    fn filters_combine() {
        let stream = Id::from_u128(1);
        let now = Utc::now();
        let criteria = Criteria::builder()
            .of_type::<Created>()
            .in_stream(stream)
            .after_sequence(3)
            .occurred_before(now + Duration::seconds(1))
            .build();

        assert!(criteria.matches(&recorded(stream, 4, Arc::new(Created), now)));
        assert!(!criteria.matches(&recorded(stream, 3, Arc::new(Created), now)));
        assert!(!criteria.matches(&recorded(stream, 5, Arc::new(Renamed), now)));
        assert!(!criteria.matches(&recorded(Id::from_u128(2), 6, Arc::new(Created), now)));
        assert!(!criteria.matches(&recorded(stream, 7, Arc::new(Created), now + Duration::seconds(2))));
    }

    #[test]
    fn repeated_types_accumulate() {
        let criteria = Criteria::builder().of_type::<Created>().of_type::<Renamed>().build();
        let stream = Id::new();
        assert!(criteria.matches(&recorded(stream, 0, Arc::new(Created), Utc::now())));
        assert!(criteria.matches(&recorded(stream, 1, Arc::new(Renamed), Utc::now())));
    }
}
