use std::collections::HashMap;
use std::iter::Peekable;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use streamledger_core::Id;
use streamledger_events::{Metadata, RecordedEvent};

use super::batch::{CommittedBatch, EventBatch};
use super::criteria::Criteria;
use super::r#trait::{CommittedBatches, EventStore, EventStoreError, EventTransaction, RecordedEvents};

#[derive(Debug, Default)]
struct Log {
    /// Every committed event, in global order (index == sequence).
    events: Vec<RecordedEvent>,
    /// Indices into `events`, per stream, in position order.
    streams: HashMap<Id, Vec<usize>>,
    commits: u64,
}

impl Log {
    fn version(&self, stream_id: &Id) -> u64 {
        self.streams.get(stream_id).map_or(0, |s| s.len() as u64)
    }
}

type SharedLog = Arc<RwLock<Log>>;

fn read(log: &SharedLog) -> Result<RwLockReadGuard<'_, Log>, EventStoreError> {
    log.read().map_err(|_| EventStoreError::Poisoned)
}

fn write(log: &SharedLog) -> Result<RwLockWriteGuard<'_, Log>, EventStoreError> {
    log.write().map_err(|_| EventStoreError::Poisoned)
}

/// In-memory append-only event store.
///
/// Intended for tests/dev. Clones share the same log.
#[derive(Debug, Clone, Default)]
pub struct InMemoryEventStore {
    log: SharedLog,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of committed events across all streams.
    pub fn len(&self) -> usize {
        self.log.read().map_or(0, |log| log.events.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn begin(&self) -> Result<Box<dyn EventTransaction>, EventStoreError> {
        Ok(Box::new(InMemoryTransaction {
            log: Arc::clone(&self.log),
            staged: Vec::new(),
            state: TxState::Open,
        }))
    }

    async fn exists(&self, stream_id: Id) -> Result<bool, EventStoreError> {
        Ok(read(&self.log)?.version(&stream_id) > 0)
    }

    async fn stream_version(&self, stream_id: Id) -> Result<u64, EventStoreError> {
        Ok(read(&self.log)?.version(&stream_id))
    }

    async fn get(&self, stream_id: Id) -> Result<RecordedEvents, EventStoreError> {
        let end = read(&self.log)?.version(&stream_id) as usize;
        Ok(Box::new(StreamCursor {
            log: Arc::clone(&self.log),
            stream_id,
            next: 0,
            end,
        }))
    }

    async fn query(&self, criteria: &Criteria) -> Result<RecordedEvents, EventStoreError> {
        Ok(Box::new(self.scan(criteria)?))
    }

    async fn query_batches(&self, criteria: &Criteria) -> Result<CommittedBatches, EventStoreError> {
        Ok(Box::new(Batches {
            inner: self.scan(criteria)?.peekable(),
        }))
    }
}

impl InMemoryEventStore {
    fn scan(&self, criteria: &Criteria) -> Result<QueryCursor, EventStoreError> {
        let end = read(&self.log)?.events.len();
        // Sequence equals the index in the global log.
        let start = criteria
            .after_sequence()
            .map_or(0, |after| (after as usize).saturating_add(1));
        Ok(QueryCursor {
            log: Arc::clone(&self.log),
            criteria: criteria.clone(),
            next: start,
            end,
        })
    }
}

struct StreamCursor {
    log: SharedLog,
    stream_id: Id,
    next: usize,
    end: usize,
}

impl Iterator for StreamCursor {
    type Item = Result<RecordedEvent, EventStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let log = match read(&self.log) {
            Ok(log) => log,
            Err(err) => {
                self.next = self.end;
                return Some(Err(err));
            }
        };
        let idx = log.streams.get(&self.stream_id)?.get(self.next).copied()?;
        self.next += 1;
        log.events.get(idx).cloned().map(Ok)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end.saturating_sub(self.next);
        (0, Some(remaining))
    }
}

struct QueryCursor {
    log: SharedLog,
    criteria: Criteria,
    next: usize,
    end: usize,
}

impl Iterator for QueryCursor {
    type Item = Result<RecordedEvent, EventStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let log = match read(&self.log) {
            Ok(log) => log,
            Err(err) => {
                if self.next >= self.end {
                    return None;
                }
                self.next = self.end;
                return Some(Err(err));
            }
        };
        while self.next < self.end {
            let candidate = &log.events[self.next];
            self.next += 1;
            if self.criteria.matches(candidate) {
                return Some(Ok(candidate.clone()));
            }
        }
        None
    }
}

struct Batches {
    inner: Peekable<QueryCursor>,
}

impl Iterator for Batches {
    type Item = Result<CommittedBatch, EventStoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        let first = match self.inner.next()? {
            Ok(event) => event,
            Err(err) => return Some(Err(err)),
        };
        let (stream_id, commit) = (first.stream_id(), first.commit());
        let mut events = vec![first];
        while let Some(Ok(next)) = self.inner.peek() {
            if next.commit() != commit || next.stream_id() != stream_id {
                break;
            }
            if let Some(Ok(event)) = self.inner.next() {
                events.push(event);
            }
        }
        Some(Ok(CommittedBatch {
            stream_id,
            commit,
            events,
        }))
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum TxState {
    Open,
    Committed,
    Aborted,
}

/// Transaction over an [`InMemoryEventStore`].
///
/// Staged batches are kept aside until commit, which re-verifies every
/// expected version under the write lock before publishing anything.
#[derive(Debug)]
pub struct InMemoryTransaction {
    log: SharedLog,
    staged: Vec<(EventBatch, Arc<Metadata>)>,
    state: TxState,
}

impl InMemoryTransaction {
    fn ensure_open(&self) -> Result<(), EventStoreError> {
        match self.state {
            TxState::Open => Ok(()),
            TxState::Committed | TxState::Aborted => Err(EventStoreError::TransactionClosed),
        }
    }

    fn staged_for(&self, stream_id: Id) -> u64 {
        self.staged
            .iter()
            .filter(|(b, _)| b.stream_id() == stream_id)
            .map(|(b, _)| b.len() as u64)
            .sum()
    }
}

#[async_trait]
impl EventTransaction for InMemoryTransaction {
    async fn save(&mut self, batch: EventBatch, metadata: Metadata) -> Result<(), EventStoreError> {
        self.ensure_open()?;
        let stream_id = batch.stream_id();
        let current = read(&self.log)?.version(&stream_id) + self.staged_for(stream_id);
        let expected = batch.expected_version();
        if !expected.matches(current) {
            return Err(EventStoreError::Concurrency {
                stream_id,
                expected,
                actual: current,
            });
        }
        self.staged.push((batch, Arc::new(metadata)));
        Ok(())
    }

    fn staged(&self) -> usize {
        self.staged.iter().map(|(b, _)| b.len()).sum()
    }

    async fn commit(&mut self) -> Result<Vec<RecordedEvent>, EventStoreError> {
        self.ensure_open()?;
        let staged = std::mem::take(&mut self.staged);
        self.state = TxState::Committed;
        if staged.is_empty() {
            return Ok(Vec::new());
        }

        let mut log = write(&self.log)?;

        // Verify everything before touching the log: all or nothing.
        let mut pending: HashMap<Id, u64> = HashMap::new();
        for (batch, _) in &staged {
            let stream_id = batch.stream_id();
            let current = log.version(&stream_id) + pending.get(&stream_id).copied().unwrap_or(0);
            let expected = batch.expected_version();
            if !expected.matches(current) {
                tracing::debug!(%stream_id, ?expected, actual = current, "commit rejected");
                return Err(EventStoreError::Concurrency {
                    stream_id,
                    expected,
                    actual: current,
                });
            }
            *pending.entry(stream_id).or_default() += batch.len() as u64;
        }

        let commit = log.commits;
        log.commits += 1;

        let mut committed = Vec::with_capacity(pending.values().sum::<u64>() as usize);
        for (batch, metadata) in staged {
            let stream_id = batch.stream_id();
            for event in batch.events() {
                let sequence = log.events.len();
                let position = log.version(&stream_id);
                let recorded = RecordedEvent::new(
                    stream_id,
                    position,
                    sequence as u64,
                    commit,
                    Arc::clone(event),
                    Arc::clone(&metadata),
                );
                log.events.push(recorded.clone());
                log.streams.entry(stream_id).or_default().push(sequence);
                committed.push(recorded);
            }
        }

        tracing::debug!(commit, events = committed.len(), "transaction committed");
        Ok(committed)
    }

    async fn abort(&mut self) {
        if self.state == TxState::Open {
            self.staged.clear();
            self.state = TxState::Aborted;
        }
    }
}

impl Drop for InMemoryTransaction {
    fn drop(&mut self) {
        if self.state == TxState::Open && !self.staged.is_empty() {
            tracing::debug!(
                staged = self.staged.len(),
                "transaction dropped without commit; staged batches discarded"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_store::UncommittedEvent;
    use proptest::prelude::*;
    use streamledger_core::ExpectedVersion;
    use streamledger_events::{Event, ExecutionContext, Message};

    #[derive(Debug, Clone, PartialEq)]
    struct Created {
        name: String,
    }
    impl Message for Created {
        fn message_type(&self) -> &'static str {
            "test.created"
        }
    }
    impl Event for Created {}

    #[derive(Debug, Clone, PartialEq)]
    struct Touched(u32);
    impl Message for Touched {
        fn message_type(&self) -> &'static str {
            "test.touched"
        }
    }
    impl Event for Touched {}

    fn meta() -> Metadata {
        Metadata::now(&ExecutionContext::system())
    }

    fn batch(stream: Id, n: u32, expected: ExpectedVersion) -> EventBatch {
        let events = (0..n).map(|i| UncommittedEvent::new(stream, Touched(i))).collect();
        EventBatch::new(events, expected).unwrap()
    }

    fn collect(events: RecordedEvents) -> Vec<RecordedEvent> {
        events.collect::<Result<Vec<_>, _>>().unwrap()
    }

    #[tokio::test]
    async fn save_then_get_returns_event_at_position_zero() {
        let store = InMemoryEventStore::new();
        let stream = Id::from_u128(1);
        let b = EventBatch::new(
            vec![UncommittedEvent::new(stream, Created { name: "A".into() })],
            ExpectedVersion::NO_STREAM,
        )
        .unwrap();
        store.save(b, meta()).await.unwrap();

        let events = collect(store.get(stream).await.unwrap());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].position(), 0);
        assert_eq!(events[0].downcast::<Created>().unwrap().name, "A");
        assert!(store.exists(stream).await.unwrap());
        assert!(!store.exists(Id::from_u128(2)).await.unwrap());
    }

    #[tokio::test]
    async fn stale_expected_version_is_a_concurrency_error() {
        let store = InMemoryEventStore::new();
        let stream = Id::new();
        store.save(batch(stream, 2, ExpectedVersion::NO_STREAM), meta()).await.unwrap();

        let err = store
            .save(batch(stream, 1, ExpectedVersion::Exact(1)), meta())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            EventStoreError::Concurrency {
                stream_id: stream,
                expected: ExpectedVersion::Exact(1),
                actual: 2
            }
        );
        assert_eq!(store.stream_version(stream).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn transaction_is_all_or_nothing() {
        let store = InMemoryEventStore::new();
        let a = Id::from_u128(10);
        let b = Id::from_u128(11);
        store.save(batch(b, 1, ExpectedVersion::Any), meta()).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        tx.save(batch(a, 2, ExpectedVersion::NO_STREAM), meta()).await.unwrap();
        tx.save(batch(b, 1, ExpectedVersion::Exact(1)), meta()).await.unwrap();

        // A concurrent writer moves `b` on before commit.
        store.save(batch(b, 1, ExpectedVersion::Exact(1)), meta()).await.unwrap();

        assert!(tx.commit().await.unwrap_err().is_concurrency());
        assert!(!store.exists(a).await.unwrap());
        assert_eq!(store.stream_version(b).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn staged_batches_chain_expected_versions() {
        let store = InMemoryEventStore::new();
        let stream = Id::new();
        let mut tx = store.begin().await.unwrap();
        tx.save(batch(stream, 2, ExpectedVersion::NO_STREAM), meta()).await.unwrap();
        tx.save(batch(stream, 1, ExpectedVersion::Exact(2)), meta()).await.unwrap();
        assert_eq!(tx.staged(), 3);

        // Nothing is visible before commit.
        assert!(!store.exists(stream).await.unwrap());

        let committed = tx.commit().await.unwrap();
        let positions: Vec<u64> = committed.iter().map(|e| e.position()).collect();
        assert_eq!(positions, vec![0, 1, 2]);
        assert!(committed.iter().all(|e| e.commit() == committed[0].commit()));
        assert_eq!(
            tx.save(batch(stream, 1, ExpectedVersion::Any), meta()).await.unwrap_err(),
            EventStoreError::TransactionClosed
        );
    }

    #[tokio::test]
    async fn aborted_and_dropped_transactions_leave_no_trace() {
        let store = InMemoryEventStore::new();
        let stream = Id::new();

        let mut tx = store.begin().await.unwrap();
        tx.save(batch(stream, 1, ExpectedVersion::Any), meta()).await.unwrap();
        tx.abort().await;
        assert!(tx.commit().await.is_err());

        {
            let mut tx = store.begin().await.unwrap();
            tx.save(batch(stream, 1, ExpectedVersion::Any), meta()).await.unwrap();
        }

        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn reads_are_bounded_and_restartable() {
        let store = InMemoryEventStore::new();
        let stream = Id::new();
        store.save(batch(stream, 2, ExpectedVersion::Any), meta()).await.unwrap();

        let snapshot = store.get(stream).await.unwrap();
        store.save(batch(stream, 3, ExpectedVersion::Any), meta()).await.unwrap();
        assert_eq!(snapshot.count(), 2);

        assert_eq!(collect(store.get(stream).await.unwrap()).len(), 5);
        assert_eq!(collect(store.get(stream).await.unwrap()).len(), 5);
    }

    #[tokio::test]
    async fn query_filters_and_groups_batches() {
        let store = InMemoryEventStore::new();
        let a = Id::from_u128(1);
        let b = Id::from_u128(2);
        store
            .save(
                EventBatch::new(
                    vec![
                        UncommittedEvent::new(a, Created { name: "A".into() }),
                        UncommittedEvent::new(a, Touched(1)),
                    ],
                    ExpectedVersion::NO_STREAM,
                )
                .unwrap(),
                meta(),
            )
            .await
            .unwrap();
        store.save(batch(b, 2, ExpectedVersion::NO_STREAM), meta()).await.unwrap();

        let created = collect(store.query(&Criteria::builder().of_type::<Created>().build()).await.unwrap());
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].stream_id(), a);

        let tail = collect(store.query(&Criteria::builder().after_sequence(1).build()).await.unwrap());
        assert_eq!(tail.iter().map(|e| e.sequence()).collect::<Vec<_>>(), vec![2, 3]);

        let batches: Vec<CommittedBatch> = store
            .query_batches(&Criteria::all())
            .await
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!((batches[0].stream_id, batches[0].events.len()), (a, 2));
        assert_eq!((batches[1].stream_id, batches[1].events.len()), (b, 2));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]

        #[test]
        fn streams_read_back_appended_batches_in_order(sizes in proptest::collection::vec((0u8..3, 1u32..4), 1..12)) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                let streams = [Id::from_u128(1), Id::from_u128(2), Id::from_u128(3)];
                let mut expected: HashMap<Id, Vec<u32>> = HashMap::new();

                // Each payload encodes (batch, index within batch).
                for (b, (s, n)) in sizes.iter().enumerate() {
                    let stream = streams[*s as usize];
                    let tags: Vec<u32> = (0..*n).map(|i| b as u32 * 100 + i).collect();
                    let events = tags.iter().map(|tag| UncommittedEvent::new(stream, Touched(*tag))).collect();
                    let batch = EventBatch::new(events, ExpectedVersion::Any).unwrap();
                    store.save(batch, meta()).await.unwrap();
                    expected.entry(stream).or_default().extend(tags);
                }

                for stream in streams {
                    let events = collect(store.get(stream).await.unwrap());
                    for (i, e) in events.iter().enumerate() {
                        prop_assert_eq!(e.position(), i as u64);
                    }
                    prop_assert!(events.windows(2).all(|w| w[0].sequence() < w[1].sequence()));

                    let payloads: Vec<u32> = events.iter().map(|e| e.downcast::<Touched>().unwrap().0).collect();
                    let empty = Vec::new();
                    prop_assert_eq!(&payloads, expected.get(&stream).unwrap_or(&empty));
                }

                let all = collect(store.query(&Criteria::all()).await.unwrap());
                let total: u32 = sizes.iter().map(|(_, n)| *n).sum();
                prop_assert_eq!(all.len(), total as usize);
                let global: Vec<u32> = all.iter().map(|e| e.downcast::<Touched>().unwrap().0).collect();
                let mut sorted = global.clone();
                sorted.sort_unstable();
                prop_assert_eq!(global, sorted);
                Ok(())
            })?;
        }
    }
}
