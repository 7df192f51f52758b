use super::{UserIndex, track};
use crate::domain::address::{Address, PaymentId};
use crate::domain::ports::{PaymentStore, RegistryStore};
use crate::domain::schedule::Schedule;
use crate::domain::stream::Stream;
use crate::domain::username::{Username, UsernameRecord};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// A thread-safe in-memory registry store.
///
/// Uses `Arc<RwLock<HashMap<..>>>` so clones share state. Ideal for tests or
/// single-run replays where persistence is not required.
#[derive(Default, Clone)]
pub struct InMemoryRegistryStore {
    records: Arc<RwLock<HashMap<Username, UsernameRecord>>>,
    nonces: Arc<RwLock<HashMap<Address, u64>>>,
}

impl InMemoryRegistryStore {
    /// Creates a new, empty in-memory registry store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistryStore {
    async fn get(&self, username: &Username) -> Result<Option<UsernameRecord>> {
        let records = self.records.read().await;
        Ok(records.get(username).cloned())
    }

    async fn store(&self, username: &Username, record: UsernameRecord) -> Result<()> {
        let mut records = self.records.write().await;
        records.insert(username.clone(), record);
        Ok(())
    }

    async fn nonce(&self, controller: &Address) -> Result<u64> {
        let nonces = self.nonces.read().await;
        Ok(nonces.get(controller).copied().unwrap_or(0))
    }

    async fn store_nonce(&self, controller: &Address, nonce: u64) -> Result<()> {
        let mut nonces = self.nonces.write().await;
        nonces.insert(*controller, nonce);
        Ok(())
    }
}

#[derive(Default)]
struct PaymentBook {
    streams: HashMap<PaymentId, Stream>,
    schedules: HashMap<PaymentId, Schedule>,
    index: HashMap<Username, UserIndex>,
    tokens: HashMap<Address, Vec<PaymentId>>,
}

/// A thread-safe in-memory arena of streams and schedules.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    book: Arc<RwLock<PaymentBook>>,
}

impl InMemoryPaymentStore {
    /// Creates a new, empty in-memory payment store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn store_stream(&self, stream: Stream) -> Result<()> {
        let mut book = self.book.write().await;
        let is_new = !book.streams.contains_key(&stream.id);
        book.index
            .entry(stream.username.clone())
            .or_default()
            .track_stream(stream.id, is_new, stream.is_live());
        track(
            book.tokens.entry(stream.token).or_default(),
            stream.id,
            stream.is_live(),
        );
        book.streams.insert(stream.id, stream);
        Ok(())
    }

    async fn get_stream(&self, id: &PaymentId) -> Result<Option<Stream>> {
        let book = self.book.read().await;
        Ok(book.streams.get(id).cloned())
    }

    async fn live_streams(&self, username: &Username) -> Result<Vec<Stream>> {
        let book = self.book.read().await;
        let Some(index) = book.index.get(username) else {
            return Ok(Vec::new());
        };
        Ok(index
            .streams
            .iter()
            .filter_map(|id| book.streams.get(id).cloned())
            .collect())
    }

    async fn stream_sequence(&self, username: &Username) -> Result<u64> {
        let book = self.book.read().await;
        Ok(book
            .index
            .get(username)
            .map_or(0, |index| index.stream_sequence))
    }

    async fn live_streams_on_token(&self, token: &Address) -> Result<usize> {
        let book = self.book.read().await;
        Ok(book.tokens.get(token).map_or(0, Vec::len))
    }

    async fn store_schedule(&self, schedule: Schedule) -> Result<()> {
        let mut book = self.book.write().await;
        let is_new = !book.schedules.contains_key(&schedule.id);
        book.index
            .entry(schedule.username.clone())
            .or_default()
            .track_schedule(schedule.id, is_new, schedule.active);
        book.schedules.insert(schedule.id, schedule);
        Ok(())
    }

    async fn get_schedule(&self, id: &PaymentId) -> Result<Option<Schedule>> {
        let book = self.book.read().await;
        Ok(book.schedules.get(id).cloned())
    }

    async fn live_schedules(&self, username: &Username) -> Result<Vec<Schedule>> {
        let book = self.book.read().await;
        let Some(index) = book.index.get(username) else {
            return Ok(Vec::new());
        };
        Ok(index
            .schedules
            .iter()
            .filter_map(|id| book.schedules.get(id).cloned())
            .collect())
    }

    async fn schedule_sequence(&self, username: &Username) -> Result<u64> {
        let book = self.book.read().await;
        Ok(book
            .index
            .get(username)
            .map_or(0, |index| index.schedule_sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::schedule::{Interval, NewSchedule};
    use crate::domain::stream::{FlowRate, StreamState};

    fn alice() -> Username {
        Username::parse("alice").unwrap()
    }

    fn stream(sequence: u64) -> Stream {
        let token = Address::derive("usdc");
        let rate = FlowRate::new(1000 + u128::from(sequence)).unwrap();
        Stream {
            id: Stream::derive_id(&alice(), &token, rate, 10, sequence),
            username: alice(),
            token,
            flow_rate: rate,
            state: StreamState::Active,
            start_time: 10,
            recipient_at_creation: Address::derive("bob"),
        }
    }

    #[tokio::test]
    async fn test_in_memory_registry_store() {
        let store = InMemoryRegistryStore::new();
        let record =
            UsernameRecord::new(Address::derive("a"), Address::derive("b"), 1).unwrap();

        store.store(&alice(), record.clone()).await.unwrap();
        assert_eq!(store.get(&alice()).await.unwrap(), Some(record));
        assert!(store.get(&Username::parse("bob").unwrap()).await.unwrap().is_none());

        assert_eq!(store.nonce(&Address::derive("a")).await.unwrap(), 0);
        store.store_nonce(&Address::derive("a"), 3).await.unwrap();
        assert_eq!(store.nonce(&Address::derive("a")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_cancelled_stream_leaves_index_but_stays_readable() {
        let store = InMemoryPaymentStore::new();
        let mut first = stream(0);
        store.store_stream(first.clone()).await.unwrap();
        store.store_stream(stream(1)).await.unwrap();
        assert_eq!(store.live_streams(&alice()).await.unwrap().len(), 2);
        assert_eq!(store.stream_sequence(&alice()).await.unwrap(), 2);
        assert_eq!(store.live_streams_on_token(&first.token).await.unwrap(), 2);

        first.cancel();
        store.store_stream(first.clone()).await.unwrap();
        let live = store.live_streams(&alice()).await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].id, stream(1).id);
        assert_eq!(store.stream_sequence(&alice()).await.unwrap(), 2);
        assert_eq!(store.live_streams_on_token(&first.token).await.unwrap(), 1);
        assert_eq!(store.get_stream(&first.id).await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn test_inactive_schedule_leaves_index() {
        let store = InMemoryPaymentStore::new();
        let mut schedule = Schedule::create(
            alice(),
            NewSchedule {
                token: Address::derive("usdc"),
                amount: 5,
                interval: Interval::Daily,
                is_one_time: false,
                first_payment_date: 100,
            },
            10,
            0,
        )
        .unwrap();
        store.store_schedule(schedule.clone()).await.unwrap();
        assert_eq!(store.live_schedules(&alice()).await.unwrap().len(), 1);

        schedule.cancel().unwrap();
        store.store_schedule(schedule.clone()).await.unwrap();
        assert!(store.live_schedules(&alice()).await.unwrap().is_empty());
        assert_eq!(store.schedule_sequence(&alice()).await.unwrap(), 1);
        assert!(store.get_schedule(&schedule.id).await.unwrap().is_some());
    }
}
