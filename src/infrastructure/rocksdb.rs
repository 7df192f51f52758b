use super::{UserIndex, track};
use crate::domain::address::{Address, PaymentId};
use crate::domain::ports::{PaymentStore, RegistryStore};
use crate::domain::schedule::Schedule;
use crate::domain::stream::Stream;
use crate::domain::username::{Username, UsernameRecord};
use crate::error::{PaymentError, Result};
use async_trait::async_trait;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, DB, Options, WriteBatch};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Column Family for username records.
pub const CF_USERNAMES: &str = "usernames";
/// Column Family for delegated-claim nonces, keyed by controller.
pub const CF_NONCES: &str = "nonces";
/// Column Family for streams, keyed by id.
pub const CF_STREAMS: &str = "streams";
/// Column Family for schedules, keyed by id.
pub const CF_SCHEDULES: &str = "schedules";
/// Column Family for per-username live indexes and creation counters, plus
/// per-token live stream ids.
pub const CF_INDEXES: &str = "indexes";

const COLUMN_FAMILIES: [&str; 5] = [CF_USERNAMES, CF_NONCES, CF_STREAMS, CF_SCHEDULES, CF_INDEXES];

/// Token index keys cannot collide with username keys, which never contain `:`.
fn token_key(token: &Address) -> Vec<u8> {
    format!("token:{token}").into_bytes()
}

/// A persistent store implementation using RocksDB.
///
/// Values are JSON. A payment record and its owner's index entry are written
/// in one `WriteBatch`, and index updates are serialized behind a mutex so the
/// read-modify-write of the index never interleaves.
///
/// This struct is thread-safe (`Clone` shares the underlying `Arc<DB>`).
#[derive(Clone)]
pub struct RocksDBStore {
    db: Arc<DB>,
    index_lock: Arc<Mutex<()>>,
}

impl RocksDBStore {
    /// Opens or creates a RocksDB instance at the specified path, creating
    /// any missing column families.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let descriptors = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Options::default()))
            .collect::<Vec<_>>();
        let db = DB::open_cf_descriptors(&opts, path, descriptors)?;

        Ok(Self {
            db: Arc::new(db),
            index_lock: Arc::new(Mutex::new(())),
        })
    }

    fn cf(&self, name: &'static str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PaymentError::Storage(format!("column family {name} not found")))
    }

    fn read<T: DeserializeOwned>(&self, cf: &'static str, key: &[u8]) -> Result<Option<T>> {
        match self.db.get_cf(self.cf(cf)?, key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, cf: &'static str, key: &[u8], value: &T) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        self.db.put_cf(self.cf(cf)?, key, bytes)?;
        Ok(())
    }

    fn index(&self, username: &Username) -> Result<UserIndex> {
        Ok(self
            .read(CF_INDEXES, username.as_str().as_bytes())?
            .unwrap_or_default())
    }

    fn exists(&self, cf: &'static str, key: &[u8]) -> Result<bool> {
        Ok(self.db.get_pinned_cf(self.cf(cf)?, key)?.is_some())
    }

    fn token_index(&self, token: &Address) -> Result<Vec<PaymentId>> {
        Ok(self.read(CF_INDEXES, &token_key(token))?.unwrap_or_default())
    }

    /// Starts a write batch holding `value` under `id` and the owner's
    /// updated index.
    fn batch_with_index<T: Serialize>(
        &self,
        cf: &'static str,
        id: &PaymentId,
        value: &T,
        username: &Username,
        index: &UserIndex,
    ) -> Result<WriteBatch> {
        let mut batch = WriteBatch::default();
        batch.put_cf(self.cf(cf)?, id.as_bytes(), serde_json::to_vec(value)?);
        batch.put_cf(
            self.cf(CF_INDEXES)?,
            username.as_str().as_bytes(),
            serde_json::to_vec(index)?,
        );
        Ok(batch)
    }

    fn load_all<T: DeserializeOwned>(&self, cf: &'static str, ids: &[PaymentId]) -> Result<Vec<T>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = self.read(cf, id.as_bytes())? {
                records.push(record);
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl RegistryStore for RocksDBStore {
    async fn get(&self, username: &Username) -> Result<Option<UsernameRecord>> {
        self.read(CF_USERNAMES, username.as_str().as_bytes())
    }

    async fn store(&self, username: &Username, record: UsernameRecord) -> Result<()> {
        self.write(CF_USERNAMES, username.as_str().as_bytes(), &record)
    }

    async fn nonce(&self, controller: &Address) -> Result<u64> {
        Ok(self.read(CF_NONCES, controller.as_bytes())?.unwrap_or(0))
    }

    async fn store_nonce(&self, controller: &Address, nonce: u64) -> Result<()> {
        self.write(CF_NONCES, controller.as_bytes(), &nonce)
    }
}

#[async_trait]
impl PaymentStore for RocksDBStore {
    async fn store_stream(&self, stream: Stream) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let is_new = !self.exists(CF_STREAMS, stream.id.as_bytes())?;
        let mut index = self.index(&stream.username)?;
        index.track_stream(stream.id, is_new, stream.is_live());
        let mut on_token = self.token_index(&stream.token)?;
        track(&mut on_token, stream.id, stream.is_live());

        let mut batch =
            self.batch_with_index(CF_STREAMS, &stream.id, &stream, &stream.username, &index)?;
        batch.put_cf(
            self.cf(CF_INDEXES)?,
            token_key(&stream.token),
            serde_json::to_vec(&on_token)?,
        );
        self.db.write(batch)?;
        Ok(())
    }

    async fn get_stream(&self, id: &PaymentId) -> Result<Option<Stream>> {
        self.read(CF_STREAMS, id.as_bytes())
    }

    async fn live_streams(&self, username: &Username) -> Result<Vec<Stream>> {
        let index = self.index(username)?;
        self.load_all(CF_STREAMS, &index.streams)
    }

    async fn stream_sequence(&self, username: &Username) -> Result<u64> {
        Ok(self.index(username)?.stream_sequence)
    }

    async fn live_streams_on_token(&self, token: &Address) -> Result<usize> {
        Ok(self.token_index(token)?.len())
    }

    async fn store_schedule(&self, schedule: Schedule) -> Result<()> {
        let _guard = self.index_lock.lock().await;
        let is_new = !self.exists(CF_SCHEDULES, schedule.id.as_bytes())?;
        let mut index = self.index(&schedule.username)?;
        index.track_schedule(schedule.id, is_new, schedule.active);
        let batch = self.batch_with_index(
            CF_SCHEDULES,
            &schedule.id,
            &schedule,
            &schedule.username,
            &index,
        )?;
        self.db.write(batch)?;
        Ok(())
    }

    async fn get_schedule(&self, id: &PaymentId) -> Result<Option<Schedule>> {
        self.read(CF_SCHEDULES, id.as_bytes())
    }

    async fn live_schedules(&self, username: &Username) -> Result<Vec<Schedule>> {
        let index = self.index(username)?;
        self.load_all(CF_SCHEDULES, &index.schedules)
    }

    async fn schedule_sequence(&self, username: &Username) -> Result<u64> {
        Ok(self.index(username)?.schedule_sequence)
    }
}
