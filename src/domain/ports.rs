//! Boundaries between the engine and everything it does not own.
//!
//! Stores persist engine state. The remaining traits stand in for external
//! collaborators: the per-token flow ledger directory, the atomic fund
//! executor, the authorization service, the signature primitive used by
//! delegated claims, and the clock.
use super::address::{Address, PaymentId, Timestamp};
use super::instruction::Batch;
use super::schedule::Schedule;
use super::stream::Stream;
use super::username::{Username, UsernameRecord};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[async_trait]
pub trait RegistryStore: Send + Sync {
    async fn get(&self, username: &Username) -> Result<Option<UsernameRecord>>;
    async fn store(&self, username: &Username, record: UsernameRecord) -> Result<()>;
    async fn nonce(&self, controller: &Address) -> Result<u64>;
    async fn store_nonce(&self, controller: &Address, nonce: u64) -> Result<()>;
}

/// Arena of streams and schedules keyed by id, plus a per-username index of
/// live ids and a per-username creation counter for each kind.
///
/// Storing a record whose id is new bumps the owner's counter. Storing a
/// live record keeps its id indexed; storing a terminal one drops it from
/// the index while leaving it readable by id.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn store_stream(&self, stream: Stream) -> Result<()>;
    async fn get_stream(&self, id: &PaymentId) -> Result<Option<Stream>>;
    async fn live_streams(&self, username: &Username) -> Result<Vec<Stream>>;
    async fn stream_sequence(&self, username: &Username) -> Result<u64>;
    /// Live streams of every username drawing on `token`'s ledger.
    async fn live_streams_on_token(&self, token: &Address) -> Result<usize>;

    async fn store_schedule(&self, schedule: Schedule) -> Result<()>;
    async fn get_schedule(&self, id: &PaymentId) -> Result<Option<Schedule>>;
    async fn live_schedules(&self, username: &Username) -> Result<Vec<Schedule>>;
    async fn schedule_sequence(&self, username: &Username) -> Result<u64>;
}

/// The flow ledger contract serving one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRef {
    pub ledger: Address,
    pub token_decimals: u8,
}

#[async_trait]
pub trait LedgerDirectory: Send + Sync {
    async fn resolve(&self, token: &Address) -> Result<LedgerRef>;
}

/// Executes a batch atomically: either every instruction lands or none does.
#[async_trait]
pub trait FundExecutor: Send + Sync {
    async fn execute(&self, batch: Batch) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Create, edit and cancel streams and schedules for a username.
    ManagePayments,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ManagePayments => "manage_payments",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait AuthorizationService: Send + Sync {
    async fn is_permitted(
        &self,
        principal: &Address,
        permission: Permission,
        resource: &Username,
    ) -> Result<bool>;
}

pub trait SignatureVerifier: Send + Sync {
    fn verify(&self, signer: &Address, digest: &[u8; 32], signature: &[u8]) -> bool;
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

pub type RegistryStoreRef = Arc<dyn RegistryStore>;
pub type PaymentStoreRef = Arc<dyn PaymentStore>;
pub type LedgerDirectoryRef = Arc<dyn LedgerDirectory>;
pub type FundExecutorRef = Arc<dyn FundExecutor>;
pub type AuthorizationServiceRef = Arc<dyn AuthorizationService>;
pub type SignatureVerifierRef = Arc<dyn SignatureVerifier>;
pub type ClockRef = Arc<dyn Clock>;
