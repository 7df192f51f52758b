use crate::domain::address::{Address, PaymentId};
use crate::domain::schedule::Schedule;
use crate::domain::stream::{FlowRate, Stream};
use crate::domain::username::Username;
use rust_decimal::Decimal;
use serde::Serialize;

/// Aggregate outflow of one token for a username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TokenOutflow {
    pub token: Address,
    pub active_streams: usize,
    /// Sum of active stream rates, in ledger precision.
    pub flow_rate: FlowRate,
    /// The same sum in whole tokens per second, `None` when it does not fit
    /// a `Decimal`.
    pub tokens_per_second: Option<Decimal>,
    pub active_schedules: usize,
    /// Sum of one period's amount across active schedules.
    pub scheduled_per_period: u128,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivePayments {
    pub username: Username,
    pub recipient: Address,
    /// Active and paused streams.
    pub streams: Vec<Stream>,
    pub schedules: Vec<Schedule>,
    pub outflows: Vec<TokenOutflow>,
}

/// What `migrate_all_streams` would do right now.
///
/// Active schedules are always listed even though they resolve their
/// recipient at execution and never need migrating.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationPreview {
    pub username: Username,
    pub current_recipient: Address,
    pub streams: Vec<PaymentId>,
    pub schedules: Vec<PaymentId>,
    pub estimated_instructions: usize,
    pub estimated_cost: u64,
}

impl MigrationPreview {
    pub fn is_required(&self) -> bool {
        !self.streams.is_empty()
    }
}
