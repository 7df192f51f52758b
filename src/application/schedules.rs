use super::ledger::{BatchKeys, execute};
use super::registry::IdentityRegistry;
use crate::domain::address::{Address, PaymentId};
use crate::domain::instruction::{Batch, Call, Instruction};
use crate::domain::ports::{ClockRef, FundExecutorRef, PaymentStoreRef};
use crate::domain::schedule::{Interval, NewSchedule, Schedule};
use crate::domain::username::Username;
use crate::error::{PaymentError, Result};
use std::sync::Arc;
use tracing::info;

/// Result of one schedule execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payout {
    pub schedule: PaymentId,
    pub recipient: Address,
    pub token: Address,
    pub periods: u64,
    pub amount: u128,
}

/// Lifecycle and execution of interval payments.
///
/// Schedules are not funded ahead: each execution resolves the username's
/// recipient at that moment and pays it directly.
pub struct ScheduleManager {
    store: PaymentStoreRef,
    registry: Arc<IdentityRegistry>,
    executor: FundExecutorRef,
    clock: ClockRef,
    keys: Arc<BatchKeys>,
    max_catch_up_periods: u64,
}

impl ScheduleManager {
    pub fn new(
        store: PaymentStoreRef,
        registry: Arc<IdentityRegistry>,
        executor: FundExecutorRef,
        clock: ClockRef,
        keys: Arc<BatchKeys>,
        max_catch_up_periods: u64,
    ) -> Self {
        Self {
            store,
            registry,
            executor,
            clock,
            keys,
            max_catch_up_periods,
        }
    }

    pub async fn get(&self, username: &Username, id: &PaymentId) -> Result<Schedule> {
        self.store
            .get_schedule(id)
            .await?
            .filter(|schedule| schedule.username == *username)
            .ok_or_else(|| PaymentError::ScheduleNotFound(id.to_string()))
    }

    /// Active schedules, in creation order.
    pub async fn live(&self, username: &Username) -> Result<Vec<Schedule>> {
        self.store.live_schedules(username).await
    }

    pub async fn create(&self, username: &Username, params: NewSchedule) -> Result<Schedule> {
        let now = self.clock.now();
        let sequence = self.store.schedule_sequence(username).await?;
        let schedule = Schedule::create(username.clone(), params, now, sequence)?;
        // Resolved for its error only: schedules never snapshot a recipient.
        self.registry.record(username).await?;

        self.store.store_schedule(schedule.clone()).await?;
        info!(
            %username,
            schedule = %schedule.id.short(),
            amount = schedule.amount,
            interval = schedule.interval.as_str(),
            one_time = schedule.is_one_time,
            first = schedule.first_payment_date,
            "schedule created"
        );
        Ok(schedule)
    }

    /// Pays every interval elapsed since `next_payout`, up to the configured
    /// cap, to whoever the username points at right now.
    pub async fn execute(&self, username: &Username, id: &PaymentId) -> Result<Payout> {
        let mut schedule = self.get(username, id).await?;
        let now = self.clock.now();
        let due = schedule.catch_up(now, self.max_catch_up_periods)?;
        let recipient = self.registry.recipient(username).await?;
        // Only persisted once the transfer lands.
        schedule.settle(due.periods)?;

        let mut batch = Batch::new(self.keys.next("execute_schedule", id, now));
        batch.push(Instruction::call(
            schedule.token,
            Call::Transfer {
                to: recipient,
                amount: due.total,
            },
        ));
        execute(&self.executor, batch).await?;

        self.store.store_schedule(schedule.clone()).await?;
        info!(
            %username,
            schedule = %id.short(),
            %recipient,
            periods = due.periods,
            amount = due.total,
            next_payout = schedule.next_payout,
            active = schedule.active,
            "schedule executed"
        );
        Ok(Payout {
            schedule: schedule.id,
            recipient,
            token: schedule.token,
            periods: due.periods,
            amount: due.total,
        })
    }

    pub async fn update_amount(
        &self,
        username: &Username,
        id: &PaymentId,
        amount: u128,
    ) -> Result<Schedule> {
        let mut schedule = self.get(username, id).await?;
        schedule.set_amount(amount)?;
        self.store.store_schedule(schedule.clone()).await?;
        info!(%username, schedule = %id.short(), amount, "schedule amount updated");
        Ok(schedule)
    }

    pub async fn update_interval(
        &self,
        username: &Username,
        id: &PaymentId,
        interval: Interval,
    ) -> Result<Schedule> {
        let mut schedule = self.get(username, id).await?;
        schedule.set_interval(interval)?;
        self.store.store_schedule(schedule.clone()).await?;
        info!(%username, schedule = %id.short(), interval = interval.as_str(), "schedule interval updated");
        Ok(schedule)
    }

    /// Deactivates immediately. The partially elapsed interval is not paid.
    pub async fn cancel(&self, username: &Username, id: &PaymentId) -> Result<Schedule> {
        let mut schedule = self.get(username, id).await?;
        schedule.cancel()?;
        self.store.store_schedule(schedule.clone()).await?;
        info!(%username, schedule = %id.short(), "schedule cancelled");
        Ok(schedule)
    }
}
