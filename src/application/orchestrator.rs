use super::guard::ReentrancyGuard;
use super::ledger::{BatchKeys, FlowLedgerAdapter};
use super::registry::IdentityRegistry;
use super::schedules::{Payout, ScheduleManager};
use super::streams::{MigrationScope, StreamManager};
use super::views::{ActivePayments, MigrationPreview, TokenOutflow};
use crate::config::EngineConfig;
use crate::domain::address::{Address, PaymentId, Timestamp};
use crate::domain::ports::{
    AuthorizationServiceRef, ClockRef, FundExecutorRef, LedgerDirectoryRef, PaymentStoreRef,
    Permission, RegistryStoreRef, SignatureVerifierRef,
};
use crate::domain::schedule::{Interval, NewSchedule, Schedule};
use crate::domain::stream::{FlowRate, Stream, StreamState};
use crate::domain::username::{Username, UsernameRecord};
use crate::error::{PaymentError, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Everything the engine talks to.
pub struct EnginePorts {
    pub registry_store: RegistryStoreRef,
    pub payment_store: PaymentStoreRef,
    pub ledger_directory: LedgerDirectoryRef,
    pub executor: FundExecutorRef,
    pub authorizer: AuthorizationServiceRef,
    pub verifier: SignatureVerifierRef,
    pub clock: ClockRef,
}

/// The main entry point for username payments.
///
/// `PaymentOrchestrator` routes each call through the right authorization
/// check, enforces per-user capacity, and delegates to the registry and the
/// two payment managers. Mutations run one at a time; a nested call made
/// while another mutation is in flight fails with
/// [`PaymentError::Reentrancy`].
///
/// Authorization:
/// - payment managers (per the authorization service) create and edit
///   streams and schedules;
/// - the username's controller mutates its registry entry and migrates its
///   streams;
/// - schedule amount and interval edits accept either;
/// - schedule execution and all reads are public.
pub struct PaymentOrchestrator {
    config: EngineConfig,
    registry: Arc<IdentityRegistry>,
    ledger: Arc<FlowLedgerAdapter>,
    streams: StreamManager,
    schedules: ScheduleManager,
    authorizer: AuthorizationServiceRef,
    guard: ReentrancyGuard,
}

impl PaymentOrchestrator {
    pub fn new(config: EngineConfig, ports: EnginePorts) -> Result<Self> {
        config.validate()?;
        let registry = Arc::new(IdentityRegistry::new(
            ports.registry_store,
            ports.verifier,
            ports.clock.clone(),
            &config.registry_domain,
        ));
        let ledger = Arc::new(FlowLedgerAdapter::new(
            ports.ledger_directory,
            ports.executor.clone(),
            config.ledger_decimals,
            config.funding_horizon_secs,
        ));
        let keys = Arc::new(BatchKeys::new());
        let streams = StreamManager::new(
            ports.payment_store.clone(),
            registry.clone(),
            ledger.clone(),
            ports.clock.clone(),
            keys.clone(),
        );
        let schedules = ScheduleManager::new(
            ports.payment_store,
            registry.clone(),
            ports.executor,
            ports.clock,
            keys,
            config.max_catch_up_periods,
        );
        Ok(Self {
            config,
            registry,
            ledger,
            streams,
            schedules,
            authorizer: ports.authorizer,
            guard: ReentrancyGuard::new(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    // ---- registry ----

    pub async fn claim(&self, caller: &Address, username: &Username, recipient: Address) -> Result<()> {
        let _entered = self.guard.enter()?;
        self.registry.claim(caller, username, recipient).await
    }

    pub async fn claim_for(
        &self,
        caller: &Address,
        username: &Username,
        recipient: Address,
        controller: Address,
    ) -> Result<()> {
        let _entered = self.guard.enter()?;
        self.registry
            .claim_for(caller, username, recipient, controller)
            .await
    }

    pub async fn claim_with_authorization(
        &self,
        username: &Username,
        recipient: Address,
        controller: Address,
        deadline: Timestamp,
        signature: &[u8],
    ) -> Result<()> {
        let _entered = self.guard.enter()?;
        self.registry
            .claim_with_authorization(username, recipient, controller, deadline, signature)
            .await
    }

    /// Repoints future schedule payouts immediately. Existing streams keep
    /// paying the old recipient until migrated.
    pub async fn update_recipient(
        &self,
        caller: &Address,
        username: &Username,
        new_recipient: Address,
    ) -> Result<()> {
        let _entered = self.guard.enter()?;
        self.registry
            .update_recipient(caller, username, new_recipient)
            .await
    }

    pub async fn transfer_control(
        &self,
        caller: &Address,
        username: &Username,
        new_controller: Address,
    ) -> Result<()> {
        let _entered = self.guard.enter()?;
        self.registry
            .transfer_control(caller, username, new_controller)
            .await
    }

    pub async fn record(&self, username: &Username) -> Result<UsernameRecord> {
        self.registry.record(username).await
    }

    pub async fn controller_of(&self, username: &Username) -> Result<Address> {
        self.registry.controller(username).await
    }

    pub async fn recipient_of(&self, username: &Username) -> Result<Address> {
        self.registry.recipient(username).await
    }

    pub async fn last_update_of(&self, username: &Username) -> Result<Timestamp> {
        self.registry.last_update(username).await
    }

    pub async fn is_available(&self, username: &Username) -> Result<bool> {
        self.registry.is_available(username).await
    }

    // ---- streams ----

    pub async fn create_stream(
        &self,
        caller: &Address,
        username: &Username,
        token: Address,
        flow_rate: FlowRate,
    ) -> Result<Stream> {
        let _entered = self.guard.enter()?;
        self.require_manager(caller, username).await?;
        let live = self.streams.live(username).await?.len();
        if live >= self.config.max_streams_per_user {
            return Err(PaymentError::CapacityExceeded {
                username: username.to_string(),
                kind: "stream",
                limit: self.config.max_streams_per_user,
            });
        }
        self.streams.create(username, token, flow_rate).await
    }

    pub async fn update_flow_rate(
        &self,
        caller: &Address,
        username: &Username,
        id: &PaymentId,
        new_rate: FlowRate,
    ) -> Result<Stream> {
        let _entered = self.guard.enter()?;
        self.require_manager(caller, username).await?;
        self.streams.update_flow_rate(username, id, new_rate).await
    }

    pub async fn pause_stream(
        &self,
        caller: &Address,
        username: &Username,
        id: &PaymentId,
    ) -> Result<Stream> {
        let _entered = self.guard.enter()?;
        self.require_manager(caller, username).await?;
        self.streams.pause(username, id).await
    }

    pub async fn resume_stream(
        &self,
        caller: &Address,
        username: &Username,
        id: &PaymentId,
    ) -> Result<Stream> {
        let _entered = self.guard.enter()?;
        self.require_manager(caller, username).await?;
        self.streams.resume(username, id).await
    }

    pub async fn cancel_stream(
        &self,
        caller: &Address,
        username: &Username,
        id: &PaymentId,
    ) -> Result<Stream> {
        let _entered = self.guard.enter()?;
        self.require_manager(caller, username).await?;
        self.streams.cancel(username, id).await
    }

    pub async fn migrate_stream(
        &self,
        caller: &Address,
        username: &Username,
        id: &PaymentId,
    ) -> Result<Stream> {
        let _entered = self.guard.enter()?;
        self.registry.ensure_controller(caller, username).await?;
        self.streams.migrate(username, id).await
    }

    pub async fn migrate_all_streams(
        &self,
        caller: &Address,
        username: &Username,
    ) -> Result<Vec<PaymentId>> {
        self.migrate_scope(caller, username, MigrationScope::All)
            .await
    }

    pub async fn migrate_streams_for_token(
        &self,
        caller: &Address,
        username: &Username,
        token: Address,
    ) -> Result<Vec<PaymentId>> {
        self.migrate_scope(caller, username, MigrationScope::Token(token))
            .await
    }

    pub async fn migrate_selected_streams(
        &self,
        caller: &Address,
        username: &Username,
        ids: Vec<PaymentId>,
    ) -> Result<Vec<PaymentId>> {
        self.migrate_scope(caller, username, MigrationScope::Selected(ids))
            .await
    }

    async fn migrate_scope(
        &self,
        caller: &Address,
        username: &Username,
        scope: MigrationScope,
    ) -> Result<Vec<PaymentId>> {
        let _entered = self.guard.enter()?;
        self.registry.ensure_controller(caller, username).await?;
        self.streams.migrate_many(username, scope).await
    }

    pub async fn stream(&self, username: &Username, id: &PaymentId) -> Result<Stream> {
        self.streams.get(username, id).await
    }

    pub async fn streams_of(&self, username: &Username) -> Result<Vec<Stream>> {
        self.streams.live(username).await
    }

    /// Native token amount a new stream at `rate` would be funded with.
    pub async fn estimate_funding(&self, token: &Address, rate: FlowRate) -> Result<u128> {
        self.ledger.estimate_default_funding(rate, token).await
    }

    // ---- schedules ----

    pub async fn create_schedule(
        &self,
        caller: &Address,
        username: &Username,
        params: NewSchedule,
    ) -> Result<Schedule> {
        let _entered = self.guard.enter()?;
        self.require_manager(caller, username).await?;
        let live = self.schedules.live(username).await?.len();
        if live >= self.config.max_schedules_per_user {
            return Err(PaymentError::CapacityExceeded {
                username: username.to_string(),
                kind: "schedule",
                limit: self.config.max_schedules_per_user,
            });
        }
        self.schedules.create(username, params).await
    }

    /// Open to anyone: keepers call this once a payout is due.
    pub async fn execute_schedule(&self, username: &Username, id: &PaymentId) -> Result<Payout> {
        let _entered = self.guard.enter()?;
        self.schedules.execute(username, id).await
    }

    pub async fn update_schedule_amount(
        &self,
        caller: &Address,
        username: &Username,
        id: &PaymentId,
        amount: u128,
    ) -> Result<Schedule> {
        let _entered = self.guard.enter()?;
        self.require_controller_or_manager(caller, username).await?;
        self.schedules.update_amount(username, id, amount).await
    }

    pub async fn update_schedule_interval(
        &self,
        caller: &Address,
        username: &Username,
        id: &PaymentId,
        interval: Interval,
    ) -> Result<Schedule> {
        let _entered = self.guard.enter()?;
        self.require_controller_or_manager(caller, username).await?;
        self.schedules.update_interval(username, id, interval).await
    }

    pub async fn cancel_schedule(
        &self,
        caller: &Address,
        username: &Username,
        id: &PaymentId,
    ) -> Result<Schedule> {
        let _entered = self.guard.enter()?;
        self.require_manager(caller, username).await?;
        self.schedules.cancel(username, id).await
    }

    pub async fn schedule(&self, username: &Username, id: &PaymentId) -> Result<Schedule> {
        self.schedules.get(username, id).await
    }

    pub async fn schedules_of(&self, username: &Username) -> Result<Vec<Schedule>> {
        self.schedules.live(username).await
    }

    // ---- views ----

    pub async fn active_payments(&self, username: &Username) -> Result<ActivePayments> {
        let recipient = self.registry.recipient(username).await?;
        let streams = self.streams.live(username).await?;
        let schedules = self.schedules.live(username).await?;

        let mut outflows: BTreeMap<Address, TokenOutflow> = BTreeMap::new();
        let overflow = || PaymentError::ArithmeticOverflow("outflow summary");
        for stream in streams.iter().filter(|s| s.state == StreamState::Active) {
            let entry = outflows
                .entry(stream.token)
                .or_insert_with(|| empty_outflow(stream.token));
            entry.active_streams += 1;
            entry.flow_rate = entry
                .flow_rate
                .checked_add(stream.flow_rate)
                .ok_or_else(overflow)?;
        }
        for schedule in &schedules {
            let entry = outflows
                .entry(schedule.token)
                .or_insert_with(|| empty_outflow(schedule.token));
            entry.active_schedules += 1;
            entry.scheduled_per_period = entry
                .scheduled_per_period
                .checked_add(schedule.amount)
                .ok_or_else(overflow)?;
        }
        let mut outflows: Vec<TokenOutflow> = outflows.into_values().collect();
        for outflow in &mut outflows {
            outflow.tokens_per_second = self.ledger.rate_in_tokens(outflow.flow_rate);
        }

        Ok(ActivePayments {
            username: username.clone(),
            recipient,
            streams,
            schedules,
            outflows,
        })
    }

    pub async fn migration_preview(&self, username: &Username) -> Result<MigrationPreview> {
        let current_recipient = self.registry.recipient(username).await?;
        let streams: Vec<PaymentId> = self
            .streams
            .live(username)
            .await?
            .into_iter()
            .filter(|s| s.needs_migration(&current_recipient))
            .map(|s| s.id)
            .collect();
        let schedules: Vec<PaymentId> = self
            .schedules
            .live(username)
            .await?
            .into_iter()
            .map(|s| s.id)
            .collect();
        let estimated_instructions = streams.len();
        Ok(MigrationPreview {
            username: username.clone(),
            current_recipient,
            streams,
            schedules,
            estimated_instructions,
            estimated_cost: (estimated_instructions as u64)
                .saturating_mul(self.config.retarget_cost_units),
        })
    }

    // ---- authorization ----

    async fn require_manager(&self, caller: &Address, username: &Username) -> Result<()> {
        let permission = Permission::ManagePayments;
        if self
            .authorizer
            .is_permitted(caller, permission, username)
            .await?
        {
            return Ok(());
        }
        debug!(%caller, %username, %permission, "authorization denied");
        Err(PaymentError::Unauthorized {
            caller: caller.to_string(),
            permission: permission.as_str(),
            resource: username.to_string(),
        })
    }

    async fn require_controller_or_manager(
        &self,
        caller: &Address,
        username: &Username,
    ) -> Result<()> {
        if self.registry.controller(username).await? == *caller {
            return Ok(());
        }
        self.require_manager(caller, username).await
    }
}

fn empty_outflow(token: Address) -> TokenOutflow {
    TokenOutflow {
        token,
        active_streams: 0,
        flow_rate: FlowRate::ZERO,
        tokens_per_second: Default::default(),
        active_schedules: 0,
        scheduled_per_period: 0,
    }
}
