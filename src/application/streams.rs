use super::ledger::{BatchKeys, FlowLedgerAdapter};
use super::registry::IdentityRegistry;
use crate::domain::address::{Address, PaymentId};
use crate::domain::instruction::Batch;
use crate::domain::ports::{ClockRef, PaymentStoreRef};
use crate::domain::stream::{FlowRate, Stream, StreamState};
use crate::domain::username::Username;
use crate::error::{PaymentError, Result};
use std::sync::Arc;
use tracing::{debug, info};

/// Which live streams a bulk migration considers.
#[derive(Debug, Clone)]
pub enum MigrationScope {
    All,
    Token(Address),
    Selected(Vec<PaymentId>),
}

/// Lifecycle of the streams owned by each username.
///
/// Every transition builds its ledger instructions first, submits them, and
/// only then writes the new stream metadata, so a failed delegation leaves
/// the stored stream untouched.
pub struct StreamManager {
    store: PaymentStoreRef,
    registry: Arc<IdentityRegistry>,
    ledger: Arc<FlowLedgerAdapter>,
    clock: ClockRef,
    keys: Arc<BatchKeys>,
}

impl StreamManager {
    pub fn new(
        store: PaymentStoreRef,
        registry: Arc<IdentityRegistry>,
        ledger: Arc<FlowLedgerAdapter>,
        clock: ClockRef,
        keys: Arc<BatchKeys>,
    ) -> Self {
        Self {
            store,
            registry,
            ledger,
            clock,
            keys,
        }
    }

    pub async fn get(&self, username: &Username, id: &PaymentId) -> Result<Stream> {
        self.store
            .get_stream(id)
            .await?
            .filter(|stream| stream.username == *username)
            .ok_or_else(|| PaymentError::StreamNotFound(id.to_string()))
    }

    /// Active and paused streams, in creation order.
    pub async fn live(&self, username: &Username) -> Result<Vec<Stream>> {
        self.store.live_streams(username).await
    }

    /// Rejects a second active stream with the same token and rate.
    async fn ensure_distinct_intent(
        &self,
        username: &Username,
        except: Option<&PaymentId>,
        token: &Address,
        flow_rate: FlowRate,
    ) -> Result<()> {
        let live = self.live(username).await?;
        match live.iter().find(|s| {
            Some(&s.id) != except
                && s.state == StreamState::Active
                && s.token == *token
                && s.flow_rate == flow_rate
        }) {
            Some(existing) => Err(PaymentError::DuplicateStream(existing.id.to_string())),
            None => Ok(()),
        }
    }

    pub async fn create(
        &self,
        username: &Username,
        token: Address,
        flow_rate: FlowRate,
    ) -> Result<Stream> {
        if token.is_zero() {
            return Err(PaymentError::ZeroToken);
        }
        if flow_rate.is_zero() {
            return Err(PaymentError::ZeroFlowRate);
        }
        let recipient = self.registry.recipient(username).await?;
        self.ensure_distinct_intent(username, None, &token, flow_rate)
            .await?;

        let ledger = self.ledger.ensure_ledger_for(&token).await?;
        let now = self.clock.now();
        let sequence = self.store.stream_sequence(username).await?;
        let id = Stream::derive_id(username, &token, flow_rate, now, sequence);
        let funding = self
            .ledger
            .estimate_default_funding(flow_rate, &token)
            .await?;

        let mut batch = Batch::new(self.keys.next("create_stream", &id, now));
        batch.extend(self.ledger.fund(&token, &ledger, funding));
        batch.push(self.ledger.open(
            &ledger,
            recipient,
            flow_rate,
            format!("namepay:{username}"),
        ));
        self.ledger.submit(batch).await?;

        let stream = Stream {
            id,
            username: username.clone(),
            token,
            flow_rate,
            state: StreamState::Active,
            start_time: now,
            recipient_at_creation: recipient,
        };
        self.store.store_stream(stream.clone()).await?;
        info!(%username, stream = %id.short(), %token, rate = %flow_rate, funding, "stream created");
        Ok(stream)
    }

    /// Changes the rate of an active stream. Raising the rate first tops up
    /// funding by the difference between the two horizon estimates.
    pub async fn update_flow_rate(
        &self,
        username: &Username,
        id: &PaymentId,
        new_rate: FlowRate,
    ) -> Result<Stream> {
        let mut stream = self.get(username, id).await?;
        stream.check_can_update_rate(new_rate)?;
        self.ensure_distinct_intent(username, Some(id), &stream.token, new_rate)
            .await?;

        let ledger = self.ledger.ensure_ledger_for(&stream.token).await?;
        let now = self.clock.now();
        let mut batch = Batch::new(self.keys.next("update_flow_rate", id, now));
        if new_rate > stream.flow_rate {
            let old_funding = self
                .ledger
                .estimate_default_funding(stream.flow_rate, &stream.token)
                .await?;
            let new_funding = self
                .ledger
                .estimate_default_funding(new_rate, &stream.token)
                .await?;
            let top_up = new_funding.saturating_sub(old_funding);
            if top_up > 0 {
                batch.extend(self.ledger.fund(&stream.token, &ledger, top_up));
            }
        }
        let recipient = stream.recipient_at_creation;
        batch.push(
            self.ledger
                .retarget(&ledger, recipient, stream.flow_rate, recipient, new_rate),
        );
        self.ledger.submit(batch).await?;

        let old_rate = stream.flow_rate;
        stream.set_rate(new_rate);
        self.store.store_stream(stream.clone()).await?;
        info!(%username, stream = %id.short(), from = %old_rate, to = %new_rate, "flow rate updated");
        Ok(stream)
    }

    pub async fn pause(&self, username: &Username, id: &PaymentId) -> Result<Stream> {
        let mut stream = self.get(username, id).await?;
        stream.check_can_pause()?;
        let ledger = self.ledger.ensure_ledger_for(&stream.token).await?;
        let recipient = stream.recipient_at_creation;

        let mut batch = Batch::new(self.keys.next("pause_stream", id, self.clock.now()));
        batch.push(self.ledger.retarget(
            &ledger,
            recipient,
            stream.flow_rate,
            recipient,
            FlowRate::ZERO,
        ));
        self.ledger.submit(batch).await?;

        stream.pause();
        self.store.store_stream(stream.clone()).await?;
        info!(%username, stream = %id.short(), "stream paused");
        Ok(stream)
    }

    pub async fn resume(&self, username: &Username, id: &PaymentId) -> Result<Stream> {
        let mut stream = self.get(username, id).await?;
        stream.check_can_resume()?;
        self.ensure_distinct_intent(username, Some(id), &stream.token, stream.flow_rate)
            .await?;
        let ledger = self.ledger.ensure_ledger_for(&stream.token).await?;
        let recipient = stream.recipient_at_creation;

        let mut batch = Batch::new(self.keys.next("resume_stream", id, self.clock.now()));
        batch.push(self.ledger.retarget(
            &ledger,
            recipient,
            FlowRate::ZERO,
            recipient,
            stream.flow_rate,
        ));
        self.ledger.submit(batch).await?;

        stream.resume();
        self.store.store_stream(stream.clone()).await?;
        info!(%username, stream = %id.short(), rate = %stream.flow_rate, "stream resumed");
        Ok(stream)
    }

    /// Closes the ledger position. Leftover funding is swept back only when
    /// no other live stream, of any username, still draws on the same ledger.
    pub async fn cancel(&self, username: &Username, id: &PaymentId) -> Result<Stream> {
        let mut stream = self.get(username, id).await?;
        stream.check_can_cancel()?;
        let ledger = self.ledger.ensure_ledger_for(&stream.token).await?;
        let siblings = self
            .store
            .live_streams_on_token(&stream.token)
            .await?
            .saturating_sub(1);

        let mut batch = Batch::new(self.keys.next("cancel_stream", id, self.clock.now()));
        batch.push(
            self.ledger
                .close(&ledger, stream.recipient_at_creation, stream.ledger_rate()),
        );
        let swept = siblings == 0;
        if swept {
            batch.push(self.ledger.sweep_remainder(&ledger));
        }
        self.ledger.submit(batch).await?;

        stream.cancel();
        self.store.store_stream(stream.clone()).await?;
        info!(%username, stream = %id.short(), swept, "stream cancelled");
        Ok(stream)
    }

    /// Repoints one stream at the username's current recipient.
    pub async fn migrate(&self, username: &Username, id: &PaymentId) -> Result<Stream> {
        let mut stream = self.get(username, id).await?;
        stream.check_can_migrate()?;
        let current = self.registry.recipient(username).await?;
        if !stream.needs_migration(&current) {
            return Err(PaymentError::MigrationNotRequired(id.to_string()));
        }
        let ledger = self.ledger.ensure_ledger_for(&stream.token).await?;
        let rate = stream.ledger_rate();

        let mut batch = Batch::new(self.keys.next("migrate_stream", id, self.clock.now()));
        batch.push(
            self.ledger
                .retarget(&ledger, stream.recipient_at_creation, rate, current, rate),
        );
        self.ledger.submit(batch).await?;

        let previous = stream.recipient_at_creation;
        stream.migrate_to(current);
        self.store.store_stream(stream.clone()).await?;
        info!(%username, stream = %id.short(), from = %previous, to = %current, "stream migrated");
        Ok(stream)
    }

    /// Migrates every stream in `scope` that still pays a stale recipient,
    /// in one batch. Streams already up to date or cancelled are skipped.
    /// Returns the ids that moved.
    pub async fn migrate_many(
        &self,
        username: &Username,
        scope: MigrationScope,
    ) -> Result<Vec<PaymentId>> {
        let current = self.registry.recipient(username).await?;
        let candidates = match scope {
            MigrationScope::All => self.live(username).await?,
            MigrationScope::Token(token) => self
                .live(username)
                .await?
                .into_iter()
                .filter(|s| s.token == token)
                .collect(),
            MigrationScope::Selected(ids) => {
                let mut selected = Vec::with_capacity(ids.len());
                for id in &ids {
                    let stream = self.get(username, id).await?;
                    if !selected.iter().any(|s: &Stream| s.id == stream.id) {
                        selected.push(stream);
                    }
                }
                selected
            }
        };

        let mut pending = Vec::new();
        for stream in candidates {
            if stream.needs_migration(&current) {
                pending.push(stream);
            } else {
                debug!(%username, stream = %stream.id.short(), "migration not required, skipping");
            }
        }
        if pending.is_empty() {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let subject = PaymentId::digest(&[b"migrate_many", username.as_str().as_bytes()]);
        let mut batch = Batch::new(self.keys.next("migrate_streams", &subject, now));
        for stream in &pending {
            let ledger = self.ledger.ensure_ledger_for(&stream.token).await?;
            let rate = stream.ledger_rate();
            batch.push(
                self.ledger
                    .retarget(&ledger, stream.recipient_at_creation, rate, current, rate),
            );
        }
        self.ledger.submit(batch).await?;

        let mut migrated = Vec::with_capacity(pending.len());
        for mut stream in pending {
            stream.migrate_to(current);
            migrated.push(stream.id);
            self.store.store_stream(stream).await?;
        }
        info!(%username, count = migrated.len(), to = %current, "streams migrated");
        Ok(migrated)
    }
}
