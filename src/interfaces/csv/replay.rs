use super::operation_reader::{Operation, OperationKind};
use super::payment_writer::PaymentRow;
use crate::application::orchestrator::PaymentOrchestrator;
use crate::domain::address::PaymentId;
use crate::domain::schedule::NewSchedule;
use crate::domain::stream::FlowRate;
use crate::domain::username::Username;
use crate::error::{PaymentError, Result};
use crate::infrastructure::simulated::ManualClock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PaymentKind {
    Stream,
    Schedule,
}

#[derive(Debug, Clone)]
struct Created {
    label: String,
    username: Username,
    id: PaymentId,
    kind: PaymentKind,
}

/// Drives an engine from operation rows, advancing a manual clock to each
/// row's time and remembering the labels given to created payments.
pub struct Replay {
    engine: PaymentOrchestrator,
    clock: Arc<ManualClock>,
    created: Vec<Created>,
    labels: HashMap<String, usize>,
}

impl Replay {
    pub fn new(engine: PaymentOrchestrator, clock: Arc<ManualClock>) -> Self {
        Self {
            engine,
            clock,
            created: Vec::new(),
            labels: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &PaymentOrchestrator {
        &self.engine
    }

    pub async fn apply(&mut self, op: &Operation) -> Result<()> {
        self.clock.set(op.time);
        let caller = op.caller()?;
        let username = Username::parse(&op.username)?;
        let engine = &self.engine;

        match op.op {
            OperationKind::Claim => engine.claim(&caller, &username, op.party()?).await?,
            OperationKind::UpdateRecipient => {
                engine
                    .update_recipient(&caller, &username, op.party()?)
                    .await?
            }
            OperationKind::TransferControl => {
                engine
                    .transfer_control(&caller, &username, op.party()?)
                    .await?
            }
            OperationKind::CreateStream => {
                let rate = FlowRate::new(op.amount()?)?;
                let stream = engine
                    .create_stream(&caller, &username, op.token()?, rate)
                    .await?;
                self.remember(op, username, stream.id, PaymentKind::Stream);
            }
            OperationKind::UpdateFlowRate => {
                let id = self.lookup(op, &username, PaymentKind::Stream)?;
                let rate = FlowRate::new(op.amount()?)?;
                engine.update_flow_rate(&caller, &username, &id, rate).await?;
            }
            OperationKind::PauseStream => {
                let id = self.lookup(op, &username, PaymentKind::Stream)?;
                engine.pause_stream(&caller, &username, &id).await?;
            }
            OperationKind::ResumeStream => {
                let id = self.lookup(op, &username, PaymentKind::Stream)?;
                engine.resume_stream(&caller, &username, &id).await?;
            }
            OperationKind::CancelStream => {
                let id = self.lookup(op, &username, PaymentKind::Stream)?;
                engine.cancel_stream(&caller, &username, &id).await?;
            }
            OperationKind::MigrateStream => {
                let id = self.lookup(op, &username, PaymentKind::Stream)?;
                engine.migrate_stream(&caller, &username, &id).await?;
            }
            OperationKind::MigrateAllStreams => {
                engine.migrate_all_streams(&caller, &username).await?;
            }
            OperationKind::MigrateStreamsForToken => {
                engine
                    .migrate_streams_for_token(&caller, &username, op.token()?)
                    .await?;
            }
            OperationKind::CreateSchedule => {
                let params = NewSchedule {
                    token: op.token()?,
                    amount: op.amount()?,
                    interval: op.interval()?,
                    is_one_time: op.one_time.unwrap_or(false),
                    first_payment_date: op.date()?,
                };
                let schedule = engine.create_schedule(&caller, &username, params).await?;
                self.remember(op, username, schedule.id, PaymentKind::Schedule);
            }
            OperationKind::ExecuteSchedule => {
                let id = self.lookup(op, &username, PaymentKind::Schedule)?;
                engine.execute_schedule(&username, &id).await?;
            }
            OperationKind::UpdateScheduleAmount => {
                let id = self.lookup(op, &username, PaymentKind::Schedule)?;
                engine
                    .update_schedule_amount(&caller, &username, &id, op.amount()?)
                    .await?;
            }
            OperationKind::UpdateScheduleInterval => {
                let id = self.lookup(op, &username, PaymentKind::Schedule)?;
                engine
                    .update_schedule_interval(&caller, &username, &id, op.interval()?)
                    .await?;
            }
            OperationKind::CancelSchedule => {
                let id = self.lookup(op, &username, PaymentKind::Schedule)?;
                engine.cancel_schedule(&caller, &username, &id).await?;
            }
        }
        Ok(())
    }

    /// Every payment created so far, in creation order, with its current state.
    pub async fn payment_book(&self) -> Result<Vec<PaymentRow>> {
        let mut rows = Vec::with_capacity(self.created.len());
        for created in &self.created {
            let row = match created.kind {
                PaymentKind::Stream => {
                    let stream = self.engine.stream(&created.username, &created.id).await?;
                    PaymentRow {
                        username: created.username.to_string(),
                        label: created.label.clone(),
                        kind: "stream",
                        id: stream.id.to_string(),
                        token: stream.token.to_string(),
                        state: stream.state.as_str(),
                        amount: stream.flow_rate.value(),
                        interval: None,
                        recipient: stream.recipient_at_creation.to_string(),
                        next_payout: None,
                    }
                }
                PaymentKind::Schedule => {
                    let schedule = self.engine.schedule(&created.username, &created.id).await?;
                    let recipient = self.engine.recipient_of(&created.username).await?;
                    PaymentRow {
                        username: created.username.to_string(),
                        label: created.label.clone(),
                        kind: "schedule",
                        id: schedule.id.to_string(),
                        token: schedule.token.to_string(),
                        state: if schedule.active { "active" } else { "inactive" },
                        amount: schedule.amount,
                        interval: Some(schedule.interval.as_str()),
                        recipient: recipient.to_string(),
                        next_payout: Some(schedule.next_payout),
                    }
                }
            };
            rows.push(row);
        }
        Ok(rows)
    }

    fn remember(&mut self, op: &Operation, username: Username, id: PaymentId, kind: PaymentKind) {
        let label = op
            .label
            .clone()
            .unwrap_or_else(|| format!("{}-{}", username, self.created.len() + 1));
        info!(%label, payment = %id.short(), "payment labelled");
        self.labels.insert(label.clone(), self.created.len());
        self.created.push(Created {
            label,
            username,
            id,
            kind,
        });
    }

    fn lookup(&self, op: &Operation, username: &Username, kind: PaymentKind) -> Result<PaymentId> {
        let label = op.label()?;
        self.labels
            .get(label)
            .map(|index| &self.created[*index])
            .filter(|created| created.kind == kind && created.username == *username)
            .map(|created| created.id)
            .ok_or_else(|| PaymentError::Config(format!("no {kind:?} labelled {label:?} for {username}")))
    }
}
