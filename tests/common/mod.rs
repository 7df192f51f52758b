#![allow(dead_code)]

use namepay::application::orchestrator::{EnginePorts, PaymentOrchestrator};
use namepay::config::EngineConfig;
use namepay::domain::address::{Address, PaymentId};
use namepay::domain::schedule::{Interval, NewSchedule, Schedule};
use namepay::domain::stream::{FlowRate, Stream};
use namepay::domain::username::Username;
use namepay::infrastructure::in_memory::{InMemoryPaymentStore, InMemoryRegistryStore};
use namepay::infrastructure::simulated::{
    KeyringVerifier, ManualClock, RoleAuthorizer, SimulatedFlowNetwork,
};
use std::fs::File;
use std::io::Error;
use std::path::Path;
use std::sync::Arc;

pub const START: u64 = 1_700_000_000;
pub const DAY: u64 = 86_400;

/// An engine wired to in-memory stores and simulated collaborators, with
/// handles on each collaborator for inspection.
pub struct Harness {
    pub engine: PaymentOrchestrator,
    pub network: Arc<SimulatedFlowNetwork>,
    pub authorizer: Arc<RoleAuthorizer>,
    pub keyring: Arc<KeyringVerifier>,
    pub clock: Arc<ManualClock>,
    pub payments: InMemoryPaymentStore,
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let network = Arc::new(SimulatedFlowNetwork::new(18));
    let authorizer = Arc::new(RoleAuthorizer::new());
    authorizer.grant(manager());
    let keyring = Arc::new(KeyringVerifier::new());
    let clock = Arc::new(ManualClock::new(START));
    let payments = InMemoryPaymentStore::new();
    let engine = PaymentOrchestrator::new(
        config,
        EnginePorts {
            registry_store: Arc::new(InMemoryRegistryStore::new()),
            payment_store: Arc::new(payments.clone()),
            ledger_directory: network.clone(),
            executor: network.clone(),
            authorizer: authorizer.clone(),
            verifier: keyring.clone(),
            clock: clock.clone(),
        },
    )
    .unwrap();
    Harness {
        engine,
        network,
        authorizer,
        keyring,
        clock,
        payments,
    }
}

pub fn addr(label: &str) -> Address {
    Address::derive(label)
}

pub fn name(raw: &str) -> Username {
    Username::parse(raw).unwrap()
}

pub fn usdc() -> Address {
    addr("usdc")
}

pub fn dai() -> Address {
    addr("dai")
}

pub fn manager() -> Address {
    addr("payments-manager")
}

pub fn rate(per_second: u128) -> FlowRate {
    FlowRate::new(per_second).unwrap()
}

impl Harness {
    /// Claims `username` with a separate controller and recipient.
    pub async fn claim(&self, username: &str, controller: &str, recipient: &str) {
        self.engine
            .claim(&addr(controller), &name(username), addr(recipient))
            .await
            .unwrap();
    }

    pub async fn stream(&self, username: &str, token: Address, per_second: u128) -> Stream {
        self.engine
            .create_stream(&manager(), &name(username), token, rate(per_second))
            .await
            .unwrap()
    }

    pub async fn schedule(
        &self,
        username: &str,
        amount: u128,
        interval: Interval,
        is_one_time: bool,
        first_payment_date: u64,
    ) -> Schedule {
        self.engine
            .create_schedule(
                &manager(),
                &name(username),
                NewSchedule {
                    token: usdc(),
                    amount,
                    interval,
                    is_one_time,
                    first_payment_date,
                },
            )
            .await
            .unwrap()
    }

    pub async fn stream_state(&self, username: &str, id: &PaymentId) -> Stream {
        self.engine.stream(&name(username), id).await.unwrap()
    }
}

/// Writes an operations file with the CLI's header.
pub fn write_operations(path: &Path, rows: &[[&str; 11]]) -> Result<(), Error> {
    let file = File::create(path)?;
    let mut wtr = csv::WriterBuilder::new().from_writer(file);

    wtr.write_record([
        "time", "caller", "op", "username", "party", "token", "amount", "interval", "one_time",
        "date", "label",
    ])?;
    for row in rows {
        wtr.write_record(row)?;
    }

    wtr.flush()?;
    Ok(())
}
