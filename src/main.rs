use clap::Parser;
use miette::{IntoDiagnostic, Result};
use namepay::application::orchestrator::{EnginePorts, PaymentOrchestrator};
use namepay::config::EngineConfig;
use namepay::domain::ports::{PaymentStoreRef, RegistryStoreRef};
use namepay::infrastructure::in_memory::{InMemoryPaymentStore, InMemoryRegistryStore};
use namepay::infrastructure::simulated::{
    KeyringVerifier, ManualClock, RoleAuthorizer, SimulatedFlowNetwork,
};
use namepay::interfaces::csv::operation_reader::{OperationReader, resolve_address};
use namepay::interfaces::csv::payment_writer::PaymentWriter;
use namepay::interfaces::csv::replay::Replay;
use namepay::observability::init_tracing;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations CSV file
    input: PathBuf,

    /// Engine configuration JSON (optional). Missing keys keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). Requires the `storage-rocksdb` feature.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Principal granted `manage_payments` on every username. Repeatable.
    #[arg(long = "manager")]
    managers: Vec<String>,

    /// Decimals reported for every token by the simulated ledger directory.
    #[arg(long, default_value_t = 18)]
    token_decimals: u8,
}

#[cfg(feature = "storage-rocksdb")]
fn open_stores(db_path: Option<&Path>) -> Result<(RegistryStoreRef, PaymentStoreRef)> {
    use namepay::infrastructure::rocksdb::RocksDBStore;

    if let Some(path) = db_path {
        let store = RocksDBStore::open(path).into_diagnostic()?;
        tracing::info!(path = %path.display(), "using rocksdb storage");
        return Ok((Arc::new(store.clone()), Arc::new(store)));
    }
    Ok(in_memory_stores())
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_stores(db_path: Option<&Path>) -> Result<(RegistryStoreRef, PaymentStoreRef)> {
    if let Some(path) = db_path {
        warn!(
            path = %path.display(),
            "built without the storage-rocksdb feature, falling back to in-memory storage"
        );
    }
    Ok(in_memory_stores())
}

fn in_memory_stores() -> (RegistryStoreRef, PaymentStoreRef) {
    (
        Arc::new(InMemoryRegistryStore::new()),
        Arc::new(InMemoryPaymentStore::new()),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path).into_diagnostic()?,
        None => EngineConfig::default(),
    };
    let (registry_store, payment_store) = open_stores(cli.db_path.as_deref())?;

    let authorizer = Arc::new(RoleAuthorizer::new());
    for manager in &cli.managers {
        authorizer.grant(resolve_address(manager).into_diagnostic()?);
    }
    let network = Arc::new(SimulatedFlowNetwork::new(cli.token_decimals));
    let clock = Arc::new(ManualClock::new(0));
    let engine = PaymentOrchestrator::new(
        config,
        EnginePorts {
            registry_store,
            payment_store,
            ledger_directory: network.clone(),
            executor: network,
            authorizer,
            verifier: Arc::new(KeyringVerifier::new()),
            clock: clock.clone(),
        },
    )
    .into_diagnostic()?;
    let mut replay = Replay::new(engine, clock);

    // Process operations
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = OperationReader::new(file);
    for (row, op_result) in reader.operations().enumerate() {
        let row = row + 1;
        match op_result {
            Ok(op) => {
                if let Err(e) = replay.apply(&op).await {
                    warn!(row, op = %op.op, error = %e, "operation rejected");
                }
            }
            Err(e) => {
                warn!(row, error = %e, "error reading operation");
            }
        }
    }

    // Output final state
    let book = replay.payment_book().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_rows(book).into_diagnostic()?;

    Ok(())
}
