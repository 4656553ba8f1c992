use clap::Parser;
use miette::{IntoDiagnostic, Result};
use paysettle::application::engine::SettlementEngine;
use paysettle::application::payout::PayoutRequest;
use paysettle::config::Config;
use paysettle::domain::ports::{LedgerStoreRef, PayoutProviderRef};
use paysettle::error::SettlementError;
use paysettle::infrastructure::in_memory::InMemoryLedgerStore;
use paysettle::infrastructure::provider::ScriptedProvider;
use paysettle::interfaces::csv::account_writer::AccountWriter;
use paysettle::interfaces::csv::event_reader::{Event, EventReader};
use std::fs::File;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input events CSV file
    input: PathBuf,

    /// JSON configuration (locks, fees, notifications, seed accounts)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,
}

#[cfg(feature = "storage-rocksdb")]
fn open_store(db_path: Option<PathBuf>) -> Result<LedgerStoreRef> {
    use paysettle::infrastructure::rocksdb::RocksDBStore;

    match db_path {
        Some(path) => Ok(Arc::new(RocksDBStore::open(path).into_diagnostic()?)),
        None => Ok(Arc::new(InMemoryLedgerStore::new())),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_store(db_path: Option<PathBuf>) -> Result<LedgerStoreRef> {
    if db_path.is_some() {
        warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(Arc::new(InMemoryLedgerStore::new()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path).into_diagnostic()?,
        None => Config::default(),
    };

    let store = open_store(cli.db_path)?;
    let locks = config.locks.build().await.into_diagnostic()?;
    let provider = Arc::new(ScriptedProvider::new());
    let provider_ref: PayoutProviderRef = provider.clone();
    let engine = SettlementEngine::new(
        store,
        locks,
        provider_ref,
        config.notifications.build().into_diagnostic()?,
        config.provider_timeout(),
    );

    // Seed accounts; on a persistent store they survive from earlier runs.
    for seed in &config.accounts {
        match engine
            .open_account(&seed.id, seed.min_balance, seed.opening_balance)
            .await
        {
            Ok(_) => {}
            Err(SettlementError::DuplicateAccount(_)) => {
                info!(account_id = %seed.id, "account already open");
            }
            Err(e) => return Err(e).into_diagnostic(),
        }
    }

    let file = File::open(&cli.input).into_diagnostic()?;
    for event in EventReader::new(file).events() {
        let result = match event {
            Ok(Event::Payin {
                account_id,
                txn_id,
                amount,
            }) => engine
                .initiate_payin(
                    &account_id,
                    &txn_id,
                    amount,
                    config.payin_fees_for(&account_id),
                )
                .await
                .map(|_| ()),
            Ok(Event::Callback(callback)) => engine.handle_callback(callback).await.map(|_| ()),
            Ok(Event::Payout {
                account_id,
                txn_id,
                amount,
                outcome,
            }) => {
                provider.script(txn_id.clone(), outcome);
                let fees = config.payout_fees_for(&account_id).clone();
                engine
                    .request_payout(PayoutRequest {
                        account_id,
                        amount,
                        fees,
                        txn_id,
                    })
                    .await
                    .map(|_| ())
            }
            Err(e) => {
                warn!(error = %e, "Error reading event");
                continue;
            }
        };

        if let Err(e) = result {
            warn!(error = %e, "Error processing event");
        }
    }

    let accounts = engine.accounts().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = AccountWriter::new(stdout.lock());
    writer.write_accounts(accounts).into_diagnostic()?;

    Ok(())
}
