//! Ledger - atomic funds transfers
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │  Config  │───▶│ Precheck │───▶│  Engine  │───▶│  Output  │
//! │  (YAML)  │    │ (lookup) │    │  (unit)  │    │  (JSON)  │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```
//!
//! Usage:
//!
//! ```text
//! ledger [--env dev] transfer --from 1 --to 2 --amount 30 --currency EUR
//! ledger [--env dev] account --id 1
//! ```

use std::sync::Arc;

use anyhow::{Context, bail};
use atomic_ledger::config::AppConfig;
use atomic_ledger::db::Database;
use atomic_ledger::ledger::{
    AccountLookup, LedgerQueries, LedgerTx, MemoryLedger, PgLedgerStore, TransferEngine,
    TransferRequest, TxBegin, TxCoordinator, check_transfer,
};
use atomic_ledger::ledger::models::CreateAccountParams;

fn get_env() -> String {
    get_arg(&["--env", "-e"]).unwrap_or_else(|| "dev".to_string())
}

fn get_arg(names: &[&str]) -> Option<String> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if names.contains(&args[i].as_str()) && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }
    None
}

fn get_i64(name: &str) -> anyhow::Result<i64> {
    let raw = get_arg(&[name]).with_context(|| format!("missing {}", name))?;
    raw.parse()
        .with_context(|| format!("{} must be an integer, got {:?}", name, raw))
}

fn get_command() -> Option<String> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    first_positional(&args).map(str::to_string)
}

/// First argument that is neither a flag nor a flag's value.
/// Every flag of this binary takes exactly one value.
fn first_positional(args: &[String]) -> Option<&str> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg.starts_with('-') {
            iter.next();
        } else {
            return Some(arg.as_str());
        }
    }
    None
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let config = AppConfig::load(&env)?;
    let _log_guard = atomic_ledger::logging::init_logging(&config)?;

    tracing::info!(env = %env, "Starting ledger");

    match &config.postgres_url {
        Some(url) => {
            let db = Database::connect(url, &config.database).await?;
            db.health_check().await?;
            let store = Arc::new(PgLedgerStore::new(db.pool().clone()));
            run(store, &config).await
        }
        None => {
            tracing::warn!("No postgres_url configured - using in-memory store");
            let store = Arc::new(MemoryLedger::with_lock_timeout(
                config.ledger.lock_timeout(),
            ));
            seed(store.as_ref(), &config).await?;
            run(store, &config).await
        }
    }
}

async fn seed(store: &MemoryLedger, config: &AppConfig) -> anyhow::Result<()> {
    let mut tx = store.begin().await?;
    for seed in &config.ledger.seed_accounts {
        let account = tx
            .create_account(CreateAccountParams {
                owner: seed.owner.clone(),
                balance: seed.balance,
                currency: seed.currency.clone(),
            })
            .await?;
        tracing::info!(account_id = account.id, owner = %account.owner, "Seeded account");
    }
    tx.commit().await?;
    Ok(())
}

async fn run<S>(store: Arc<S>, config: &AppConfig) -> anyhow::Result<()>
where
    S: TxBegin + AccountLookup + 'static,
{
    match get_command().as_deref() {
        Some("transfer") => {
            let req = TransferRequest {
                from_account_id: get_i64("--from")?,
                to_account_id: get_i64("--to")?,
                amount: get_i64("--amount")?,
                currency: get_arg(&["--currency"]).context("missing --currency")?,
            };
            check_transfer(store.as_ref(), &req).await?;

            let coordinator = TxCoordinator::new(store).with_deadline(config.ledger.tx_timeout());
            let engine = TransferEngine::new(coordinator);
            let result = engine.transfer(req.params()).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        Some("account") => {
            let account = store.get_account(get_i64("--id")?).await?;
            println!("{}", serde_json::to_string_pretty(&account)?);
        }
        _ => bail!("usage: ledger [--env <env>] (transfer --from <id> --to <id> --amount <n> --currency <code> | account --id <id>)"),
    }
    Ok(())
}
