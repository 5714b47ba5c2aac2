//! wallet_ledger - operator tool for the wallet ledger
//!
//! ```text
//! wallet_ledger [--env dev] --init-schema
//! wallet_ledger [--env dev] --open-wallet <user_id> <currency> <balance>
//! wallet_ledger [--env dev] --wallet <id>
//! wallet_ledger [--env dev] --transfer <from_wallet_id> <to_wallet_id> <amount>
//! ```
//!
//! Amounts are minor currency units. Results are printed as JSON.

use anyhow::{Context, Result};
use serde::Serialize;

use wallet_ledger::config::AppConfig;
use wallet_ledger::db::{Database, schema};
use wallet_ledger::logging::init_logging;
use wallet_ledger::store::{CreateWalletParams, PgStore, Store, TransferTxParams};

// ============================================================
// ARGUMENTS
// ============================================================

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|a| a == flag)
}

/// The `n` values following `flag`, if the flag is present with all of them
fn flag_values(flag: &str, n: usize) -> Option<Vec<String>> {
    let args: Vec<String> = std::env::args().collect();
    let pos = args.iter().position(|a| a == flag)?;
    let values = args.get(pos + 1..pos + 1 + n)?;
    Some(values.to_vec())
}

fn parse_i64(value: &str, name: &str) -> Result<i64> {
    value
        .parse()
        .with_context(|| format!("Invalid {}: {}", name, value))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ============================================================
// MAIN
// ============================================================

#[tokio::main]
async fn main() -> Result<()> {
    let env = get_env();
    let app_config = AppConfig::load(&env)?;
    let _log_guard = init_logging(&app_config);

    tracing::info!("Starting wallet_ledger in {} mode", env);

    let url = app_config
        .postgres_url
        .as_deref()
        .context("postgres_url is not configured (set it in the config or DATABASE_URL)")?;
    let db = Database::connect(url, &app_config.database).await?;
    db.health_check().await?;

    if has_flag("--init-schema") {
        schema::init_schema(db.pool()).await?;
    }

    let store = PgStore::from_database(&db).with_tx_timeout(app_config.transfer.tx_timeout());

    if let Some(v) = flag_values("--open-wallet", 3) {
        let wallet = store
            .create_wallet(CreateWalletParams {
                user_id: parse_i64(&v[0], "user_id")?,
                currency: v[1].clone(),
                balance: parse_i64(&v[2], "balance")?,
            })
            .await?;
        tracing::info!(wallet_id = wallet.id, "Wallet opened");
        print_json(&wallet)?;
    }

    if let Some(v) = flag_values("--wallet", 1) {
        let wallet = store.get_wallet(parse_i64(&v[0], "wallet id")?).await?;
        print_json(&wallet)?;
    }

    if let Some(v) = flag_values("--transfer", 3) {
        let arg = TransferTxParams::new(
            parse_i64(&v[0], "from_wallet_id")?,
            parse_i64(&v[1], "to_wallet_id")?,
            parse_i64(&v[2], "amount")?,
        );
        let result = store.transfer_tx(arg).await?;
        print_json(&result)?;
    }

    Ok(())
}
