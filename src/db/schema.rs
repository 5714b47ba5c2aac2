//! Ledger schema
//!
//! `entries` and `transfers` are insert-only. The only row ever updated is a
//! wallet balance.

use anyhow::Result;
use sqlx::PgPool;

pub const CREATE_WALLETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS wallets (
    id          BIGSERIAL PRIMARY KEY,
    user_id     BIGINT NOT NULL,
    balance     BIGINT NOT NULL,
    currency    VARCHAR(8) NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const CREATE_ENTRIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS entries (
    id          BIGSERIAL PRIMARY KEY,
    wallet_id   BIGINT NOT NULL REFERENCES wallets (id),
    amount      BIGINT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const CREATE_TRANSFERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS transfers (
    id              BIGSERIAL PRIMARY KEY,
    from_wallet_id  BIGINT NOT NULL REFERENCES wallets (id),
    to_wallet_id    BIGINT NOT NULL REFERENCES wallets (id),
    amount          BIGINT NOT NULL CHECK (amount > 0),
    created_at      TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

pub const CREATE_INDEXES: [&str; 4] = [
    "CREATE INDEX IF NOT EXISTS wallets_user_id_idx ON wallets (user_id)",
    "CREATE INDEX IF NOT EXISTS entries_wallet_id_idx ON entries (wallet_id)",
    "CREATE INDEX IF NOT EXISTS transfers_from_wallet_id_idx ON transfers (from_wallet_id)",
    "CREATE INDEX IF NOT EXISTS transfers_to_wallet_id_idx ON transfers (to_wallet_id)",
];

// Arbitrary key for pg_advisory_xact_lock; serializes concurrent init_schema calls
const SCHEMA_LOCK_KEY: i64 = 0x5741_4c4c_4554;

/// Create the ledger tables if they do not exist yet
pub async fn init_schema(pool: &PgPool) -> Result<()> {
    tracing::info!("Initializing ledger schema...");

    let mut tx = pool.begin().await?;

    // CREATE TABLE IF NOT EXISTS is not safe against itself under concurrency
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    for (name, ddl) in [
        ("wallets", CREATE_WALLETS_TABLE),
        ("entries", CREATE_ENTRIES_TABLE),
        ("transfers", CREATE_TRANSFERS_TABLE),
    ] {
        sqlx::query(ddl)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create {} table: {}", name, e))?;
    }

    for ddl in CREATE_INDEXES {
        sqlx::query(ddl)
            .execute(&mut *tx)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create index: {}", e))?;
    }

    tx.commit().await?;

    tracing::info!("Ledger schema initialized successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_tables_reference_wallets() {
        assert!(CREATE_ENTRIES_TABLE.contains("REFERENCES wallets (id)"));
        assert_eq!(CREATE_TRANSFERS_TABLE.matches("REFERENCES wallets (id)").count(), 2);
    }

    #[test]
    fn test_transfer_amount_must_be_positive() {
        assert!(CREATE_TRANSFERS_TABLE.contains("CHECK (amount > 0)"));
    }
}
