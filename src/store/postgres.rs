//! PostgreSQL Store
//!
//! `PgQueries` runs the primitive statements on anything that derefs to a
//! `PgConnection`: a pooled connection for one-off calls, or an open
//! transaction inside `exec_tx`.
//!
//! Row locks come from the `UPDATE ... RETURNING` balance increment and are
//! held by Postgres until the transaction ends.

use std::ops::DerefMut;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool};
use sqlx::{Postgres, Transaction};

use super::error::StoreError;
use super::models::{
    AddWalletBalanceParams, CreateEntryParams, CreateTransferParams, CreateWalletParams, Entry,
    Transfer, TransferTxParams, TransferTxResult, Wallet,
};
use super::queries::Queries;
use super::{Store, transfer};
use crate::db::Database;

/// Open Postgres transaction owned by a `PgQueries` handle
pub type PgTx = Transaction<'static, Postgres>;

const CREATE_WALLET: &str = r#"
    INSERT INTO wallets (user_id, balance, currency)
    VALUES ($1, $2, $3)
    RETURNING id, user_id, balance, currency, created_at
"#;

const GET_WALLET: &str = r#"
    SELECT id, user_id, balance, currency, created_at
    FROM wallets
    WHERE id = $1
"#;

const ADD_WALLET_BALANCE: &str = r#"
    UPDATE wallets
    SET balance = balance + $1
    WHERE id = $2
    RETURNING id, user_id, balance, currency, created_at
"#;

const CREATE_ENTRY: &str = r#"
    INSERT INTO entries (wallet_id, amount)
    VALUES ($1, $2)
    RETURNING id, wallet_id, amount, created_at
"#;

const GET_ENTRY: &str = r#"
    SELECT id, wallet_id, amount, created_at
    FROM entries
    WHERE id = $1
"#;

const LIST_ENTRIES: &str = r#"
    SELECT id, wallet_id, amount, created_at
    FROM entries
    WHERE wallet_id = $1
    ORDER BY id
"#;

const CREATE_TRANSFER: &str = r#"
    INSERT INTO transfers (from_wallet_id, to_wallet_id, amount)
    VALUES ($1, $2, $3)
    RETURNING id, from_wallet_id, to_wallet_id, amount, created_at
"#;

const GET_TRANSFER: &str = r#"
    SELECT id, from_wallet_id, to_wallet_id, amount, created_at
    FROM transfers
    WHERE id = $1
"#;

const LIST_TRANSFERS: &str = r#"
    SELECT id, from_wallet_id, to_wallet_id, amount, created_at
    FROM transfers
    WHERE from_wallet_id = $1 OR to_wallet_id = $1
    ORDER BY id
"#;

/// Primitive operations over one Postgres connection
pub struct PgQueries<C> {
    conn: C,
}

impl<C> PgQueries<C> {
    pub fn new(conn: C) -> Self {
        Self { conn }
    }

    pub fn into_inner(self) -> C {
        self.conn
    }
}

impl PgQueries<PgTx> {
    pub async fn commit(self) -> Result<(), StoreError> {
        self.conn.commit().await?;
        Ok(())
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.conn.rollback().await?;
        Ok(())
    }
}

#[async_trait]
impl<C> Queries for PgQueries<C>
where
    C: DerefMut<Target = PgConnection> + Send,
{
    async fn create_wallet(&mut self, arg: CreateWalletParams) -> Result<Wallet, StoreError> {
        let wallet = sqlx::query_as::<_, Wallet>(CREATE_WALLET)
            .bind(arg.user_id)
            .bind(arg.balance)
            .bind(&arg.currency)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(wallet)
    }

    async fn get_wallet(&mut self, id: i64) -> Result<Wallet, StoreError> {
        sqlx::query_as::<_, Wallet>(GET_WALLET)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| StoreError::not_found("wallet", id))
    }

    async fn add_wallet_balance(
        &mut self,
        arg: AddWalletBalanceParams,
    ) -> Result<Wallet, StoreError> {
        sqlx::query_as::<_, Wallet>(ADD_WALLET_BALANCE)
            .bind(arg.amount)
            .bind(arg.id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| StoreError::not_found("wallet", arg.id))
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        let entry = sqlx::query_as::<_, Entry>(CREATE_ENTRY)
            .bind(arg.wallet_id)
            .bind(arg.amount)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, StoreError> {
        sqlx::query_as::<_, Entry>(GET_ENTRY)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| StoreError::not_found("entry", id))
    }

    async fn list_entries(&mut self, wallet_id: i64) -> Result<Vec<Entry>, StoreError> {
        let entries = sqlx::query_as::<_, Entry>(LIST_ENTRIES)
            .bind(wallet_id)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(entries)
    }

    async fn create_transfer(
        &mut self,
        arg: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        let transfer = sqlx::query_as::<_, Transfer>(CREATE_TRANSFER)
            .bind(arg.from_wallet_id)
            .bind(arg.to_wallet_id)
            .bind(arg.amount)
            .fetch_one(&mut *self.conn)
            .await?;
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, StoreError> {
        sqlx::query_as::<_, Transfer>(GET_TRANSFER)
            .bind(id)
            .fetch_optional(&mut *self.conn)
            .await?
            .ok_or_else(|| StoreError::not_found("transfer", id))
    }

    async fn list_transfers(&mut self, wallet_id: i64) -> Result<Vec<Transfer>, StoreError> {
        let transfers = sqlx::query_as::<_, Transfer>(LIST_TRANSFERS)
            .bind(wallet_id)
            .fetch_all(&mut *self.conn)
            .await?;
        Ok(transfers)
    }
}

/// Store backed by a PostgreSQL connection pool
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    tx_timeout: Option<Duration>,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tx_timeout: None,
        }
    }

    pub fn from_database(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }

    /// Deadline for each unit of work; `None` waits indefinitely
    pub fn with_tx_timeout(mut self, tx_timeout: Option<Duration>) -> Self {
        self.tx_timeout = tx_timeout;
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Open a transaction-bound handle. Dropping it uncommitted rolls back.
    ///
    /// With a deadline set, the server is told to cancel any statement or
    /// lock wait that outlives it, so an abandoned unit of work never keeps
    /// the connection busy past the deadline.
    pub async fn begin(&self) -> Result<PgQueries<PgTx>, StoreError> {
        let mut tx = self.pool.begin().await?;
        if let Some(limit) = self.tx_timeout {
            let ms = limit.as_millis().max(1);
            sqlx::query(&format!("SET LOCAL lock_timeout = {ms}"))
                .execute(&mut *tx)
                .await?;
            sqlx::query(&format!("SET LOCAL statement_timeout = {ms}"))
                .execute(&mut *tx)
                .await?;
        }
        Ok(PgQueries::new(tx))
    }

    async fn conn(&self) -> Result<PgQueries<PoolConnection<Postgres>>, StoreError> {
        Ok(PgQueries::new(self.pool.acquire().await?))
    }

    /// Run `f` inside one transaction
    ///
    /// Commits when `f` succeeds. Otherwise rolls back and returns the error
    /// of `f`, wrapped together with the rollback error if that fails too.
    /// On panic or when this future is dropped, the transaction handle is
    /// dropped uncommitted and sqlx rolls it back.
    pub async fn exec_tx<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'q> FnOnce(&'q mut PgQueries<PgTx>) -> BoxFuture<'q, Result<T, StoreError>>
            + Send,
    {
        let mut q = self.begin().await?;

        // The client-side timer fires first; the rollback below then waits
        // at most for the server-side cancel set up in `begin`.
        let outcome = match self.tx_timeout {
            Some(limit) => tokio::time::timeout(limit, f(&mut q))
                .await
                .unwrap_or_else(|_| Err(StoreError::Timeout(limit)))
                .map_err(|e| e.at_deadline(limit)),
            None => f(&mut q).await,
        };

        match outcome {
            Ok(value) => {
                q.commit().await?;
                Ok(value)
            }
            Err(cause) => match q.rollback().await {
                Ok(()) => Err(cause),
                Err(rollback) => {
                    tracing::error!(
                        cause = %cause,
                        rollback = %rollback,
                        "Rollback failed after aborted unit of work"
                    );
                    Err(StoreError::rollback_failed(cause, rollback))
                }
            },
        }
    }
}

#[async_trait]
impl Store for PgStore {
    async fn create_wallet(&self, arg: CreateWalletParams) -> Result<Wallet, StoreError> {
        self.conn().await?.create_wallet(arg).await
    }

    async fn get_wallet(&self, id: i64) -> Result<Wallet, StoreError> {
        self.conn().await?.get_wallet(id).await
    }

    async fn add_wallet_balance(&self, arg: AddWalletBalanceParams) -> Result<Wallet, StoreError> {
        self.conn().await?.add_wallet_balance(arg).await
    }

    async fn create_entry(&self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        self.conn().await?.create_entry(arg).await
    }

    async fn get_entry(&self, id: i64) -> Result<Entry, StoreError> {
        self.conn().await?.get_entry(id).await
    }

    async fn list_entries(&self, wallet_id: i64) -> Result<Vec<Entry>, StoreError> {
        self.conn().await?.list_entries(wallet_id).await
    }

    async fn create_transfer(&self, arg: CreateTransferParams) -> Result<Transfer, StoreError> {
        self.conn().await?.create_transfer(arg).await
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer, StoreError> {
        self.conn().await?.get_transfer(id).await
    }

    async fn list_transfers(&self, wallet_id: i64) -> Result<Vec<Transfer>, StoreError> {
        self.conn().await?.list_transfers(wallet_id).await
    }

    async fn transfer_tx(&self, arg: TransferTxParams) -> Result<TransferTxResult, StoreError> {
        let result = match transfer::validate(&arg) {
            Ok(()) => {
                self.exec_tx(move |q| transfer::transfer(q, arg).boxed())
                    .await
            }
            Err(e) => Err(e),
        };
        transfer::log_outcome(&arg, &result);
        result
    }
}
