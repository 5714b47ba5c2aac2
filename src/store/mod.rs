//! Wallet Ledger Store
//!
//! Double-entry funds transfers between wallets.
//!
//! # Layers
//!
//! - [`Queries`]: primitive single-statement operations bound to one
//!   connection or transaction
//! - `exec_tx` on each store: runs a unit of work on a transaction-bound
//!   `Queries` handle, committing on success and rolling back on failure
//! - [`transfer::transfer`]: the transfer steps and their lock order
//!
//! # Implementations
//!
//! - [`PgStore`]: PostgreSQL, row locks taken by `UPDATE ... RETURNING`
//! - [`MemoryStore`]: in-process tables with per-wallet row locks, for tests
//!   and embedding
//!
//! Both are handed to callers as `Arc<dyn Store>` or a generic `S: Store`.

pub mod error;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod queries;
pub mod transfer;


pub use error::StoreError;
pub use memory::{MemoryStore, MemoryTx};
pub use models::{
    AddWalletBalanceParams, CreateEntryParams, CreateTransferParams, CreateWalletParams, Entry,
    Transfer, TransferTxParams, TransferTxResult, Wallet,
};
pub use postgres::{PgQueries, PgStore};
pub use queries::Queries;
pub use transfer::{TransferOutcome, lock_order};

use async_trait::async_trait;

/// Capability set of a ledger store
///
/// The primitive operations run in their own implicit transaction.
/// `transfer_tx` runs all of its steps in one.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create_wallet(&self, arg: CreateWalletParams) -> Result<Wallet, StoreError>;

    async fn get_wallet(&self, id: i64) -> Result<Wallet, StoreError>;

    async fn add_wallet_balance(&self, arg: AddWalletBalanceParams) -> Result<Wallet, StoreError>;

    async fn create_entry(&self, arg: CreateEntryParams) -> Result<Entry, StoreError>;

    async fn get_entry(&self, id: i64) -> Result<Entry, StoreError>;

    async fn list_entries(&self, wallet_id: i64) -> Result<Vec<Entry>, StoreError>;

    async fn create_transfer(&self, arg: CreateTransferParams) -> Result<Transfer, StoreError>;

    async fn get_transfer(&self, id: i64) -> Result<Transfer, StoreError>;

    async fn list_transfers(&self, wallet_id: i64) -> Result<Vec<Transfer>, StoreError>;

    /// Move `arg.amount` from one wallet to another atomically
    ///
    /// Creates one Transfer row and two Entry rows and updates both balances,
    /// or changes nothing. Both wallets must exist and share a currency;
    /// that is checked by the caller.
    async fn transfer_tx(&self, arg: TransferTxParams) -> Result<TransferTxResult, StoreError>;
}
