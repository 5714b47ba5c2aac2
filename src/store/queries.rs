//! Primitive Operation Set
//!
//! Single-statement data access with no orchestration. A `Queries` handle is
//! bound to one connection or one open transaction; every call on a
//! transaction-bound handle is part of that transaction.

use async_trait::async_trait;

use super::error::StoreError;
use super::models::{
    AddWalletBalanceParams, CreateEntryParams, CreateTransferParams, CreateWalletParams, Entry,
    Transfer, Wallet,
};

#[async_trait]
pub trait Queries: Send {
    async fn create_wallet(&mut self, arg: CreateWalletParams) -> Result<Wallet, StoreError>;

    async fn get_wallet(&mut self, id: i64) -> Result<Wallet, StoreError>;

    /// Atomically add `arg.amount` to the wallet balance and return the row
    ///
    /// Takes the wallet's row lock, held until the surrounding transaction
    /// ends. Callers touching two wallets must go through
    /// [`lock_order`](super::transfer::lock_order).
    async fn add_wallet_balance(
        &mut self,
        arg: AddWalletBalanceParams,
    ) -> Result<Wallet, StoreError>;

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError>;

    async fn get_entry(&mut self, id: i64) -> Result<Entry, StoreError>;

    /// Entries of a wallet, oldest first
    async fn list_entries(&mut self, wallet_id: i64) -> Result<Vec<Entry>, StoreError>;

    async fn create_transfer(&mut self, arg: CreateTransferParams)
    -> Result<Transfer, StoreError>;

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, StoreError>;

    /// Transfers where the wallet is source or destination, oldest first
    async fn list_transfers(&mut self, wallet_id: i64) -> Result<Vec<Transfer>, StoreError>;
}
