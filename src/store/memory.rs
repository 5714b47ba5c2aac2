//! In-Memory Store
//!
//! Same contract as [`PgStore`](super::PgStore) without a database:
//!
//! - committed rows live in shared tables behind a `std::sync::Mutex`
//! - each wallet has a `tokio::sync::Mutex` row lock, taken by
//!   `add_wallet_balance` and held until the transaction commits or rolls back
//! - a [`MemoryTx`] stages its writes and publishes them on commit only
//!
//! Ids come from sequences that are not rolled back, like Postgres `BIGSERIAL`.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt};
use tokio::sync::OwnedMutexGuard;

use super::error::StoreError;
use super::models::{
    AddWalletBalanceParams, CreateEntryParams, CreateTransferParams, CreateWalletParams, Entry,
    Transfer, TransferTxParams, TransferTxResult, Wallet,
};
use super::queries::Queries;
use super::{Store, transfer};

#[derive(Default)]
struct Tables {
    wallets: BTreeMap<i64, Wallet>,
    entries: BTreeMap<i64, Entry>,
    transfers: BTreeMap<i64, Transfer>,
}

#[derive(Default)]
struct Faults {
    balance_update: HashSet<i64>,
    rollback: bool,
}

struct Shared {
    tables: Mutex<Tables>,
    row_locks: DashMap<i64, Arc<tokio::sync::Mutex<()>>>,
    wallet_seq: AtomicI64,
    entry_seq: AtomicI64,
    transfer_seq: AtomicI64,
    faults: Mutex<Faults>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn row_lock(&self, wallet_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        self.row_locks.entry(wallet_id).or_default().clone()
    }
}

/// In-process store with row-lock semantics
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
    tx_timeout: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                tables: Mutex::new(Tables::default()),
                row_locks: DashMap::new(),
                wallet_seq: AtomicI64::new(1),
                entry_seq: AtomicI64::new(1),
                transfer_seq: AtomicI64::new(1),
                faults: Mutex::new(Faults::default()),
            }),
            tx_timeout: None,
        }
    }

    /// Deadline for each unit of work; `None` waits indefinitely
    pub fn with_tx_timeout(mut self, tx_timeout: Option<Duration>) -> Self {
        self.tx_timeout = tx_timeout;
        self
    }

    /// Make every balance increment on `wallet_id` fail
    pub fn set_fail_balance_update(&self, wallet_id: i64, fail: bool) {
        let mut faults = guard(&self.shared.faults);
        if fail {
            faults.balance_update.insert(wallet_id);
        } else {
            faults.balance_update.remove(&wallet_id);
        }
    }

    /// Make every rollback report a failure (staged writes are still dropped)
    pub fn set_fail_rollback(&self, fail: bool) {
        guard(&self.shared.faults).rollback = fail;
    }

    /// Open a transaction. Dropping it uncommitted rolls back.
    pub fn begin(&self) -> MemoryTx {
        MemoryTx {
            shared: Arc::clone(&self.shared),
            locks: HashMap::new(),
            wallets: BTreeMap::new(),
            deltas: BTreeMap::new(),
            entries: Vec::new(),
            transfers: Vec::new(),
        }
    }

    /// Run `f` inside one transaction
    ///
    /// Commits when `f` succeeds. Otherwise rolls back and returns the error
    /// of `f`, wrapped together with the rollback error if that fails too.
    /// On panic or when this future is dropped, the `MemoryTx` is dropped
    /// with its staged writes and row locks.
    pub async fn exec_tx<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send,
        F: for<'q> FnOnce(&'q mut MemoryTx) -> BoxFuture<'q, Result<T, StoreError>> + Send,
    {
        let mut q = self.begin();

        let outcome = match self.tx_timeout {
            Some(limit) => tokio::time::timeout(limit, f(&mut q))
                .await
                .unwrap_or_else(|_| Err(StoreError::Timeout(limit))),
            None => f(&mut q).await,
        };

        match outcome {
            Ok(value) => {
                q.commit()?;
                Ok(value)
            }
            Err(cause) => match q.rollback() {
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

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Open transaction on a [`MemoryStore`]
pub struct MemoryTx {
    shared: Arc<Shared>,
    /// Row locks held until commit/rollback
    locks: HashMap<i64, OwnedMutexGuard<()>>,
    /// Wallets created by this transaction
    wallets: BTreeMap<i64, Wallet>,
    /// Pending balance deltas per wallet
    deltas: BTreeMap<i64, i64>,
    entries: Vec<Entry>,
    transfers: Vec<Transfer>,
}

impl MemoryTx {
    /// Publish staged writes and release row locks
    pub fn commit(self) -> Result<(), StoreError> {
        let MemoryTx {
            shared,
            locks,
            wallets,
            deltas,
            entries,
            transfers,
        } = self;

        {
            let mut tables = guard(&shared.tables);

            // Validate every balance before touching the tables
            let mut balances = Vec::with_capacity(deltas.len());
            for (id, delta) in &deltas {
                let base = wallets
                    .get(id)
                    .or_else(|| tables.wallets.get(id))
                    .map(|w| w.balance)
                    .ok_or_else(|| StoreError::not_found("wallet", *id))?;
                let balance = base.checked_add(*delta).ok_or_else(|| {
                    StoreError::ConstraintViolation(format!("balance out of range for wallet {id}"))
                })?;
                balances.push((*id, balance));
            }

            tables.wallets.extend(wallets);
            for (id, balance) in balances {
                if let Some(wallet) = tables.wallets.get_mut(&id) {
                    wallet.balance = balance;
                }
            }
            for entry in entries {
                tables.entries.insert(entry.id, entry);
            }
            for transfer in transfers {
                tables.transfers.insert(transfer.id, transfer);
            }
        }

        drop(locks);
        Ok(())
    }

    /// Discard staged writes and release row locks
    pub fn rollback(self) -> Result<(), StoreError> {
        let fail = guard(&self.shared.faults).rollback;
        drop(self);
        if fail {
            return Err(StoreError::DatabaseError(
                "injected rollback failure".to_string(),
            ));
        }
        Ok(())
    }

    fn wallet_exists(&self, id: i64) -> bool {
        self.wallets.contains_key(&id) || guard(&self.shared.tables).wallets.contains_key(&id)
    }

    fn balance_update_fails(&self, id: i64) -> bool {
        guard(&self.shared.faults).balance_update.contains(&id)
    }

    /// Wallet as seen by this transaction, without its pending delta
    fn base_wallet(&self, id: i64) -> Option<Wallet> {
        match self.wallets.get(&id) {
            Some(w) => Some(w.clone()),
            None => guard(&self.shared.tables).wallets.get(&id).cloned(),
        }
    }
}

#[async_trait]
impl Queries for MemoryTx {
    async fn create_wallet(&mut self, arg: CreateWalletParams) -> Result<Wallet, StoreError> {
        let wallet = Wallet {
            id: self.shared.wallet_seq.fetch_add(1, Ordering::SeqCst),
            user_id: arg.user_id,
            balance: arg.balance,
            currency: arg.currency,
            created_at: Utc::now(),
        };
        self.wallets.insert(wallet.id, wallet.clone());
        Ok(wallet)
    }

    async fn get_wallet(&mut self, id: i64) -> Result<Wallet, StoreError> {
        let mut wallet = self
            .base_wallet(id)
            .ok_or_else(|| StoreError::not_found("wallet", id))?;
        wallet.balance += self.deltas.get(&id).copied().unwrap_or(0);
        Ok(wallet)
    }

    async fn add_wallet_balance(
        &mut self,
        arg: AddWalletBalanceParams,
    ) -> Result<Wallet, StoreError> {
        if !self.wallet_exists(arg.id) {
            return Err(StoreError::not_found("wallet", arg.id));
        }
        if self.balance_update_fails(arg.id) {
            return Err(StoreError::DatabaseError(format!(
                "injected balance update failure for wallet {}",
                arg.id
            )));
        }

        // Rows created by this transaction are invisible to others; no lock.
        if !self.wallets.contains_key(&arg.id) && !self.locks.contains_key(&arg.id) {
            let lock = self.shared.row_lock(arg.id);
            let held = lock.lock_owned().await;
            self.locks.insert(arg.id, held);
        }

        // Re-read after the lock: earlier holders may have committed.
        let mut wallet = self
            .base_wallet(arg.id)
            .ok_or_else(|| StoreError::not_found("wallet", arg.id))?;
        let pending = self.deltas.get(&arg.id).copied().unwrap_or(0);
        let delta = pending.checked_add(arg.amount);
        let balance = delta.and_then(|d| wallet.balance.checked_add(d));
        let (Some(delta), Some(balance)) = (delta, balance) else {
            return Err(StoreError::ConstraintViolation(format!(
                "balance out of range for wallet {}",
                arg.id
            )));
        };

        self.deltas.insert(arg.id, delta);
        wallet.balance = balance;
        Ok(wallet)
    }

    async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        if !self.wallet_exists(arg.wallet_id) {
            return Err(StoreError::ConstraintViolation(format!(
                "entries.wallet_id references missing wallet {}",
                arg.wallet_id
            )));
        }
        let entry = Entry {
            id: self.shared.entry_seq.fetch_add(1, Ordering::SeqCst),
            wallet_id: arg.wallet_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.entries.push(entry.clone());
        Ok(entry)
    }

    async fn get_entry(&mut self, id: i64) -> Result<Entry, StoreError> {
        if let Some(entry) = self.entries.iter().find(|e| e.id == id) {
            return Ok(entry.clone());
        }
        guard(&self.shared.tables)
            .entries
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("entry", id))
    }

    async fn list_entries(&mut self, wallet_id: i64) -> Result<Vec<Entry>, StoreError> {
        let mut entries: Vec<Entry> = guard(&self.shared.tables)
            .entries
            .values()
            .filter(|e| e.wallet_id == wallet_id)
            .cloned()
            .collect();
        entries.extend(
            self.entries
                .iter()
                .filter(|e| e.wallet_id == wallet_id)
                .cloned(),
        );
        entries.sort_by_key(|e| e.id);
        Ok(entries)
    }

    async fn create_transfer(
        &mut self,
        arg: CreateTransferParams,
    ) -> Result<Transfer, StoreError> {
        for id in [arg.from_wallet_id, arg.to_wallet_id] {
            if !self.wallet_exists(id) {
                return Err(StoreError::ConstraintViolation(format!(
                    "transfers references missing wallet {id}"
                )));
            }
        }
        if arg.amount <= 0 {
            return Err(StoreError::ConstraintViolation(
                "transfers.amount must be positive".to_string(),
            ));
        }
        let transfer = Transfer {
            id: self.shared.transfer_seq.fetch_add(1, Ordering::SeqCst),
            from_wallet_id: arg.from_wallet_id,
            to_wallet_id: arg.to_wallet_id,
            amount: arg.amount,
            created_at: Utc::now(),
        };
        self.transfers.push(transfer.clone());
        Ok(transfer)
    }

    async fn get_transfer(&mut self, id: i64) -> Result<Transfer, StoreError> {
        if let Some(transfer) = self.transfers.iter().find(|t| t.id == id) {
            return Ok(transfer.clone());
        }
        guard(&self.shared.tables)
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("transfer", id))
    }

    async fn list_transfers(&mut self, wallet_id: i64) -> Result<Vec<Transfer>, StoreError> {
        let touches = |t: &&Transfer| t.from_wallet_id == wallet_id || t.to_wallet_id == wallet_id;
        let mut transfers: Vec<Transfer> = guard(&self.shared.tables)
            .transfers
            .values()
            .filter(touches)
            .cloned()
            .collect();
        transfers.extend(self.transfers.iter().filter(touches).cloned());
        transfers.sort_by_key(|t| t.id);
        Ok(transfers)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_wallet(&self, arg: CreateWalletParams) -> Result<Wallet, StoreError> {
        self.exec_tx(move |q| q.create_wallet(arg)).await
    }

    async fn get_wallet(&self, id: i64) -> Result<Wallet, StoreError> {
        self.exec_tx(move |q| q.get_wallet(id)).await
    }

    async fn add_wallet_balance(&self, arg: AddWalletBalanceParams) -> Result<Wallet, StoreError> {
        self.exec_tx(move |q| q.add_wallet_balance(arg)).await
    }

    async fn create_entry(&self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
        self.exec_tx(move |q| q.create_entry(arg)).await
    }

    async fn get_entry(&self, id: i64) -> Result<Entry, StoreError> {
        self.exec_tx(move |q| q.get_entry(id)).await
    }

    async fn list_entries(&self, wallet_id: i64) -> Result<Vec<Entry>, StoreError> {
        self.exec_tx(move |q| q.list_entries(wallet_id)).await
    }

    async fn create_transfer(&self, arg: CreateTransferParams) -> Result<Transfer, StoreError> {
        self.exec_tx(move |q| q.create_transfer(arg)).await
    }

    async fn get_transfer(&self, id: i64) -> Result<Transfer, StoreError> {
        self.exec_tx(move |q| q.get_transfer(id)).await
    }

    async fn list_transfers(&self, wallet_id: i64) -> Result<Vec<Transfer>, StoreError> {
        self.exec_tx(move |q| q.list_transfers(wallet_id)).await
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
