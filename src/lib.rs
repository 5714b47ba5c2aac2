//! Wallet Ledger - double-entry funds transfers between wallets
//!
//! Moves money between balance-holding wallets in one database transaction,
//! keeping every transfer paired with two zero-sum entries, and never
//! deadlocking under concurrent load.
//!
//! # Modules
//!
//! - [`store`] - Data model, primitive operations, transaction scope and
//!   the transfer orchestrator (PostgreSQL and in-memory implementations)
//! - [`db`] - PostgreSQL pool and schema bootstrap
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing subscriber setup

pub mod config;
pub mod db;
pub mod logging;
pub mod store;

// Convenient re-exports at crate root
pub use store::{
    Entry, MemoryStore, PgStore, Store, StoreError, Transfer, TransferTxParams, TransferTxResult,
    Wallet,
};
