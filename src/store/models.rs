//! Ledger row types and primitive operation parameters
//!
//! Amounts and balances are signed minor currency units (cents for USD).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Balance-holding account in a single currency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: i64,
    pub user_id: i64,
    pub balance: i64,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

/// One signed ledger line against a wallet. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Entry {
    pub id: i64,
    pub wallet_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Audit record of a completed money movement. Append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Transfer {
    pub id: i64,
    pub from_wallet_id: i64,
    pub to_wallet_id: i64,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateWalletParams {
    pub user_id: i64,
    pub balance: i64,
    pub currency: String,
}

/// Signed delta applied to a wallet balance in a single statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddWalletBalanceParams {
    pub id: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateEntryParams {
    pub wallet_id: i64,
    pub amount: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateTransferParams {
    pub from_wallet_id: i64,
    pub to_wallet_id: i64,
    pub amount: i64,
}

/// Input of [`Store::transfer_tx`](super::Store::transfer_tx)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxParams {
    pub from_wallet_id: i64,
    pub to_wallet_id: i64,
    pub amount: i64,
}

impl TransferTxParams {
    pub fn new(from_wallet_id: i64, to_wallet_id: i64, amount: i64) -> Self {
        Self {
            from_wallet_id,
            to_wallet_id,
            amount,
        }
    }
}

/// Everything a committed transfer produced
///
/// `from_wallet` and `to_wallet` are the rows as returned by the balance
/// increment inside this transaction. Under concurrent load they may already
/// include transfers that committed earlier on the same wallets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTxResult {
    pub transfer: Transfer,
    pub from_wallet: Wallet,
    pub to_wallet: Wallet,
    pub from_entry: Entry,
    pub to_entry: Entry,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_result_json_field_names() {
        let now = Utc::now();
        let wallet = |id, balance| Wallet {
            id,
            user_id: 7,
            balance,
            currency: "USD".to_string(),
            created_at: now,
        };
        let result = TransferTxResult {
            transfer: Transfer {
                id: 1,
                from_wallet_id: 1,
                to_wallet_id: 2,
                amount: 300,
                created_at: now,
            },
            from_wallet: wallet(1, 700),
            to_wallet: wallet(2, 800),
            from_entry: Entry {
                id: 1,
                wallet_id: 1,
                amount: -300,
                created_at: now,
            },
            to_entry: Entry {
                id: 2,
                wallet_id: 2,
                amount: 300,
                created_at: now,
            },
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["transfer"]["from_wallet_id"], 1);
        assert_eq!(json["from_entry"]["amount"], -300);
        assert_eq!(json["to_wallet"]["balance"], 800);
    }
}
