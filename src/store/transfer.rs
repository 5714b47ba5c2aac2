//! Transfer Orchestrator
//!
//! Composes the primitive operations of one funds transfer inside a single
//! transaction scope.
//!
//! # Step Order
//!
//! ```text
//! create_transfer → create_entry(from, -amount) → create_entry(to, +amount)
//!     → add_wallet_balance(min id) → add_wallet_balance(max id)
//! ```
//!
//! # Lock Order
//!
//! The balance increment takes the wallet's row lock. Both locks of a transfer
//! are always taken lower wallet id first, whatever the direction of the
//! transfer. Every transfer touching wallets A < B therefore locks A before B,
//! so two in-flight transfers can never wait on each other in a cycle.

use std::fmt;

use super::error::StoreError;
use super::models::{
    AddWalletBalanceParams, CreateEntryParams, CreateTransferParams, TransferTxParams,
    TransferTxResult,
};
use super::queries::Queries;

/// Terminal state of one transfer request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferOutcome {
    /// All steps succeeded and the transaction committed
    Committed,
    /// A step failed and the transaction rolled back
    Aborted,
}

impl TransferOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferOutcome::Committed => "COMMITTED",
            TransferOutcome::Aborted => "ABORTED",
        }
    }
}

impl fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structural checks done before a transaction is opened
///
/// Currency equality and wallet existence stay with the caller.
pub fn validate(arg: &TransferTxParams) -> Result<(), StoreError> {
    if arg.amount <= 0 {
        return Err(StoreError::InvalidAmount);
    }
    if arg.from_wallet_id == arg.to_wallet_id {
        return Err(StoreError::SameWallet);
    }
    Ok(())
}

/// Balance updates of a transfer, in the order their row locks must be taken
pub fn lock_order(arg: &TransferTxParams) -> [AddWalletBalanceParams; 2] {
    let debit = AddWalletBalanceParams {
        id: arg.from_wallet_id,
        amount: -arg.amount,
    };
    let credit = AddWalletBalanceParams {
        id: arg.to_wallet_id,
        amount: arg.amount,
    };

    if arg.from_wallet_id < arg.to_wallet_id {
        [debit, credit]
    } else {
        [credit, debit]
    }
}

/// Run the transfer steps on a transaction-bound handle
///
/// Rejects invalid params before touching `q`. The first failing step is
/// returned as is; the caller's transaction scope is responsible for rolling
/// back what the earlier steps wrote.
pub async fn transfer<Q>(q: &mut Q, arg: TransferTxParams) -> Result<TransferTxResult, StoreError>
where
    Q: Queries + ?Sized,
{
    validate(&arg)?;

    let transfer = q
        .create_transfer(CreateTransferParams {
            from_wallet_id: arg.from_wallet_id,
            to_wallet_id: arg.to_wallet_id,
            amount: arg.amount,
        })
        .await?;

    let from_entry = q
        .create_entry(CreateEntryParams {
            wallet_id: arg.from_wallet_id,
            amount: -arg.amount,
        })
        .await?;

    let to_entry = q
        .create_entry(CreateEntryParams {
            wallet_id: arg.to_wallet_id,
            amount: arg.amount,
        })
        .await?;

    let [first, second] = lock_order(&arg);
    let first_wallet = q.add_wallet_balance(first).await?;
    let second_wallet = q.add_wallet_balance(second).await?;

    let (from_wallet, to_wallet) = if first.id == arg.from_wallet_id {
        (first_wallet, second_wallet)
    } else {
        (second_wallet, first_wallet)
    };

    Ok(TransferTxResult {
        transfer,
        from_wallet,
        to_wallet,
        from_entry,
        to_entry,
    })
}

/// Emit the one log line every transfer request ends with
pub(crate) fn log_outcome(
    arg: &TransferTxParams,
    result: &Result<TransferTxResult, StoreError>,
) -> TransferOutcome {
    match result {
        Ok(res) => {
            tracing::info!(
                transfer_id = res.transfer.id,
                from_wallet_id = arg.from_wallet_id,
                to_wallet_id = arg.to_wallet_id,
                amount = arg.amount,
                outcome = %TransferOutcome::Committed,
                "Transfer committed"
            );
            TransferOutcome::Committed
        }
        Err(e) => {
            tracing::warn!(
                from_wallet_id = arg.from_wallet_id,
                to_wallet_id = arg.to_wallet_id,
                amount = arg.amount,
                outcome = %TransferOutcome::Aborted,
                code = e.code(),
                error = %e,
                "Transfer aborted"
            );
            TransferOutcome::Aborted
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::models::{CreateWalletParams, Entry, Transfer, Wallet};
    use async_trait::async_trait;
    use chrono::Utc;

    /// Queries stub that records the call sequence
    #[derive(Default)]
    struct RecordingQueries {
        calls: Vec<String>,
        fail_balance_for: Option<i64>,
        next_id: i64,
    }

    impl RecordingQueries {
        fn id(&mut self) -> i64 {
            self.next_id += 1;
            self.next_id
        }
    }

    #[async_trait]
    impl Queries for RecordingQueries {
        async fn create_wallet(&mut self, arg: CreateWalletParams) -> Result<Wallet, StoreError> {
            Ok(Wallet {
                id: self.id(),
                user_id: arg.user_id,
                balance: arg.balance,
                currency: arg.currency,
                created_at: Utc::now(),
            })
        }

        async fn get_wallet(&mut self, id: i64) -> Result<Wallet, StoreError> {
            Err(StoreError::not_found("wallet", id))
        }

        async fn add_wallet_balance(
            &mut self,
            arg: AddWalletBalanceParams,
        ) -> Result<Wallet, StoreError> {
            self.calls.push(format!("balance:{}:{}", arg.id, arg.amount));
            if self.fail_balance_for == Some(arg.id) {
                return Err(StoreError::DatabaseError("update failed".into()));
            }
            Ok(Wallet {
                id: arg.id,
                user_id: 1,
                balance: arg.amount,
                currency: "USD".to_string(),
                created_at: Utc::now(),
            })
        }

        async fn create_entry(&mut self, arg: CreateEntryParams) -> Result<Entry, StoreError> {
            self.calls.push(format!("entry:{}:{}", arg.wallet_id, arg.amount));
            Ok(Entry {
                id: self.id(),
                wallet_id: arg.wallet_id,
                amount: arg.amount,
                created_at: Utc::now(),
            })
        }

        async fn get_entry(&mut self, id: i64) -> Result<Entry, StoreError> {
            Err(StoreError::not_found("entry", id))
        }

        async fn list_entries(&mut self, _wallet_id: i64) -> Result<Vec<Entry>, StoreError> {
            Ok(Vec::new())
        }

        async fn create_transfer(
            &mut self,
            arg: CreateTransferParams,
        ) -> Result<Transfer, StoreError> {
            self.calls.push(format!(
                "transfer:{}:{}:{}",
                arg.from_wallet_id, arg.to_wallet_id, arg.amount
            ));
            Ok(Transfer {
                id: self.id(),
                from_wallet_id: arg.from_wallet_id,
                to_wallet_id: arg.to_wallet_id,
                amount: arg.amount,
                created_at: Utc::now(),
            })
        }

        async fn get_transfer(&mut self, id: i64) -> Result<Transfer, StoreError> {
            Err(StoreError::not_found("transfer", id))
        }

        async fn list_transfers(&mut self, _wallet_id: i64) -> Result<Vec<Transfer>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_lock_order_is_direction_independent() {
        let forward = lock_order(&TransferTxParams::new(3, 8, 100));
        let backward = lock_order(&TransferTxParams::new(8, 3, 100));

        assert_eq!(forward[0].id, 3);
        assert_eq!(forward[1].id, 8);
        assert_eq!(backward[0].id, 3);
        assert_eq!(backward[1].id, 8);
    }

    #[test]
    fn test_lock_order_keeps_signed_deltas() {
        let [first, second] = lock_order(&TransferTxParams::new(8, 3, 100));
        // 3 is the destination here
        assert_eq!(first.amount, 100);
        assert_eq!(second.amount, -100);
        assert_eq!(first.amount + second.amount, 0);
    }

    #[test]
    fn test_validate() {
        assert!(validate(&TransferTxParams::new(1, 2, 1)).is_ok());
        assert_eq!(
            validate(&TransferTxParams::new(1, 1, 10)),
            Err(StoreError::SameWallet)
        );
        assert_eq!(
            validate(&TransferTxParams::new(1, 2, 0)),
            Err(StoreError::InvalidAmount)
        );
        assert_eq!(
            validate(&TransferTxParams::new(1, 2, -5)),
            Err(StoreError::InvalidAmount)
        );
    }

    #[tokio::test]
    async fn test_step_sequence_higher_to_lower() {
        let mut q = RecordingQueries::default();
        let res = transfer(&mut q, TransferTxParams::new(9, 4, 250)).await.unwrap();

        assert_eq!(
            q.calls,
            vec![
                "transfer:9:4:250",
                "entry:9:-250",
                "entry:4:250",
                "balance:4:250",
                "balance:9:-250",
            ]
        );
        assert_eq!(res.from_wallet.id, 9);
        assert_eq!(res.to_wallet.id, 4);
        assert_eq!(res.from_entry.amount + res.to_entry.amount, 0);
    }

    #[tokio::test]
    async fn test_step_sequence_lower_to_higher() {
        let mut q = RecordingQueries::default();
        transfer(&mut q, TransferTxParams::new(4, 9, 250)).await.unwrap();

        assert_eq!(q.calls[3], "balance:4:-250");
        assert_eq!(q.calls[4], "balance:9:250");
    }

    #[tokio::test]
    async fn test_second_balance_update_failure_propagates() {
        let mut q = RecordingQueries {
            fail_balance_for: Some(9),
            ..Default::default()
        };

        let err = transfer(&mut q, TransferTxParams::new(4, 9, 10))
            .await
            .unwrap_err();

        assert_eq!(err, StoreError::DatabaseError("update failed".into()));
        assert_eq!(q.calls.last().unwrap(), "balance:9:10");
    }

    #[tokio::test]
    async fn test_first_failure_stops_remaining_steps() {
        let mut q = RecordingQueries {
            fail_balance_for: Some(4),
            ..Default::default()
        };

        transfer(&mut q, TransferTxParams::new(9, 4, 10))
            .await
            .unwrap_err();

        assert!(!q.calls.iter().any(|c| c.starts_with("balance:9")));
    }

    #[tokio::test]
    async fn test_invalid_params_touch_nothing() {
        let mut q = RecordingQueries::default();

        let err = transfer(&mut q, TransferTxParams::new(1, 2, i64::MIN))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::InvalidAmount);

        let err = transfer(&mut q, TransferTxParams::new(3, 3, 10))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::SameWallet);

        assert!(q.calls.is_empty());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(TransferOutcome::Committed.to_string(), "COMMITTED");
        assert_eq!(TransferOutcome::Aborted.to_string(), "ABORTED");
    }
}
