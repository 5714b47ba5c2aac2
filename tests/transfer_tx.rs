//! Public API tests: a caller holding `Arc<dyn Store>` and composing its own
//! units of work on the in-memory store.

use std::sync::Arc;

use futures::FutureExt;
use wallet_ledger::store::{
    CreateEntryParams, CreateWalletParams, MemoryStore, Queries, Store, StoreError,
    TransferTxParams, lock_order,
};

async fn open(store: &dyn Store, user_id: i64, balance: i64) -> i64 {
    store
        .create_wallet(CreateWalletParams {
            user_id,
            balance,
            currency: "EUR".to_string(),
        })
        .await
        .unwrap()
        .id
}

// ============================================================================
// Injected store
// ============================================================================

#[tokio::test]
async fn transfer_through_injected_store() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let alice = open(store.as_ref(), 1, 1000).await;
    let bob = open(store.as_ref(), 2, 500).await;

    let res = store
        .transfer_tx(TransferTxParams::new(alice, bob, 300))
        .await
        .unwrap();

    assert_eq!(res.from_wallet.balance, 700);
    assert_eq!(res.to_wallet.balance, 800);
    assert_eq!(res.from_entry.amount + res.to_entry.amount, 0);

    let json = serde_json::to_value(&res).unwrap();
    assert_eq!(json["transfer"]["amount"], 300);
    assert_eq!(json["from_entry"]["amount"], -300);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn ledger_stays_balanced_under_mixed_load() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let wallets = [
        open(store.as_ref(), 1, 5000).await,
        open(store.as_ref(), 2, 5000).await,
        open(store.as_ref(), 3, 5000).await,
    ];

    let mut handles = Vec::new();
    for i in 0..30usize {
        let store = Arc::clone(&store);
        let from = wallets[i % 3];
        let to = wallets[(i + 1 + i / 3 % 2) % 3];
        handles.push(tokio::spawn(async move {
            store
                .transfer_tx(TransferTxParams::new(from, to, 10 + i as i64))
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let mut total = 0;
    for id in wallets {
        let wallet = store.get_wallet(id).await.unwrap();
        let entries: i64 = store
            .list_entries(id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.amount)
            .sum();
        assert_eq!(wallet.balance, 5000 + entries);
        total += wallet.balance;
    }
    assert_eq!(total, 15_000);
}

#[tokio::test]
async fn rejected_transfers_report_codes() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let a = open(store.as_ref(), 1, 100).await;

    let err = store
        .transfer_tx(TransferTxParams::new(a, a, 10))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "SAME_WALLET");

    let err = store
        .transfer_tx(TransferTxParams::new(a, 999, 10))
        .await
        .unwrap_err();
    // the transfer row references the missing wallet first
    assert_eq!(err.code(), "CONSTRAINT_VIOLATION");
    assert!(store.list_transfers(a).await.unwrap().is_empty());
    assert_eq!(store.get_wallet(a).await.unwrap().balance, 100);
}

#[test]
fn lock_order_is_by_wallet_id() {
    let [first, second] = lock_order(&TransferTxParams::new(9, 4, 50));
    assert_eq!((first.id, first.amount), (4, 50));
    assert_eq!((second.id, second.amount), (9, -50));
}

// ============================================================================
// Custom units of work
// ============================================================================

#[tokio::test]
async fn custom_unit_of_work_commits() {
    let store = MemoryStore::new();

    let (wallet, entry) = store
        .exec_tx(|q| {
            async move {
                let wallet = q
                    .create_wallet(CreateWalletParams {
                        user_id: 7,
                        balance: 0,
                        currency: "EUR".to_string(),
                    })
                    .await?;
                let entry = q
                    .create_entry(CreateEntryParams {
                        wallet_id: wallet.id,
                        amount: 25,
                    })
                    .await?;
                Ok::<_, StoreError>((wallet, entry))
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(store.get_wallet(wallet.id).await.unwrap(), wallet);
    assert_eq!(store.get_entry(entry.id).await.unwrap(), entry);
}

#[tokio::test]
async fn failed_unit_of_work_leaves_nothing() {
    let store = MemoryStore::new();

    let err = store
        .exec_tx(|q| {
            async move {
                let wallet = q
                    .create_wallet(CreateWalletParams {
                        user_id: 7,
                        balance: 0,
                        currency: "EUR".to_string(),
                    })
                    .await?;
                // unknown wallet: rejected by the foreign key
                q.create_entry(CreateEntryParams {
                    wallet_id: wallet.id + 100,
                    amount: 25,
                })
                .await?;
                Ok::<_, StoreError>(wallet)
            }
            .boxed()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ConstraintViolation(_)));

    // the first id was consumed but never committed
    assert!(matches!(
        store.get_wallet(1).await,
        Err(StoreError::NotFound { .. })
    ));
}
