//! Reconciliation engine scenarios against the in-memory store.

use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;

use kinledger_core::balance::{BalanceReconciler, ReconcileTarget};
use kinledger_core::persistence::{Collection, PersistenceService};
use kinledger_store_memory::MemoryStore;

fn seeded_store() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.seed(
        Collection::Accounts,
        json!({
            "id": "a1",
            "ownerId": "u1",
            "scope": "personal",
            "currency": "EUR",
            "initialBalance": 1000.0,
            "balance": 1000.0,
        }),
    );
    store
}

fn reconciler(store: &Arc<MemoryStore>) -> BalanceReconciler {
    let persistence: Arc<dyn PersistenceService> = store.clone();
    BalanceReconciler::new(persistence)
}

#[tokio::test]
async fn replay_fold_rounds_each_transaction_before_applying() {
    let store = seeded_store();
    store.seed(
        Collection::Transactions,
        json!({"id": "t1", "accountId": "a1", "type": "income", "amount": 200, "date": "2026-01-02"}),
    );
    store.seed(
        Collection::Transactions,
        json!({"id": "t2", "accountId": "a1", "type": "expense", "amount": 150.005, "date": "2026-01-03"}),
    );

    let outcome = reconciler(&store)
        .recalculate_account_balance("a1")
        .await
        .expect("recalculate");

    // 1000 + 200 - 150.01: the expense rounds before it is applied.
    assert_eq!(outcome.balance, dec!(1049.99));
    assert!(outcome.updated);
    assert_eq!(outcome.malformed_skipped, 0);

    let account = &store.documents(Collection::Accounts)[0];
    assert_eq!(account["balance"].as_f64(), Some(1049.99));
}

#[tokio::test]
async fn recalculation_is_idempotent_and_skips_the_second_write() {
    let store = seeded_store();
    store.seed(
        Collection::Transactions,
        json!({"id": "t1", "accountId": "a1", "type": "expense", "amount": 40, "date": "2026-01-02"}),
    );
    let engine = reconciler(&store);

    let first = engine
        .recalculate_account_balance("a1")
        .await
        .expect("first recalculation");
    assert!(first.updated);
    let writes_after_first = store.write_count();

    let second = engine
        .recalculate_account_balance("a1")
        .await
        .expect("second recalculation");
    assert_eq!(second.balance, first.balance);
    assert!(!second.updated);
    assert_eq!(store.write_count(), writes_after_first);
}

#[tokio::test]
async fn malformed_transactions_are_excluded_without_aborting() {
    let store = seeded_store();
    store.seed(
        Collection::Transactions,
        json!({"id": "t1", "accountId": "a1", "type": "income", "amount": "not-a-number", "date": "2026-01-02"}),
    );
    store.seed(
        Collection::Transactions,
        json!({"id": "t2", "accountId": "a1", "type": "income", "amount": 25, "date": "2026-01-03"}),
    );

    let outcome = reconciler(&store)
        .recalculate_account_balance("a1")
        .await
        .expect("recalculate");

    assert_eq!(outcome.balance, dec!(1025));
    assert_eq!(outcome.malformed_skipped, 1);
}

#[tokio::test]
async fn batch_recalculation_continues_past_failing_accounts() {
    let store = seeded_store();
    // Account that cannot be normalized: missing ownerId.
    store.seed(
        Collection::Accounts,
        json!({"id": "broken", "scope": "personal", "currency": "EUR"}),
    );

    let summary = reconciler(&store)
        .recalculate_all(ReconcileTarget::Scope(
            kinledger_core::accounts::AccountScope::Personal,
        ))
        .await
        .expect("batch");

    assert_eq!(summary.recalculated, 1);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn owner_target_covers_all_of_the_owners_accounts() {
    let store = seeded_store();
    store.seed(
        Collection::Accounts,
        json!({
            "id": "a2",
            "ownerId": "u1",
            "scope": "nuclear",
            "currency": "EUR",
            "initialBalance": 10.0,
            "balance": 99.0,
        }),
    );

    let summary = reconciler(&store)
        .recalculate_all(ReconcileTarget::Owner("u1".to_string()))
        .await
        .expect("batch");

    assert_eq!(summary.recalculated, 2);
    // a2 had drifted from its (empty) transaction history.
    assert_eq!(summary.updated, 1);
    let a2 = store
        .documents(Collection::Accounts)
        .into_iter()
        .find(|d| d["id"] == "a2")
        .unwrap();
    assert_eq!(a2["balance"].as_f64(), Some(10.0));
}
