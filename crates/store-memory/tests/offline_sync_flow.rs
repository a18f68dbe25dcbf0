//! End-to-end offline mutation and drain scenarios.

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use std::sync::Arc;

use kinledger_core::accounts::{AccountScope, NewAccount};
use kinledger_core::persistence::{Collection, PersistenceService};
use kinledger_core::sync::{is_temporary_id, DrainStatus};
use kinledger_core::transactions::NewTransaction;
use kinledger_core::FinanceStore;
use kinledger_store_memory::MemoryStore;

async fn open_store(store: &Arc<MemoryStore>) -> FinanceStore {
    let persistence: Arc<dyn PersistenceService> = store.clone();
    FinanceStore::open(persistence).await.expect("open store")
}

fn new_account(initial: rust_decimal::Decimal) -> NewAccount {
    NewAccount {
        scope: AccountScope::Personal,
        currency: "EUR".to_string(),
        initial_balance: initial,
        shared_with: Vec::new(),
    }
}

#[tokio::test]
async fn temporary_ids_resolve_to_server_ids_during_drain() {
    let memory = Arc::new(MemoryStore::new());
    memory.set_online(false);
    let store = open_store(&memory).await;

    let account = store
        .accounts()
        .create_account("u1", new_account(dec!(1000)))
        .await
        .expect("offline account create");
    assert!(is_temporary_id(&account.id));

    let transaction = store
        .transactions()
        .create_transaction(
            "u1",
            NewTransaction {
                account_id: account.id.clone(),
                kind: kinledger_core::transactions::TransactionKind::Expense,
                amount: dec!(50),
                date: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
            },
        )
        .await
        .expect("offline transaction create");
    assert!(is_temporary_id(&transaction.id));
    assert_eq!(store.sync_engine().pending_count().await, 2);

    memory.set_online(true);
    let summary = store
        .on_connectivity_restored()
        .await
        .expect("drain");
    assert_eq!(summary.status, DrainStatus::Completed);
    assert_eq!(summary.applied, 2);
    assert_eq!(store.sync_engine().pending_count().await, 0);

    // The transaction was submitted with the server-assigned account id.
    let transactions = memory.documents(Collection::Transactions);
    assert_eq!(transactions.len(), 1);
    let account_ref = transactions[0]["accountId"].as_str().unwrap();
    assert!(account_ref.starts_with("srv-"), "got '{}'", account_ref);

    // The post-drain reconciliation pass replaced the optimistic balance.
    let accounts = memory.documents(Collection::Accounts);
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0]["id"].as_str(), Some(account_ref));
    assert_eq!(accounts[0]["balance"].as_f64(), Some(950.0));
}

#[tokio::test]
async fn drain_halts_at_a_failure_and_resumes_in_order() {
    let memory = Arc::new(MemoryStore::new());
    memory.set_online(false);
    let store = open_store(&memory).await;

    for initial in [dec!(1), dec!(2), dec!(3)] {
        store
            .accounts()
            .create_account("u1", new_account(initial))
            .await
            .expect("offline create");
    }

    memory.set_online(true);
    memory.fail_create_in(2);
    let halted = store.on_connectivity_restored().await.expect("first drain");
    assert_eq!(halted.status, DrainStatus::Halted);
    assert_eq!(halted.applied, 1);
    assert_eq!(halted.remaining, 2);
    assert!(halted.last_error.is_some());
    assert_eq!(memory.documents(Collection::Accounts).len(), 1);

    // Next connectivity event retries the same queue, same order.
    let resumed = store.on_connectivity_restored().await.expect("second drain");
    assert_eq!(resumed.status, DrainStatus::Completed);
    assert_eq!(resumed.applied, 2);

    let initials: Vec<f64> = memory
        .documents(Collection::Accounts)
        .iter()
        .map(|doc| doc["initialBalance"].as_f64().unwrap())
        .collect();
    assert_eq!(initials, vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn queue_survives_a_process_restart() {
    let memory = Arc::new(MemoryStore::new());
    memory.set_online(false);

    {
        let store = open_store(&memory).await;
        store
            .accounts()
            .create_account("u1", new_account(dec!(75)))
            .await
            .expect("offline create");
        assert_eq!(store.sync_engine().pending_count().await, 1);
    }

    // A new process opens the store over the same persistence layer.
    let store = open_store(&memory).await;
    assert_eq!(store.sync_engine().pending_count().await, 1);

    memory.set_online(true);
    let summary = store.on_connectivity_restored().await.expect("drain");
    assert_eq!(summary.status, DrainStatus::Completed);
    assert_eq!(summary.applied, 1);
    assert_eq!(memory.documents(Collection::Accounts).len(), 1);
}

#[tokio::test]
async fn offline_reads_are_served_from_the_cached_views() {
    let memory = Arc::new(MemoryStore::new());
    let store = open_store(&memory).await;

    let account = store
        .accounts()
        .create_account("u1", new_account(dec!(500)))
        .await
        .expect("online create");

    memory.set_online(false);
    let listed = store
        .accounts()
        .list_accounts("u1", AccountScope::Personal)
        .await
        .expect("offline list");
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, account.id);
    assert_eq!(listed[0].balance, dec!(500));
}

#[tokio::test]
async fn drain_with_nothing_queued_is_idle() {
    let memory = Arc::new(MemoryStore::new());
    let store = open_store(&memory).await;
    let summary = store.on_connectivity_restored().await.expect("drain");
    assert_eq!(summary.status, DrainStatus::Idle);
    assert_eq!(summary.applied, 0);
}
