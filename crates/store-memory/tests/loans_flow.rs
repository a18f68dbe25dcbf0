//! Loan service scenarios: payment invariants and offline payment sync.

use chrono::NaiveDate;
use rust_decimal_macros::dec;
use std::sync::Arc;

use kinledger_core::loans::{LoanStatus, NewLoan, NewPayment};
use kinledger_core::persistence::{Collection, PersistenceService};
use kinledger_core::sync::DrainStatus;
use kinledger_core::{Error, FinanceStore};
use kinledger_store_memory::MemoryStore;

async fn open_store(store: &Arc<MemoryStore>) -> FinanceStore {
    let persistence: Arc<dyn PersistenceService> = store.clone();
    FinanceStore::open(persistence).await.expect("open store")
}

fn payment(amount: rust_decimal::Decimal, day: u32) -> NewPayment {
    NewPayment {
        amount,
        date: NaiveDate::from_ymd_opt(2026, 5, day).unwrap(),
        note: None,
    }
}

#[tokio::test]
async fn payments_drive_the_derived_status_both_ways() {
    let memory = Arc::new(MemoryStore::new());
    let store = open_store(&memory).await;

    let loan = store
        .loans()
        .create_loan(
            "u1",
            NewLoan {
                amount: dec!(500),
                interest_rate: dec!(0.04),
                term_months: 24,
            },
        )
        .await
        .expect("create loan");

    let loan_after_first = store
        .loans()
        .add_payment("u1", &loan.id, payment(dec!(200), 1))
        .await
        .expect("first payment");
    assert_eq!(loan_after_first.status, LoanStatus::Active);
    assert_eq!(loan_after_first.total_paid, dec!(200));

    let paid = store
        .loans()
        .add_payment("u1", &loan.id, payment(dec!(300), 2))
        .await
        .expect("final payment");
    assert_eq!(paid.status, LoanStatus::Paid);
    assert_eq!(paid.total_paid, dec!(500));

    // Removing a payment drops the total below the principal again.
    let removed_id = paid.payments[1].id.clone();
    let reverted = store
        .loans()
        .remove_payment("u1", &loan.id, &removed_id)
        .await
        .expect("remove payment");
    assert_eq!(reverted.status, LoanStatus::Active);
    assert_eq!(reverted.total_paid, dec!(200));
}

#[tokio::test]
async fn payments_may_never_exceed_the_principal() {
    let memory = Arc::new(MemoryStore::new());
    let store = open_store(&memory).await;

    let loan = store
        .loans()
        .create_loan(
            "u1",
            NewLoan {
                amount: dec!(100),
                interest_rate: dec!(0),
                term_months: 6,
            },
        )
        .await
        .expect("create loan");

    store
        .loans()
        .add_payment("u1", &loan.id, payment(dec!(80), 1))
        .await
        .expect("payment within principal");

    let overpayment = store
        .loans()
        .add_payment("u1", &loan.id, payment(dec!(20.01), 2))
        .await;
    assert!(matches!(overpayment, Err(Error::Validation(_))));

    // The stored record is untouched by the rejected mutation.
    let stored = &memory.documents(Collection::Loans)[0];
    assert_eq!(stored["totalPaid"].as_f64(), Some(80.0));
}

#[tokio::test]
async fn defaulted_mark_is_preserved_until_fully_repaid() {
    let memory = Arc::new(MemoryStore::new());
    let store = open_store(&memory).await;

    let loan = store
        .loans()
        .create_loan(
            "u1",
            NewLoan {
                amount: dec!(100),
                interest_rate: dec!(0.1),
                term_months: 12,
            },
        )
        .await
        .expect("create loan");

    let defaulted = store
        .loans()
        .mark_defaulted("u1", &loan.id)
        .await
        .expect("mark defaulted");
    assert_eq!(defaulted.status, LoanStatus::Defaulted);

    let still_defaulted = store
        .loans()
        .add_payment("u1", &loan.id, payment(dec!(10), 1))
        .await
        .expect("partial payment");
    assert_eq!(still_defaulted.status, LoanStatus::Defaulted);

    let paid = store
        .loans()
        .add_payment("u1", &loan.id, payment(dec!(90), 2))
        .await
        .expect("full repayment");
    assert_eq!(paid.status, LoanStatus::Paid);

    let cannot_default = store.loans().mark_defaulted("u1", &loan.id).await;
    assert!(matches!(cannot_default, Err(Error::Validation(_))));
}

#[tokio::test]
async fn offline_payments_replay_on_reconnection() {
    let memory = Arc::new(MemoryStore::new());
    let store = open_store(&memory).await;

    let loan = store
        .loans()
        .create_loan(
            "u1",
            NewLoan {
                amount: dec!(300),
                interest_rate: dec!(0.02),
                term_months: 18,
            },
        )
        .await
        .expect("create loan");

    memory.set_online(false);
    let cached = store
        .loans()
        .add_payment("u1", &loan.id, payment(dec!(120), 3))
        .await
        .expect("offline payment");
    assert_eq!(cached.total_paid, dec!(120));

    // The remote record has not moved yet.
    let stored = &memory.documents(Collection::Loans)[0];
    assert_eq!(stored["totalPaid"].as_f64(), Some(0.0));

    // The cached copy serves offline reads with the optimistic state.
    let offline_view = store.loans().get_loan("u1", &loan.id).await.expect("offline read");
    assert_eq!(offline_view.total_paid, dec!(120));

    memory.set_online(true);
    let summary = store.on_connectivity_restored().await.expect("drain");
    assert_eq!(summary.status, DrainStatus::Completed);

    let stored = &memory.documents(Collection::Loans)[0];
    assert_eq!(stored["totalPaid"].as_f64(), Some(120.0));
    assert_eq!(stored["payments"].as_array().unwrap().len(), 1);
}
