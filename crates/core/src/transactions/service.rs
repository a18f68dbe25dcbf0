//! Transaction CRUD routed through the sync engine.
//!
//! Every mutation that changes amount, type, or owning account triggers a
//! replay-based balance recalculation for the affected account(s); nothing
//! in here adjusts a stored balance incrementally.

use chrono::{NaiveDate, Utc};
use log::{debug, warn};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::accounts::AccountService;
use crate::balance::BalanceReconciler;
use crate::cache::CollectionCache;
use crate::errors::{Error, Result};
use crate::money::{self, round_money};
use crate::persistence::{Collection, PersistenceService};
use crate::sync::{PendingOperation, SubmitOutcome, SyncEngine};

use super::{account_view, Transaction, TransactionKind};

/// Input for recording a transaction.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: String,
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub date: NaiveDate,
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TransactionUpdate {
    pub kind: Option<TransactionKind>,
    pub amount: Option<Decimal>,
    pub date: Option<NaiveDate>,
    /// Moves the transaction to another account; both accounts are
    /// recalculated.
    pub account_id: Option<String>,
}

pub struct TransactionService {
    persistence: Arc<dyn PersistenceService>,
    cache: CollectionCache,
    sync: Arc<SyncEngine>,
    accounts: Arc<AccountService>,
    reconciler: Arc<BalanceReconciler>,
}

impl TransactionService {
    pub fn new(
        persistence: Arc<dyn PersistenceService>,
        cache: CollectionCache,
        sync: Arc<SyncEngine>,
        accounts: Arc<AccountService>,
        reconciler: Arc<BalanceReconciler>,
    ) -> Self {
        Self {
            persistence,
            cache,
            sync,
            accounts,
            reconciler,
        }
    }

    pub async fn create_transaction(
        &self,
        actor: &str,
        input: NewTransaction,
    ) -> Result<Transaction> {
        let amount = validate_amount(input.amount)?;
        // Existence and write permission on the owning account.
        self.accounts.get_account(actor, &input.account_id).await?;

        let now = Utc::now().to_rfc3339();
        let payload = json!({
            "accountId": input.account_id,
            "type": input.kind.as_str(),
            "amount": money::to_json(amount),
            "date": input.date.to_string(),
            "deleted": false,
            "createdAt": now,
            "updatedAt": now,
        });

        let operation = PendingOperation::create(
            Collection::Transactions,
            payload,
            account_view(&input.account_id),
        );
        let outcome = self.sync.submit(operation).await?;
        debug!(
            "transaction {} of {} recorded against account '{}'",
            input.kind.as_str(),
            amount,
            input.account_id
        );

        if matches!(outcome, SubmitOutcome::Applied { .. }) {
            self.reconciler
                .recalculate_account_balance(&input.account_id)
                .await?;
        }

        Ok(Transaction {
            id: outcome.id().to_string(),
            account_id: input.account_id,
            kind: input.kind,
            amount,
            date: input.date,
            deleted: false,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub async fn update_transaction(
        &self,
        actor: &str,
        account_id: &str,
        transaction_id: &str,
        changes: TransactionUpdate,
    ) -> Result<()> {
        let existing = self.load_transaction(actor, account_id, transaction_id).await?;

        let mut partial = Map::new();
        if let Some(kind) = changes.kind {
            partial.insert("type".to_string(), Value::String(kind.as_str().to_string()));
        }
        if let Some(amount) = changes.amount {
            partial.insert("amount".to_string(), money::to_json(validate_amount(amount)?));
        }
        if let Some(date) = changes.date {
            partial.insert("date".to_string(), Value::String(date.to_string()));
        }
        let moved_to = match changes.account_id {
            Some(target) if target != existing.account_id => {
                // The target account must exist and be writable too.
                self.accounts.get_account(actor, &target).await?;
                partial.insert("accountId".to_string(), Value::String(target.clone()));
                Some(target)
            }
            _ => None,
        };
        if partial.is_empty() {
            return Ok(());
        }
        partial.insert(
            "updatedAt".to_string(),
            Value::String(Utc::now().to_rfc3339()),
        );

        let operation = PendingOperation::update(
            Collection::Transactions,
            transaction_id,
            Value::Object(partial),
            account_view(&existing.account_id),
        );
        let outcome = self.sync.submit(operation).await?;

        if matches!(outcome, SubmitOutcome::Applied { .. }) {
            self.reconciler
                .recalculate_account_balance(&existing.account_id)
                .await?;
            if let Some(target) = moved_to {
                self.reconciler.recalculate_account_balance(&target).await?;
            }
        }
        Ok(())
    }

    pub async fn delete_transaction(
        &self,
        actor: &str,
        account_id: &str,
        transaction_id: &str,
    ) -> Result<()> {
        let existing = self.load_transaction(actor, account_id, transaction_id).await?;

        let operation = PendingOperation::delete(
            Collection::Transactions,
            transaction_id,
            account_view(&existing.account_id),
        );
        let outcome = self.sync.submit(operation).await?;

        if matches!(outcome, SubmitOutcome::Applied { .. }) {
            self.reconciler
                .recalculate_account_balance(&existing.account_id)
                .await?;
        }
        Ok(())
    }

    /// Transactions of one account, newest first. Served from the cached
    /// view while offline.
    pub async fn list_transactions(
        &self,
        actor: &str,
        account_id: &str,
    ) -> Result<Vec<Transaction>> {
        self.accounts.get_account(actor, account_id).await?;

        let view = account_view(account_id);
        let documents = if self.persistence.is_online() {
            let fetched = self
                .persistence
                .query(view.collection, &view.filters, view.ordering.as_ref())
                .await?;
            self.cache.merge_remote(&view, fetched).await?
        } else {
            self.cache.read(&view).await?
        };

        let mut transactions = Vec::with_capacity(documents.len());
        for document in &documents {
            if crate::documents::is_deleted(document) {
                continue;
            }
            match Transaction::from_document(document) {
                // A transaction moved to another account can linger in this
                // view's cache until the next reload; filter it out here.
                Ok(transaction) if transaction.account_id == account_id => {
                    transactions.push(transaction)
                }
                Ok(_) => {}
                Err(err) => warn!("skipping malformed transaction document: {}", err),
            }
        }
        Ok(transactions)
    }

    async fn load_transaction(
        &self,
        actor: &str,
        account_id: &str,
        transaction_id: &str,
    ) -> Result<Transaction> {
        // Permission travels through the owning account.
        self.accounts.get_account(actor, account_id).await?;

        let document = if self.persistence.is_online() {
            self.persistence
                .get_by_id(Collection::Transactions, transaction_id)
                .await?
        } else {
            self.cache
                .find_document(&account_view(account_id), transaction_id)
                .await?
        };
        let document =
            document.ok_or_else(|| Error::not_found("transaction", transaction_id))?;
        Transaction::from_document(&document)
    }
}

fn validate_amount(amount: Decimal) -> Result<Decimal> {
    if amount.is_sign_negative() {
        return Err(Error::validation(
            "transaction amount must be a non-negative magnitude; direction is carried by the type",
        ));
    }
    Ok(round_money(amount))
}
