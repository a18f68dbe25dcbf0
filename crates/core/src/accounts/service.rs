//! Account CRUD routed through the sync engine.

use chrono::Utc;
use log::{debug, warn};
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::cache::{merge_by_identifier, CollectionCache, MergeOrdering};
use crate::errors::{Error, Result};
use crate::money::{self, round_money};
use crate::persistence::{Collection, PersistenceService};
use crate::sync::{PendingOperation, SubmitOutcome, SyncEngine};
use crate::transactions;

use super::{all_scope_views, legacy_scope_view, scope_view, Account, AccountScope};

/// Input for creating an account. The actor becomes the owner.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub scope: AccountScope,
    pub currency: String,
    pub initial_balance: Decimal,
    pub shared_with: Vec<String>,
}

/// Partial account update; `None` fields are left untouched. The initial
/// balance is an immutable snapshot and cannot be expressed here.
#[derive(Debug, Clone, Default)]
pub struct AccountUpdate {
    pub currency: Option<String>,
    pub scope: Option<AccountScope>,
}

pub struct AccountService {
    persistence: Arc<dyn PersistenceService>,
    cache: CollectionCache,
    sync: Arc<SyncEngine>,
}

impl AccountService {
    pub fn new(
        persistence: Arc<dyn PersistenceService>,
        cache: CollectionCache,
        sync: Arc<SyncEngine>,
    ) -> Self {
        Self {
            persistence,
            cache,
            sync,
        }
    }

    pub async fn create_account(&self, actor: &str, input: NewAccount) -> Result<Account> {
        if input.currency.trim().is_empty() {
            return Err(Error::validation("account currency must not be empty"));
        }
        let initial_balance = round_money(input.initial_balance);
        let now = Utc::now().to_rfc3339();

        let payload = json!({
            "ownerId": actor,
            "scope": input.scope.as_str(),
            "currency": input.currency.trim(),
            "initialBalance": money::to_json(initial_balance),
            "balance": money::to_json(initial_balance),
            "sharedWith": input.shared_with,
            "createdAt": now,
            "updatedAt": now,
        });

        let operation =
            PendingOperation::create(Collection::Accounts, payload, scope_view(input.scope));
        let outcome = self.sync.submit(operation).await?;
        debug!(
            "account created for '{}' with id '{}' ({})",
            actor,
            outcome.id(),
            match &outcome {
                SubmitOutcome::Applied { .. } => "online",
                SubmitOutcome::Queued { .. } => "offline",
            }
        );

        Ok(Account {
            id: outcome.id().to_string(),
            owner_id: actor.to_string(),
            scope: input.scope,
            currency: input.currency.trim().to_string(),
            initial_balance,
            balance: initial_balance,
            shared_with: input.shared_with,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Loads an account by id, from the remote store when online and from
    /// the cached scope views when offline. Enforces read permission.
    pub async fn get_account(&self, actor: &str, account_id: &str) -> Result<Account> {
        let document = if self.persistence.is_online() {
            self.persistence
                .get_by_id(Collection::Accounts, account_id)
                .await?
        } else {
            let mut found = None;
            let mut views = all_scope_views();
            views.push(legacy_scope_view());
            for view in &views {
                if let Some(document) = self.cache.find_document(view, account_id).await? {
                    found = Some(document);
                    break;
                }
            }
            found
        };

        let document = document.ok_or_else(|| Error::not_found("account", account_id))?;
        let account = Account::from_document(&document)?;
        if !account.permits(actor) {
            return Err(Error::permission_denied(actor, "account", account_id));
        }
        Ok(account)
    }

    /// Accounts visible to the actor within a scope.
    ///
    /// For the personal scope, legacy documents written before the scope
    /// field existed are folded into the same result set.
    pub async fn list_accounts(&self, actor: &str, scope: AccountScope) -> Result<Vec<Account>> {
        let view = scope_view(scope);
        let documents = if self.persistence.is_online() {
            let explicit = self
                .persistence
                .query(view.collection, &view.filters, view.ordering.as_ref())
                .await?;
            let combined = if scope == AccountScope::Personal {
                let legacy_view = legacy_scope_view();
                let legacy = self
                    .persistence
                    .query(legacy_view.collection, &legacy_view.filters, None)
                    .await?;
                merge_by_identifier(explicit, legacy, MergeOrdering::InsertionOrder)
            } else {
                explicit
            };
            self.cache.merge_remote(&view, combined).await?
        } else {
            let mut cached = self.cache.read(&view).await?;
            if scope == AccountScope::Personal {
                let legacy = self.cache.read(&legacy_scope_view()).await?;
                cached = merge_by_identifier(cached, legacy, MergeOrdering::InsertionOrder);
            }
            cached
        };

        let mut accounts = Vec::with_capacity(documents.len());
        for document in &documents {
            match Account::from_document(document) {
                // An account moved to another scope can linger in this
                // view's cache until the next reload; filter it out here.
                Ok(account) => {
                    if account.permits(actor) && account.scope == scope {
                        accounts.push(account);
                    }
                }
                Err(err) => warn!("skipping malformed account document: {}", err),
            }
        }
        Ok(accounts)
    }

    /// Updates an account's mutable fields. Owner only.
    ///
    /// Changing the scope moves the account into another sharing group; its
    /// cached copy is relocated to the new scope's view so offline reads of
    /// both scopes stay correct.
    pub async fn update_account(
        &self,
        actor: &str,
        account_id: &str,
        changes: AccountUpdate,
    ) -> Result<()> {
        let account = self.owned_account(actor, account_id).await?;

        let mut partial = Map::new();
        if let Some(currency) = changes.currency {
            let currency = currency.trim().to_string();
            if currency.is_empty() {
                return Err(Error::validation("account currency must not be empty"));
            }
            partial.insert("currency".to_string(), Value::String(currency));
        }
        let moved_to = match changes.scope {
            Some(scope) if scope != account.scope => {
                partial.insert(
                    "scope".to_string(),
                    Value::String(scope.as_str().to_string()),
                );
                Some(scope)
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
            Collection::Accounts,
            account_id,
            Value::Object(partial),
            scope_view(account.scope),
        );
        self.sync.submit(operation).await?;

        if let Some(scope) = moved_to {
            let old_view = scope_view(account.scope);
            if let Some(document) = self.cache.find_document(&old_view, account_id).await? {
                self.cache.remove_document(&old_view, account_id).await?;
                self.cache
                    .upsert_document(&scope_view(scope), document)
                    .await?;
            }
        }
        Ok(())
    }

    /// Adds a member to the account's sharing set. Owner only.
    pub async fn share_account(&self, actor: &str, account_id: &str, member: &str) -> Result<()> {
        let account = self.owned_account(actor, account_id).await?;
        if account.shared_with.iter().any(|m| m == member) {
            return Ok(());
        }
        let mut shared_with = account.shared_with;
        shared_with.push(member.to_string());
        self.update_sharing(&account.id, account.scope, shared_with)
            .await
    }

    pub async fn unshare_account(&self, actor: &str, account_id: &str, member: &str) -> Result<()> {
        let account = self.owned_account(actor, account_id).await?;
        let mut shared_with = account.shared_with;
        shared_with.retain(|m| m != member);
        self.update_sharing(&account.id, account.scope, shared_with)
            .await
    }

    /// Deletes an account. Refused while non-deleted transactions still
    /// reference it, so no transaction is ever left dangling.
    pub async fn delete_account(&self, actor: &str, account_id: &str) -> Result<()> {
        let account = self.owned_account(actor, account_id).await?;

        let tx_view = transactions::account_view(account_id);
        let referencing = if self.persistence.is_online() {
            self.persistence
                .query(tx_view.collection, &tx_view.filters, None)
                .await?
        } else {
            self.cache.read(&tx_view).await?
        };
        let live = referencing
            .iter()
            .filter(|doc| !crate::documents::is_deleted(doc))
            .count();
        if live > 0 {
            return Err(Error::validation(format!(
                "account '{}' still has {} transaction(s); delete those first",
                account_id, live
            )));
        }

        let operation = PendingOperation::delete(
            Collection::Accounts,
            account_id,
            scope_view(account.scope),
        );
        self.sync.submit(operation).await?;
        Ok(())
    }

    async fn owned_account(&self, actor: &str, account_id: &str) -> Result<Account> {
        let account = self.get_account(actor, account_id).await?;
        if account.owner_id != actor {
            return Err(Error::permission_denied(actor, "account", account_id));
        }
        Ok(account)
    }

    async fn update_sharing(
        &self,
        account_id: &str,
        scope: AccountScope,
        shared_with: Vec<String>,
    ) -> Result<()> {
        let partial = json!({
            "sharedWith": shared_with,
            "updatedAt": Utc::now().to_rfc3339(),
        });
        let operation = PendingOperation::update(
            Collection::Accounts,
            account_id,
            partial,
            scope_view(scope),
        );
        self.sync.submit(operation).await?;
        Ok(())
    }
}
