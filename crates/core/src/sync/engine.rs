//! Mutation routing and queue drain.
//!
//! [`SyncEngine::submit`] is the single entry point for entity mutations:
//! online, the operation is applied remotely and mirrored into the local
//! cache; offline, it is queued and applied optimistically.
//! [`SyncEngine::drain`] replays the queue in strict submission order on
//! reconnection.

use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::accounts;
use crate::balance::{BalanceReconciler, ReconcileTarget};
use crate::cache::{CollectionCache, CollectionView};
use crate::documents::{merge_partial, str_field, with_id};
use crate::errors::{Error, Result};
use crate::persistence::{Collection, PersistenceService};
use crate::transactions::signed_amount;

use super::queue::OutboxQueue;
use super::{OperationKind, PendingOperation};

/// How a submitted mutation was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Applied against the remote store; carries the server identifier.
    Applied { id: String },
    /// Queued for later replay; carries the temporary (creates) or target
    /// identifier.
    Queued { id: String },
}

impl SubmitOutcome {
    pub fn id(&self) -> &str {
        match self {
            SubmitOutcome::Applied { id } | SubmitOutcome::Queued { id } => id,
        }
    }
}

/// Terminal state of one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainStatus {
    /// Every queued operation replayed; caches reloaded and balances
    /// reconciled.
    Completed,
    /// A replay failed; the failed operation and everything after it remain
    /// queued for the next connectivity event.
    Halted,
    /// The persistence service still reports offline.
    Offline,
    /// Nothing was queued.
    Idle,
}

/// Result of one drain pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainSummary {
    pub status: DrainStatus,
    pub applied: usize,
    pub remaining: usize,
    pub last_error: Option<String>,
}

pub struct SyncEngine {
    persistence: Arc<dyn PersistenceService>,
    cache: CollectionCache,
    reconciler: Arc<BalanceReconciler>,
    /// Queue and cache mutations are serialized behind this lock; the drain
    /// loop holds it for the whole pass so a concurrent submit cannot
    /// interleave with replay.
    queue: Mutex<OutboxQueue>,
}

impl SyncEngine {
    /// Restores the persisted queue and wires the engine.
    pub async fn restore(
        persistence: Arc<dyn PersistenceService>,
        cache: CollectionCache,
        reconciler: Arc<BalanceReconciler>,
    ) -> Result<Self> {
        let queue = OutboxQueue::restore(Arc::clone(&persistence)).await?;
        if !queue.is_empty() {
            info!("restored {} pending offline operation(s)", queue.len());
        }
        Ok(Self {
            persistence,
            cache,
            reconciler,
            queue: Mutex::new(queue),
        })
    }

    pub fn is_online(&self) -> bool {
        self.persistence.is_online()
    }

    pub async fn pending_count(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// A copy of the queued operations, oldest first.
    pub async fn pending_operations(&self) -> Vec<PendingOperation> {
        self.queue.lock().await.iter().cloned().collect()
    }

    /// Routes a mutation: remote + cache mirror when online, queue +
    /// optimistic cache application when offline.
    pub async fn submit(&self, operation: PendingOperation) -> Result<SubmitOutcome> {
        if self.persistence.is_online() {
            let id = self.apply_remote(&operation).await?;
            self.mirror_into_cache(&operation, &id).await?;
            Ok(SubmitOutcome::Applied { id })
        } else {
            let mut queue = self.queue.lock().await;
            self.apply_optimistically(&operation).await?;
            let id = operation.entity_id.clone();
            queue.push(operation);
            queue.persist().await?;
            debug!(
                "queued offline operation for '{}' ({} pending)",
                id,
                queue.len()
            );
            Ok(SubmitOutcome::Queued { id })
        }
    }

    /// Replays queued operations strictly in submission order.
    ///
    /// On the first failure the pass halts with the failed operation and all
    /// later ones still queued: later operations may depend on it, so it
    /// must never be skipped. After a complete pass, every affected
    /// collection slice is reloaded from the remote store and the affected
    /// accounts are reconciled, overwriting any optimistic state.
    pub async fn drain(&self) -> Result<DrainSummary> {
        let mut queue = self.queue.lock().await;

        if queue.is_empty() {
            return Ok(DrainSummary {
                status: DrainStatus::Idle,
                applied: 0,
                remaining: 0,
                last_error: None,
            });
        }
        if !self.persistence.is_online() {
            return Ok(DrainSummary {
                status: DrainStatus::Offline,
                applied: 0,
                remaining: queue.len(),
                last_error: None,
            });
        }

        debug!("draining {} pending operation(s)", queue.len());
        let mut mapping: HashMap<String, String> = HashMap::new();
        let mut affected_views: Vec<CollectionView> = Vec::new();
        let mut affected_accounts: BTreeSet<String> = BTreeSet::new();
        let mut applied = 0usize;
        let mut last_error = None;

        while let Some(front) = queue.front() {
            let mut operation = front.clone();
            operation.resolve_temp_ids(&mapping);

            let replayed = self.apply_remote(&operation).await;
            let server_id = match replayed {
                Ok(id) => id,
                Err(err) => {
                    warn!(
                        "drain halted at operation '{}' ({:?} {}): {}",
                        operation.op_id,
                        operation.kind,
                        operation.collection.as_str(),
                        err
                    );
                    last_error = Some(err.to_string());
                    break;
                }
            };

            if operation.kind == OperationKind::Create && server_id != operation.entity_id {
                mapping.insert(operation.entity_id.clone(), server_id.clone());
                self.promote_temp_id(&mut queue, &operation, &server_id, &mapping)
                    .await;
            }

            track_view(&mut affected_views, &operation.view);
            if let Some(account_id) = affected_account_id(&operation, &server_id) {
                affected_accounts.insert(account_id);
            }

            queue.pop_front();
            queue.persist().await?;
            applied += 1;
        }

        let remaining = queue.len();
        let status = if remaining == 0 {
            // Reconcile first so the reloaded cache pages already carry the
            // corrected balances.
            self.reconcile_affected(affected_accounts).await;
            self.reload_views(&affected_views).await;
            DrainStatus::Completed
        } else {
            DrainStatus::Halted
        };

        info!(
            "drain finished: {:?}, {} applied, {} remaining",
            status, applied, remaining
        );
        Ok(DrainSummary {
            status,
            applied,
            remaining,
            last_error,
        })
    }

    async fn apply_remote(&self, operation: &PendingOperation) -> Result<String> {
        match operation.kind {
            OperationKind::Create => {
                let payload = operation
                    .payload
                    .clone()
                    .ok_or_else(|| Error::validation("create operation without payload"))?;
                let id = self
                    .persistence
                    .create(operation.collection, payload)
                    .await?;
                Ok(id)
            }
            OperationKind::Update => {
                let payload = operation
                    .payload
                    .clone()
                    .ok_or_else(|| Error::validation("update operation without payload"))?;
                self.persistence
                    .update(operation.collection, &operation.entity_id, payload)
                    .await?;
                Ok(operation.entity_id.clone())
            }
            OperationKind::Delete => {
                self.persistence
                    .delete(operation.collection, &operation.entity_id)
                    .await?;
                Ok(operation.entity_id.clone())
            }
        }
    }

    /// Mirrors an online mutation into the view's cache entry so offline
    /// reads immediately after see the new state.
    async fn mirror_into_cache(&self, operation: &PendingOperation, id: &str) -> Result<()> {
        match operation.kind {
            OperationKind::Create => {
                let Some(Value::Object(fields)) = operation.payload.clone() else {
                    return Ok(());
                };
                self.cache
                    .upsert_document(&operation.view, with_id(fields, id))
                    .await
            }
            OperationKind::Update => {
                let Some(mut existing) = self.cache.find_document(&operation.view, id).await?
                else {
                    // Not cached; the next read or reload will pick it up.
                    return Ok(());
                };
                if let Some(partial) = operation.payload.as_ref() {
                    merge_partial(&mut existing, partial);
                }
                self.cache.upsert_document(&operation.view, existing).await
            }
            OperationKind::Delete => self.cache.remove_document(&operation.view, id).await,
        }
    }

    /// Applies an offline mutation to the cached view so the UI reflects it
    /// without waiting for connectivity. For transactions this includes the
    /// cached account-balance nudge; the reconciliation pass after the next
    /// drain overwrites it with the replayed truth.
    async fn apply_optimistically(&self, operation: &PendingOperation) -> Result<()> {
        match operation.kind {
            OperationKind::Create => {
                let Some(Value::Object(fields)) = operation.payload.clone() else {
                    return Err(Error::validation("create operation without payload"));
                };
                let document = with_id(fields, &operation.entity_id);
                if operation.collection == Collection::Transactions {
                    if let Ok(delta) = signed_amount(&document) {
                        self.adjust_cached_account_balance(&document, delta).await?;
                    }
                }
                self.cache.upsert_document(&operation.view, document).await
            }
            OperationKind::Update => {
                let Some(previous) = self
                    .cache
                    .find_document(&operation.view, &operation.entity_id)
                    .await?
                else {
                    debug!(
                        "offline update of uncached '{}'; skipping optimistic application",
                        operation.entity_id
                    );
                    return Ok(());
                };
                let mut next = previous.clone();
                if let Some(partial) = operation.payload.as_ref() {
                    merge_partial(&mut next, partial);
                }
                if operation.collection == Collection::Transactions {
                    let before = signed_amount(&previous).unwrap_or(Decimal::ZERO);
                    let after = signed_amount(&next).unwrap_or(Decimal::ZERO);
                    self.adjust_cached_account_balance(&next, after - before)
                        .await?;
                }
                self.cache.upsert_document(&operation.view, next).await
            }
            OperationKind::Delete => {
                if operation.collection == Collection::Transactions {
                    if let Some(previous) = self
                        .cache
                        .find_document(&operation.view, &operation.entity_id)
                        .await?
                    {
                        if let Ok(signed) = signed_amount(&previous) {
                            self.adjust_cached_account_balance(&previous, -signed)
                                .await?;
                        }
                    }
                }
                self.cache
                    .remove_document(&operation.view, &operation.entity_id)
                    .await
            }
        }
    }

    /// Nudges the cached balance of the account a transaction document
    /// points at, wherever that account is cached.
    async fn adjust_cached_account_balance(&self, document: &Value, delta: Decimal) -> Result<()> {
        if delta.is_zero() {
            return Ok(());
        }
        let Some(account_id) = str_field(document, "accountId").map(str::to_string) else {
            return Ok(());
        };
        let mut views = accounts::all_scope_views();
        views.push(accounts::legacy_scope_view());
        for view in &views {
            if self.cache.adjust_balance(view, &account_id, delta).await? {
                return Ok(());
            }
        }
        debug!(
            "account '{}' not present in any cached scope view; no balance to adjust",
            account_id
        );
        Ok(())
    }

    /// After a create received its server id: rewrite the remaining queue,
    /// fix the create's own cached document, and migrate any cache entries
    /// whose key was derived from the temporary id.
    async fn promote_temp_id(
        &self,
        queue: &mut OutboxQueue,
        operation: &PendingOperation,
        server_id: &str,
        mapping: &HashMap<String, String>,
    ) {
        let temp_id = operation.entity_id.as_str();

        let mut stale_views: Vec<CollectionView> = Vec::new();
        for entry in queue.iter() {
            if entry.view.references_id(temp_id) {
                track_view(&mut stale_views, &entry.view);
            }
        }
        queue.apply_mapping(mapping);

        if let Err(err) = self
            .cache
            .rewrite_id(&operation.view, temp_id, server_id)
            .await
        {
            warn!(
                "failed to rewrite '{}' in cached view '{}': {}",
                temp_id,
                operation.view.cache_key(),
                err
            );
        }

        for old_view in stale_views {
            let mut new_view = old_view.clone();
            new_view.rewrite_ids(mapping);
            if let Err(err) = self.migrate_cache_entry(&old_view, &new_view, mapping).await {
                warn!(
                    "failed to migrate cache entry '{}' -> '{}': {}",
                    old_view.cache_key(),
                    new_view.cache_key(),
                    err
                );
            }
        }
    }

    /// Moves a temp-keyed cache entry under its resolved key, rewriting
    /// identifiers inside the documents along the way.
    async fn migrate_cache_entry(
        &self,
        old_view: &CollectionView,
        new_view: &CollectionView,
        mapping: &HashMap<String, String>,
    ) -> Result<()> {
        let mut documents = self.cache.read(old_view).await?;
        if documents.is_empty() {
            return self.cache.remove_entry(old_view).await;
        }
        for document in &mut documents {
            crate::documents::rewrite_string_values(document, &|s| mapping.get(s).cloned());
        }
        self.cache.remove_entry(old_view).await?;
        self.cache.merge_remote(new_view, documents).await?;
        Ok(())
    }

    /// Full reload of every collection slice touched by a completed drain.
    /// Optimistic local state may have diverged from what the server
    /// computed (concurrent edits from another device), so the server page
    /// wins on every shared identifier.
    async fn reload_views(&self, views: &[CollectionView]) {
        for view in views {
            let fetched = self
                .persistence
                .query(view.collection, &view.filters, view.ordering.as_ref())
                .await;
            match fetched {
                Ok(incoming) => {
                    if let Err(err) = self.cache.merge_remote(view, incoming).await {
                        warn!(
                            "failed to merge reloaded view '{}': {}",
                            view.cache_key(),
                            err
                        );
                    }
                }
                Err(err) => {
                    warn!("failed to reload view '{}': {}", view.cache_key(), err);
                }
            }
        }
    }

    async fn reconcile_affected(&self, account_ids: BTreeSet<String>) {
        if account_ids.is_empty() {
            return;
        }
        let target = ReconcileTarget::Accounts(account_ids.into_iter().collect());
        match self.reconciler.recalculate_all(target).await {
            Ok(summary) => debug!(
                "post-drain reconciliation: {} recalculated, {} corrected, {} failed",
                summary.recalculated, summary.updated, summary.failed
            ),
            Err(err) => warn!("post-drain reconciliation failed: {}", err),
        }
    }
}

fn track_view(views: &mut Vec<CollectionView>, view: &CollectionView) {
    if !views.iter().any(|v| v.cache_key() == view.cache_key()) {
        views.push(view.clone());
    }
}

/// The account whose balance a replayed operation may have changed. A
/// deleted account has nothing left to reconcile.
fn affected_account_id(operation: &PendingOperation, server_id: &str) -> Option<String> {
    match operation.collection {
        Collection::Accounts => {
            (operation.kind != OperationKind::Delete).then(|| server_id.to_string())
        }
        Collection::Transactions => operation
            .payload
            .as_ref()
            .and_then(|payload| str_field(payload, "accountId"))
            .map(str::to_string)
            .or_else(|| {
                operation
                    .view
                    .filter_eq_value("accountId")?
                    .as_str()
                    .map(str::to_string)
            }),
        _ => None,
    }
}
