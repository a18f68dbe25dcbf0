//! Composition root owning the engines and entity services.

use log::{debug, info};
use std::sync::Arc;

use crate::accounts::AccountService;
use crate::balance::BalanceReconciler;
use crate::cache::CollectionCache;
use crate::errors::Result;
use crate::loans::LoanService;
use crate::persistence::PersistenceService;
use crate::sync::{DrainSummary, SyncEngine};
use crate::transactions::TransactionService;

/// Explicit, owned application state: the persistence handle, the two
/// engines, and the entity services. Constructed once at the application's
/// composition root and passed by handle; no ambient globals.
pub struct FinanceStore {
    persistence: Arc<dyn PersistenceService>,
    cache: CollectionCache,
    reconciler: Arc<BalanceReconciler>,
    sync: Arc<SyncEngine>,
    accounts: Arc<AccountService>,
    transactions: Arc<TransactionService>,
    loans: Arc<LoanService>,
}

impl FinanceStore {
    /// Wires the store and restores any pending offline operations
    /// persisted by a previous process.
    pub async fn open(persistence: Arc<dyn PersistenceService>) -> Result<Self> {
        let cache = CollectionCache::new(Arc::clone(&persistence));
        let reconciler = Arc::new(BalanceReconciler::new(Arc::clone(&persistence)));
        let sync = Arc::new(
            SyncEngine::restore(
                Arc::clone(&persistence),
                cache.clone(),
                Arc::clone(&reconciler),
            )
            .await?,
        );

        let accounts = Arc::new(AccountService::new(
            Arc::clone(&persistence),
            cache.clone(),
            Arc::clone(&sync),
        ));
        let transactions = Arc::new(TransactionService::new(
            Arc::clone(&persistence),
            cache.clone(),
            Arc::clone(&sync),
            Arc::clone(&accounts),
            Arc::clone(&reconciler),
        ));
        let loans = Arc::new(LoanService::new(
            Arc::clone(&persistence),
            cache.clone(),
            Arc::clone(&sync),
        ));

        info!("finance store opened");
        Ok(Self {
            persistence,
            cache,
            reconciler,
            sync,
            accounts,
            transactions,
            loans,
        })
    }

    pub fn is_online(&self) -> bool {
        self.persistence.is_online()
    }

    pub fn accounts(&self) -> Arc<AccountService> {
        Arc::clone(&self.accounts)
    }

    pub fn transactions(&self) -> Arc<TransactionService> {
        Arc::clone(&self.transactions)
    }

    pub fn loans(&self) -> Arc<LoanService> {
        Arc::clone(&self.loans)
    }

    pub fn reconciler(&self) -> Arc<BalanceReconciler> {
        Arc::clone(&self.reconciler)
    }

    pub fn sync_engine(&self) -> Arc<SyncEngine> {
        Arc::clone(&self.sync)
    }

    pub fn cache(&self) -> CollectionCache {
        self.cache.clone()
    }

    /// Entry point for the host's connectivity listener: drains the offline
    /// queue and, on a complete pass, reconciles and reloads affected data.
    pub async fn on_connectivity_restored(&self) -> Result<DrainSummary> {
        debug!("connectivity restored; draining offline queue");
        self.sync.drain().await
    }
}
