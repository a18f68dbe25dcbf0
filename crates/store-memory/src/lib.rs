//! In-memory implementation of the persistence service.
//!
//! Reference adapter and test harness: a switchable connectivity flag,
//! deterministic server-assigned identifiers, scriptable create failures,
//! and a write counter for idempotence assertions.

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Mutex;

use kinledger_core::documents::{doc_id, merge_partial};
use kinledger_core::persistence::{
    Collection, Filter, Ordering, PersistenceError, PersistenceResult, PersistenceService,
    SortDirection,
};

/// An in-memory document store with a connectivity toggle.
#[derive(Default)]
pub struct MemoryStore {
    online: AtomicBool,
    next_id: AtomicU64,
    /// Remote writes performed (create/update/delete), for idempotence
    /// assertions in tests.
    write_count: AtomicU64,
    /// Countdown until one scripted create failure; 1 fails the next create.
    fail_create_in: Mutex<Option<u64>>,
    collections: Mutex<HashMap<Collection, Vec<Value>>>,
    cache: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    /// An online, empty store.
    pub fn new() -> Self {
        let store = Self::default();
        store.online.store(true, AtomicOrdering::SeqCst);
        store
    }

    pub fn set_online(&self, online: bool) {
        debug!("memory store connectivity set to {}", online);
        self.online.store(online, AtomicOrdering::SeqCst);
    }

    /// Remote writes performed so far.
    pub fn write_count(&self) -> u64 {
        self.write_count.load(AtomicOrdering::SeqCst)
    }

    /// Fails the `n`-th create call from now (1 = the next one), once.
    pub fn fail_create_in(&self, n: u64) {
        *self.fail_create_in.lock().unwrap() = Some(n);
    }

    /// Seeds a document as if another device had written it. Does not count
    /// as a remote write and ignores the connectivity flag.
    pub fn seed(&self, collection: Collection, document: Value) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection)
            .or_default()
            .push(document);
    }

    /// Snapshot of a collection's documents.
    pub fn documents(&self, collection: Collection) -> Vec<Value> {
        self.collections
            .lock()
            .unwrap()
            .get(&collection)
            .cloned()
            .unwrap_or_default()
    }

    fn require_online(&self) -> PersistenceResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(PersistenceError::unavailable("store is offline"))
        }
    }

    fn next_server_id(&self) -> String {
        format!(
            "srv-{}",
            self.next_id.fetch_add(1, AtomicOrdering::SeqCst) + 1
        )
    }
}

#[async_trait]
impl PersistenceService for MemoryStore {
    async fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
        ordering: Option<&Ordering>,
    ) -> PersistenceResult<Vec<Value>> {
        self.require_online()?;
        let mut matches: Vec<Value> = self
            .documents(collection)
            .into_iter()
            .filter(|doc| filters.iter().all(|f| f.matches(doc)))
            .collect();

        if let Some(ordering) = ordering {
            matches.sort_by(|a, b| {
                let left = a.get(&ordering.field).and_then(Value::as_str).unwrap_or("");
                let right = b.get(&ordering.field).and_then(Value::as_str).unwrap_or("");
                match ordering.direction {
                    SortDirection::Ascending => left.cmp(right),
                    SortDirection::Descending => right.cmp(left),
                }
            });
        }
        Ok(matches)
    }

    async fn get_by_id(
        &self,
        collection: Collection,
        id: &str,
    ) -> PersistenceResult<Option<Value>> {
        self.require_online()?;
        Ok(self
            .documents(collection)
            .into_iter()
            .find(|doc| doc_id(doc) == Some(id)))
    }

    async fn create(&self, collection: Collection, mut document: Value) -> PersistenceResult<String> {
        self.require_online()?;
        {
            let mut fail_in = self.fail_create_in.lock().unwrap();
            if let Some(countdown) = fail_in.as_mut() {
                *countdown = countdown.saturating_sub(1);
                if *countdown == 0 {
                    *fail_in = None;
                    return Err(PersistenceError::rejected("scripted create failure"));
                }
            }
        }

        let id = self.next_server_id();
        if let Some(map) = document.as_object_mut() {
            map.insert("id".to_string(), Value::String(id.clone()));
        } else {
            return Err(PersistenceError::rejected("document must be a JSON object"));
        }
        self.collections
            .lock()
            .unwrap()
            .entry(collection)
            .or_default()
            .push(document);
        self.write_count.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(id)
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        partial: Value,
    ) -> PersistenceResult<()> {
        self.require_online()?;
        let mut collections = self.collections.lock().unwrap();
        let documents = collections.entry(collection).or_default();
        let Some(target) = documents.iter_mut().find(|doc| doc_id(doc) == Some(id)) else {
            return Err(PersistenceError::not_found(collection.as_str(), id));
        };
        merge_partial(target, &partial);
        self.write_count.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn delete(&self, collection: Collection, id: &str) -> PersistenceResult<()> {
        self.require_online()?;
        let mut collections = self.collections.lock().unwrap();
        let documents = collections.entry(collection).or_default();
        documents.retain(|doc| doc_id(doc) != Some(id));
        self.write_count.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(())
    }

    fn is_online(&self) -> bool {
        self.online.load(AtomicOrdering::SeqCst)
    }

    async fn cache_get(&self, key: &str) -> PersistenceResult<Option<String>> {
        Ok(self.cache.lock().unwrap().get(key).cloned())
    }

    async fn cache_set(&self, key: &str, value: &str) -> PersistenceResult<()> {
        self.cache
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn cache_remove(&self, key: &str) -> PersistenceResult<()> {
        self.cache.lock().unwrap().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn queries_filter_and_order() {
        let store = MemoryStore::new();
        store.seed(
            Collection::Transactions,
            json!({"id": "t1", "accountId": "a1", "date": "2026-01-01"}),
        );
        store.seed(
            Collection::Transactions,
            json!({"id": "t2", "accountId": "a1", "date": "2026-02-01"}),
        );
        store.seed(
            Collection::Transactions,
            json!({"id": "t3", "accountId": "a2", "date": "2026-03-01"}),
        );

        let result = store
            .query(
                Collection::Transactions,
                &[Filter::eq("accountId", "a1")],
                Some(&Ordering::descending("date")),
            )
            .await
            .expect("query");
        let ids: Vec<_> = result.iter().map(|d| d["id"].as_str().unwrap()).collect();
        assert_eq!(ids, vec!["t2", "t1"]);
    }

    #[tokio::test]
    async fn offline_store_refuses_remote_calls_but_serves_cache() {
        let store = MemoryStore::new();
        store.set_online(false);

        assert!(store
            .query(Collection::Accounts, &[], None)
            .await
            .is_err());

        store.cache_set("k", "v").await.expect("cache set");
        assert_eq!(store.cache_get("k").await.expect("cache get"), Some("v".to_string()));
    }

    #[tokio::test]
    async fn scripted_create_failure_fires_once() {
        let store = MemoryStore::new();
        store.fail_create_in(2);

        assert!(store
            .create(Collection::Accounts, json!({"ownerId": "u1"}))
            .await
            .is_ok());
        assert!(store
            .create(Collection::Accounts, json!({"ownerId": "u1"}))
            .await
            .is_err());
        assert!(store
            .create(Collection::Accounts, json!({"ownerId": "u1"}))
            .await
            .is_ok());
    }
}
