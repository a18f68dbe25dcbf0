//! Local cache entries: scoped, keyed snapshots of collection slices.
//!
//! Entries serve reads while offline and absorb optimistic mutations; after
//! a drain they are reconciled against fresh server pages through
//! [`merge_by_identifier`].

mod merge;

pub use merge::{merge_by_identifier, MergeOrdering};

use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::documents::doc_id;
use crate::errors::Result;
use crate::money::{self, round_money};
use crate::persistence::{Collection, Filter, Ordering, PersistenceService};

/// Occurrence-date field used to order cached transactions.
const TRANSACTION_DATE_FIELD: &str = "date";

/// A scoped slice of a collection: the unit that gets cached, optimistically
/// mutated, and reloaded after a drain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionView {
    pub collection: Collection,
    pub filters: Vec<Filter>,
    pub ordering: Option<Ordering>,
}

impl CollectionView {
    pub fn new(collection: Collection, filters: Vec<Filter>, ordering: Option<Ordering>) -> Self {
        Self {
            collection,
            filters,
            ordering,
        }
    }

    /// Deterministic cache key for this slice. Two views over the same
    /// filters always share an entry, regardless of filter order.
    pub fn cache_key(&self) -> String {
        let mut parts: Vec<String> = self
            .filters
            .iter()
            .map(|filter| match filter {
                Filter::Eq { field, value } => format!("{}={}", field, value),
                Filter::Missing { field } => format!("{}?absent", field),
            })
            .collect();
        parts.sort();
        let fingerprint = if parts.is_empty() {
            "all".to_string()
        } else {
            parts.join("&")
        };
        format!("offline:{}:{}", self.collection.as_str(), fingerprint)
    }

    /// The value an equality filter pins for `field`, if any.
    pub fn filter_eq_value(&self, field: &str) -> Option<&Value> {
        self.filters.iter().find_map(|filter| match filter {
            Filter::Eq { field: f, value } if f == field => Some(value),
            _ => None,
        })
    }

    /// Whether any equality filter pins the given identifier.
    pub fn references_id(&self, id: &str) -> bool {
        self.filters.iter().any(|filter| {
            matches!(filter, Filter::Eq { value, .. } if value.as_str() == Some(id))
        })
    }

    /// Rewrites identifier values pinned by equality filters. Used when a
    /// server id supersedes a temporary one, which changes the cache key.
    pub fn rewrite_ids(&mut self, mapping: &std::collections::HashMap<String, String>) {
        for filter in &mut self.filters {
            if let Filter::Eq { value, .. } = filter {
                if let Some(replacement) = value.as_str().and_then(|s| mapping.get(s)) {
                    *value = Value::String(replacement.clone());
                }
            }
        }
    }

    /// Secondary sort applied when merging this view.
    pub fn merge_ordering(&self) -> MergeOrdering {
        match self.collection {
            Collection::Transactions => MergeOrdering::DateDescending(TRANSACTION_DATE_FIELD),
            _ => MergeOrdering::InsertionOrder,
        }
    }
}

/// Typed access to cached collection slices over the persistence service's
/// string cache surface.
#[derive(Clone)]
pub struct CollectionCache {
    persistence: Arc<dyn PersistenceService>,
}

impl CollectionCache {
    pub fn new(persistence: Arc<dyn PersistenceService>) -> Self {
        Self { persistence }
    }

    /// Cached documents for the view; absent or corrupt entries read as
    /// empty.
    pub async fn read(&self, view: &CollectionView) -> Result<Vec<Value>> {
        let key = view.cache_key();
        let Some(raw) = self.persistence.cache_get(&key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(documents) => Ok(documents),
            Err(err) => {
                warn!("discarding corrupt cache entry '{}': {}", key, err);
                self.persistence.cache_remove(&key).await?;
                Ok(Vec::new())
            }
        }
    }

    pub async fn write(&self, view: &CollectionView, documents: &[Value]) -> Result<()> {
        let raw = serde_json::to_string(documents)?;
        self.persistence.cache_set(&view.cache_key(), &raw).await?;
        Ok(())
    }

    /// Merges a freshly fetched server page into the cached entry and
    /// returns the merged set.
    pub async fn merge_remote(
        &self,
        view: &CollectionView,
        incoming: Vec<Value>,
    ) -> Result<Vec<Value>> {
        let existing = self.read(view).await?;
        let merged = merge_by_identifier(existing, incoming, view.merge_ordering());
        self.write(view, &merged).await?;
        Ok(merged)
    }

    /// Inserts or replaces a single document in the cached entry.
    pub async fn upsert_document(&self, view: &CollectionView, document: Value) -> Result<()> {
        let existing = self.read(view).await?;
        let merged = merge_by_identifier(existing, vec![document], view.merge_ordering());
        self.write(view, &merged).await
    }

    /// Removes a document from the cached entry, if present.
    pub async fn remove_document(&self, view: &CollectionView, id: &str) -> Result<()> {
        let mut documents = self.read(view).await?;
        documents.retain(|doc| doc_id(doc) != Some(id));
        self.write(view, &documents).await
    }

    /// Finds a cached document by id within one view.
    pub async fn find_document(&self, view: &CollectionView, id: &str) -> Result<Option<Value>> {
        let documents = self.read(view).await?;
        Ok(documents.into_iter().find(|doc| doc_id(doc) == Some(id)))
    }

    /// Drops the cached entry for a view entirely.
    pub async fn remove_entry(&self, view: &CollectionView) -> Result<()> {
        self.persistence.cache_remove(&view.cache_key()).await?;
        Ok(())
    }

    /// Rewrites an identifier everywhere it appears inside the cached entry.
    /// Used when a server id supersedes a temporary one.
    pub async fn rewrite_id(&self, view: &CollectionView, from: &str, to: &str) -> Result<()> {
        let mut documents = self.read(view).await?;
        if documents.is_empty() {
            return Ok(());
        }
        for document in &mut documents {
            crate::documents::rewrite_string_values(document, &|s| {
                (s == from).then(|| to.to_string())
            });
        }
        self.write(view, &documents).await
    }

    /// Applies a signed delta to the cached balance of one account inside
    /// the given view. Returns whether the account was found there.
    ///
    /// This only ever touches the cached copy: the remote balance is owned
    /// by the reconciliation engine.
    pub async fn adjust_balance(
        &self,
        view: &CollectionView,
        account_id: &str,
        delta: rust_decimal::Decimal,
    ) -> Result<bool> {
        let mut documents = self.read(view).await?;
        let mut found = false;
        for document in &mut documents {
            if doc_id(document) != Some(account_id) {
                continue;
            }
            let current = document
                .get("balance")
                .and_then(money::parse_money)
                .unwrap_or_default();
            if let Some(map) = document.as_object_mut() {
                map.insert(
                    "balance".to_string(),
                    money::to_json(round_money(current + delta)),
                );
                found = true;
            }
            break;
        }
        if found {
            self.write(view, &documents).await?;
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_deterministic_across_filter_order() {
        let a = CollectionView::new(
            Collection::Accounts,
            vec![Filter::eq("scope", "personal"), Filter::eq("ownerId", "u1")],
            None,
        );
        let b = CollectionView::new(
            Collection::Accounts,
            vec![Filter::eq("ownerId", "u1"), Filter::eq("scope", "personal")],
            None,
        );
        assert_eq!(a.cache_key(), b.cache_key());
        assert!(a.cache_key().starts_with("offline:accounts:"));
    }

    #[test]
    fn unfiltered_view_keys_as_all() {
        let view = CollectionView::new(Collection::Loans, vec![], None);
        assert_eq!(view.cache_key(), "offline:loans:all");
    }

    #[test]
    fn transaction_views_merge_date_descending() {
        let view = CollectionView::new(
            Collection::Transactions,
            vec![Filter::eq("accountId", "a1")],
            None,
        );
        assert_eq!(
            view.merge_ordering(),
            MergeOrdering::DateDescending("date")
        );
    }
}
