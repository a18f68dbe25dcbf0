//! Abstract persistence service consumed by the engines.
//!
//! The hosted document database, its transport, and its offline layer all
//! live behind this trait. The core never sees a wire format; it exchanges
//! `serde_json::Value` documents and constrains only the logical schema.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Document collections known to the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Accounts,
    Transactions,
    Loans,
    Projects,
    WelfarePools,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Accounts => "accounts",
            Collection::Transactions => "transactions",
            Collection::Loans => "loans",
            Collection::Projects => "projects",
            Collection::WelfarePools => "welfare_pools",
        }
    }
}

/// A single query predicate.
///
/// `Missing` matches documents that lack the field entirely (or carry JSON
/// null), which is how legacy records written before a field existed are
/// selected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "op")]
pub enum Filter {
    Eq { field: String, value: Value },
    Missing { field: String },
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn missing(field: impl Into<String>) -> Self {
        Filter::Missing {
            field: field.into(),
        }
    }

    /// Whether a document satisfies this predicate.
    pub fn matches(&self, document: &Value) -> bool {
        match self {
            Filter::Eq { field, value } => document.get(field) == Some(value),
            Filter::Missing { field } => matches!(
                document.get(field),
                None | Some(Value::Null)
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    Descending,
}

/// Requested result ordering for a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ordering {
    pub field: String,
    pub direction: SortDirection,
}

impl Ordering {
    pub fn descending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Descending,
        }
    }

    pub fn ascending(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: SortDirection::Ascending,
        }
    }
}

/// Result type alias for persistence operations.
pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

/// Failures reported by a persistence service implementation.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// The remote store could not be reached.
    #[error("persistence service unavailable: {0}")]
    Unavailable(String),

    /// The target document does not exist.
    #[error("document '{id}' not found in '{collection}'")]
    NotFound { collection: String, id: String },

    /// The remote store rejected the write.
    #[error("write rejected: {0}")]
    Rejected(String),

    /// Local cache I/O failure.
    #[error("cache I/O error: {0}")]
    Io(String),
}

impl PersistenceError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn not_found(collection: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }
}

/// Minimal surface the engines require from the hosting application's
/// persistence layer.
///
/// All document methods are async and awaited sequentially by the callers.
/// `is_online` is a synchronous predicate; the core does not probe the
/// network itself.
#[async_trait]
pub trait PersistenceService: Send + Sync {
    /// Documents matching every filter, in the requested order.
    async fn query(
        &self,
        collection: Collection,
        filters: &[Filter],
        ordering: Option<&Ordering>,
    ) -> PersistenceResult<Vec<Value>>;

    /// A single document by identifier, or `None` when absent.
    async fn get_by_id(&self, collection: Collection, id: &str) -> PersistenceResult<Option<Value>>;

    /// Stores a new document and returns the server-assigned identifier.
    async fn create(&self, collection: Collection, document: Value) -> PersistenceResult<String>;

    /// Merges `partial` into the stored document.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        partial: Value,
    ) -> PersistenceResult<()>;

    async fn delete(&self, collection: Collection, id: &str) -> PersistenceResult<()>;

    /// Current connectivity as reported by the host platform.
    fn is_online(&self) -> bool;

    async fn cache_get(&self, key: &str) -> PersistenceResult<Option<String>>;

    async fn cache_set(&self, key: &str, value: &str) -> PersistenceResult<()>;

    async fn cache_remove(&self, key: &str) -> PersistenceResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn eq_filter_matches_exact_value() {
        let doc = json!({"scope": "personal", "ownerId": "u1"});
        assert!(Filter::eq("scope", "personal").matches(&doc));
        assert!(!Filter::eq("scope", "nuclear").matches(&doc));
    }

    #[test]
    fn missing_filter_matches_absent_and_null_fields() {
        assert!(Filter::missing("scope").matches(&json!({"ownerId": "u1"})));
        assert!(Filter::missing("scope").matches(&json!({"scope": null})));
        assert!(!Filter::missing("scope").matches(&json!({"scope": "personal"})));
    }

    #[test]
    fn collection_names_match_backend_contract() {
        let actual = [
            Collection::Accounts,
            Collection::Transactions,
            Collection::Loans,
            Collection::Projects,
            Collection::WelfarePools,
        ]
        .iter()
        .map(|c| serde_json::to_string(c).expect("serialize collection"))
        .collect::<Vec<_>>();

        let expected = vec![
            "\"accounts\"",
            "\"transactions\"",
            "\"loans\"",
            "\"projects\"",
            "\"welfare_pools\"",
        ];

        assert_eq!(actual, expected);
        assert_eq!(Collection::WelfarePools.as_str(), "welfare_pools");
    }
}
