//! Account domain model and document normalization.

mod service;

pub use service::{AccountService, AccountUpdate, NewAccount};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CollectionView;
use crate::documents::{doc_id, str_field, str_list_field};
use crate::errors::{Error, Result};
use crate::money::parse_money;
use crate::persistence::{Collection, Filter};

/// Sharing group an account belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountScope {
    Personal,
    Nuclear,
    Extended,
}

impl AccountScope {
    pub const ALL: [AccountScope; 3] = [
        AccountScope::Personal,
        AccountScope::Nuclear,
        AccountScope::Extended,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AccountScope::Personal => "personal",
            AccountScope::Nuclear => "nuclear",
            AccountScope::Extended => "extended",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "personal" => Some(AccountScope::Personal),
            "nuclear" => Some(AccountScope::Nuclear),
            "extended" => Some(AccountScope::Extended),
            _ => None,
        }
    }
}

/// A shared family account.
///
/// `balance` is a derived cache of `initial_balance` plus the signed sum of
/// all non-deleted transactions; only the reconciliation engine writes it
/// back to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub owner_id: String,
    pub scope: AccountScope,
    pub currency: String,
    pub initial_balance: Decimal,
    pub balance: Decimal,
    pub shared_with: Vec<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Account {
    /// Normalizes a raw store document into an account.
    ///
    /// This is the single place where legacy documents are migrated: records
    /// written before the `scope` field existed default to `Personal` here
    /// and nowhere else.
    pub fn from_document(document: &Value) -> Result<Self> {
        let id = doc_id(document)
            .ok_or_else(|| Error::malformed("account document missing 'id'"))?;
        let owner_id = str_field(document, "ownerId")
            .ok_or_else(|| Error::malformed(format!("account '{}' missing 'ownerId'", id)))?;
        let currency = str_field(document, "currency")
            .ok_or_else(|| Error::malformed(format!("account '{}' missing 'currency'", id)))?;

        let scope = match str_field(document, "scope") {
            None => AccountScope::Personal,
            Some(raw) => AccountScope::parse(raw).ok_or_else(|| {
                Error::malformed(format!("account '{}' has unknown scope '{}'", id, raw))
            })?,
        };

        let initial_balance = document
            .get("initialBalance")
            .and_then(parse_money)
            .unwrap_or_default();
        let balance = document
            .get("balance")
            .and_then(parse_money)
            .unwrap_or(initial_balance);

        Ok(Account {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            scope,
            currency: currency.to_string(),
            initial_balance,
            balance,
            shared_with: str_list_field(document, "sharedWith"),
            created_at: str_field(document, "createdAt").unwrap_or_default().to_string(),
            updated_at: str_field(document, "updatedAt").unwrap_or_default().to_string(),
        })
    }

    pub fn to_document(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Whether the actor may read or mutate this account.
    pub fn permits(&self, actor: &str) -> bool {
        self.owner_id == actor || self.shared_with.iter().any(|shared| shared == actor)
    }
}

/// The collection slice holding accounts of one scope.
pub fn scope_view(scope: AccountScope) -> CollectionView {
    CollectionView::new(
        Collection::Accounts,
        vec![Filter::eq("scope", scope.as_str())],
        None,
    )
}

/// Legacy accounts written before the scope field existed. Folded into the
/// personal result set on read.
pub fn legacy_scope_view() -> CollectionView {
    CollectionView::new(Collection::Accounts, vec![Filter::missing("scope")], None)
}

/// All scope slices, scanned when an operation knows an account id but not
/// its scope.
pub fn all_scope_views() -> Vec<CollectionView> {
    AccountScope::ALL.iter().copied().map(scope_view).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn absent_scope_defaults_to_personal() {
        let account = Account::from_document(&json!({
            "id": "a1",
            "ownerId": "u1",
            "currency": "EUR",
            "initialBalance": 100,
        }))
        .expect("normalize");
        assert_eq!(account.scope, AccountScope::Personal);
        assert_eq!(account.balance, dec!(100));
    }

    #[test]
    fn unknown_scope_is_malformed() {
        let err = Account::from_document(&json!({
            "id": "a1",
            "ownerId": "u1",
            "currency": "EUR",
            "scope": "galactic",
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Malformed(_)));
    }

    #[test]
    fn string_amounts_normalize() {
        let account = Account::from_document(&json!({
            "id": "a1",
            "ownerId": "u1",
            "currency": "EUR",
            "scope": "nuclear",
            "initialBalance": "250.50",
            "balance": 300.25,
        }))
        .expect("normalize");
        assert_eq!(account.initial_balance, dec!(250.50));
        assert_eq!(account.balance, dec!(300.25));
    }

    #[test]
    fn sharing_grants_permission() {
        let account = Account::from_document(&json!({
            "id": "a1",
            "ownerId": "u1",
            "currency": "EUR",
            "sharedWith": ["u2"],
        }))
        .expect("normalize");
        assert!(account.permits("u1"));
        assert!(account.permits("u2"));
        assert!(!account.permits("u3"));
    }
}
