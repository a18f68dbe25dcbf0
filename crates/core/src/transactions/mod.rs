//! Transaction domain model and document normalization.

mod service;

pub use service::{NewTransaction, TransactionService, TransactionUpdate};

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cache::CollectionView;
use crate::documents::{doc_id, str_field};
use crate::errors::{Error, Result};
use crate::money::parse_magnitude;
use crate::persistence::{Collection, Filter, Ordering};

/// Direction of a transaction. Amounts are stored as non-negative
/// magnitudes; the sign lives here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Income,
    Expense,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "income" => Some(TransactionKind::Income),
            "expense" => Some(TransactionKind::Expense),
            _ => None,
        }
    }
}

/// A single income or expense entry against an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub account_id: String,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub amount: Decimal,
    pub date: NaiveDate,
    #[serde(default)]
    pub deleted: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl Transaction {
    /// Normalizes a raw store document. Fails with `Malformed` on a missing
    /// reference, unrecognized type, or unparseable amount.
    pub fn from_document(document: &Value) -> Result<Self> {
        let id = doc_id(document)
            .ok_or_else(|| Error::malformed("transaction document missing 'id'"))?;
        let account_id = str_field(document, "accountId").ok_or_else(|| {
            Error::malformed(format!("transaction '{}' missing 'accountId'", id))
        })?;
        let kind = str_field(document, "type")
            .and_then(TransactionKind::parse)
            .ok_or_else(|| {
                Error::malformed(format!("transaction '{}' has unrecognized type", id))
            })?;
        let amount = document
            .get("amount")
            .and_then(parse_magnitude)
            .ok_or_else(|| {
                Error::malformed(format!("transaction '{}' has unparseable amount", id))
            })?;
        let date = parse_occurrence_date(document).ok_or_else(|| {
            Error::malformed(format!("transaction '{}' has unparseable date", id))
        })?;

        Ok(Transaction {
            id: id.to_string(),
            account_id: account_id.to_string(),
            kind,
            amount,
            date,
            deleted: crate::documents::is_deleted(document),
            created_at: str_field(document, "createdAt").unwrap_or_default().to_string(),
            updated_at: str_field(document, "updatedAt").unwrap_or_default().to_string(),
        })
    }

    pub fn to_document(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

fn parse_occurrence_date(document: &Value) -> Option<NaiveDate> {
    let raw = str_field(document, "date")?;
    // Stored either as a plain ISO date or a full timestamp.
    raw.parse::<NaiveDate>()
        .ok()
        .or_else(|| raw.get(..10)?.parse::<NaiveDate>().ok())
}

/// The signed contribution of one raw transaction document to its account's
/// balance: positive for income, negative for expense, magnitude rounded to
/// 2 decimal places before signing.
///
/// Fails with `Malformed` on an unrecognized type or a missing/unparseable
/// amount; the reconciliation fold skips and tallies those without
/// aborting.
pub fn signed_amount(document: &Value) -> Result<Decimal> {
    let kind = str_field(document, "type")
        .and_then(TransactionKind::parse)
        .ok_or_else(|| Error::malformed("unrecognized transaction type"))?;
    let amount = document
        .get("amount")
        .and_then(parse_magnitude)
        .ok_or_else(|| Error::malformed("missing or unparseable transaction amount"))?;
    Ok(match kind {
        TransactionKind::Income => amount,
        TransactionKind::Expense => -amount,
    })
}

/// The collection slice holding one account's transactions, newest first.
pub fn account_view(account_id: &str) -> CollectionView {
    CollectionView::new(
        Collection::Transactions,
        vec![Filter::eq("accountId", account_id)],
        Some(Ordering::descending("date")),
    )
}
