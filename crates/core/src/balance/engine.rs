//! The balance reconciliation engine.
//!
//! This engine is the single authority over account balances. Code paths
//! that mutate transactions call it instead of hand-adjusting the stored
//! balance; incremental adjustment is exactly the drift class this component
//! exists to eliminate.

use chrono::Utc;
use log::{debug, error, warn};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::accounts::{Account, AccountScope};
use crate::cache::{merge_by_identifier, MergeOrdering};
use crate::documents::{doc_id, is_deleted};
use crate::errors::{Error, Result};
use crate::money::{self, round_money};
use crate::persistence::{Collection, Filter, PersistenceService};
use crate::transactions::signed_amount;

/// Drift below this threshold is not written back.
pub const BALANCE_EPSILON: Decimal = dec!(0.001);

/// Outcome of recalculating a single account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecalculatedBalance {
    pub account_id: String,
    pub balance: Decimal,
    pub previous_balance: Decimal,
    /// Whether a corrective write was performed.
    pub updated: bool,
    /// Malformed transaction records skipped during the fold.
    pub malformed_skipped: usize,
}

/// Which accounts a batch recalculation covers.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileTarget {
    Owner(String),
    Scope(AccountScope),
    Accounts(Vec<String>),
}

/// Batch recalculation summary. Per-account failures never abort the batch;
/// they are tallied here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub recalculated: usize,
    pub updated: usize,
    pub failed: usize,
    pub malformed_skipped: usize,
}

pub struct BalanceReconciler {
    persistence: Arc<dyn PersistenceService>,
}

impl BalanceReconciler {
    pub fn new(persistence: Arc<dyn PersistenceService>) -> Self {
        Self { persistence }
    }

    /// Recomputes one account's balance by replaying its full non-deleted
    /// transaction set over the immutable initial balance.
    ///
    /// Every intermediate total is rounded to 2 decimal places, half away
    /// from zero, so the result is independent of transaction ordering.
    /// Writes the corrected balance back only when it drifts from the stored
    /// value by more than [`BALANCE_EPSILON`]; calling this twice in a row
    /// performs no second write.
    pub async fn recalculate_account_balance(
        &self,
        account_id: &str,
    ) -> Result<RecalculatedBalance> {
        let document = self
            .persistence
            .get_by_id(Collection::Accounts, account_id)
            .await?
            .ok_or_else(|| Error::not_found("account", account_id))?;
        let account = Account::from_document(&document)?;

        let transactions = self
            .persistence
            .query(
                Collection::Transactions,
                &[Filter::eq("accountId", account_id)],
                None,
            )
            .await?;

        let (balance, malformed_skipped) = fold_balance(account.initial_balance, &transactions);

        let drift = (balance - account.balance).abs();
        let updated = drift > BALANCE_EPSILON;
        if updated {
            debug!(
                "correcting balance of account '{}': {} -> {} (drift {})",
                account_id, account.balance, balance, drift
            );
            self.persistence
                .update(
                    Collection::Accounts,
                    account_id,
                    json!({
                        "balance": money::to_json(balance),
                        "updatedAt": Utc::now().to_rfc3339(),
                    }),
                )
                .await?;
        } else {
            debug!(
                "balance of account '{}' already consistent at {}",
                account_id, account.balance
            );
        }

        Ok(RecalculatedBalance {
            account_id: account_id.to_string(),
            balance,
            previous_balance: account.balance,
            updated,
            malformed_skipped,
        })
    }

    /// Recalculates every account visible in the target, continuing past
    /// per-account failures.
    pub async fn recalculate_all(&self, target: ReconcileTarget) -> Result<ReconcileSummary> {
        let account_ids = self.resolve_target(target).await?;
        let mut summary = ReconcileSummary::default();

        for account_id in account_ids {
            match self.recalculate_account_balance(&account_id).await {
                Ok(outcome) => {
                    summary.recalculated += 1;
                    if outcome.updated {
                        summary.updated += 1;
                    }
                    summary.malformed_skipped += outcome.malformed_skipped;
                }
                Err(err) => {
                    error!(
                        "failed to recalculate balance for account '{}': {}. Continuing.",
                        account_id, err
                    );
                    summary.failed += 1;
                }
            }
        }

        debug!(
            "balance recalculation pass done: {} recalculated, {} corrected, {} failed, {} malformed skipped",
            summary.recalculated, summary.updated, summary.failed, summary.malformed_skipped
        );
        Ok(summary)
    }

    async fn resolve_target(&self, target: ReconcileTarget) -> Result<Vec<String>> {
        let documents = match target {
            ReconcileTarget::Accounts(ids) => return Ok(ids),
            ReconcileTarget::Owner(owner_id) => {
                self.persistence
                    .query(
                        Collection::Accounts,
                        &[Filter::eq("ownerId", owner_id)],
                        None,
                    )
                    .await?
            }
            ReconcileTarget::Scope(scope) => {
                let explicit = self
                    .persistence
                    .query(
                        Collection::Accounts,
                        &[Filter::eq("scope", scope.as_str())],
                        None,
                    )
                    .await?;
                // Legacy documents without a scope belong to the personal set.
                if scope == AccountScope::Personal {
                    let legacy = self
                        .persistence
                        .query(Collection::Accounts, &[Filter::missing("scope")], None)
                        .await?;
                    merge_by_identifier(explicit, legacy, MergeOrdering::InsertionOrder)
                } else {
                    explicit
                }
            }
        };

        Ok(documents
            .iter()
            .filter_map(doc_id)
            .map(str::to_string)
            .collect())
    }
}

/// Replays raw transaction documents over an initial balance.
///
/// Soft-deleted records are excluded; malformed records (unrecognized type,
/// unparseable amount) are skipped with a warning and tallied, never
/// aborting the fold.
pub(crate) fn fold_balance(initial_balance: Decimal, transactions: &[Value]) -> (Decimal, usize) {
    let mut balance = round_money(initial_balance);
    let mut malformed = 0usize;

    for document in transactions {
        if is_deleted(document) {
            continue;
        }
        match signed_amount(document) {
            Ok(signed) => {
                balance = round_money(balance + signed);
            }
            Err(err) => {
                warn!(
                    "skipping malformed transaction '{}' during reconciliation: {}",
                    doc_id(document).unwrap_or("<no id>"),
                    err
                );
                malformed += 1;
            }
        }
    }

    (balance, malformed)
}
