//! Identifier-keyed merge of document sets.

use log::warn;
use serde_json::Value;
use std::collections::HashMap;

use crate::documents::doc_id;

/// Secondary ordering applied to a merged result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOrdering {
    /// Existing entries first, then previously-unseen incoming entries, each
    /// group in its original order.
    InsertionOrder,
    /// Descending by the named date field (transactions use occurrence date).
    DateDescending(&'static str),
}

/// Merges `incoming` into `existing`, keyed by document identifier.
///
/// When both sides carry the same id the incoming record wins, in place, so
/// a fresh server page always supersedes a stale cached copy. Applying the
/// same incoming set twice yields the same result. Documents without an id
/// cannot be deduplicated and are dropped.
pub fn merge_by_identifier(
    existing: Vec<Value>,
    incoming: Vec<Value>,
    ordering: MergeOrdering,
) -> Vec<Value> {
    let mut merged: Vec<Value> = Vec::with_capacity(existing.len() + incoming.len());
    let mut index_by_id: HashMap<String, usize> = HashMap::new();

    for document in existing.into_iter().chain(incoming) {
        let Some(id) = doc_id(&document) else {
            warn!("dropping document without an id during merge");
            continue;
        };
        match index_by_id.get(id) {
            Some(&position) => merged[position] = document,
            None => {
                index_by_id.insert(id.to_string(), merged.len());
                merged.push(document);
            }
        }
    }

    if let MergeOrdering::DateDescending(field) = ordering {
        merged.sort_by(|a, b| {
            let date_a = a.get(field).and_then(Value::as_str).unwrap_or("");
            let date_b = b.get(field).and_then(Value::as_str).unwrap_or("");
            date_b.cmp(date_a)
        });
    }

    merged
}
