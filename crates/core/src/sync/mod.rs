//! Offline mutation queue and sync engine.
//!
//! Every mutation performed while disconnected becomes a [`PendingOperation`]
//! in a persisted FIFO outbox; the [`SyncEngine`] replays them strictly in
//! submission order once connectivity returns.

mod engine;
mod queue;

pub use engine::{DrainStatus, DrainSummary, SubmitOutcome, SyncEngine};
pub use queue::OutboxQueue;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::cache::CollectionView;
use crate::documents::rewrite_string_values;
use crate::persistence::Collection;

/// Prefix marking client-generated placeholder identifiers.
pub const TEMP_ID_PREFIX: &str = "temp-";

/// A fresh temporary identifier for an entity created while offline.
pub fn temp_id() -> String {
    format!("{}{}", TEMP_ID_PREFIX, Uuid::new_v4())
}

/// Whether an identifier is a client-generated placeholder awaiting a
/// server-assigned replacement.
pub fn is_temporary_id(id: &str) -> bool {
    id.starts_with(TEMP_ID_PREFIX)
}

/// Supported offline operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

/// One unit of offline work awaiting replay.
///
/// Ordering matters: later operations may reference entities created by
/// earlier ones through temporary identifiers, so the queue is drained
/// strictly FIFO.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub op_id: String,
    pub kind: OperationKind,
    pub collection: Collection,
    /// Target identifier; a temporary id for creates.
    pub entity_id: String,
    /// Full document for creates, partial document for updates.
    pub payload: Option<Value>,
    /// The collection slice this operation belongs to, for optimistic cache
    /// application and post-drain reload.
    pub view: CollectionView,
    pub queued_at: String,
}

impl PendingOperation {
    /// A create with a freshly assigned temporary identifier.
    pub fn create(collection: Collection, payload: Value, view: CollectionView) -> Self {
        Self {
            op_id: Uuid::now_v7().to_string(),
            kind: OperationKind::Create,
            collection,
            entity_id: temp_id(),
            payload: Some(payload),
            view,
            queued_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn update(
        collection: Collection,
        entity_id: impl Into<String>,
        partial: Value,
        view: CollectionView,
    ) -> Self {
        Self {
            op_id: Uuid::now_v7().to_string(),
            kind: OperationKind::Update,
            collection,
            entity_id: entity_id.into(),
            payload: Some(partial),
            view,
            queued_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn delete(
        collection: Collection,
        entity_id: impl Into<String>,
        view: CollectionView,
    ) -> Self {
        Self {
            op_id: Uuid::now_v7().to_string(),
            kind: OperationKind::Delete,
            collection,
            entity_id: entity_id.into(),
            payload: None,
            view,
            queued_at: Utc::now().to_rfc3339(),
        }
    }

    /// Substitutes every temporary identifier this operation references with
    /// its server-assigned replacement: in the target id, throughout the
    /// payload, and in the view's pinned filters.
    pub fn resolve_temp_ids(&mut self, mapping: &HashMap<String, String>) {
        if mapping.is_empty() {
            return;
        }
        if let Some(resolved) = mapping.get(&self.entity_id) {
            self.entity_id = resolved.clone();
        }
        if let Some(payload) = self.payload.as_mut() {
            rewrite_string_values(payload, &|s| mapping.get(s).cloned());
        }
        self.view.rewrite_ids(mapping);
    }
}
