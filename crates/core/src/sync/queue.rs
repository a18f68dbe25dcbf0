//! Persisted FIFO outbox of pending operations.

use log::warn;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use crate::errors::Result;
use crate::persistence::PersistenceService;

use super::PendingOperation;

/// Cache key under which the outbox survives process restarts.
pub const OUTBOX_CACHE_KEY: &str = "sync:outbox";

/// The pending-operation queue. Strictly FIFO; persisted through the
/// persistence service's cache surface on every mutation.
pub struct OutboxQueue {
    persistence: Arc<dyn PersistenceService>,
    entries: VecDeque<PendingOperation>,
}

impl OutboxQueue {
    /// Restores the queue persisted by a previous process, or starts empty.
    pub async fn restore(persistence: Arc<dyn PersistenceService>) -> Result<Self> {
        let entries = match persistence.cache_get(OUTBOX_CACHE_KEY).await? {
            None => VecDeque::new(),
            Some(raw) => match serde_json::from_str::<VecDeque<PendingOperation>>(&raw) {
                Ok(entries) => entries,
                Err(err) => {
                    warn!("discarding corrupt outbox cache entry: {}", err);
                    VecDeque::new()
                }
            },
        };
        Ok(Self {
            persistence,
            entries,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn front(&self) -> Option<&PendingOperation> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingOperation> {
        self.entries.iter()
    }

    /// Appends an operation. The caller persists afterwards.
    pub fn push(&mut self, operation: PendingOperation) {
        self.entries.push_back(operation);
    }

    pub fn pop_front(&mut self) -> Option<PendingOperation> {
        self.entries.pop_front()
    }

    /// Rewrites temporary-identifier references in every queued operation.
    /// Called after each successful create during a drain so a pass halted
    /// midway never strands a dangling temporary reference.
    pub fn apply_mapping(&mut self, mapping: &HashMap<String, String>) {
        for entry in &mut self.entries {
            entry.resolve_temp_ids(mapping);
        }
    }

    /// Writes the queue through the cache surface; removes the entry when
    /// the queue has drained empty.
    pub async fn persist(&self) -> Result<()> {
        if self.entries.is_empty() {
            self.persistence.cache_remove(OUTBOX_CACHE_KEY).await?;
        } else {
            let raw = serde_json::to_string(&self.entries)?;
            self.persistence.cache_set(OUTBOX_CACHE_KEY, &raw).await?;
        }
        Ok(())
    }
}
