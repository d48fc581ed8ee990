//! Batches of mutations applied atomically.

use crate::error::Result;
use crate::types::{AnyEntity, Entity, Key};
use std::sync::Arc;

/// A queued batch operation.
#[derive(Clone, Debug)]
pub enum BatchOp {
    Put {
        key: Key,
        entity: Arc<dyn AnyEntity>,
    },
    /// The deleted value is resolved when the batch is written.
    Delete { key: Key },
}

impl BatchOp {
    pub fn key(&self) -> &Key {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// Ordered queue of puts and deletes.
///
/// Nothing is dispatched or applied until the batch is written with
/// [`Database::write_batch`](crate::Database::write_batch).
#[derive(Clone, Debug, Default)]
pub struct Batch {
    ops: Vec<BatchOp>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a put.
    pub fn put<T: Entity>(&mut self, entity: T) -> Result<Key> {
        self.put_shared(Arc::new(entity))
    }

    /// Queue a put of a shared value; listeners see this exact instance.
    pub fn put_shared<T: Entity>(&mut self, entity: Arc<T>) -> Result<Key> {
        let key = Key::of(entity.as_ref())?;
        self.ops.push(BatchOp::Put {
            key: key.clone(),
            entity,
        });
        Ok(key)
    }

    /// Queue a delete.
    pub fn delete(&mut self, key: &Key) {
        self.ops.push(BatchOp::Delete { key: key.clone() });
    }

    /// Queue a delete of the entity's key.
    pub fn delete_it<T: Entity>(&mut self, entity: &T) -> Result<Key> {
        let key = Key::of(entity)?;
        self.delete(&key);
        Ok(key)
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub(crate) fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}
