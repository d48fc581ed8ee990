//! Main Database struct tying the store and its listeners together.

use crate::batch::{Batch, BatchOp};
use crate::error::{DbError, Result};
use crate::listeners::{
    Dispatcher, ListenerBuilder, ListenerRegistry, Mutation, PendingMutation, StreamConfig,
};
use crate::types::{AnyEntity, Entity, Family, Key, MutationKind};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Database configuration.
#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    /// Name used in logs.
    pub name: String,

    /// Defaults for listener event streams.
    pub stream: StreamConfig,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            stream: StreamConfig::default(),
        }
    }
}

/// An in-memory document database with mutation listeners.
///
/// Every put and delete, single or batched, goes through the listener
/// dispatcher: will hooks, then the write, then did hooks. No lock is held
/// while hooks run, so a hook may read the database, mutate it, register
/// listeners, or close its own subscription.
pub struct Database {
    /// Database configuration.
    config: DatabaseConfig,

    /// Stored entities by key.
    entities: RwLock<HashMap<Key, Arc<dyn AnyEntity>>>,

    /// Dispatcher over this database's listener registry.
    dispatcher: Dispatcher,

    /// Set once by `close`.
    closed: AtomicBool,
}

impl Database {
    /// Create an empty database with the default configuration.
    pub fn new() -> Self {
        Self::with_config(DatabaseConfig::default())
    }

    /// Create an empty database.
    pub fn with_config(config: DatabaseConfig) -> Self {
        let registry = Arc::new(ListenerRegistry::with_stream_config(config.stream.clone()));
        debug!(name = %config.name, "Database opened");

        Self {
            config,
            entities: RwLock::new(HashMap::new()),
            dispatcher: Dispatcher::new(registry),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    // --- Entity Operations ---

    /// Put an entity, returning its key.
    pub fn put<T: Entity>(&self, entity: T) -> Result<Key> {
        self.put_shared(Arc::new(entity))
    }

    /// Put a shared entity; listeners see this exact instance.
    pub fn put_shared<T: Entity>(&self, entity: Arc<T>) -> Result<Key> {
        self.ensure_open()?;

        let key = Key::of(entity.as_ref())?;
        let mutation = Mutation::put(key.clone(), entity);
        self.dispatcher
            .run(vec![mutation], false, |pending| Ok(self.apply(pending)))?;

        Ok(key)
    }

    /// Delete the entity stored under `key`.
    ///
    /// Delete-it hooks receive the stored value. Returns false, without
    /// notifying anyone, if nothing is stored there. Also returns false, with
    /// no did hooks, if a will hook removed the key first.
    pub fn delete(&self, key: &Key) -> Result<bool> {
        self.ensure_open()?;

        let Some(existing) = self.entities.read().get(key).cloned() else {
            trace!(%key, "Delete of missing key");
            return Ok(false);
        };

        self.delete_with(key.clone(), existing)
    }

    /// Delete the stored entity with the same key as `entity`.
    ///
    /// Delete-it hooks receive a copy of `entity` rather than the stored value.
    pub fn delete_it<T: Entity + Clone>(&self, entity: &T) -> Result<bool> {
        self.delete_shared(Arc::new(entity.clone()))
    }

    /// Like [`delete_it`](Self::delete_it); listeners see this exact instance.
    pub fn delete_shared<T: Entity>(&self, entity: Arc<T>) -> Result<bool> {
        self.ensure_open()?;

        let key = Key::of(entity.as_ref())?;
        if !self.contains(&key) {
            trace!(%key, "Delete of missing key");
            return Ok(false);
        }

        self.delete_with(key, entity)
    }

    fn delete_with(&self, key: Key, entity: Arc<dyn AnyEntity>) -> Result<bool> {
        let mutation = Mutation::delete(key, Some(entity));
        let applied = self
            .dispatcher
            .run(vec![mutation], false, |pending| Ok(self.apply(pending)))?;

        Ok(applied.first().copied().unwrap_or(false))
    }

    /// Get an entity by key.
    pub fn get<T: Entity>(&self, key: &Key) -> Option<Arc<T>> {
        let entity = self.entities.read().get(key).cloned()?;
        entity.into_any_arc().downcast::<T>().ok()
    }

    /// Check if a key is stored.
    pub fn contains(&self, key: &Key) -> bool {
        self.entities.read().contains_key(key)
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.entities.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.read().is_empty()
    }

    /// Key an entity is stored under.
    pub fn new_key<T: Entity>(&self, entity: &T) -> Result<Key> {
        Key::of(entity)
    }

    // --- Batch Operations ---

    /// Start an empty batch.
    pub fn batch(&self) -> Batch {
        Batch::new()
    }

    /// Write a batch atomically.
    ///
    /// Will hooks fire for every operation in enqueue order before anything
    /// is applied; did hooks fire in the same order once the whole batch is
    /// applied. A failing will hook leaves the database untouched.
    ///
    /// A delete is resolved against earlier puts and deletes in the batch,
    /// then against the store; deletes of missing keys are dropped.
    pub fn write_batch(&self, batch: Batch) -> Result<()> {
        self.ensure_open()?;

        let mutations = self.resolve_batch(batch);
        if mutations.is_empty() {
            return Ok(());
        }

        self.dispatcher
            .run(mutations, true, |pending| Ok(self.apply(pending)))?;
        Ok(())
    }

    /// Fill a batch in `f` and write it once `f` returns.
    pub fn exec_batch<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Batch) -> Result<R>,
    {
        let mut batch = self.batch();
        let out = f(&mut batch)?;
        self.write_batch(batch)?;
        Ok(out)
    }

    fn resolve_batch(&self, batch: Batch) -> Vec<Mutation> {
        let entities = self.entities.read();
        let mut overlay: HashMap<Key, Option<Arc<dyn AnyEntity>>> = HashMap::new();
        let mut mutations = Vec::with_capacity(batch.len());

        for op in batch.into_ops() {
            match op {
                BatchOp::Put { key, entity } => {
                    overlay.insert(key.clone(), Some(Arc::clone(&entity)));
                    mutations.push(Mutation::put(key, entity));
                }
                BatchOp::Delete { key } => {
                    let existing = match overlay.get(&key) {
                        Some(pending) => pending.clone(),
                        None => entities.get(&key).cloned(),
                    };
                    match existing {
                        Some(entity) => {
                            overlay.insert(key.clone(), None);
                            mutations.push(Mutation::delete(key, Some(entity)));
                        }
                        None => trace!(%key, "Dropping batch delete of missing key"),
                    }
                }
            }
        }

        mutations
    }

    /// Apply mutations whose will phase completed, under one write lock.
    ///
    /// Returns, per mutation, whether it changed the store. A delete whose key
    /// is already gone (removed by a will hook) has no effect.
    fn apply(&self, pending: &[PendingMutation]) -> Vec<bool> {
        let mut entities = self.entities.write();

        let applied: Vec<bool> = pending
            .iter()
            .map(PendingMutation::mutation)
            .map(|mutation| match (mutation.kind(), mutation.entity()) {
                (MutationKind::Put, Some(entity)) => {
                    entities.insert(mutation.key().clone(), Arc::clone(entity));
                    true
                }
                (MutationKind::Put, None) => false,
                (MutationKind::Delete, _) => entities.remove(mutation.key()).is_some(),
            })
            .collect();

        debug!(
            name = %self.config.name,
            applied = applied.iter().filter(|a| **a).count(),
            entities = entities.len(),
            "Mutations applied"
        );

        applied
    }

    // --- Listener Operations ---

    /// Listen to one concrete entity type.
    pub fn on<T: Entity>(&self) -> ListenerBuilder<'_, T> {
        self.listeners().on::<T>()
    }

    /// Listen to every member of a supertype family.
    pub fn on_family<F: Family>(&self) -> ListenerBuilder<'_, F::View> {
        self.listeners().on_family::<F>()
    }

    /// Listen to every entity type.
    pub fn on_all(&self) -> ListenerBuilder<'_, dyn AnyEntity> {
        self.listeners().on_all()
    }

    /// Number of active listeners.
    pub fn listener_count(&self) -> usize {
        self.listeners().listener_count()
    }

    pub fn listeners(&self) -> &Arc<ListenerRegistry> {
        self.dispatcher.registry()
    }

    // --- Lifecycle ---

    /// Close the database, deactivating every listener.
    ///
    /// Further mutations and registrations fail with [`DbError::Closed`].
    /// Reads keep working. Idempotent; also runs on drop.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.listeners().close_all();
        debug!(name = %self.config.name, "Database closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(DbError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.close();
    }
}
