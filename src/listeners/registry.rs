//! Listener registry and registration builder.

use crate::error::{DbError, ListenerError, Result};
use crate::types::{AnyEntity, Entity, Family, Key, TypeName};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::stream::{self, EventStream, StreamConfig};
use super::types::{HookContext, HookOutcome, Subscription, SubscriptionId, TypeFilter};

/// Why an erased hook did not complete.
pub(crate) enum HookError {
    /// The callback itself failed.
    Failed(ListenerError),
    /// The filter matched but the typed view could not be built.
    ViewMismatch { expected: &'static str },
}

pub(crate) type HookCallResult = std::result::Result<(), HookError>;

/// Callback over an entity value (puts and delete-it hooks).
pub(crate) type EntityHook =
    Box<dyn Fn(&dyn AnyEntity, &HookContext<'_>) -> HookCallResult + Send + Sync>;

/// Callback over a key (delete hooks).
pub(crate) type KeyHook = Box<dyn Fn(&Key, &HookContext<'_>) -> HookCallResult + Send + Sync>;

/// Turns a stored entity into the view a listener was registered for.
type ViewFn<V> = for<'a> fn(&'a dyn AnyEntity) -> Option<&'a V>;

/// The callbacks of one registration. Every slot is optional.
#[derive(Default)]
pub(crate) struct Hooks {
    pub(crate) will_put: Option<EntityHook>,
    pub(crate) did_put: Option<EntityHook>,
    pub(crate) will_delete: Option<KeyHook>,
    pub(crate) did_delete: Option<KeyHook>,
    pub(crate) will_delete_it: Option<EntityHook>,
    pub(crate) did_delete_it: Option<EntityHook>,
}

/// Internal listener state.
pub(crate) struct ListenerRecord {
    pub(crate) id: SubscriptionId,
    pub(crate) filter: TypeFilter,
    pub(crate) hooks: Hooks,
    /// Cleared once, never set again.
    active: AtomicBool,
}

impl ListenerRecord {
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns true if this call did the deactivation.
    pub(crate) fn deactivate(&self) -> bool {
        self.active.swap(false, Ordering::AcqRel)
    }
}

/// Listeners applicable to one mutation, in registration order.
///
/// Fixed when taken; whether each listener is still active is checked again
/// before every callback.
#[derive(Clone, Debug, Default)]
pub struct DispatchSnapshot {
    listeners: Vec<Subscription>,
}

impl DispatchSnapshot {
    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Subscription> {
        self.listeners.iter()
    }

    /// Listeners in the snapshot that are still active right now.
    pub fn active_count(&self) -> usize {
        self.listeners.iter().filter(|s| s.is_active()).count()
    }
}

/// Holds every listener of one database.
pub struct ListenerRegistry {
    /// Records in registration order. Closed records linger until the next
    /// snapshot pass prunes them.
    records: RwLock<Vec<Arc<ListenerRecord>>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// Set by teardown; registration is refused afterwards.
    closed: AtomicBool,
    /// Defaults for channel-backed listeners.
    stream_config: StreamConfig,
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::with_stream_config(StreamConfig::default())
    }

    /// Create an empty registry with custom stream defaults.
    pub fn with_stream_config(stream_config: StreamConfig) -> Self {
        Self {
            records: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            stream_config,
        }
    }

    /// Listen to one concrete entity type.
    pub fn on<T: Entity>(&self) -> ListenerBuilder<'_, T> {
        ListenerBuilder::new(
            self,
            TypeFilter::Exact(TypeName::of::<T>()),
            view_entity::<T>,
            T::TYPE_NAME,
        )
    }

    /// Listen to every member of a supertype family.
    pub fn on_family<F: Family>(&self) -> ListenerBuilder<'_, F::View> {
        ListenerBuilder::new(
            self,
            TypeFilter::members(F::NAME, F::MEMBERS.iter().copied()),
            F::view,
            F::NAME,
        )
    }

    /// Listen to every entity type.
    pub fn on_all(&self) -> ListenerBuilder<'_, dyn AnyEntity> {
        ListenerBuilder::new(self, TypeFilter::Any, view_any, "*")
    }

    /// Append a listener record and return its handle.
    pub(crate) fn register(&self, filter: TypeFilter, hooks: Hooks) -> Result<Subscription> {
        filter.validate()?;

        let mut records = self.records.write();
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::Closed);
        }

        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(subscription = %id, filter = %filter, "Listener registered");

        let record = Arc::new(ListenerRecord {
            id,
            filter,
            hooks,
            active: AtomicBool::new(true),
        });
        records.push(Arc::clone(&record));

        Ok(Subscription::new(record))
    }

    /// Stop delivery to a listener. Same as [`Subscription::close`].
    pub fn unregister(&self, subscription: &Subscription) {
        subscription.close();
    }

    /// Active listeners whose filter accepts `type_name`, in registration order.
    pub fn snapshot_for(&self, type_name: &TypeName) -> DispatchSnapshot {
        let mut stale = false;

        let listeners = {
            let records = self.records.read();
            records
                .iter()
                .filter(|record| {
                    if !record.is_active() {
                        stale = true;
                        return false;
                    }
                    record.filter.matches(type_name)
                })
                .map(|record| Subscription::new(Arc::clone(record)))
                .collect()
        };

        if stale {
            self.prune();
        }

        DispatchSnapshot { listeners }
    }

    /// Drop closed records from the backing collection.
    fn prune(&self) {
        let mut records = self.records.write();
        let before = records.len();
        records.retain(|record| record.is_active());
        let removed = before - records.len();
        if removed > 0 {
            debug!(removed, remaining = records.len(), "Pruned closed listeners");
        }
    }

    /// Number of active listeners.
    pub fn listener_count(&self) -> usize {
        self.records.read().iter().filter(|r| r.is_active()).count()
    }

    /// Deactivate every listener and refuse new registrations.
    pub fn close_all(&self) {
        let mut records = self.records.write();
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        for record in records.iter() {
            record.deactivate();
        }
        debug!(closed = records.len(), "Listener registry torn down");
        records.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn stream_config(&self) -> &StreamConfig {
        &self.stream_config
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn view_entity<T: Entity>(entity: &dyn AnyEntity) -> Option<&T> {
    entity.downcast_ref::<T>()
}

fn view_any(entity: &dyn AnyEntity) -> Option<&dyn AnyEntity> {
    Some(entity)
}

/// Attaches callbacks to a new registration.
///
/// `V` is what entity callbacks receive: the concrete type for
/// [`ListenerRegistry::on`], the family view for
/// [`ListenerRegistry::on_family`].
pub struct ListenerBuilder<'r, V: ?Sized + 'static> {
    registry: &'r ListenerRegistry,
    filter: TypeFilter,
    view: ViewFn<V>,
    expected: &'static str,
    hooks: Hooks,
}

impl<'r, V: ?Sized + 'static> ListenerBuilder<'r, V> {
    fn new(
        registry: &'r ListenerRegistry,
        filter: TypeFilter,
        view: ViewFn<V>,
        expected: &'static str,
    ) -> Self {
        Self {
            registry,
            filter,
            view,
            expected,
            hooks: Hooks::default(),
        }
    }

    /// Called before an entity is put.
    pub fn will_put<F, R>(mut self, hook: F) -> Self
    where
        F: Fn(&V, &HookContext<'_>) -> R + Send + Sync + 'static,
        R: HookOutcome,
    {
        self.hooks.will_put = Some(self.entity_hook(hook));
        self
    }

    /// Called after an entity is put.
    pub fn did_put<F, R>(mut self, hook: F) -> Self
    where
        F: Fn(&V, &HookContext<'_>) -> R + Send + Sync + 'static,
        R: HookOutcome,
    {
        self.hooks.did_put = Some(self.entity_hook(hook));
        self
    }

    /// Called before a key is deleted.
    pub fn will_delete<F, R>(mut self, hook: F) -> Self
    where
        F: Fn(&Key, &HookContext<'_>) -> R + Send + Sync + 'static,
        R: HookOutcome,
    {
        self.hooks.will_delete = Some(key_hook(hook));
        self
    }

    /// Called after a key is deleted.
    pub fn did_delete<F, R>(mut self, hook: F) -> Self
    where
        F: Fn(&Key, &HookContext<'_>) -> R + Send + Sync + 'static,
        R: HookOutcome,
    {
        self.hooks.did_delete = Some(key_hook(hook));
        self
    }

    /// Called before a delete, with the value about to be removed.
    ///
    /// Runs after [`will_delete`](Self::will_delete) for the same listener.
    /// Skipped when the deleted value is unknown.
    pub fn will_delete_it<F, R>(mut self, hook: F) -> Self
    where
        F: Fn(&V, &HookContext<'_>) -> R + Send + Sync + 'static,
        R: HookOutcome,
    {
        self.hooks.will_delete_it = Some(self.entity_hook(hook));
        self
    }

    /// Called after a delete, with the value that was removed.
    pub fn did_delete_it<F, R>(mut self, hook: F) -> Self
    where
        F: Fn(&V, &HookContext<'_>) -> R + Send + Sync + 'static,
        R: HookOutcome,
    {
        self.hooks.did_delete_it = Some(self.entity_hook(hook));
        self
    }

    /// Register the listener.
    pub fn register(self) -> Result<Subscription> {
        self.registry.register(self.filter, self.hooks)
    }

    /// Register the listener and also deliver its events to a channel, using
    /// the registry's stream defaults.
    pub fn stream(self) -> Result<EventStream> {
        let config = self.registry.stream_config().clone();
        self.stream_with(config)
    }

    /// Like [`stream`](Self::stream) with an explicit configuration.
    ///
    /// Callbacks attached to this builder still run, before the event is
    /// queued.
    pub fn stream_with(self, config: StreamConfig) -> Result<EventStream> {
        stream::open(self.registry, self.filter, self.hooks, config)
    }

    fn entity_hook<F, R>(&self, hook: F) -> EntityHook
    where
        F: Fn(&V, &HookContext<'_>) -> R + Send + Sync + 'static,
        R: HookOutcome,
    {
        let view = self.view;
        let expected = self.expected;
        erase_entity_hook(move |entity, ctx| match view(entity) {
            Some(value) => hook(value, ctx).into_hook_result().map_err(HookError::Failed),
            None => Err(HookError::ViewMismatch { expected }),
        })
    }
}

fn key_hook<F, R>(hook: F) -> KeyHook
where
    F: Fn(&Key, &HookContext<'_>) -> R + Send + Sync + 'static,
    R: HookOutcome,
{
    erase_key_hook(move |key, ctx| hook(key, ctx).into_hook_result().map_err(HookError::Failed))
}

pub(crate) fn erase_entity_hook<C>(hook: C) -> EntityHook
where
    C: Fn(&dyn AnyEntity, &HookContext<'_>) -> HookCallResult + Send + Sync + 'static,
{
    Box::new(hook)
}

pub(crate) fn erase_key_hook<C>(hook: C) -> KeyHook
where
    C: Fn(&Key, &HookContext<'_>) -> HookCallResult + Send + Sync + 'static,
{
    Box::new(hook)
}
