//! Event dispatcher sitting on the mutation path.

use crate::error::{DbError, Result};
use crate::types::{AnyEntity, Key, MutationKind, Phase, TypeName};
use std::sync::Arc;
use tracing::{debug, trace};

use super::registry::{
    DispatchSnapshot, EntityHook, HookCallResult, HookError, KeyHook, ListenerRegistry,
};
use super::types::HookContext;

/// A put or delete on its way through the pipeline.
#[derive(Clone, Debug)]
pub struct Mutation {
    kind: MutationKind,
    key: Key,
    entity: Option<Arc<dyn AnyEntity>>,
}

impl Mutation {
    /// Put `entity` under `key`.
    pub fn put(key: Key, entity: Arc<dyn AnyEntity>) -> Self {
        Self {
            kind: MutationKind::Put,
            key,
            entity: Some(entity),
        }
    }

    /// Delete `key`. `entity` is the value being removed, if the store can
    /// supply it; delete-it hooks only fire when it is present.
    pub fn delete(key: Key, entity: Option<Arc<dyn AnyEntity>>) -> Self {
        Self {
            kind: MutationKind::Delete,
            key,
            entity,
        }
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    pub fn key(&self) -> &Key {
        &self.key
    }

    pub fn entity(&self) -> Option<&Arc<dyn AnyEntity>> {
        self.entity.as_ref()
    }

    /// Concrete type of the mutated entity.
    pub fn type_name(&self) -> TypeName {
        match (&self.kind, &self.entity) {
            (MutationKind::Put, Some(entity)) => entity.type_name(),
            _ => self.key.type_name().clone(),
        }
    }
}

/// A mutation whose will phase has fired.
///
/// Holds the listener snapshot the did phase runs over.
#[derive(Debug)]
pub struct PendingMutation {
    mutation: Mutation,
    type_name: TypeName,
    listeners: DispatchSnapshot,
    batched: bool,
}

impl PendingMutation {
    pub fn mutation(&self) -> &Mutation {
        &self.mutation
    }

    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    pub fn listeners(&self) -> &DispatchSnapshot {
        &self.listeners
    }

    pub fn is_batch(&self) -> bool {
        self.batched
    }
}

/// What the `apply` step of [`Dispatcher::run`] reports back.
///
/// `()` means every pending mutation took effect. A `Vec<bool>` holds one
/// flag per pending mutation, in order; missing flags count as no effect.
pub trait Applied {
    fn took_effect(&self, index: usize) -> bool;
}

impl Applied for () {
    fn took_effect(&self, _index: usize) -> bool {
        true
    }
}

impl Applied for Vec<bool> {
    fn took_effect(&self, index: usize) -> bool {
        self.get(index).copied().unwrap_or(false)
    }
}

/// Invokes listener hooks around mutations.
pub struct Dispatcher {
    registry: Arc<ListenerRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ListenerRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Take the listener snapshot for `mutation` and fire its will hooks.
    pub fn will(&self, mutation: Mutation, batched: bool) -> Result<PendingMutation> {
        let type_name = mutation.type_name();
        let listeners = self.registry.snapshot_for(&type_name);
        let pending = PendingMutation {
            mutation,
            type_name,
            listeners,
            batched,
        };

        self.fire(&pending, Phase::Will)?;
        Ok(pending)
    }

    /// Fire the did hooks of a mutation that has been applied.
    ///
    /// Runs over the will-phase snapshot, so listeners closed since then are
    /// skipped and listeners registered since then are not included.
    pub fn did(&self, pending: &PendingMutation) -> Result<()> {
        self.fire(pending, Phase::Did)
    }

    /// Drive a group of mutations through both phases.
    ///
    /// Every will hook fires in enqueue order, then `apply` runs once for the
    /// whole group, then every did hook fires in enqueue order. A failing will
    /// hook returns before `apply`, so nothing in the group is applied.
    ///
    /// Each mutation takes its listener snapshot when its own will phase
    /// starts. A listener registered from a will hook of one mutation in a
    /// batch therefore joins the will and did phases of the later mutations
    /// in that same batch, but never those of an earlier one.
    ///
    /// `apply` reports which mutations took effect (see [`Applied`]); did
    /// hooks are skipped for the ones that did not, such as a delete whose
    /// key a will hook already removed.
    pub fn run<F, R>(&self, mutations: Vec<Mutation>, batched: bool, apply: F) -> Result<R>
    where
        F: FnOnce(&[PendingMutation]) -> Result<R>,
        R: Applied,
    {
        let mut pending = Vec::with_capacity(mutations.len());
        for mutation in mutations {
            pending.push(self.will(mutation, batched)?);
        }

        let applied = apply(&pending)?;

        for (index, mutation) in pending.iter().enumerate() {
            if applied.took_effect(index) {
                self.did(mutation)?;
            } else {
                trace!(
                    key = %mutation.mutation.key,
                    kind = %mutation.mutation.kind,
                    "Mutation had no effect, skipping did hooks"
                );
            }
        }

        Ok(applied)
    }

    fn fire(&self, pending: &PendingMutation, phase: Phase) -> Result<()> {
        let kind = pending.mutation.kind;
        let entity = pending.mutation.entity.as_deref();

        trace!(
            type_name = %pending.type_name,
            %phase,
            %kind,
            listeners = pending.listeners.len(),
            "Dispatching"
        );

        for subscription in pending.listeners.iter() {
            let hooks = &subscription.record().hooks;
            let ctx = HookContext {
                type_name: &pending.type_name,
                key: &pending.mutation.key,
                entity,
                subscription,
                phase,
                kind,
                batched: pending.batched,
            };

            match (kind, phase) {
                (MutationKind::Put, Phase::Will) => {
                    call_entity(hooks.will_put.as_ref(), entity, &ctx)?;
                }
                (MutationKind::Put, Phase::Did) => {
                    call_entity(hooks.did_put.as_ref(), entity, &ctx)?;
                }
                (MutationKind::Delete, Phase::Will) => {
                    call_key(hooks.will_delete.as_ref(), &ctx)?;
                    call_entity(hooks.will_delete_it.as_ref(), entity, &ctx)?;
                }
                (MutationKind::Delete, Phase::Did) => {
                    call_key(hooks.did_delete.as_ref(), &ctx)?;
                    call_entity(hooks.did_delete_it.as_ref(), entity, &ctx)?;
                }
            }
        }

        Ok(())
    }
}

fn call_entity(
    hook: Option<&EntityHook>,
    entity: Option<&dyn AnyEntity>,
    ctx: &HookContext<'_>,
) -> Result<()> {
    let (Some(hook), Some(entity)) = (hook, entity) else {
        return Ok(());
    };
    if !ctx.subscription.is_active() {
        return Ok(());
    }
    check(hook(entity, ctx), ctx)
}

fn call_key(hook: Option<&KeyHook>, ctx: &HookContext<'_>) -> Result<()> {
    let Some(hook) = hook else {
        return Ok(());
    };
    if !ctx.subscription.is_active() {
        return Ok(());
    }
    check(hook(ctx.key, ctx), ctx)
}

fn check(result: HookCallResult, ctx: &HookContext<'_>) -> Result<()> {
    result.map_err(|err| {
        debug!(
            subscription = %ctx.subscription.id(),
            type_name = %ctx.type_name,
            phase = %ctx.phase,
            kind = %ctx.kind,
            "Listener failed, aborting dispatch"
        );
        match err {
            HookError::Failed(source) => DbError::Listener {
                phase: ctx.phase,
                kind: ctx.kind,
                type_name: ctx.type_name.clone(),
                source,
            },
            HookError::ViewMismatch { expected } => DbError::ViewMismatch {
                expected: expected.to_string(),
                got: ctx.type_name.clone(),
            },
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Entity;
    use parking_lot::Mutex;
    use serde::Serialize;

    #[derive(Serialize)]
    struct Adult {
        id: u32,
    }

    impl Entity for Adult {
        const TYPE_NAME: &'static str = "Adult";
        type Id = u32;

        fn id(&self) -> u32 {
            self.id
        }
    }

    fn put_mutation(id: u32) -> Mutation {
        let adult = Adult { id };
        let key = Key::of(&adult).unwrap();
        Mutation::put(key, Arc::new(adult))
    }

    fn delete_mutation(id: u32, with_value: bool) -> Mutation {
        let adult = Adult { id };
        let key = Key::of(&adult).unwrap();
        let entity: Option<Arc<dyn AnyEntity>> = if with_value {
            Some(Arc::new(adult))
        } else {
            None
        };
        Mutation::delete(key, entity)
    }

    fn setup() -> (Arc<ListenerRegistry>, Dispatcher, Arc<Mutex<Vec<String>>>) {
        let registry = Arc::new(ListenerRegistry::new());
        let dispatcher = Dispatcher::new(Arc::clone(&registry));
        (registry, dispatcher, Arc::new(Mutex::new(Vec::new())))
    }

    #[test]
    fn test_run_orders_will_apply_did() {
        let (registry, dispatcher, log) = setup();
        let (w, d) = (Arc::clone(&log), Arc::clone(&log));
        registry
            .on::<Adult>()
            .will_put(move |a, _| w.lock().push(format!("will {}", a.id)))
            .did_put(move |a, _| d.lock().push(format!("did {}", a.id)))
            .register()
            .unwrap();

        let apply_log = Arc::clone(&log);
        dispatcher
            .run(vec![put_mutation(1), put_mutation(2)], true, |pending| {
                apply_log.lock().push(format!("apply {}", pending.len()));
                Ok(())
            })
            .unwrap();

        assert_eq!(
            *log.lock(),
            vec!["will 1", "will 2", "apply 2", "did 1", "did 2"]
        );
    }

    #[test]
    fn test_delete_fires_key_hook_before_entity_hook() {
        let (registry, dispatcher, log) = setup();
        let (k, e) = (Arc::clone(&log), Arc::clone(&log));
        registry
            .on::<Adult>()
            .will_delete(move |_, _| k.lock().push("key".to_string()))
            .will_delete_it(move |a, _| e.lock().push(format!("it {}", a.id)))
            .register()
            .unwrap();

        dispatcher
            .run(vec![delete_mutation(4, true)], false, |_| Ok(()))
            .unwrap();

        assert_eq!(*log.lock(), vec!["key", "it 4"]);
    }

    #[test]
    fn test_delete_without_value_skips_entity_hooks() {
        let (registry, dispatcher, log) = setup();
        let (k, e) = (Arc::clone(&log), Arc::clone(&log));
        registry
            .on::<Adult>()
            .did_delete(move |key, ctx| {
                assert!(ctx.entity().is_none());
                k.lock().push(key.type_name().to_string())
            })
            .did_delete_it(move |_, _| e.lock().push("it".to_string()))
            .register()
            .unwrap();

        dispatcher
            .run(vec![delete_mutation(4, false)], false, |_| Ok(()))
            .unwrap();

        assert_eq!(*log.lock(), vec!["Adult"]);
    }

    #[test]
    fn test_closing_in_key_hook_skips_entity_hook() {
        let (registry, dispatcher, log) = setup();
        let e = Arc::clone(&log);
        registry
            .on::<Adult>()
            .will_delete(|_, ctx| ctx.subscription().close())
            .will_delete_it(move |_, _| e.lock().push("it".to_string()))
            .register()
            .unwrap();

        dispatcher
            .run(vec![delete_mutation(1, true)], false, |_| Ok(()))
            .unwrap();

        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_will_failure_skips_apply_and_later_listeners() {
        let (registry, dispatcher, log) = setup();
        registry
            .on::<Adult>()
            .will_put(|_, _| Err::<(), _>("vetoed"))
            .register()
            .unwrap();
        let later = Arc::clone(&log);
        registry
            .on::<Adult>()
            .will_put(move |_, _| later.lock().push("later".to_string()))
            .register()
            .unwrap();

        let applied = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&applied);
        let result = dispatcher.run(vec![put_mutation(1)], false, |_| {
            *flag.lock() = true;
            Ok(())
        });

        match result {
            Err(DbError::Listener {
                phase, kind, type_name, source,
            }) => {
                assert_eq!(phase, Phase::Will);
                assert_eq!(kind, MutationKind::Put);
                assert_eq!(type_name, TypeName::new("Adult"));
                assert_eq!(source.to_string(), "vetoed");
            }
            other => panic!("Expected listener error, got {:?}", other),
        }
        assert!(!*applied.lock());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_did_runs_over_will_snapshot() {
        let (registry, dispatcher, log) = setup();
        let late = Arc::clone(&log);
        let inner = Arc::clone(&registry);
        registry
            .on::<Adult>()
            .will_put(move |_, _| {
                let late = Arc::clone(&late);
                inner
                    .on::<Adult>()
                    .did_put(move |a, _| late.lock().push(format!("late did {}", a.id)))
                    .register()
                    .unwrap();
            })
            .register()
            .unwrap();

        dispatcher
            .run(vec![put_mutation(1)], false, |_| Ok(()))
            .unwrap();
        assert!(log.lock().is_empty());
        assert_eq!(registry.listener_count(), 2);

        dispatcher
            .run(vec![put_mutation(2)], false, |_| Ok(()))
            .unwrap();
        assert_eq!(*log.lock(), vec!["late did 2"]);
    }

    #[test]
    fn test_did_skipped_for_mutations_without_effect() {
        let (registry, dispatcher, log) = setup();
        let (w, d) = (Arc::clone(&log), Arc::clone(&log));
        registry
            .on::<Adult>()
            .will_delete_it(move |a, _| w.lock().push(format!("will {}", a.id)))
            .did_delete_it(move |a, _| d.lock().push(format!("did {}", a.id)))
            .register()
            .unwrap();

        let applied = dispatcher
            .run(
                vec![delete_mutation(1, true), delete_mutation(2, true)],
                true,
                |_| Ok(vec![false, true]),
            )
            .unwrap();

        assert_eq!(applied, vec![false, true]);
        assert_eq!(*log.lock(), vec!["will 1", "will 2", "did 2"]);
    }

    #[test]
    fn test_no_listeners_is_noop() {
        let (_registry, dispatcher, _log) = setup();
        let pending = dispatcher.will(put_mutation(1), false).unwrap();
        assert!(pending.listeners().is_empty());
        assert_eq!(pending.type_name(), "Adult");
        dispatcher.did(&pending).unwrap();
    }
}
