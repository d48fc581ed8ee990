//! Channel-backed listeners.
//!
//! A stream is an ordinary listener whose hooks push a [`StreamEvent`] into a
//! bounded channel. Sending happens inline in the hook with `try_send`; a full
//! buffer closes the stream's subscription instead of blocking the mutation.
//!
//! Delivery to the channel is best-effort. A consumer that falls behind by
//! more than `buffer_size` events loses the rest of the stream, and the
//! `Dropped` notice itself may not fit. Mutations are never slowed down or
//! failed by a stream.

use crate::error::{DbError, Result};
use crate::types::{Key, MutationKind, Phase, TypeName};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use super::registry::{
    erase_entity_hook, erase_key_hook, EntityHook, HookCallResult, Hooks, KeyHook,
    ListenerRegistry,
};
use super::types::{HookContext, Subscription, TypeFilter};

/// Default threshold for including the entity payload in events (bytes).
const DEFAULT_PAYLOAD_THRESHOLD: usize = 4096;

/// Configuration for an event stream.
#[derive(Clone, Debug)]
pub struct StreamConfig {
    /// Max buffered events before the stream is dropped. Must be at least 1.
    /// Default: 1000
    pub buffer_size: usize,

    /// Max encoded JSON size for an entity to be carried in the event.
    /// Default: 4096
    pub payload_threshold: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1000,
            payload_threshold: DEFAULT_PAYLOAD_THRESHOLD,
        }
    }
}

/// Events delivered to a stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A listener hook fired.
    Mutation(MutationEvent),

    /// The stream stopped receiving events.
    Dropped { reason: DropReason },
}

/// Why a stream was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly closed.
    Unsubscribed,
}

/// One hook invocation, as seen by a stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MutationEvent {
    pub phase: Phase,
    pub kind: MutationKind,
    pub type_name: TypeName,
    pub key: Key,
    pub batched: bool,
    /// Encoded entity size in bytes (0 when the entity is unknown).
    pub payload_size: usize,
    /// The entity as JSON (if known and small enough).
    pub payload: Option<serde_json::Value>,
}

impl MutationEvent {
    fn from_context(ctx: &HookContext<'_>, payload_threshold: usize) -> Self {
        let encoded = ctx
            .entity()
            .and_then(|entity| entity.to_json().ok())
            .and_then(|value| serde_json::to_vec(&value).ok().map(|bytes| (bytes.len(), value)));

        let (payload_size, payload) = match encoded {
            Some((size, value)) if size <= payload_threshold => (size, Some(value)),
            Some((size, _)) => (size, None),
            None => (0, None),
        };

        Self {
            phase: ctx.phase(),
            kind: ctx.kind(),
            type_name: ctx.type_name().clone(),
            key: ctx.key().clone(),
            batched: ctx.is_batch(),
            payload_size,
            payload,
        }
    }
}

/// Handle to receive a listener's events from a channel.
///
/// Dropping the stream closes its subscription.
pub struct EventStream {
    subscription: Subscription,
    sender: Sender<StreamEvent>,
    receiver: Receiver<StreamEvent>,
}

impl EventStream {
    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Receive the next event (blocking).
    pub fn recv(&self) -> std::result::Result<StreamEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<StreamEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> std::result::Result<StreamEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Events currently buffered.
    pub fn drain(&self) -> Vec<StreamEvent> {
        self.receiver.try_iter().collect()
    }

    /// Stop the stream. Idempotent.
    pub fn close(&self) {
        if self.subscription.is_active() {
            self.subscription.close();
            let _ = self.sender.try_send(StreamEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.subscription.close();
    }
}

/// Pushes events from hook invocations into the channel.
struct StreamSink {
    sender: Sender<StreamEvent>,
    payload_threshold: usize,
}

impl StreamSink {
    fn push(&self, ctx: &HookContext<'_>) -> HookCallResult {
        let event = StreamEvent::Mutation(MutationEvent::from_context(ctx, self.payload_threshold));

        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(
                    subscription = %ctx.subscription().id(),
                    type_name = %ctx.type_name(),
                    "Stream buffer full, dropping stream"
                );
                ctx.subscription().close();
                // Best effort, the buffer is most likely still full.
                let _ = self.sender.try_send(StreamEvent::Dropped {
                    reason: DropReason::BufferOverflow,
                });
            }
            Err(TrySendError::Disconnected(_)) => ctx.subscription().close(),
        }

        Ok(())
    }
}

/// Register a stream listener; `hooks` already attached by the caller run
/// first in each slot.
pub(crate) fn open(
    registry: &ListenerRegistry,
    filter: TypeFilter,
    hooks: Hooks,
    config: StreamConfig,
) -> Result<EventStream> {
    // A zero-capacity channel would reject every `try_send` from a hook.
    if config.buffer_size == 0 {
        return Err(DbError::InvalidConfig("stream buffer_size must be at least 1".into()));
    }

    let (sender, receiver) = bounded(config.buffer_size);
    let sink = Arc::new(StreamSink {
        sender: sender.clone(),
        payload_threshold: config.payload_threshold,
    });

    let hooks = Hooks {
        will_put: Some(chain_entity(hooks.will_put, &sink)),
        did_put: Some(chain_entity(hooks.did_put, &sink)),
        will_delete: Some(chain_key(hooks.will_delete, &sink)),
        did_delete: Some(chain_key(hooks.did_delete, &sink)),
        will_delete_it: hooks.will_delete_it,
        did_delete_it: hooks.did_delete_it,
    };

    let subscription = registry.register(filter, hooks)?;

    Ok(EventStream {
        subscription,
        sender,
        receiver,
    })
}

fn chain_entity(first: Option<EntityHook>, sink: &Arc<StreamSink>) -> EntityHook {
    let sink = Arc::clone(sink);
    erase_entity_hook(move |entity, ctx| {
        if let Some(first) = &first {
            first(entity, ctx)?;
            if !ctx.subscription().is_active() {
                return Ok(());
            }
        }
        sink.push(ctx)
    })
}

fn chain_key(first: Option<KeyHook>, sink: &Arc<StreamSink>) -> KeyHook {
    let sink = Arc::clone(sink);
    erase_key_hook(move |key, ctx| {
        if let Some(first) = &first {
            first(key, ctx)?;
            if !ctx.subscription().is_active() {
                return Ok(());
            }
        }
        sink.push(ctx)
    })
}
