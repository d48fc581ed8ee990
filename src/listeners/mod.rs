//! Mutation listeners.
//!
//! Listeners observe puts and deletes through typed hooks fired inline with
//! the mutation:
//! - will hooks, before the mutation is applied
//! - did hooks, after it is applied
//!
//! Ordering guarantees:
//! - a single mutation fires will, applies, then fires did
//! - a batch fires every will in enqueue order, applies the whole batch, then
//!   fires every did in enqueue order
//! - listeners for one mutation run in registration order
//!
//! A listener may close its own subscription from inside any of its
//! callbacks; it receives nothing further, not even the did counterpart of
//! the callback that closed it.
//!
//! # Example
//!
//! ```ignore
//! let registry = ListenerRegistry::new();
//!
//! let subscription = registry
//!     .on_family::<People>()
//!     .will_put(|person, ctx| println!("putting {} ({})", person.name(), ctx.type_name()))
//!     .did_delete(|key, ctx| {
//!         println!("deleted {}", key);
//!         ctx.subscription().close();
//!     })
//!     .register()?;
//! ```

mod dispatcher;
mod registry;
mod stream;
mod types;

pub use dispatcher::{Applied, Dispatcher, Mutation, PendingMutation};
pub use registry::{DispatchSnapshot, ListenerBuilder, ListenerRegistry};
pub use stream::{DropReason, EventStream, MutationEvent, StreamConfig, StreamEvent};
pub use types::{HookContext, HookOutcome, HookResult, Subscription, SubscriptionId, TypeFilter};
