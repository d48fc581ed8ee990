//! # hookdb
//!
//! An embedded document store whose puts and deletes can be observed and
//! intercepted by typed, ordered listeners.
//!
//! ## Core Concepts
//!
//! - **Entities**: typed values stored under a key derived from their id
//! - **Listeners**: will/did hooks for puts and deletes, registered per type
//! - **Families**: supertype filters that match a closed set of concrete types
//! - **Batches**: groups of mutations whose will hooks all fire before any
//!   write, and whose did hooks all fire after the whole batch is written
//!
//! ## Example
//!
//! ```ignore
//! use hookdb::{Database, Entity};
//!
//! let db = Database::new();
//!
//! // Observe every put of an Adult
//! db.on::<Adult>()
//!     .will_put(|adult, ctx| println!("putting {} as {}", adult.name, ctx.type_name()))
//!     .did_put(|adult, _| println!("stored {}", adult.name))
//!     .register()?;
//!
//! let key = db.put(Adult { id: 1, name: "Salomon".into() })?;
//!
//! // Batch: both wills, then the write, then both dids
//! db.exec_batch(|batch| {
//!     batch.put(Adult { id: 2, name: "Laila".into() })?;
//!     batch.delete(&key);
//!     Ok(())
//! })?;
//! ```

pub mod batch;
pub mod error;
pub mod listeners;
pub mod store;
pub mod types;

// Re-exports
pub use batch::{Batch, BatchOp};
pub use error::{DbError, ListenerError, Result};
pub use listeners::{
    Applied, DispatchSnapshot, Dispatcher, DropReason, EventStream, HookContext, HookOutcome,
    HookResult, ListenerBuilder, ListenerRegistry, Mutation, MutationEvent, PendingMutation,
    StreamConfig, StreamEvent, Subscription, SubscriptionId, TypeFilter,
};
pub use store::{Database, DatabaseConfig};
pub use types::*;
