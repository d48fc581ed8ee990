//! Listener types: filters, subscriptions, and the hook context.

use crate::error::{DbError, ListenerError, Result};
use crate::types::{AnyEntity, Key, MutationKind, Phase, TypeName};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use super::registry::ListenerRecord;

/// Result returned by a listener callback.
pub type HookResult = std::result::Result<(), ListenerError>;

/// Unique identifier for a listener registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which concrete types a listener observes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeFilter {
    /// Exactly one concrete type.
    Exact(TypeName),
    /// A supertype, given as the closed set of its concrete members.
    Members {
        family: String,
        members: Vec<TypeName>,
    },
    /// Every type.
    Any,
}

impl TypeFilter {
    pub fn exact(type_name: impl Into<TypeName>) -> Self {
        TypeFilter::Exact(type_name.into())
    }

    pub fn members<I, S>(family: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TypeName>,
    {
        TypeFilter::Members {
            family: family.into(),
            members: members.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether events of the concrete `type_name` pass this filter.
    pub fn matches(&self, type_name: &TypeName) -> bool {
        match self {
            TypeFilter::Exact(name) => name == type_name,
            TypeFilter::Members { members, .. } => members.iter().any(|m| m == type_name),
            TypeFilter::Any => true,
        }
    }

    /// Reject filters that can never be satisfied by a concrete type.
    pub fn validate(&self) -> Result<()> {
        match self {
            TypeFilter::Exact(name) if name.is_empty() => {
                Err(DbError::InvalidFilter("empty type name".into()))
            }
            TypeFilter::Members { family, members } => {
                if family.is_empty() {
                    return Err(DbError::InvalidFilter("empty family name".into()));
                }
                if members.is_empty() {
                    return Err(DbError::InvalidFilter(format!(
                        "family {} has no member types",
                        family
                    )));
                }
                if members.iter().any(TypeName::is_empty) {
                    return Err(DbError::InvalidFilter(format!(
                        "family {} has an empty member type name",
                        family
                    )));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for TypeFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeFilter::Exact(name) => write!(f, "{}", name),
            TypeFilter::Members { family, members } => {
                write!(f, "{}{{", family)?;
                for (i, member) in members.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{}", member)?;
                }
                f.write_str("}")
            }
            TypeFilter::Any => f.write_str("*"),
        }
    }
}

/// Handle to one listener registration.
///
/// Clones share the same registration. Dropping a handle does not close it.
#[derive(Clone)]
pub struct Subscription {
    record: Arc<ListenerRecord>,
}

impl Subscription {
    pub(crate) fn new(record: Arc<ListenerRecord>) -> Self {
        Self { record }
    }

    pub fn id(&self) -> SubscriptionId {
        self.record.id
    }

    pub fn filter(&self) -> &TypeFilter {
        &self.record.filter
    }

    pub fn is_active(&self) -> bool {
        self.record.is_active()
    }

    /// Stop delivery to this listener.
    ///
    /// Idempotent, and safe to call from inside any of the listener's own
    /// callbacks: callbacks not yet delivered, including the pending did
    /// counterpart of the one currently running, are skipped.
    pub fn close(&self) {
        if self.record.deactivate() {
            debug!(subscription = %self.id(), filter = %self.filter(), "Listener closed");
        }
    }

    pub(crate) fn record(&self) -> &ListenerRecord {
        &self.record
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id())
            .field("filter", self.filter())
            .field("active", &self.is_active())
            .finish()
    }
}

/// Context handed to every listener callback.
pub struct HookContext<'a> {
    pub(crate) type_name: &'a TypeName,
    pub(crate) key: &'a Key,
    pub(crate) entity: Option<&'a dyn AnyEntity>,
    pub(crate) subscription: &'a Subscription,
    pub(crate) phase: Phase,
    pub(crate) kind: MutationKind,
    pub(crate) batched: bool,
}

impl<'a> HookContext<'a> {
    /// Concrete type of the mutated entity, never the registration filter.
    pub fn type_name(&self) -> &'a TypeName {
        self.type_name
    }

    pub fn key(&self) -> &'a Key {
        self.key
    }

    /// The put value, or the deleted value when the store could supply it.
    pub fn entity(&self) -> Option<&'a dyn AnyEntity> {
        self.entity
    }

    /// Subscription of the listener being invoked.
    pub fn subscription(&self) -> &'a Subscription {
        self.subscription
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn kind(&self) -> MutationKind {
        self.kind
    }

    /// Whether the mutation is part of a batch.
    pub fn is_batch(&self) -> bool {
        self.batched
    }
}

/// Values a listener callback may return.
///
/// Callbacks can return `()` or `Result<(), E>` for any error convertible
/// into [`ListenerError`].
pub trait HookOutcome {
    fn into_hook_result(self) -> HookResult;
}

impl HookOutcome for () {
    fn into_hook_result(self) -> HookResult {
        Ok(())
    }
}

impl<E: Into<ListenerError>> HookOutcome for std::result::Result<(), E> {
    fn into_hook_result(self) -> HookResult {
        self.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_filter() {
        let filter = TypeFilter::exact("Adult");
        assert!(filter.matches(&TypeName::new("Adult")));
        assert!(!filter.matches(&TypeName::new("Child")));
        assert!(filter.validate().is_ok());
    }

    #[test]
    fn test_members_filter() {
        let filter = TypeFilter::members("Person", ["Adult", "Child"]);
        assert!(filter.matches(&TypeName::new("Adult")));
        assert!(filter.matches(&TypeName::new("Child")));
        assert!(!filter.matches(&TypeName::new("Location")));
        assert_eq!(filter.to_string(), "Person{Adult,Child}");
    }

    #[test]
    fn test_any_filter_matches_everything() {
        assert!(TypeFilter::Any.matches(&TypeName::new("Whatever")));
        assert_eq!(TypeFilter::Any.to_string(), "*");
    }

    #[test]
    fn test_invalid_filters() {
        assert!(matches!(
            TypeFilter::exact("").validate(),
            Err(DbError::InvalidFilter(_))
        ));
        assert!(matches!(
            TypeFilter::members("Person", Vec::<&str>::new()).validate(),
            Err(DbError::InvalidFilter(_))
        ));
        assert!(matches!(
            TypeFilter::members("Person", ["Adult", ""]).validate(),
            Err(DbError::InvalidFilter(_))
        ));
        assert!(matches!(
            TypeFilter::members("", ["Adult"]).validate(),
            Err(DbError::InvalidFilter(_))
        ));
    }

    #[test]
    fn test_hook_outcomes() {
        assert!(().into_hook_result().is_ok());
        assert!(Ok::<(), String>(()).into_hook_result().is_ok());

        let err = Err::<(), _>("boom").into_hook_result().unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
