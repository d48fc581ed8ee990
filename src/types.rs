//! Core types for the document store.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Storage-level name of a concrete entity type.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TypeName(String);

impl TypeName {
    pub fn new(name: impl Into<String>) -> Self {
        TypeName(name.into())
    }

    /// Type name of an entity type.
    pub fn of<T: Entity>() -> Self {
        TypeName(T::TYPE_NAME.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeName({})", self.0)
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq<str> for TypeName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for TypeName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl From<&str> for TypeName {
    fn from(name: &str) -> Self {
        TypeName::new(name)
    }
}

/// Key of a stored entity: its concrete type plus the encoded id.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    type_name: TypeName,
    id: Vec<u8>,
}

impl Key {
    /// Derive the key of an entity.
    ///
    /// The id bytes are the MessagePack encoding of [`Entity::id`].
    pub fn of<T: Entity>(entity: &T) -> Result<Self> {
        Ok(Self {
            type_name: TypeName::of::<T>(),
            id: rmp_serde::to_vec(&entity.id())?,
        })
    }

    /// Build a key from an already encoded id.
    pub fn from_parts(type_name: TypeName, id: Vec<u8>) -> Self {
        Self { type_name, id }
    }

    /// Concrete type of the entity stored under this key.
    pub fn type_name(&self) -> &TypeName {
        &self.type_name
    }

    pub fn id_bytes(&self) -> &[u8] {
        &self.id
    }

    /// Hex form of the id bytes.
    pub fn id_hex(&self) -> String {
        hex::encode(&self.id)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}/{})", self.type_name, self.id_hex())
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.type_name, self.id_hex())
    }
}

/// A value that can be stored in the database.
pub trait Entity: Serialize + Send + Sync + 'static {
    /// Storage name of this concrete type.
    const TYPE_NAME: &'static str;

    /// Identifier the key is derived from.
    type Id: Serialize;

    fn id(&self) -> Self::Id;
}

/// Object-safe view of an [`Entity`], used on the dispatch path.
pub trait AnyEntity: Any + Send + Sync + 'static {
    /// Concrete storage type name.
    fn type_name(&self) -> TypeName;

    fn as_any(&self) -> &dyn Any;

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// JSON form of the entity (stream payloads).
    fn to_json(&self) -> serde_json::Result<serde_json::Value>;
}

impl<T: Entity> AnyEntity for T {
    fn type_name(&self) -> TypeName {
        TypeName::of::<T>()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(self)
    }
}

impl dyn AnyEntity {
    /// Downcast to a concrete entity type.
    pub fn downcast_ref<T: Entity>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn is<T: Entity>(&self) -> bool {
        self.as_any().is::<T>()
    }
}

impl fmt::Debug for dyn AnyEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AnyEntity({})", self.type_name())
    }
}

/// A supertype listeners can subscribe against.
///
/// A family is a closed set of concrete member types plus a way to view any
/// member as `Self::View` (typically a trait object shared by the members).
///
/// ```ignore
/// struct People;
///
/// impl Family for People {
///     type View = dyn Person;
///     const NAME: &'static str = "Person";
///     const MEMBERS: &'static [&'static str] = &["Adult", "Child"];
///
///     fn view(entity: &dyn AnyEntity) -> Option<&Self::View> {
///         if let Some(adult) = entity.downcast_ref::<Adult>() {
///             return Some(adult as &dyn Person);
///         }
///         entity.downcast_ref::<Child>().map(|c| c as &dyn Person)
///     }
/// }
/// ```
pub trait Family: 'static {
    type View: ?Sized + 'static;

    /// Name of the supertype (diagnostics only, never a dispatched tag).
    const NAME: &'static str;

    /// Storage names of the concrete member types.
    const MEMBERS: &'static [&'static str];

    fn view(entity: &dyn AnyEntity) -> Option<&Self::View>;
}

/// Kind of mutation a hook observes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Put,
    Delete,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutationKind::Put => f.write_str("put"),
            MutationKind::Delete => f.write_str("delete"),
        }
    }
}

/// Hook phase relative to the mutation being applied.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Before the mutation is applied.
    Will,
    /// After the mutation is applied.
    Did,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Will => f.write_str("will"),
            Phase::Did => f.write_str("did"),
        }
    }
}
