//! Shared models and helpers for integration tests.

#![allow(dead_code)]

use hookdb::{AnyEntity, Database, Entity, Family};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;

pub trait Person: Send + Sync {
    fn first_name(&self) -> &str;
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Adult {
    pub first_name: String,
    pub last_name: String,
    pub birth_year: u32,
}

impl Entity for Adult {
    const TYPE_NAME: &'static str = "Adult";
    type Id = (String, String);

    fn id(&self) -> Self::Id {
        (self.last_name.clone(), self.first_name.clone())
    }
}

impl Person for Adult {
    fn first_name(&self) -> &str {
        &self.first_name
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Child {
    pub first_name: String,
    pub parent: String,
}

impl Entity for Child {
    const TYPE_NAME: &'static str = "Child";
    type Id = String;

    fn id(&self) -> String {
        self.first_name.clone()
    }
}

impl Person for Child {
    fn first_name(&self) -> &str {
        &self.first_name
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Location {
    pub city: String,
}

impl Entity for Location {
    const TYPE_NAME: &'static str = "Location";
    type Id = String;

    fn id(&self) -> String {
        self.city.clone()
    }
}

/// Supertype of `Adult` and `Child`.
pub struct People;

impl Family for People {
    type View = dyn Person;
    const NAME: &'static str = "Person";
    const MEMBERS: &'static [&'static str] = &["Adult", "Child"];

    fn view(entity: &dyn AnyEntity) -> Option<&Self::View> {
        if let Some(adult) = entity.downcast_ref::<Adult>() {
            return Some(adult as &dyn Person);
        }
        entity.downcast_ref::<Child>().map(|child| child as &dyn Person)
    }
}

pub fn salomon() -> Adult {
    Adult {
        first_name: "Salomon".into(),
        last_name: "BRYS".into(),
        birth_year: 1986,
    }
}

pub fn laila() -> Adult {
    Adult {
        first_name: "Laila".into(),
        last_name: "BRYS".into(),
        birth_year: 1989,
    }
}

pub fn atreyu() -> Child {
    Child {
        first_name: "Atreyu".into(),
        parent: "Salomon".into(),
    }
}

/// Put the two adults, in order.
pub fn inflate(db: &Database) {
    db.put(salomon()).unwrap();
    db.put(laila()).unwrap();
}

/// Shared, ordered log of callback invocations.
#[derive(Clone, Default)]
pub struct Recorder(Arc<Mutex<Vec<String>>>);

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}
