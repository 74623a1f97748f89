//! Subscription keys and the queries they stand for.

use crate::model::{Category, ModelKind};
use serde_json::Value;
use std::fmt;

/// Identifies one live view: the podcasts of a category, or the episodes of
/// one podcast.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SyncedCollectionKey {
    Category(Category),
    Podcast(String),
}

impl SyncedCollectionKey {
    pub fn category(category: Category) -> Self {
        SyncedCollectionKey::Category(category)
    }

    pub fn podcast(podcast_id: impl Into<String>) -> Self {
        SyncedCollectionKey::Podcast(podcast_id.into())
    }

    /// Record kind the view is made of.
    pub fn kind(&self) -> ModelKind {
        match self {
            SyncedCollectionKey::Category(_) => ModelKind::Podcast,
            SyncedCollectionKey::Podcast(_) => ModelKind::Episode,
        }
    }

    /// Store query matching exactly the records of this view.
    pub fn query(&self) -> Query {
        match self {
            SyncedCollectionKey::Category(category) => Query {
                kind: ModelKind::Podcast,
                predicate: Predicate::eq("category", category.as_str()),
            },
            SyncedCollectionKey::Podcast(id) => Query {
                kind: ModelKind::Episode,
                predicate: Predicate::eq("podcastId", id.as_str()),
            },
        }
    }
}

impl fmt::Display for SyncedCollectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncedCollectionKey::Category(c) => write!(f, "category:{}", c),
            SyncedCollectionKey::Podcast(id) => write!(f, "podcast:{}", id),
        }
    }
}

/// Filter over the JSON form of a record.
#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    /// Every record of the kind.
    All,
    /// Records whose top-level `field` equals `value`.
    FieldEq { field: String, value: Value },
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::FieldEq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Predicate::All => true,
            Predicate::FieldEq { field, value } => record.get(field) == Some(value),
        }
    }
}

/// An observe/query request against the store.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub kind: ModelKind,
    pub predicate: Predicate,
}

impl Query {
    pub fn all(kind: ModelKind) -> Self {
        Self {
            kind,
            predicate: Predicate::All,
        }
    }

    pub fn matches(&self, kind: ModelKind, record: &Value) -> bool {
        self.kind == kind && self.predicate.matches(record)
    }
}
