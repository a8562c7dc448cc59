//! # Documents and Filters
//!
//! The storage backend is document-oriented: every record is a JSON object
//! in a named collection, keyed by `_id`. Filters are conjunctions of
//! equality / membership conditions on top-level fields.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{AppError, Result};

/// One stored record.
pub type Document = Map<String, Value>;

/// Field holding the record identifier.
pub const ID_FIELD: &str = "_id";

/// Logical collections known to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Stories,
    Comments,
    Replies,
    Flags,
    Users,
    Admin,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Stories,
        Collection::Comments,
        Collection::Replies,
        Collection::Flags,
        Collection::Users,
        Collection::Admin,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Collection::Stories => "stories",
            Collection::Comments => "comments",
            Collection::Replies => "replies",
            Collection::Flags => "flags",
            Collection::Users => "users",
            Collection::Admin => "admin",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Condition {
    pub fn field(&self) -> &str {
        match self {
            Condition::Eq(field, _) | Condition::In(field, _) => field,
        }
    }

    fn matches(&self, doc: &Document) -> bool {
        match self {
            Condition::Eq(field, expected) => doc.get(field) == Some(expected),
            Condition::In(field, candidates) => doc
                .get(field)
                .is_some_and(|value| candidates.contains(value)),
        }
    }
}

/// Conjunction of conditions. The empty filter matches every document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: Uuid) -> Self {
        Self::new().eq(ID_FIELD, id.to_string())
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.conditions.push(Condition::Eq(field.to_string(), value.into()));
        self
    }

    /// Matches documents whose `field` equals any of `values`.
    /// A single candidate collapses to an equality condition.
    pub fn any_of<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let mut values: Vec<Value> = values.into_iter().map(Into::into).collect();
        let condition = if values.len() == 1 {
            Condition::Eq(field.to_string(), values.remove(0))
        } else {
            Condition::In(field.to_string(), values)
        };
        self.conditions.push(condition);
        self
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|condition| condition.matches(doc))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<(String, SortOrder)>,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl FindOptions {
    pub fn sorted(field: &str, order: SortOrder) -> Self {
        Self {
            sort: Some((field.to_string(), order)),
            ..Self::default()
        }
    }

    pub fn page(mut self, skip: u64, limit: u64) -> Self {
        self.skip = skip;
        self.limit = Some(limit);
        self
    }
}

/// Isolation requested for reads inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadConcern {
    /// Reads see the latest committed data at the time of each read.
    Local,
    /// Every read observes one point-in-time view taken when the transaction opens.
    Snapshot,
}

/// Durability required before a commit is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteConcern {
    Acknowledged,
    /// Acknowledged once durably applied on a majority of replicas.
    Majority,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionOptions {
    pub read_concern: ReadConcern,
    pub write_concern: WriteConcern,
}

impl TransactionOptions {
    pub const SNAPSHOT_MAJORITY: Self = Self {
        read_concern: ReadConcern::Snapshot,
        write_concern: WriteConcern::Majority,
    };
}

impl Default for TransactionOptions {
    fn default() -> Self {
        Self::SNAPSHOT_MAJORITY
    }
}

pub fn to_document<T: Serialize>(value: &T) -> Result<Document> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(AppError::Validation(format!(
            "expected a JSON object, got {other}"
        ))),
    }
}

pub fn from_document<T: DeserializeOwned>(doc: Document) -> Result<T> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}

/// Reads the `_id` of a stored document.
pub fn document_id(doc: &Document) -> Result<&str> {
    doc.get(ID_FIELD)
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::Validation("document has no string _id".into()))
}
