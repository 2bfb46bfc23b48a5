//! Document store seam.
//!
//! `DocumentStore` is the single-collection contract the data-access helper is
//! written against. `MongoStore` is the production implementation; `MemoryStore`
//! keeps the same observable behavior (unique indexes, schema validation,
//! newest-first sorting) in process for tests and offline runs.

use std::sync::Arc;

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use thiserror::Error;

pub mod memory;
pub mod mongo;

pub use memory::{MemoryDatabase, MemoryStore};
pub use mongo::MongoStore;

/// FieldViolation
///
/// One schema rule a document failed, as reported by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldViolation {
    pub path: String,
    pub message: String,
    pub value: Bson,
}

impl FieldViolation {
    pub fn new(path: impl Into<String>, message: impl Into<String>, value: Bson) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            value,
        }
    }
}

/// StoreError
///
/// Store failures, already classified into the shapes the data-access helper knows
/// how to translate. Anything the store cannot classify is `Driver`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("duplicate key on '{field}': {value}")]
    DuplicateKey { field: String, value: String },

    #[error("document failed schema validation")]
    SchemaValidation(Vec<FieldViolation>),

    #[error("{0}")]
    Driver(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Lookup
///
/// A join against another collection, resolved by the store (`$lookup` in MongoDB):
/// every document of `from` whose `foreign_field` equals this document's
/// `local_field` is placed, as an array, under `as_field`.
#[derive(Debug, Clone, PartialEq)]
pub struct Lookup {
    pub from: String,
    pub local_field: String,
    pub foreign_field: String,
    pub as_field: String,
}

impl Lookup {
    pub fn new(
        from: impl Into<String>,
        local_field: impl Into<String>,
        foreign_field: impl Into<String>,
        as_field: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            local_field: local_field.into(),
            foreign_field: foreign_field.into(),
            as_field: as_field.into(),
        }
    }
}

/// FindQuery
///
/// A fully resolved page query: filter, sort, window and joins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub filter: Document,
    pub sort: Document,
    pub skip: u64,
    pub limit: Option<i64>,
    pub lookups: Vec<Lookup>,
}

/// DocumentStore
///
/// Contract for one collection. All documents cross this boundary as raw BSON; typed
/// (de)serialization is the helper's job.
///
/// **Send + Sync + async_trait** make `Arc<dyn DocumentStore>` shareable across
/// Axum's request tasks.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the backing collection.
    fn collection_name(&self) -> &str;

    /// Inserts a complete document (the caller assigns `_id`) and returns it.
    async fn insert_one(&self, document: Document) -> StoreResult<Document>;

    async fn find(&self, query: FindQuery) -> StoreResult<Vec<Document>>;

    async fn count(&self, filter: Document) -> StoreResult<u64>;

    async fn find_one(&self, filter: Document, lookups: &[Lookup]) -> StoreResult<Option<Document>>;

    /// Sets the given top-level fields on the document with `id`, validating the
    /// result, and returns the document as it is after the update.
    async fn update_by_id(&self, id: ObjectId, changes: Document) -> StoreResult<Option<Document>>;

    /// Removes the document with `id`, returning what was removed.
    async fn delete_by_id(&self, id: ObjectId) -> StoreResult<Option<Document>>;

    /// Cheap liveness check used by the health endpoint.
    async fn ping(&self) -> StoreResult<()>;
}

/// StoreState
///
/// The concrete type used to share the persistence layer across the application state.
pub type StoreState = Arc<dyn DocumentStore>;
