//! Generic data-access helper.
//!
//! `DatabaseOperations` wraps one `DocumentStore` and gives every entity the same
//! create/find/update/delete behavior: duplicate pre-checks, server-assigned ids
//! and timestamps, newest-first pagination and a single error translation step
//! from store failures into `ApiError`.

use bson::{Bson, Document, doc, oid::ObjectId};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value;

use crate::{
    errors::{ApiError, ApiResult, FieldError},
    store::{FindQuery, Lookup, StoreError, StoreState},
};

pub const DEFAULT_PAGE: u64 = 1;
pub const DEFAULT_LIMIT: u64 = 10;

/// DuplicateCheck
///
/// One `field == value` condition that must not already match a stored document.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateCheck {
    pub field: String,
    pub value: Bson,
}

impl DuplicateCheck {
    pub fn new(field: impl Into<String>, value: impl Into<Bson>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// QueryOptions
///
/// Window, ordering and joins for `find_all`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOptions {
    pub page: u64,
    pub limit: u64,
    pub sort: Document,
    pub populate: Vec<Lookup>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
            sort: doc! { "createdAt": -1 },
            populate: Vec::new(),
        }
    }
}

impl QueryOptions {
    pub fn page(page: u64, limit: u64) -> Self {
        Self {
            page,
            limit,
            ..Self::default()
        }
    }
}

/// Page
///
/// One window of records plus the total number of matches for the filter.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: u64,
}

/// Anything that can go wrong inside an operation before it is settled into an
/// `ApiError`.
#[derive(Debug)]
enum Failure {
    Api(ApiError),
    Store(StoreError),
    Codec(String),
}

impl From<ApiError> for Failure {
    fn from(error: ApiError) -> Self {
        Failure::Api(error)
    }
}

impl From<StoreError> for Failure {
    fn from(error: StoreError) -> Self {
        Failure::Store(error)
    }
}

impl From<bson::ser::Error> for Failure {
    fn from(error: bson::ser::Error) -> Self {
        Failure::Codec(error.to_string())
    }
}

impl From<bson::de::Error> for Failure {
    fn from(error: bson::de::Error) -> Self {
        Failure::Codec(error.to_string())
    }
}

/// DatabaseOperations
///
/// Cheap to clone: the store handle is an `Arc`.
#[derive(Clone)]
pub struct DatabaseOperations {
    store: StoreState,
    resource: &'static str,
}

impl DatabaseOperations {
    /// new
    ///
    /// `resource` is the entity name used in error messages (e.g. `"User"`).
    pub fn new(store: StoreState, resource: &'static str) -> Self {
        Self { store, resource }
    }

    pub fn resource(&self) -> &'static str {
        self.resource
    }

    /// validate_object_id
    ///
    /// Parses a 24-character hex ObjectId, failing with a Validation error on field `id`.
    pub fn validate_object_id(&self, id: &str) -> ApiResult<ObjectId> {
        ObjectId::parse_str(id).map_err(|_| {
            ApiError::invalid_field(
                "id",
                format!("Invalid {} ID format", self.resource.to_lowercase()),
                Value::String(id.to_string()),
            )
        })
    }

    /// create
    ///
    /// Runs the duplicate checks, assigns `_id`, `createdAt` and `updatedAt`, inserts
    /// the document and returns it as stored.
    pub async fn create<D, T>(&self, data: &D, duplicate_checks: &[DuplicateCheck]) -> ApiResult<T>
    where
        D: Serialize,
        T: DeserializeOwned,
    {
        let result = self.try_create(data, duplicate_checks).await;
        self.settle("create", result)
    }

    async fn try_create<D, T>(&self, data: &D, duplicate_checks: &[DuplicateCheck]) -> Result<T, Failure>
    where
        D: Serialize,
        T: DeserializeOwned,
    {
        self.check_duplicates(duplicate_checks, None).await?;

        let now = bson::DateTime::now();
        let mut document = bson::to_document(data)?;
        document.insert("_id", ObjectId::new());
        document.insert("createdAt", now);
        document.insert("updatedAt", now);

        let stored = self.store.insert_one(document).await?;
        Ok(bson::from_document(stored)?)
    }

    /// find_all
    ///
    /// One page of matches for `filter` plus the total count. The page query and the
    /// count are issued concurrently.
    pub async fn find_all<T>(&self, filter: Document, options: QueryOptions) -> ApiResult<Page<T>>
    where
        T: DeserializeOwned,
    {
        let result = self.try_find_all(filter, options).await;
        self.settle("find all", result)
    }

    async fn try_find_all<T>(&self, filter: Document, options: QueryOptions) -> Result<Page<T>, Failure>
    where
        T: DeserializeOwned,
    {
        let skip = options.page.saturating_sub(1).saturating_mul(options.limit);
        let query = FindQuery {
            filter: filter.clone(),
            sort: options.sort,
            skip,
            limit: Some(i64::try_from(options.limit).unwrap_or(i64::MAX)),
            lookups: options.populate,
        };

        let (documents, total) = tokio::try_join!(self.store.find(query), self.store.count(filter))?;

        let data = documents
            .into_iter()
            .map(bson::from_document)
            .collect::<Result<Vec<T>, _>>()?;

        Ok(Page { data, total })
    }

    /// find_by_id
    pub async fn find_by_id<T>(&self, id: &str, populate: &[Lookup]) -> ApiResult<T>
    where
        T: DeserializeOwned,
    {
        let result = self.try_find_by_id(id, populate).await;
        self.settle("find by ID", result)
    }

    async fn try_find_by_id<T>(&self, id: &str, populate: &[Lookup]) -> Result<T, Failure>
    where
        T: DeserializeOwned,
    {
        let oid = self.validate_object_id(id)?;
        let document = self
            .store
            .find_one(doc! { "_id": oid }, populate)
            .await?
            .ok_or_else(|| self.not_found(id))?;

        Ok(bson::from_document(document)?)
    }

    /// find_one
    ///
    /// First document matching `filter`; absence is `Ok(None)`.
    pub async fn find_one<T>(&self, filter: Document, populate: &[Lookup]) -> ApiResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let result = self.try_find_one(filter, populate).await;
        self.settle("find one", result)
    }

    async fn try_find_one<T>(&self, filter: Document, populate: &[Lookup]) -> Result<Option<T>, Failure>
    where
        T: DeserializeOwned,
    {
        match self.store.find_one(filter, populate).await? {
            Some(document) => Ok(Some(bson::from_document(document)?)),
            None => Ok(None),
        }
    }

    /// update
    ///
    /// Sets the serialized fields of `data` (plus a fresh `updatedAt`) on the record.
    /// Duplicate checks ignore the record being updated.
    pub async fn update<D, T>(&self, id: &str, data: &D, duplicate_checks: &[DuplicateCheck]) -> ApiResult<T>
    where
        D: Serialize,
        T: DeserializeOwned,
    {
        let result = self.try_update(id, data, duplicate_checks).await;
        self.settle("update", result)
    }

    async fn try_update<D, T>(&self, id: &str, data: &D, duplicate_checks: &[DuplicateCheck]) -> Result<T, Failure>
    where
        D: Serialize,
        T: DeserializeOwned,
    {
        let oid = self.validate_object_id(id)?;
        self.check_duplicates(duplicate_checks, Some(oid)).await?;

        let mut changes = bson::to_document(data)?;
        changes.remove("_id");
        changes.remove("createdAt");
        changes.insert("updatedAt", bson::DateTime::now());

        let document = self
            .store
            .update_by_id(oid, changes)
            .await?
            .ok_or_else(|| self.not_found(id))?;

        Ok(bson::from_document(document)?)
    }

    /// delete
    ///
    /// Removes the record and returns it.
    pub async fn delete<T>(&self, id: &str) -> ApiResult<T>
    where
        T: DeserializeOwned,
    {
        let result = self.try_delete(id).await;
        self.settle("delete", result)
    }

    async fn try_delete<T>(&self, id: &str) -> Result<T, Failure>
    where
        T: DeserializeOwned,
    {
        let oid = self.validate_object_id(id)?;
        let document = self
            .store
            .delete_by_id(oid)
            .await?
            .ok_or_else(|| self.not_found(id))?;

        Ok(bson::from_document(document)?)
    }

    /// soft_delete
    ///
    /// Flags the record inactive through `update`; the document stays in the store.
    pub async fn soft_delete<T>(&self, id: &str) -> ApiResult<T>
    where
        T: DeserializeOwned,
    {
        self.update(id, &doc! { "isActive": false }, &[]).await
    }

    /// Store liveness, for the health endpoint.
    pub async fn ping(&self) -> bool {
        match self.store.ping().await {
            Ok(()) => true,
            Err(error) => {
                tracing::warn!(collection = self.store.collection_name(), %error, "Database ping failed");
                false
            }
        }
    }

    async fn check_duplicates(&self, checks: &[DuplicateCheck], exclude: Option<ObjectId>) -> Result<(), Failure> {
        for check in checks {
            let mut filter = Document::new();
            filter.insert(check.field.clone(), check.value.clone());
            if let Some(oid) = exclude {
                filter.insert("_id", doc! { "$ne": oid });
            }

            if self.store.count(filter).await? > 0 {
                return Err(Failure::Api(ApiError::DuplicateResource {
                    resource: self.resource.to_string(),
                    field: check.field.clone(),
                    value: display_value(&check.value),
                }));
            }
        }
        Ok(())
    }

    fn not_found(&self, id: &str) -> Failure {
        Failure::Api(ApiError::ResourceNotFound {
            resource: self.resource.to_string(),
            id: id.to_string(),
        })
    }

    /// settle
    ///
    /// The single translation point from internal failures to `ApiError`. Errors that
    /// are already `ApiError`s pass through untouched; everything else is logged with
    /// the attempted action and classified.
    fn settle<T>(&self, action: &str, result: Result<T, Failure>) -> ApiResult<T> {
        let failure = match result {
            Ok(value) => return Ok(value),
            Err(Failure::Api(error)) => return Err(error),
            Err(failure) => failure,
        };

        tracing::error!(
            action,
            resource = self.resource,
            collection = self.store.collection_name(),
            error = ?failure,
            "Database {} failed for {}",
            action,
            self.resource
        );

        let error = match failure {
            Failure::Store(StoreError::DuplicateKey { field, value }) => ApiError::DuplicateResource {
                resource: self.resource.to_string(),
                field,
                value,
            },
            Failure::Store(StoreError::SchemaValidation(violations)) => ApiError::Validation(
                violations
                    .into_iter()
                    .map(|violation| {
                        FieldError::new(
                            violation.path,
                            violation.message,
                            violation.value.into_relaxed_extjson(),
                        )
                    })
                    .collect(),
            ),
            Failure::Store(StoreError::Driver(_)) | Failure::Codec(_) => ApiError::DatabaseOperation {
                action: action.to_string(),
                resource: self.resource.to_string(),
            },
            Failure::Api(error) => error,
        };

        Err(error)
    }
}

/// Strings are reported bare; other values use their extended-JSON rendering.
fn display_value(value: &Bson) -> String {
    match value {
        Bson::String(text) => text.clone(),
        other => other.clone().into_relaxed_extjson().to_string(),
    }
}
