//! MongoDB implementation of `DocumentStore`.

use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document, doc, oid::ObjectId};
use futures_util::TryStreamExt;
use mongodb::{
    Client, Collection, Database, IndexModel,
    error::{Error as MongoError, ErrorKind, WriteFailure},
    options::{
        ClientOptions, CreateCollectionOptions, FindOneAndUpdateOptions, FindOptions,
        IndexOptions, ReturnDocument,
    },
};
use tracing::{info, instrument};

use super::{DocumentStore, FieldViolation, FindQuery, Lookup, StoreError, StoreResult};
use crate::config::AppConfig;

const DUPLICATE_KEY: i32 = 11000;
const DOCUMENT_VALIDATION_FAILURE: i32 = 121;
const NAMESPACE_EXISTS: i32 = 48;

/// connect
///
/// Builds a pooled client from the configured URI and verifies the server answers
/// before the application starts serving.
pub async fn connect(config: &AppConfig) -> Result<Client, MongoError> {
    info!("Attempting to connect to MongoDB");

    let mut options = ClientOptions::parse(&config.mongodb_uri).await?;
    options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
    options.max_pool_size = Some(100);
    options.min_pool_size = Some(5);
    options.connect_timeout = Some(Duration::from_secs(10));
    options.server_selection_timeout = Some(Duration::from_secs(30));

    let client = Client::with_options(options)?;
    client
        .database(&config.mongodb_database)
        .run_command(doc! { "ping": 1 })
        .await?;

    info!(database = %config.mongodb_database, "Successfully connected to MongoDB");
    Ok(client)
}

/// MongoStore
///
/// One collection of raw BSON documents.
#[derive(Clone)]
pub struct MongoStore {
    db: Database,
    collection: Collection<Document>,
}

impl MongoStore {
    pub fn new(db: &Database, collection_name: &str) -> Self {
        Self {
            db: db.clone(),
            collection: db.collection::<Document>(collection_name),
        }
    }

    /// ensure_schema
    ///
    /// Installs `$jsonSchema` as the collection validator, creating the collection
    /// when it does not exist yet. Updates are validated too (strict level).
    pub async fn ensure_schema(&self, schema: Document) -> StoreResult<()> {
        let name = self.collection.name().to_string();
        let validator = doc! { "$jsonSchema": schema };

        let created = self
            .db
            .create_collection(&name)
            .with_options(
                CreateCollectionOptions::builder()
                    .validator(validator.clone())
                    .build(),
            )
            .await;

        match created {
            Ok(()) => Ok(()),
            Err(err) if command_code(&err) == Some(NAMESPACE_EXISTS) => {
                self.db
                    .run_command(doc! {
                        "collMod": name,
                        "validator": validator,
                        "validationLevel": "strict",
                    })
                    .await
                    .map(|_| ())
                    .map_err(classify)
            }
            Err(err) => Err(classify(err)),
        }
    }

    pub async fn ensure_unique_index(&self, field: &str) -> StoreResult<()> {
        let index = IndexModel::builder()
            .keys(doc! { field: 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.collection.create_index(index).await.map_err(classify)?;
        Ok(())
    }

    fn pipeline(query: &FindQuery) -> Vec<Document> {
        let mut pipeline = vec![doc! { "$match": query.filter.clone() }];
        if !query.sort.is_empty() {
            pipeline.push(doc! { "$sort": query.sort.clone() });
        }
        if query.skip > 0 {
            pipeline.push(doc! { "$skip": i64::try_from(query.skip).unwrap_or(i64::MAX) });
        }
        if let Some(limit) = query.limit.filter(|limit| *limit > 0) {
            pipeline.push(doc! { "$limit": limit });
        }
        pipeline.extend(query.lookups.iter().map(lookup_stage));
        pipeline
    }
}

fn lookup_stage(lookup: &Lookup) -> Document {
    doc! {
        "$lookup": {
            "from": lookup.from.as_str(),
            "localField": lookup.local_field.as_str(),
            "foreignField": lookup.foreign_field.as_str(),
            "as": lookup.as_field.as_str(),
        }
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    fn collection_name(&self) -> &str {
        self.collection.name()
    }

    #[instrument(skip(self, document), fields(collection = %self.collection.name()))]
    async fn insert_one(&self, document: Document) -> StoreResult<Document> {
        self.collection.insert_one(&document).await.map_err(classify)?;
        Ok(document)
    }

    #[instrument(skip(self), fields(collection = %self.collection.name()))]
    async fn find(&self, query: FindQuery) -> StoreResult<Vec<Document>> {
        if !query.lookups.is_empty() {
            let cursor = self
                .collection
                .aggregate(Self::pipeline(&query))
                .await
                .map_err(classify)?;
            return cursor.try_collect().await.map_err(classify);
        }

        let mut options = FindOptions::builder().skip(query.skip).build();
        if !query.sort.is_empty() {
            options.sort = Some(query.sort);
        }
        options.limit = query.limit.filter(|limit| *limit > 0);

        let cursor = self
            .collection
            .find(query.filter)
            .with_options(options)
            .await
            .map_err(classify)?;
        cursor.try_collect().await.map_err(classify)
    }

    async fn count(&self, filter: Document) -> StoreResult<u64> {
        self.collection.count_documents(filter).await.map_err(classify)
    }

    async fn find_one(&self, filter: Document, lookups: &[Lookup]) -> StoreResult<Option<Document>> {
        if lookups.is_empty() {
            return self.collection.find_one(filter).await.map_err(classify);
        }

        let query = FindQuery {
            filter,
            limit: Some(1),
            lookups: lookups.to_vec(),
            ..FindQuery::default()
        };
        let mut cursor = self
            .collection
            .aggregate(Self::pipeline(&query))
            .await
            .map_err(classify)?;
        cursor.try_next().await.map_err(classify)
    }

    #[instrument(skip(self, changes), fields(collection = %self.collection.name()))]
    async fn update_by_id(&self, id: ObjectId, changes: Document) -> StoreResult<Option<Document>> {
        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.collection
            .find_one_and_update(doc! { "_id": id }, doc! { "$set": changes })
            .with_options(options)
            .await
            .map_err(classify)
    }

    #[instrument(skip(self), fields(collection = %self.collection.name()))]
    async fn delete_by_id(&self, id: ObjectId) -> StoreResult<Option<Document>> {
        self.collection
            .find_one_and_delete(doc! { "_id": id })
            .await
            .map_err(classify)
    }

    async fn ping(&self) -> StoreResult<()> {
        self.db
            .run_command(doc! { "ping": 1 })
            .await
            .map(|_| ())
            .map_err(classify)
    }
}

fn command_code(err: &MongoError) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        _ => None,
    }
}

/// classify
///
/// Maps driver errors onto `StoreError`. Inserts report key violations as write
/// errors; `findAndModify` reports them as command errors, without `errInfo`.
pub(crate) fn classify(err: MongoError) -> StoreError {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(write)) if write.code == DUPLICATE_KEY => {
            parse_duplicate_key(&write.message)
        }
        ErrorKind::Write(WriteFailure::WriteError(write))
            if write.code == DOCUMENT_VALIDATION_FAILURE =>
        {
            StoreError::SchemaValidation(
                write
                    .details
                    .as_ref()
                    .map(parse_schema_violations)
                    .filter(|violations| !violations.is_empty())
                    .unwrap_or_else(|| vec![generic_violation(&write.message)]),
            )
        }
        ErrorKind::Command(command) if command.code == DUPLICATE_KEY => {
            parse_duplicate_key(&command.message)
        }
        ErrorKind::Command(command) if command.code == DOCUMENT_VALIDATION_FAILURE => {
            StoreError::SchemaValidation(vec![generic_violation(&command.message)])
        }
        _ => StoreError::Driver(err.to_string()),
    }
}

fn generic_violation(message: &str) -> FieldViolation {
    FieldViolation::new("document", message, Bson::Null)
}

/// parse_duplicate_key
///
/// Extracts the offending field and value from a server message such as
/// `E11000 duplicate key error collection: db.users index: email_1 dup key: { email: "a@b.io" }`.
pub(crate) fn parse_duplicate_key(message: &str) -> StoreError {
    let parsed = message
        .split_once("dup key: {")
        .and_then(|(_, rest)| rest.rsplit_once('}'))
        .and_then(|(pair, _)| pair.split_once(':'))
        .map(|(field, value)| {
            (
                field.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            )
        })
        .filter(|(field, _)| !field.is_empty());

    let (field, value) =
        parsed.unwrap_or_else(|| ("field".to_string(), "unknown".to_string()));
    StoreError::DuplicateKey { field, value }
}

/// parse_schema_violations
///
/// Walks the `errInfo` of a `$jsonSchema` rejection and produces one violation per
/// failing property or missing required field.
pub(crate) fn parse_schema_violations(err_info: &Document) -> Vec<FieldViolation> {
    let rules = err_info
        .get_document("details")
        .and_then(|details| details.get_array("schemaRulesNotSatisfied"));
    let Ok(rules) = rules else {
        return Vec::new();
    };

    let mut violations = Vec::new();
    for rule in rules.iter().filter_map(Bson::as_document) {
        if let Ok(properties) = rule.get_array("propertiesNotSatisfied") {
            for property in properties.iter().filter_map(Bson::as_document) {
                let path = property.get_str("propertyName").unwrap_or("document");
                let detail = property
                    .get_array("details")
                    .ok()
                    .and_then(|details| details.iter().find_map(Bson::as_document));
                let reason = detail
                    .and_then(|d| d.get_str("reason").ok())
                    .unwrap_or("failed validation");
                let value = detail
                    .and_then(|d| d.get("consideredValue").cloned())
                    .unwrap_or(Bson::Null);
                violations.push(FieldViolation::new(
                    path,
                    format!("Path `{}` {}", path, reason),
                    value,
                ));
            }
        }
        if let Ok(missing) = rule.get_array("missingProperties") {
            for path in missing.iter().filter_map(Bson::as_str) {
                violations.push(FieldViolation::new(
                    path,
                    format!("Path `{}` is required.", path),
                    Bson::Null,
                ));
            }
        }
    }
    violations
}
