use async_trait::async_trait;
use bson::{Document, doc, oid::ObjectId};
use proto_sync_api::{
    database::{DatabaseOperations, DuplicateCheck, QueryOptions},
    errors::ApiError,
    models::UserDocument,
    schema::{self, USER_RESOURCE, USERS_COLLECTION},
    store::{
        DocumentStore, FindQuery, Lookup, MemoryDatabase, MemoryStore, StoreError, StoreResult,
        StoreState,
    },
};
use serde_json::json;
use std::sync::Arc;
use tokio::time::{Duration, sleep};

// --- Fixtures ---

fn users_ops() -> (DatabaseOperations, MemoryDatabase) {
    let db = MemoryDatabase::new();
    let store: StoreState = Arc::new(schema::memory_users(&db));
    (DatabaseOperations::new(store, USER_RESOURCE), db)
}

fn user_data(name: &str, email: &str, age: i32) -> Document {
    doc! { "name": name, "email": email, "age": age, "isActive": true, "tags": [] }
}

async fn seed(ops: &DatabaseOperations, name: &str, email: &str) -> UserDocument {
    ops.create(&user_data(name, email, 30), &[])
        .await
        .expect("seed user should be created")
}

/// A store whose every call fails with an unclassified driver error.
struct BrokenStore;

#[async_trait]
impl DocumentStore for BrokenStore {
    fn collection_name(&self) -> &str {
        "broken"
    }
    async fn insert_one(&self, _document: Document) -> StoreResult<Document> {
        Err(StoreError::Driver("connection reset".into()))
    }
    async fn find(&self, _query: FindQuery) -> StoreResult<Vec<Document>> {
        Err(StoreError::Driver("connection reset".into()))
    }
    async fn count(&self, _filter: Document) -> StoreResult<u64> {
        Err(StoreError::Driver("connection reset".into()))
    }
    async fn find_one(&self, _filter: Document, _lookups: &[Lookup]) -> StoreResult<Option<Document>> {
        Err(StoreError::Driver("connection reset".into()))
    }
    async fn update_by_id(&self, _id: ObjectId, _changes: Document) -> StoreResult<Option<Document>> {
        Err(StoreError::Driver("connection reset".into()))
    }
    async fn delete_by_id(&self, _id: ObjectId) -> StoreResult<Option<Document>> {
        Err(StoreError::Driver("connection reset".into()))
    }
    async fn ping(&self) -> StoreResult<()> {
        Err(StoreError::Driver("connection reset".into()))
    }
}

// --- create ---

#[tokio::test]
async fn test_create_assigns_id_and_timestamps() {
    let (ops, _db) = users_ops();
    let user = seed(&ops, "Ada", "ada@example.com").await;

    assert_eq!(user.name, "Ada");
    assert_eq!(user.created_at, user.updated_at);
    assert!(user.is_active);
}

#[tokio::test]
async fn test_create_duplicate_check_rejects_and_leaves_store_unchanged() {
    let (ops, db) = users_ops();
    seed(&ops, "Ada", "ada@example.com").await;

    let checks = [DuplicateCheck::new("email", "ada@example.com")];
    let result = ops
        .create::<_, UserDocument>(&user_data("Other", "ada@example.com", 40), &checks)
        .await;

    assert_eq!(
        result.unwrap_err(),
        ApiError::DuplicateResource {
            resource: "User".into(),
            field: "email".into(),
            value: "ada@example.com".into(),
        }
    );
    assert_eq!(db.len(USERS_COLLECTION).await, 1);
}

#[tokio::test]
async fn test_unique_index_violation_is_translated_without_pre_check() {
    let (ops, db) = users_ops();
    seed(&ops, "Ada", "ada@example.com").await;

    // No duplicate checks: the store's unique index is the last line.
    let err = ops
        .create::<_, UserDocument>(&user_data("Other", "ada@example.com", 40), &[])
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::DuplicateResource { ref field, .. } if field == "email"));
    assert_eq!(db.len(USERS_COLLECTION).await, 1);
}

#[tokio::test]
async fn test_schema_violation_is_translated_to_validation() {
    let (ops, _db) = users_ops();

    let err = ops
        .create::<_, UserDocument>(&user_data("Ada", "ada@example.com", 150), &[])
        .await
        .unwrap_err();

    let ApiError::Validation(fields) = err else {
        panic!("expected a validation error, got {err:?}");
    };
    assert_eq!(fields.len(), 1);
    assert_eq!(fields[0].field, "age");
    assert_eq!(fields[0].value, json!(150));
}

// --- find ---

#[tokio::test]
async fn test_find_by_id_rejects_malformed_ids() {
    let (ops, _db) = users_ops();

    let err = ops.find_by_id::<UserDocument>("not-an-id", &[]).await.unwrap_err();

    let ApiError::Validation(fields) = err else {
        panic!("expected a validation error");
    };
    assert_eq!(fields[0].field, "id");
    assert_eq!(fields[0].message, "Invalid user ID format");
    assert_eq!(fields[0].value, json!("not-an-id"));
}

#[tokio::test]
async fn test_find_by_id_missing_is_not_found() {
    let (ops, _db) = users_ops();
    let id = ObjectId::new().to_hex();

    let err = ops.find_by_id::<UserDocument>(&id, &[]).await.unwrap_err();

    assert_eq!(
        err,
        ApiError::ResourceNotFound {
            resource: "User".into(),
            id
        }
    );
}

#[tokio::test]
async fn test_find_one_absence_is_none() {
    let (ops, _db) = users_ops();
    seed(&ops, "Ada", "ada@example.com").await;

    let hit: Option<UserDocument> = ops.find_one(doc! { "email": "ada@example.com" }, &[]).await.unwrap();
    let miss: Option<UserDocument> = ops.find_one(doc! { "email": "bob@example.com" }, &[]).await.unwrap();

    assert_eq!(hit.map(|user| user.name), Some("Ada".to_string()));
    assert!(miss.is_none());
}

#[tokio::test]
async fn test_find_all_pages_newest_first_with_total() {
    let (ops, _db) = users_ops();
    for n in 0..7 {
        seed(&ops, &format!("User {n}"), &format!("user{n}@example.com")).await;
        // createdAt has millisecond resolution.
        sleep(Duration::from_millis(2)).await;
    }

    let page = ops
        .find_all::<UserDocument>(doc! {}, QueryOptions::page(2, 3))
        .await
        .unwrap();

    assert_eq!(page.total, 7);
    let names: Vec<_> = page.data.iter().map(|user| user.name.as_str()).collect();
    assert_eq!(names, vec!["User 3", "User 2", "User 1"]);
}

#[tokio::test]
async fn test_find_all_resolves_lookups() {
    let db = MemoryDatabase::new();
    let authors = MemoryStore::new(&db, "authors");
    let author_id = ObjectId::new();
    authors
        .insert_one(doc! { "_id": author_id, "name": "Ada" })
        .await
        .unwrap();

    let posts: StoreState = Arc::new(MemoryStore::new(&db, "posts"));
    let ops = DatabaseOperations::new(posts, "Post");
    let _: Document = ops
        .create(&doc! { "title": "Notes", "author": author_id }, &[])
        .await
        .unwrap();

    let options = QueryOptions {
        populate: vec![Lookup::new("authors", "author", "_id", "authorDetails")],
        ..QueryOptions::default()
    };
    let page = ops.find_all::<Document>(doc! {}, options).await.unwrap();

    let joined = page.data[0].get_array("authorDetails").unwrap();
    assert_eq!(joined.len(), 1);
    assert_eq!(
        joined[0].as_document().and_then(|author| author.get_str("name").ok()),
        Some("Ada")
    );
}

// --- update / delete ---

#[tokio::test]
async fn test_update_excludes_self_from_duplicate_check_and_refreshes_timestamp() {
    let (ops, _db) = users_ops();
    let user = seed(&ops, "Ada", "ada@example.com").await;
    sleep(Duration::from_millis(2)).await;

    let checks = [DuplicateCheck::new("email", "ada@example.com")];
    let updated: UserDocument = ops
        .update(&user.id.to_hex(), &doc! { "email": "ada@example.com", "age": 37 }, &checks)
        .await
        .unwrap();

    assert_eq!(updated.age, 37);
    assert_eq!(updated.created_at, user.created_at);
    assert!(updated.updated_at > user.updated_at);
}

#[tokio::test]
async fn test_update_rejects_another_records_value() {
    let (ops, _db) = users_ops();
    seed(&ops, "Ada", "ada@example.com").await;
    let bob = seed(&ops, "Bob", "bob@example.com").await;

    let checks = [DuplicateCheck::new("email", "ada@example.com")];
    let err = ops
        .update::<_, UserDocument>(&bob.id.to_hex(), &doc! { "email": "ada@example.com" }, &checks)
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::DuplicateResource { .. }));
}

#[tokio::test]
async fn test_update_runs_store_validation() {
    let (ops, _db) = users_ops();
    let user = seed(&ops, "Ada", "ada@example.com").await;

    let err = ops
        .update::<_, UserDocument>(&user.id.to_hex(), &doc! { "age": -5 }, &[])
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Validation(ref fields) if fields[0].field == "age"));
}

#[tokio::test]
async fn test_update_and_delete_missing_are_not_found() {
    let (ops, _db) = users_ops();
    let id = ObjectId::new().to_hex();

    let update = ops.update::<_, UserDocument>(&id, &doc! { "age": 20 }, &[]).await;
    let delete = ops.delete::<UserDocument>(&id).await;

    assert!(matches!(update, Err(ApiError::ResourceNotFound { .. })));
    assert!(matches!(delete, Err(ApiError::ResourceNotFound { .. })));
}

#[tokio::test]
async fn test_delete_removes_and_returns_record() {
    let (ops, db) = users_ops();
    let user = seed(&ops, "Ada", "ada@example.com").await;

    let removed: UserDocument = ops.delete(&user.id.to_hex()).await.unwrap();

    assert_eq!(removed.id, user.id);
    assert_eq!(db.len(USERS_COLLECTION).await, 0);
}

#[tokio::test]
async fn test_soft_delete_keeps_the_document() {
    let (ops, db) = users_ops();
    let user = seed(&ops, "Ada", "ada@example.com").await;

    let flagged: UserDocument = ops.soft_delete(&user.id.to_hex()).await.unwrap();

    assert!(!flagged.is_active);
    assert_eq!(db.len(USERS_COLLECTION).await, 1);
}

// --- error translation ---

#[tokio::test]
async fn test_driver_failures_become_database_operation_errors() {
    let ops = DatabaseOperations::new(Arc::new(BrokenStore), USER_RESOURCE);

    let create = ops.create::<_, Document>(&doc! { "name": "x" }, &[]).await.unwrap_err();
    let find_all = ops.find_all::<Document>(doc! {}, QueryOptions::default()).await.unwrap_err();
    let find_one = ops.find_one::<Document>(doc! {}, &[]).await.unwrap_err();

    assert_eq!(create.to_string(), "Failed to create user");
    assert_eq!(find_all.to_string(), "Failed to find all user");
    assert_eq!(find_one.to_string(), "Failed to find one user");
    assert_eq!(create.status_code().as_u16(), 500);
}

#[tokio::test]
async fn test_malformed_id_is_reported_before_the_store_is_touched() {
    let ops = DatabaseOperations::new(Arc::new(BrokenStore), USER_RESOURCE);

    let err = ops.delete::<Document>("123").await.unwrap_err();

    assert!(matches!(err, ApiError::Validation(_)));
}

#[tokio::test]
async fn test_decode_failures_become_database_operation_errors() {
    let (ops, _db) = users_ops();
    seed(&ops, "Ada", "ada@example.com").await;

    // A shape the stored document cannot be decoded into.
    #[derive(serde::Deserialize, Debug)]
    struct Wrong {
        #[allow(dead_code)]
        missing_field: String,
    }

    let err = ops.find_one::<Wrong>(doc! {}, &[]).await.unwrap_err();
    assert_eq!(err.to_string(), "Failed to find one user");
}

#[tokio::test]
async fn test_ping_reports_store_liveness() {
    let (ops, _db) = users_ops();
    assert!(ops.ping().await);

    let broken = DatabaseOperations::new(Arc::new(BrokenStore), USER_RESOURCE);
    assert!(!broken.ping().await);
}
