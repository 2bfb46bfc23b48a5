//! The `users` collection: its `$jsonSchema` validator, the equivalent in-process
//! check, and constructors for both store flavors.

use bson::{Bson, Document, doc};

use crate::store::{FieldViolation, MemoryDatabase, MemoryStore, MongoStore, StoreResult};

pub const USERS_COLLECTION: &str = "users";
pub const USER_RESOURCE: &str = "User";

pub const NAME_MIN_LEN: usize = 2;
pub const NAME_MAX_LEN: usize = 50;
pub const AGE_MIN: i64 = 0;
pub const AGE_MAX: i64 = 120;

const REQUIRED: [&str; 6] = ["name", "email", "age", "isActive", "createdAt", "updatedAt"];

/// user_json_schema
///
/// Server-side validator for the `users` collection. Mirrors the request rules so
/// writes that bypass the HTTP layer are still held to them.
pub fn user_json_schema() -> Document {
    doc! {
        "bsonType": "object",
        "required": REQUIRED.to_vec(),
        "properties": {
            "name": {
                "bsonType": "string",
                "minLength": NAME_MIN_LEN as i32,
                "maxLength": NAME_MAX_LEN as i32,
            },
            "email": {
                "bsonType": "string",
                "pattern": "^\\S+@\\S+\\.\\S+$",
            },
            "age": {
                "bsonType": ["int", "long"],
                "minimum": AGE_MIN,
                "maximum": AGE_MAX,
            },
            "isActive": { "bsonType": "bool" },
            "tags": {
                "bsonType": "array",
                "items": { "bsonType": "string" },
            },
            "createdAt": { "bsonType": "date" },
            "updatedAt": { "bsonType": "date" },
        },
    }
}

/// user_schema_violations
///
/// In-process equivalent of `user_json_schema`, used by the memory store.
pub fn user_schema_violations(document: &Document) -> Vec<FieldViolation> {
    let mut violations = Vec::new();

    for field in REQUIRED {
        if !document.contains_key(field) {
            violations.push(FieldViolation::new(
                field,
                format!("Path `{}` is required.", field),
                Bson::Null,
            ));
        }
    }

    match document.get("name") {
        Some(Bson::String(name)) => {
            let len = name.chars().count();
            if len < NAME_MIN_LEN {
                violations.push(FieldViolation::new(
                    "name",
                    format!(
                        "Path `name` (`{}`) is shorter than the minimum allowed length ({}).",
                        name, NAME_MIN_LEN
                    ),
                    Bson::String(name.clone()),
                ));
            } else if len > NAME_MAX_LEN {
                violations.push(FieldViolation::new(
                    "name",
                    format!(
                        "Path `name` (`{}`) is longer than the maximum allowed length ({}).",
                        name, NAME_MAX_LEN
                    ),
                    Bson::String(name.clone()),
                ));
            }
        }
        Some(other) => violations.push(type_violation("name", "string", other)),
        None => {}
    }

    match document.get("email") {
        Some(Bson::String(email)) if !looks_like_email(email) => {
            violations.push(FieldViolation::new(
                "email",
                "Please provide a valid email address",
                Bson::String(email.clone()),
            ));
        }
        Some(Bson::String(_)) | None => {}
        Some(other) => violations.push(type_violation("email", "string", other)),
    }

    if let Some(value) = document.get("age") {
        let age = match value {
            Bson::Int32(age) => Some(i64::from(*age)),
            Bson::Int64(age) => Some(*age),
            _ => None,
        };
        match age {
            Some(age) if age < AGE_MIN => violations.push(FieldViolation::new(
                "age",
                format!("Path `age` ({}) is less than minimum allowed value ({}).", age, AGE_MIN),
                value.clone(),
            )),
            Some(age) if age > AGE_MAX => violations.push(FieldViolation::new(
                "age",
                format!("Path `age` ({}) is more than maximum allowed value ({}).", age, AGE_MAX),
                value.clone(),
            )),
            Some(_) => {}
            None => violations.push(type_violation("age", "int", value)),
        }
    }

    if let Some(value) = document.get("isActive") {
        if !matches!(value, Bson::Boolean(_)) {
            violations.push(type_violation("isActive", "bool", value));
        }
    }

    match document.get("tags") {
        Some(Bson::Array(tags)) => {
            if let Some(tag) = tags.iter().find(|tag| !matches!(tag, Bson::String(_))) {
                violations.push(type_violation("tags", "string", tag));
            }
        }
        Some(other) => violations.push(type_violation("tags", "array", other)),
        None => {}
    }

    violations
}

fn type_violation(path: &str, expected: &str, value: &Bson) -> FieldViolation {
    FieldViolation::new(
        path,
        format!("Cast to {} failed for value at path `{}`", expected, path),
        value.clone(),
    )
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !email.chars().any(char::is_whitespace)
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    }
}

/// memory_users
///
/// `users` collection backed by memory, with the unique email index and schema check.
pub fn memory_users(db: &MemoryDatabase) -> MemoryStore {
    MemoryStore::new(db, USERS_COLLECTION)
        .with_unique_index("email")
        .with_schema(user_schema_violations)
}

/// mongo_users
///
/// `users` collection on MongoDB. Installs the validator and the unique email index
/// before handing the store out.
pub async fn mongo_users(db: &mongodb::Database) -> StoreResult<MongoStore> {
    let store = MongoStore::new(db, USERS_COLLECTION);
    store.ensure_schema(user_json_schema()).await?;
    store.ensure_unique_index("email").await?;
    tracing::info!(collection = USERS_COLLECTION, "Collection validator and unique email index ensured");
    Ok(store)
}
