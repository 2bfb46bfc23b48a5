use std::{fmt::Display, str::FromStr};

use bson::oid::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, de};
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

// --- Core Application Schemas (Mapped to Database) ---

/// UserDocument
///
/// The persisted shape of a user in the `users` collection. Only the data-access layer
/// and the service see this type; the API speaks `User`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub name: String,
    pub email: String,
    pub age: i32,
    pub is_active: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: bson::DateTime,
    pub updated_at: bson::DateTime,
}

/// User
///
/// The user record as returned by the API. `_id` is the hex form of the ObjectId.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct User {
    #[serde(rename = "_id")]
    #[schema(example = "65f1c0ffee0ddba11ad0beef")]
    pub id: String,
    pub name: String,
    pub email: String,
    pub age: i32,
    pub is_active: bool,
    pub tags: Vec<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub updated_at: DateTime<Utc>,
}

impl From<UserDocument> for User {
    fn from(doc: UserDocument) -> Self {
        Self {
            id: doc.id.to_hex(),
            name: doc.name,
            email: doc.email,
            age: doc.age,
            is_active: doc.is_active,
            tags: doc.tags,
            created_at: doc.created_at.to_chrono(),
            updated_at: doc.updated_at.to_chrono(),
        }
    }
}

/// NewUser
///
/// Insert payload: a normalized `CreateUserRequest` with schema defaults applied.
/// `_id` and timestamps are assigned by the data-access layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub age: i32,
    pub is_active: bool,
    pub tags: Vec<String>,
}

// --- Request Payloads (Input Schemas) ---

/// CreateUserRequest
///
/// Input payload for `POST /users`. Unknown fields are rejected.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, TS, ToSchema)]
#[serde(deny_unknown_fields)]
#[ts(export)]
pub struct CreateUserRequest {
    #[validate(length(min = 2, max = 50, message = "Name must be between 2 and 50 characters long"))]
    #[schema(example = "Jane Doe")]
    pub name: String,

    #[validate(email(message = "Please provide a valid email address"))]
    #[schema(example = "jane@example.com")]
    pub email: String,

    #[validate(range(min = 0, max = 120, message = "Age must be between 0 and 120"))]
    pub age: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub tags: Option<Vec<String>>,
}

impl CreateUserRequest {
    /// Applies the schema's trimming/lower-casing and defaults.
    pub fn into_new_user(self) -> NewUser {
        NewUser {
            name: self.name.trim().to_string(),
            email: normalize_email(&self.email),
            age: self.age,
            is_active: true,
            tags: self.tags.unwrap_or_default(),
        }
    }
}

/// UpdateUserRequest
///
/// Partial update payload for `PUT|PATCH /users/{id}`. Absent fields are left
/// untouched: they are skipped when serialized into the `$set` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate, TS, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
#[ts(export)]
pub struct UpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 2, max = 50, message = "Name must be between 2 and 50 characters long"))]
    #[ts(optional)]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(email(message = "Please provide a valid email address"))]
    #[ts(optional)]
    pub email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[validate(range(min = 0, max = 120, message = "Age must be between 0 and 120"))]
    #[ts(optional)]
    pub age: Option<i32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub is_active: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub tags: Option<Vec<String>>,
}

impl UpdateUserRequest {
    pub fn normalized(self) -> Self {
        Self {
            name: self.name.map(|name| name.trim().to_string()),
            email: self.email.as_deref().map(normalize_email),
            ..self
        }
    }
}

/// Emails are stored trimmed and lower-cased, which is what makes uniqueness
/// case-insensitive.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// ListUsersQuery
///
/// Query parameters for `GET /users`. Supplying either switches the listing to the
/// paginated envelope.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListUsersQuery {
    /// 1-based page number (default 1 when only `limit` is given).
    #[serde(default, deserialize_with = "blank_as_none")]
    pub page: Option<u64>,
    /// Page size (default 10 when only `page` is given).
    #[serde(default, deserialize_with = "blank_as_none")]
    pub limit: Option<u64>,
}

/// `?page=` carries no value: treat it like an absent parameter.
fn blank_as_none<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    match Option::<String>::deserialize(deserializer)? {
        Some(raw) if !raw.trim().is_empty() => raw.trim().parse().map(Some).map_err(de::Error::custom),
        _ => Ok(None),
    }
}

impl ListUsersQuery {
    pub fn is_paginated(&self) -> bool {
        self.page.is_some() || self.limit.is_some()
    }
}

// --- Health ---

/// DatabaseHealth
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DatabaseHealth {
    pub status: String,
    pub connected: bool,
}

/// HealthCheck
///
/// Output of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct HealthCheck {
    pub status: String,
    pub timestamp: String,
    /// Seconds since the server started.
    #[ts(type = "number")]
    pub uptime: u64,
    pub version: String,
    pub environment: String,
    pub database: DatabaseHealth,
}
