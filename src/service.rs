use bson::doc;
use serde_json::Value;
use validator::Validate;

use crate::{
    database::{DatabaseOperations, DuplicateCheck, QueryOptions},
    errors::{ApiError, ApiResult, FieldError},
    models::{CreateUserRequest, UpdateUserRequest, User, UserDocument, normalize_email},
    response::PaginationMeta,
    schema::USER_RESOURCE,
    store::StoreState,
};

/// Upper bound on the unpaginated listing.
pub const ACTIVE_USERS_LIMIT: u64 = 1000;

/// Paginated
///
/// One page of users plus the block rendered as `pagination` in the envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct Paginated<T> {
    pub data: Vec<T>,
    pub pagination: PaginationMeta,
}

/// UserService
///
/// User policy on top of the generic helper: which checks run before which writes,
/// which records count as listed, and how pages are assembled.
#[derive(Clone)]
pub struct UserService {
    db: DatabaseOperations,
}

impl UserService {
    pub fn new(store: StoreState) -> Self {
        Self {
            db: DatabaseOperations::new(store, USER_RESOURCE),
        }
    }

    pub fn operations(&self) -> &DatabaseOperations {
        &self.db
    }

    /// create_user
    ///
    /// Rejects a second account with the same (normalized) email before writing.
    pub async fn create_user(&self, request: CreateUserRequest) -> ApiResult<User> {
        request.validate()?;
        let new_user = request.into_new_user();
        tracing::debug!(email = %new_user.email, "Creating user");

        let checks = [DuplicateCheck::new("email", new_user.email.as_str())];
        let created: UserDocument = self.db.create(&new_user, &checks).await?;

        tracing::info!(user_id = %created.id, "User created");
        Ok(created.into())
    }

    /// get_all_users
    ///
    /// Active users, newest first, capped at `ACTIVE_USERS_LIMIT`.
    pub async fn get_all_users(&self) -> ApiResult<Vec<User>> {
        let page = self
            .db
            .find_all::<UserDocument>(
                doc! { "isActive": true },
                QueryOptions::page(1, ACTIVE_USERS_LIMIT),
            )
            .await?;
        Ok(page.data.into_iter().map(User::from).collect())
    }

    /// get_users_paginated
    ///
    /// `page` and `limit` start at 1; `totalPages` is `ceil(total / limit)`.
    pub async fn get_users_paginated(&self, page: u64, limit: u64) -> ApiResult<Paginated<User>> {
        let mut invalid = Vec::new();
        if page < 1 {
            invalid.push(FieldError::new("page", "Page must be at least 1", Value::from(page)));
        }
        if limit < 1 {
            invalid.push(FieldError::new("limit", "Limit must be at least 1", Value::from(limit)));
        }
        // The driver encodes `skip` as a signed 64-bit integer.
        let skip = page.saturating_sub(1).checked_mul(limit);
        if page >= 1 && limit >= 1 && !skip.is_some_and(|skip| i64::try_from(skip).is_ok()) {
            invalid.push(FieldError::new("page", "Page is out of range", Value::from(page)));
        }
        if !invalid.is_empty() {
            return Err(ApiError::Validation(invalid));
        }

        let result = self
            .db
            .find_all::<UserDocument>(doc! { "isActive": true }, QueryOptions::page(page, limit))
            .await?;

        Ok(Paginated {
            data: result.data.into_iter().map(User::from).collect(),
            pagination: PaginationMeta::new(page, limit, result.total),
        })
    }

    pub async fn get_user_by_id(&self, id: &str) -> ApiResult<User> {
        let user: UserDocument = self.db.find_by_id(id, &[]).await?;
        Ok(user.into())
    }

    /// update_user
    ///
    /// Applies only the fields present in the patch. The email uniqueness check runs
    /// only when the patch carries an email, and never matches the user itself.
    pub async fn update_user(&self, id: &str, request: UpdateUserRequest) -> ApiResult<User> {
        request.validate()?;
        let patch = request.normalized();

        let checks: Vec<DuplicateCheck> = patch
            .email
            .as_deref()
            .map(|email| DuplicateCheck::new("email", email))
            .into_iter()
            .collect();

        let updated: UserDocument = self.db.update(id, &patch, &checks).await?;
        tracing::info!(user_id = %updated.id, "User updated");
        Ok(updated.into())
    }

    /// delete_user
    ///
    /// Hard delete: the document is removed from the store.
    pub async fn delete_user(&self, id: &str) -> ApiResult<()> {
        let removed: UserDocument = self.db.delete(id).await?;
        tracing::info!(user_id = %removed.id, "User deleted");
        Ok(())
    }

    /// soft_delete_user
    ///
    /// Marks the user inactive. The record stays in the store but drops out of the
    /// listings and of email lookups.
    pub async fn soft_delete_user(&self, id: &str) -> ApiResult<User> {
        let user: UserDocument = self.db.soft_delete(id).await?;
        tracing::info!(user_id = %user.id, "User deactivated");
        Ok(user.into())
    }

    /// get_user_by_email
    ///
    /// Case-insensitive lookup among active users; `None` when nobody matches.
    pub async fn get_user_by_email(&self, email: &str) -> ApiResult<Option<User>> {
        let filter = doc! { "email": normalize_email(email), "isActive": true };
        let user: Option<UserDocument> = self.db.find_one(filter, &[]).await?;
        Ok(user.map(User::from))
    }

    /// Whether the backing store currently answers.
    pub async fn database_available(&self) -> bool {
        self.db.ping().await
    }
}
