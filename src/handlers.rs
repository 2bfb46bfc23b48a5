use crate::{
    AppState,
    errors::{ApiError, ApiResult},
    extract::{ApiPath, ApiQuery, ValidatedJson},
    models::{
        CreateUserRequest, DatabaseHealth, HealthCheck, ListUsersQuery, UpdateUserRequest, User,
    },
    database::{DEFAULT_LIMIT, DEFAULT_PAGE},
    response::{ApiResponse, ResponseMeta},
};
use axum::{
    extract::{OriginalUri, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};

// --- User Handlers ---

/// create_user
///
/// Creates a user. The body is validated (and unknown fields rejected) by
/// `ValidatedJson` before the service runs its email uniqueness check.
#[utoipa::path(
    post,
    path = "/users",
    request_body = CreateUserRequest,
    responses(
        (status = 201, description = "User created", body = User),
        (status = 400, description = "Validation failed"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn create_user(
    State(state): State<AppState>,
    meta: ResponseMeta,
    ValidatedJson(payload): ValidatedJson<CreateUserRequest>,
) -> ApiResult<impl IntoResponse> {
    let user = state.users.create_user(payload).await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::ok(user, meta).with_message("User created successfully"),
    ))
}

/// list_users
///
/// Lists active users, newest first. Without `page`/`limit` the full (capped) list is
/// returned; with either one the response switches to the paginated envelope.
#[utoipa::path(
    get,
    path = "/users",
    params(ListUsersQuery),
    responses(
        (status = 200, description = "Active users", body = [User]),
        (status = 400, description = "Invalid pagination parameters")
    )
)]
pub async fn list_users(
    State(state): State<AppState>,
    meta: ResponseMeta,
    ApiQuery(query): ApiQuery<ListUsersQuery>,
) -> ApiResult<Response> {
    if !query.is_paginated() {
        let users = state.users.get_all_users().await?;
        return Ok(ApiResponse::ok(users, meta).into_response());
    }

    let page = query.page.unwrap_or(DEFAULT_PAGE);
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    let result = state.users.get_users_paginated(page, limit).await?;
    Ok(ApiResponse::paginated(result.data, result.pagination, meta).into_response())
}

/// get_user_by_id
#[utoipa::path(
    get,
    path = "/users/{id}",
    params(("id" = String, Path, description = "User ObjectId (24 hex characters)")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 400, description = "Malformed id"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_user_by_id(
    State(state): State<AppState>,
    meta: ResponseMeta,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<ApiResponse<User>> {
    let user = state.users.get_user_by_id(&id).await?;
    Ok(ApiResponse::ok(user, meta))
}

/// update_user
///
/// Partial update, served for both PUT and PATCH. Only the fields present in the
/// body are changed.
#[utoipa::path(
    patch,
    path = "/users/{id}",
    params(("id" = String, Path, description = "User ObjectId")),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "User updated", body = User),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn update_user(
    State(state): State<AppState>,
    meta: ResponseMeta,
    ApiPath(id): ApiPath<String>,
    ValidatedJson(payload): ValidatedJson<UpdateUserRequest>,
) -> ApiResult<ApiResponse<User>> {
    let user = state.users.update_user(&id, payload).await?;
    Ok(ApiResponse::ok(user, meta).with_message("User updated successfully"))
}

/// delete_user
///
/// Hard delete. Responds 204 with an empty body.
#[utoipa::path(
    delete,
    path = "/users/{id}",
    params(("id" = String, Path, description = "User ObjectId")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 400, description = "Malformed id"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<StatusCode> {
    state.users.delete_user(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// deactivate_user
///
/// Soft delete: flips `isActive` to false and returns the record.
#[utoipa::path(
    patch,
    path = "/users/{id}/deactivate",
    params(("id" = String, Path, description = "User ObjectId")),
    responses(
        (status = 200, description = "User deactivated", body = User),
        (status = 400, description = "Malformed id"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn deactivate_user(
    State(state): State<AppState>,
    meta: ResponseMeta,
    ApiPath(id): ApiPath<String>,
) -> ApiResult<ApiResponse<User>> {
    let user = state.users.soft_delete_user(&id).await?;
    Ok(ApiResponse::ok(user, meta).with_message("User deactivated successfully"))
}

/// get_user_by_email
///
/// Looks up an active user by email. A miss is not an error: `data` is `null`.
#[utoipa::path(
    get,
    path = "/users/email/{email}",
    params(("email" = String, Path, description = "Email address (case-insensitive)")),
    responses((status = 200, description = "The matching active user, or null", body = User))
)]
pub async fn get_user_by_email(
    State(state): State<AppState>,
    meta: ResponseMeta,
    ApiPath(email): ApiPath<String>,
) -> ApiResult<ApiResponse<Option<User>>> {
    let user = state.users.get_user_by_email(&email).await?;
    Ok(ApiResponse::ok(user, meta))
}

// --- Operational Handlers ---

/// health
///
/// Liveness plus a database ping. Answers 503 (with the same body) when the store
/// does not respond.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service healthy", body = HealthCheck),
        (status = 503, description = "Database unreachable", body = HealthCheck)
    )
)]
pub async fn health(State(state): State<AppState>, meta: ResponseMeta) -> Response {
    let connected = state.users.database_available().await;

    let report = HealthCheck {
        status: if connected { "ok" } else { "degraded" }.to_string(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        uptime: state.started_at.elapsed().as_secs(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        environment: state.config.env.as_str().to_string(),
        database: DatabaseHealth {
            status: if connected { "connected" } else { "disconnected" }.to_string(),
            connected,
        },
    };

    if connected {
        ApiResponse::ok(report, meta).into_response()
    } else {
        let mut body = ApiResponse::ok(report, meta).with_message("Database unavailable");
        body.success = false;
        (StatusCode::SERVICE_UNAVAILABLE, body).into_response()
    }
}

/// route_not_found
///
/// Router fallback: unmatched paths get the standard 404 envelope.
pub async fn route_not_found(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::RouteNotFound {
        method: method.to_string(),
        path: uri.path().to_string(),
    }
}

/// method_not_allowed
///
/// Fallback for a known path hit with a verb it does not serve.
pub async fn method_not_allowed(method: Method, OriginalUri(uri): OriginalUri) -> ApiError {
    ApiError::MethodNotAllowed {
        method: method.to_string(),
        path: uri.path().to_string(),
    }
}
