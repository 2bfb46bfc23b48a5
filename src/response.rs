use std::{any::Any, convert::Infallible};

use axum::{
    Json,
    extract::{FromRequestParts, OriginalUri, Request},
    http::{Method, StatusCode, Uri, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;

use crate::errors::{ApiError, FieldError};

/// ResponseMeta
///
/// Request context echoed back in every envelope. Also usable as an extractor so
/// handlers can stamp success envelopes with their own path and method.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct ResponseMeta {
    /// ISO-8601 UTC timestamp with millisecond precision.
    pub timestamp: String,
    pub path: String,
    pub method: String,
}

impl ResponseMeta {
    pub fn new(method: &Method, uri: &Uri) -> Self {
        let path = uri
            .path_and_query()
            .map(|pq| pq.as_str().to_string())
            .unwrap_or_else(|| uri.path().to_string());

        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            path,
            method: method.to_string(),
        }
    }

    /// Meta for responses rendered outside a request (e.g. a handler called directly).
    pub fn detached() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            path: String::new(),
            method: String::new(),
        }
    }

    fn from_parts(method: &Method, uri: &Uri, original: Option<&OriginalUri>) -> Self {
        // Nested routers see a stripped URI; report what the client actually requested.
        match original {
            Some(OriginalUri(full)) => Self::new(method, full),
            None => Self::new(method, uri),
        }
    }
}

impl<S> FromRequestParts<S> for ResponseMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self::from_parts(
            &parts.method,
            &parts.uri,
            parts.extensions.get::<OriginalUri>(),
        ))
    }
}

/// PaginationMeta
///
/// Carried next to `data` by paginated listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct PaginationMeta {
    #[ts(type = "number")]
    pub page: u64,
    #[ts(type = "number")]
    pub limit: u64,
    #[ts(type = "number")]
    pub total: u64,
    #[ts(type = "number")]
    pub total_pages: u64,
}

impl PaginationMeta {
    /// Builds the block for one page; `total_pages` is `ceil(total / limit)`.
    pub fn new(page: u64, limit: u64, total: u64) -> Self {
        let total_pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self {
            page,
            limit,
            total,
            total_pages,
        }
    }
}

/// ApiResponse
///
/// The uniform envelope: `{success, data | errors, message?, pagination?, meta}`.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct ApiResponse<T> {
    pub success: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<FieldError>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pagination: Option<PaginationMeta>,

    pub meta: ResponseMeta,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T, meta: ResponseMeta) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            pagination: None,
            meta,
        }
    }

    pub fn paginated(data: T, pagination: PaginationMeta, meta: ResponseMeta) -> Self {
        Self {
            pagination: Some(pagination),
            ..Self::ok(data, meta)
        }
    }

    pub fn failure(message: String, errors: Vec<FieldError>, meta: ResponseMeta) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: Some(errors),
            pagination: None,
            meta,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// error_envelope
///
/// Boundary middleware for failures. Any response produced from an `ApiError`
/// (handler result, extractor rejection, fallback or caught panic) carries the error
/// in its extensions; it is logged here and re-rendered with the request's own path
/// and method. Successful responses pass through untouched.
pub async fn error_envelope(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let original = request.extensions().get::<OriginalUri>().cloned();

    let response = next.run(request).await;

    let Some(error) = response.extensions().get::<ApiError>().cloned() else {
        return response;
    };

    let meta = ResponseMeta::from_parts(&method, &uri, original.as_ref());
    let status = error.status_code();
    if status.is_server_error() {
        tracing::error!(%status, method = %meta.method, path = %meta.path, "HTTP {} Error: {}", status.as_u16(), error);
    } else {
        tracing::warn!(%status, method = %meta.method, path = %meta.path, "HTTP {} Error: {}", status.as_u16(), error);
    }

    error.into_envelope(meta)
}

/// handle_panic
///
/// `CatchPanicLayer` hook: the panic payload is logged and never reaches the client.
pub fn handle_panic(payload: Box<dyn Any + Send + 'static>) -> Response {
    let detail = payload
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| payload.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic payload");

    tracing::error!(panic = %detail, "Unexpected error occurred while handling request");
    ApiError::InternalServerError.into_response()
}
