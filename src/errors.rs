use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use ts_rs::TS;
use utoipa::ToSchema;
use validator::ValidationErrors;

use crate::response::{ApiResponse, ResponseMeta};

/// FieldError
///
/// One entry of the `errors` list returned with a Validation failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    /// The offending input, echoed back as received (null when unavailable).
    #[ts(type = "unknown")]
    #[schema(value_type = Object)]
    pub value: Value,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>, value: Value) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            value,
        }
    }
}

/// ApiError
///
/// The tagged error kind every layer returns. Data-access failures are already
/// classified by the time they reach here, so services and handlers only propagate
/// them with `?`; the envelope boundary picks the status code and message.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("Validation failed")]
    Validation(Vec<FieldError>),

    #[error("{resource} with {field} '{value}' already exists")]
    DuplicateResource {
        resource: String,
        field: String,
        value: String,
    },

    #[error("{resource} with ID '{id}' not found")]
    ResourceNotFound { resource: String, id: String },

    #[error("Failed to {action} {}", .resource.to_lowercase())]
    DatabaseOperation { action: String, resource: String },

    #[error("Cannot {method} {path}")]
    RouteNotFound { method: String, path: String },

    #[error("Method {method} is not allowed on {path}")]
    MethodNotAllowed { method: String, path: String },

    #[error("Internal server error occurred. Please try again later.")]
    InternalServerError,
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// Shorthand for a Validation failure on a single field.
    pub fn invalid_field(field: impl Into<String>, message: impl Into<String>, value: Value) -> Self {
        ApiError::Validation(vec![FieldError::new(field, message, value)])
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::DuplicateResource { .. } => StatusCode::CONFLICT,
            ApiError::ResourceNotFound { .. } | ApiError::RouteNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::DatabaseOperation { .. } | ApiError::InternalServerError => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// field_errors
    ///
    /// The `errors` list of the envelope. Only Validation carries entries; every other
    /// kind renders an empty list.
    pub fn field_errors(&self) -> Vec<FieldError> {
        match self {
            ApiError::Validation(errors) => errors.clone(),
            _ => Vec::new(),
        }
    }

    /// into_envelope
    ///
    /// Renders the error as the standard failure envelope for the given request meta.
    pub fn into_envelope(self, meta: ResponseMeta) -> Response {
        let status = self.status_code();
        let body: ApiResponse<Value> = ApiResponse::failure(self.to_string(), self.field_errors(), meta);
        let mut response = (status, Json(body)).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// The rendered body uses a detached meta (no path/method); the `error_envelope`
/// middleware replaces it with the request's own meta on the way out.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        self.into_envelope(ResponseMeta::detached())
    }
}

impl From<ValidationErrors> for ApiError {
    fn from(errors: ValidationErrors) -> Self {
        let mut fields: Vec<FieldError> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, failures)| {
                failures.iter().map(move |failure| {
                    let message = failure
                        .message
                        .as_ref()
                        .map(|message| message.to_string())
                        .unwrap_or_else(|| format!("{} is invalid ({})", field, failure.code));
                    let value = failure.params.get("value").cloned().unwrap_or(Value::Null);
                    FieldError::new(field.to_string(), message, value)
                })
            })
            .collect();

        // HashMap order is arbitrary; keep responses stable.
        fields.sort_by(|a, b| a.field.cmp(&b.field));
        ApiError::Validation(fields)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::invalid_field("body", rejection.body_text(), Value::Null)
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::invalid_field("query", rejection.body_text(), Value::Null)
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::invalid_field("path", rejection.body_text(), Value::Null)
    }
}
