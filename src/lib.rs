use std::{sync::Arc, time::Instant};

use axum::{
    Router,
    extract::FromRef,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

// Cross-cutting HTTP plumbing: configuration, error taxonomy, envelope, extractors.
pub mod config;
pub mod errors;
pub mod extract;
pub mod response;

// Persistence: the store seam, the generic data-access helper and the users collection.
pub mod database;
pub mod schema;
pub mod store;

// The user domain and its HTTP surface.
pub mod handlers;
pub mod models;
pub mod routes;
pub mod service;

use routes::{public, users};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use errors::{ApiError, ApiResult};
pub use service::UserService;
pub use store::{DocumentStore, MemoryDatabase, MemoryStore, MongoStore, StoreState};

/// ApiDoc
///
/// Auto-generates the OpenAPI document for every `#[utoipa::path]` handler and
/// `ToSchema` model. Served at `/api-docs/openapi.json`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_user, handlers::list_users, handlers::get_user_by_id,
        handlers::update_user, handlers::delete_user, handlers::deactivate_user,
        handlers::get_user_by_email, handlers::health
    ),
    components(
        schemas(
            models::User, models::CreateUserRequest, models::UpdateUserRequest,
            models::HealthCheck, models::DatabaseHealth, errors::FieldError,
            response::ResponseMeta, response::PaginationMeta,
        )
    ),
    tags(
        (name = "proto-sync", description = "User management API")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// The single, immutable container shared by every request. Cloning is cheap: the
/// service only holds an `Arc` to the store.
#[derive(Clone)]
pub struct AppState {
    /// User policy over the injected document store.
    pub users: UserService,
    /// The loaded configuration.
    pub config: AppConfig,
    /// Process start, reported as `uptime` by the health endpoint.
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: StoreState, config: AppConfig) -> Self {
        Self {
            users: UserService::new(store),
            config,
            started_at: Instant::now(),
        }
    }

    /// State over a fresh in-memory `users` collection. Used by tests and offline runs.
    pub fn in_memory(config: AppConfig) -> (Self, MemoryDatabase) {
        let db = MemoryDatabase::new();
        let store: StoreState = Arc::new(schema::memory_users(&db));
        (Self::new(store, config), db)
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for UserService {
    fn from_ref(app_state: &AppState) -> UserService {
        app_state.users.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles the routing table, the documentation and the middleware stack.
///
/// Layer order, outermost first: CORS, request id, tracing, the error envelope, panic
/// capture. A panic therefore becomes an `ApiError` response before the envelope layer
/// sees it, and every error response is logged inside the request span.
pub fn create_router(state: AppState) -> Router {
    // 1. CORS: exactly the frontend origin, with credentials.
    let origin = match HeaderValue::from_str(&state.config.frontend_url) {
        Ok(origin) => AllowOrigin::list([origin]),
        Err(_) => {
            tracing::warn!(frontend_url = %state.config.frontend_url, "FRONTEND_URL is not a valid origin; CORS disabled");
            AllowOrigin::list(Vec::<HeaderValue>::new())
        }
    };
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    // Header name constant for Request Correlation.
    let x_request_id = HeaderName::from_static("x-request-id");

    // 2. Base Router Assembly
    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(public::public_routes())
        .merge(users::user_routes())
        // The frontend talks to `/api/users`.
        .nest("/api", users::user_routes())
        .fallback(handlers::route_not_found)
        .with_state(state);

    // 3. Error boundary and observability stack.
    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id))
                .layer(middleware::from_fn(response::error_envelope))
                .layer(CatchPanicLayer::custom(response::handle_panic)),
        )
        .layer(cors)
}

/// trace_span_logger
///
/// Span factory for `TraceLayer`: method, URI and the `x-request-id` set by
/// `SetRequestIdLayer`, so every log line of one request shares an id.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
