use axum::{
    Router,
    body::Body,
    extract::State,
    http::{Method, Request, StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::get,
};
use proto_sync_api::{
    AppConfig, AppState, create_router,
    extract::ApiPath,
    handlers,
    models::User,
    response::{ResponseMeta, error_envelope, handle_panic},
};
use serde_json::{Value, json};
use tower::util::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;

// --- Helpers ---

fn app() -> Router {
    let (state, _db) = AppState::in_memory(AppConfig::default());
    create_router(state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

async fn create(app: &Router, name: &str, email: &str) -> Value {
    let (status, body) = send(
        app,
        Method::POST,
        "/users",
        Some(json!({ "name": name, "email": email, "age": 30 })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create failed: {body}");
    body["data"].clone()
}

// --- Direct handler calls ---

#[tokio::test]
async fn test_get_user_by_id_handler_direct_call() {
    let (state, _db) = AppState::in_memory(AppConfig::default());
    let created = state
        .users
        .create_user(proto_sync_api::models::CreateUserRequest {
            name: "Ada".into(),
            email: "ada@example.com".into(),
            age: 36,
            tags: None,
        })
        .await
        .unwrap();

    let response = handlers::get_user_by_id(State(state), ResponseMeta::detached(), ApiPath(created.id.clone()))
        .await
        .unwrap()
        .into_response();

    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    let user: User = serde_json::from_value(body["data"].clone()).unwrap();
    assert_eq!(user, created);
}

// --- Envelope and status codes through the router ---

#[tokio::test]
async fn test_create_user_returns_201_envelope() {
    let app = app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/users",
        Some(json!({ "name": "Ada", "email": "Ada@Example.com", "age": 36, "tags": ["math"] })),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"]["email"], json!("ada@example.com"));
    assert_eq!(body["data"]["isActive"], json!(true));
    assert_eq!(body["meta"]["path"], json!("/users"));
    assert_eq!(body["meta"]["method"], json!("POST"));
}

#[tokio::test]
async fn test_validation_failures_return_400_with_field_errors() {
    let app = app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/users",
        Some(json!({ "name": "A", "email": "ada@example.com", "age": 130 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["message"], json!("Validation failed"));
    let fields: Vec<_> = body["errors"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["field"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(fields, vec!["age", "name"]);
    assert_eq!(body["meta"]["path"], json!("/users"));
}

#[tokio::test]
async fn test_unknown_fields_and_malformed_json_are_rejected() {
    let app = app();

    let (status, body) = send(
        &app,
        Method::POST,
        "/users",
        Some(json!({ "name": "Ada", "email": "ada@example.com", "age": 36, "isAdmin": true })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], json!("body"));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/users")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_duplicate_email_returns_409() {
    let app = app();
    create(&app, "Ada", "ada@example.com").await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/users",
        Some(json!({ "name": "Other", "email": "ada@example.com", "age": 20 })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], json!("User with email 'ada@example.com' already exists"));
    assert_eq!(body["errors"], json!([]));
}

#[tokio::test]
async fn test_get_user_not_found_and_malformed_id() {
    let app = app();

    let (status, body) = send(&app, Method::GET, "/users/65f1c0ffee0ddba11ad0beef", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], json!("User with ID '65f1c0ffee0ddba11ad0beef' not found"));

    let (status, body) = send(&app, Method::GET, "/users/not-an-id", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], json!("id"));
    assert_eq!(body["errors"][0]["message"], json!("Invalid user ID format"));
}

#[tokio::test]
async fn test_list_users_plain_and_paginated() {
    let app = app();
    for n in 0..3 {
        create(&app, &format!("User {n}"), &format!("user{n}@example.com")).await;
    }

    let (status, body) = send(&app, Method::GET, "/users", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 3);
    assert!(body.get("pagination").is_none());

    let (status, body) = send(&app, Method::GET, "/users?limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);
    assert_eq!(
        body["pagination"],
        json!({ "page": 1, "limit": 2, "total": 3, "totalPages": 2 })
    );
    assert_eq!(body["meta"]["path"], json!("/users?limit=2"));
}

#[tokio::test]
async fn test_list_users_rejects_bad_query() {
    let app = app();

    let (status, body) = send(&app, Method::GET, "/users?page=abc", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], json!("query"));

    let (status, body) = send(&app, Method::GET, "/users?page=0", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["errors"][0]["field"], json!("page"));
}

#[tokio::test]
async fn test_list_users_treats_blank_query_values_as_absent() {
    let app = app();
    create(&app, "Ada", "ada@example.com").await;

    let (status, body) = send(&app, Method::GET, "/users?page=&limit=", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("pagination").is_none());

    let (status, body) = send(&app, Method::GET, "/users?page=&limit=2", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["page"], json!(1));
    assert_eq!(body["pagination"]["limit"], json!(2));
}

#[tokio::test]
async fn test_update_with_put_and_patch() {
    let app = app();
    let user = create(&app, "Ada", "ada@example.com").await;
    let id = user["_id"].as_str().unwrap();

    let (status, body) = send(&app, Method::PUT, &format!("/users/{id}"), Some(json!({ "age": 40 }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["age"], json!(40));
    assert_eq!(body["data"]["name"], json!("Ada"));

    let (status, body) = send(&app, Method::PATCH, &format!("/users/{id}"), Some(json!({ "name": "Ada L." }))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["name"], json!("Ada L."));
    assert_eq!(body["data"]["age"], json!(40));

    let missing = "65f1c0ffee0ddba11ad0beef";
    let (status, _) = send(&app, Method::PATCH, &format!("/users/{missing}"), Some(json!({ "age": 1 }))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_returns_204_then_404() {
    let app = app();
    let user = create(&app, "Ada", "ada@example.com").await;
    let uri = format!("/users/{}", user["_id"].as_str().unwrap());

    let (status, body) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(body, Value::Null);

    let (status, _) = send(&app, Method::DELETE, &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_deactivate_and_email_lookup() {
    let app = app();
    let user = create(&app, "Ada", "ada@example.com").await;
    let id = user["_id"].as_str().unwrap();

    let (status, body) = send(&app, Method::GET, "/users/email/ADA@example.com", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["_id"], json!(id));

    let (status, body) = send(&app, Method::PATCH, &format!("/users/{id}/deactivate"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["isActive"], json!(false));

    let (status, body) = send(&app, Method::GET, "/users/email/ada@example.com", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], json!(true));
    assert_eq!(body["data"], Value::Null);

    let (_, body) = send(&app, Method::GET, "/users", None).await;
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_routes_are_mounted_under_api_prefix() {
    let app = app();
    create(&app, "Ada", "ada@example.com").await;

    let (status, body) = send(&app, Method::GET, "/api/users", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
    assert_eq!(body["meta"]["path"], json!("/api/users"));

    let (status, body) = send(&app, Method::GET, "/api/users/not-an-id", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["meta"]["path"], json!("/api/users/not-an-id"));
}

#[tokio::test]
async fn test_unknown_route_returns_404_envelope() {
    let app = app();

    let (status, body) = send(&app, Method::GET, "/nope", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["message"], json!("Cannot GET /nope"));
    assert_eq!(body["meta"]["method"], json!("GET"));
}

#[tokio::test]
async fn test_unsupported_method_returns_405_envelope() {
    let app = app();

    let (status, body) = send(&app, Method::DELETE, "/users", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["message"], json!("Method DELETE is not allowed on /users"));
    assert_eq!(body["errors"], json!([]));
    assert_eq!(body["meta"]["path"], json!("/users"));

    let (status, body) = send(&app, Method::POST, "/api/users/65f1c0ffee0ddba11ad0beef", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["meta"]["method"], json!("POST"));

    let (status, body) = send(&app, Method::POST, "/health", None).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(body["success"], json!(false));
}

#[tokio::test]
async fn test_undecodable_path_segment_returns_400_envelope() {
    let app = app();

    let (status, body) = send(&app, Method::GET, "/users/%FF", None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], json!(false));
    assert_eq!(body["message"], json!("Validation failed"));
    assert_eq!(body["errors"][0]["field"], json!("path"));
    assert_eq!(body["meta"]["method"], json!("GET"));
}

#[tokio::test]
async fn test_health_reports_database_status() {
    let app = app();

    let (status, body) = send(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], json!("ok"));
    assert_eq!(body["data"]["environment"], json!("local"));
    assert_eq!(body["data"]["database"], json!({ "status": "connected", "connected": true }));
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert!(response.headers().contains_key("x-request-id"));
}

async fn boom() -> StatusCode {
    panic!("kaboom")
}

#[tokio::test]
async fn test_panics_become_internal_server_errors() {
    let app = Router::new()
        .route("/boom", get(boom))
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn(error_envelope));

    let request = Request::builder().uri("/boom").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["message"], json!("Internal server error occurred. Please try again later."));
    assert_eq!(body["meta"]["path"], json!("/boom"));
    assert!(!body.to_string().contains("kaboom"));
}
