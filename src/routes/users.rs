use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch},
};

/// User Router Module
///
/// CRUD over the user resource. Request bodies are validated by the handlers'
/// extractors; every failure is rendered by the envelope middleware in `create_router`.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        // GET /users[?page=&limit=]  |  POST /users
        // Listing switches to the paginated envelope when either query parameter is present.
        .route("/users", get(handlers::list_users).post(handlers::create_user))
        // GET /users/email/{email}
        .route("/users/email/{email}", get(handlers::get_user_by_email))
        // GET | PUT | PATCH | DELETE /users/{id}
        // PUT and PATCH share the partial-update semantics.
        .route(
            "/users/{id}",
            get(handlers::get_user_by_id)
                .put(handlers::update_user)
                .patch(handlers::update_user)
                .delete(handlers::delete_user),
        )
        // PATCH /users/{id}/deactivate
        // Soft delete: the record stays in the store with `isActive = false`.
        .route("/users/{id}/deactivate", patch(handlers::deactivate_user))
        .method_not_allowed_fallback(handlers::method_not_allowed)
}
