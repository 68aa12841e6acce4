use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints reachable without a token: liveness, the identity flow, and the
/// read-only review listing.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /ping
        .route("/ping", get(handlers::ping))
        // POST /users/register
        // JSON body; the role defaults to "Member".
        .route("/users/register", post(handlers::register_user))
        // POST /users/login
        // Form-encoded `username` (the email) and `password`; returns a bearer token.
        .route("/users/login", post(handlers::login))
        // GET /reviews/book/{book_id}
        .route("/reviews/book/{book_id}", get(handlers::list_book_reviews))
}
