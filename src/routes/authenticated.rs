use crate::{AppState, handlers};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Authenticated Router Module
///
/// Catalogue browsing and contribution for any logged-in user. Every handler
/// here also takes `AuthUser`, so the route layer above and the handler agree on
/// who is calling.
///
/// `max_upload_bytes` replaces axum's 2 MB default body cap on book creation so
/// full-size cover images are accepted.
pub fn authenticated_routes(max_upload_bytes: usize) -> Router<AppState> {
    let books = get(handlers::list_books)
        .post(handlers::create_book)
        .layer(DefaultBodyLimit::max(max_upload_bytes));

    Router::<AppState>::new()
        // --- Books ---
        // GET /books/?skip=&limit=&search=&genre=&author=
        // POST /books/ (multipart: `book` JSON field + optional `cover_image` file)
        .route("/books/", books.clone())
        .route("/books", books)
        // GET /books/{id}
        // PATCH and DELETE on the same path live in the admin router.
        .route("/books/{id}", get(handlers::get_book))
        // --- Authors ---
        .route("/authors/", get(handlers::list_authors))
        .route("/authors", get(handlers::list_authors))
        .route("/authors/{id}", get(handlers::get_author))
        // --- Reviews ---
        // POST /reviews/
        // The reviewer is taken from the token, never from the body.
        .route("/reviews/", post(handlers::create_review))
        .route("/reviews", post(handlers::create_review))
}
