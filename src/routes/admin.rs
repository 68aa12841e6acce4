use crate::{AppState, handlers};
use axum::{Router, routing::patch};

/// Admin Router Module
///
/// Catalogue mutation. Mounted behind the same authentication route layer as the
/// authenticated router; each handler then calls `AuthUser::require_admin`, which
/// rejects non-admins with 403.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // PATCH /books/{id}
        // Partial update; `cover_image: null` clears the cover.
        // DELETE /books/{id}
        // Removes the cover file, the book, its reviews and its author links.
        .route(
            "/books/{id}",
            patch(handlers::update_book).delete(handlers::delete_book),
        )
}
