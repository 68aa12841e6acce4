use crate::{
    error::AppResult,
    models::{
        Author, AuthorCreate, Book, BookCreate, BookFilter, BookUpdate, NewReview, NewUser, Review,
        User, UserRecord,
    },
};
use async_trait::async_trait;
use std::sync::Arc;

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

/// Repository Trait
///
/// The access layer. Handlers only talk to `Arc<dyn Repository>`, so the Postgres
/// implementation and the in-memory one used by tests are interchangeable.
///
/// Pagination is plain offset/limit ordered by primary key; it carries no total
/// count and is only stable absent concurrent inserts/deletes.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---
    /// Fails with `Conflict` if the email is already registered.
    async fn create_user(&self, user: NewUser) -> AppResult<User>;
    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<UserRecord>>;

    // --- Authors ---
    /// Plain insert. Callers wanting get-or-create semantics look up by name first.
    async fn create_author(&self, author: AuthorCreate) -> AppResult<Author>;
    async fn get_author_by_name(&self, name: &str) -> AppResult<Option<Author>>;
    async fn get_author_by_id(&self, id: i32) -> AppResult<Option<Author>>;
    async fn list_authors(&self, skip: i64, limit: i64) -> AppResult<Vec<Author>>;

    // --- Books ---
    /// Resolves every author reference by exact name, creating missing ones, and
    /// associates the resulting set with the new book.
    async fn create_book(&self, book: BookCreate) -> AppResult<Book>;
    async fn get_book(&self, id: i32) -> AppResult<Option<Book>>;

    async fn list_books(&self, skip: i64, limit: i64) -> AppResult<Vec<Book>> {
        let filter = BookFilter::default();
        self.filter_books(&filter, skip, limit).await
    }

    /// Case-insensitive substring filters on genre and on any associated author name.
    async fn filter_books(&self, filter: &BookFilter, skip: i64, limit: i64)
    -> AppResult<Vec<Book>>;

    /// Case-insensitive substring match on the title only.
    async fn search_books(&self, query: &str, skip: i64, limit: i64) -> AppResult<Vec<Book>>;

    /// Applies only the fields present in `update`. A present `authors` list replaces
    /// the whole association set. Returns `None` if the book does not exist.
    async fn update_book(&self, id: i32, update: BookUpdate) -> AppResult<Option<Book>>;

    /// Removes the book together with its reviews and join rows. Returns the deleted
    /// book, or `None` if it did not exist.
    async fn delete_book(&self, id: i32) -> AppResult<Option<Book>>;

    // --- Reviews ---
    /// Fails with `NotFound` if the book does not exist.
    async fn create_review(&self, review: NewReview) -> AppResult<Review>;
    async fn list_reviews_for_book(&self, book_id: i32) -> AppResult<Vec<Review>>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

/// Lowercased substring test used wherever the SQL side uses `ILIKE '%..%'`.
pub(crate) fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Deduplicates author references by exact name, keeping the first occurrence.
pub(crate) fn distinct_authors(authors: Vec<AuthorCreate>) -> Vec<AuthorCreate> {
    let mut seen = std::collections::HashSet::new();
    authors
        .into_iter()
        .filter(|author| seen.insert(author.name.clone()))
        .collect()
}
