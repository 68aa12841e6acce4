use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Mutex, MutexGuard};

use super::{Repository, contains_ignore_case, distinct_authors};
use crate::{
    error::{AppError, AppResult},
    models::{
        Author, AuthorCreate, Book, BookCreate, BookFilter, BookUpdate, NewReview, NewUser, Review,
        User, UserRecord,
    },
};

#[derive(Default)]
struct Store {
    users: Vec<UserRecord>,
    authors: Vec<Author>,
    // Rows of `books`; `authors` is always empty here and filled from `book_author`.
    books: Vec<Book>,
    book_author: Vec<(i32, i32)>,
    reviews: Vec<Review>,
    next_user_id: i32,
    next_author_id: i32,
    next_book_id: i32,
    next_review_id: i32,
}

fn next_id(counter: &mut i32) -> i32 {
    *counter += 1;
    *counter
}

fn page<T: Clone>(items: impl Iterator<Item = T>, skip: i64, limit: i64) -> Vec<T> {
    items
        .skip(usize::try_from(skip).unwrap_or(0))
        .take(usize::try_from(limit).unwrap_or(0))
        .collect()
}

impl Store {
    fn author_by_name(&self, name: &str) -> Option<&Author> {
        self.authors.iter().find(|a| a.name == name)
    }

    fn insert_author(&mut self, author: AuthorCreate) -> AppResult<Author> {
        // Mirrors the unique index on authors.name.
        if self.author_by_name(&author.name).is_some() {
            return Err(AppError::Conflict("Resource already exists".to_string()));
        }
        let created = Author {
            id: next_id(&mut self.next_author_id),
            name: author.name,
            biography: author.biography,
            birth_date: author.birth_date,
            nationality: author.nationality,
        };
        self.authors.push(created.clone());
        Ok(created)
    }

    fn get_or_create_author(&mut self, author: AuthorCreate) -> AppResult<Author> {
        match self.author_by_name(&author.name) {
            Some(existing) => Ok(existing.clone()),
            None => self.insert_author(author),
        }
    }

    fn associate_authors(&mut self, book_id: i32, authors: Vec<AuthorCreate>) -> AppResult<()> {
        for reference in distinct_authors(authors) {
            let author = self.get_or_create_author(reference)?;
            if !self.book_author.contains(&(book_id, author.id)) {
                self.book_author.push((book_id, author.id));
            }
        }
        Ok(())
    }

    fn authors_of(&self, book_id: i32) -> Vec<Author> {
        let mut authors: Vec<Author> = self
            .book_author
            .iter()
            .filter(|(b, _)| *b == book_id)
            .filter_map(|(_, a)| self.authors.iter().find(|author| author.id == *a))
            .cloned()
            .collect();
        authors.sort_by_key(|a| a.id);
        authors
    }

    fn with_authors(&self, book: &Book) -> Book {
        Book {
            authors: self.authors_of(book.id),
            ..book.clone()
        }
    }

    fn book(&self, id: i32) -> Option<Book> {
        self.books
            .iter()
            .find(|b| b.id == id)
            .map(|b| self.with_authors(b))
    }
}

/// MemoryRepository
///
/// An in-process `Repository` with the same observable semantics as the Postgres
/// one: get-or-create authors by exact name, a unique author name, cascading
/// deletes, and id-ordered offset pagination. Every operation holds the lock for
/// its whole duration, so get-or-create cannot race here.
#[derive(Default)]
pub struct MemoryRepository {
    store: Mutex<Store>,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of rows in `authors`; used by tests to observe author reuse.
    pub fn author_count(&self) -> usize {
        self.lock().authors.len()
    }

    /// Number of `book_author` rows referencing `book_id`.
    pub fn join_rows_for_book(&self, book_id: i32) -> usize {
        self.lock()
            .book_author
            .iter()
            .filter(|(b, _)| *b == book_id)
            .count()
    }

    /// Removes a user and, like `ON DELETE CASCADE`, their reviews.
    pub fn delete_user(&self, user_id: i32) -> bool {
        let mut store = self.lock();
        let before = store.users.len();
        store.users.retain(|u| u.id != user_id);
        store.reviews.retain(|r| r.user_id != Some(user_id));
        store.users.len() != before
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut store = self.lock();
        if store.users.iter().any(|u| u.email == user.email) {
            return Err(AppError::Conflict("Email already registered".to_string()));
        }
        let record = UserRecord {
            id: next_id(&mut store.next_user_id),
            email: user.email,
            hashed_password: user.hashed_password,
            full_name: user.full_name,
            is_active: true,
            role: user.role,
        };
        store.users.push(record.clone());
        Ok(record.into())
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<UserRecord>> {
        Ok(self.lock().users.iter().find(|u| u.email == email).cloned())
    }

    async fn create_author(&self, author: AuthorCreate) -> AppResult<Author> {
        self.lock().insert_author(author)
    }

    async fn get_author_by_name(&self, name: &str) -> AppResult<Option<Author>> {
        Ok(self.lock().author_by_name(name).cloned())
    }

    async fn get_author_by_id(&self, id: i32) -> AppResult<Option<Author>> {
        Ok(self.lock().authors.iter().find(|a| a.id == id).cloned())
    }

    async fn list_authors(&self, skip: i64, limit: i64) -> AppResult<Vec<Author>> {
        Ok(page(self.lock().authors.iter().cloned(), skip, limit))
    }

    async fn create_book(&self, book: BookCreate) -> AppResult<Book> {
        let mut store = self.lock();
        let id = next_id(&mut store.next_book_id);
        store.books.push(Book {
            id,
            title: book.title,
            genre: book.genre,
            page_count: book.page_count,
            publication_year: book.publication_year,
            description: book.description,
            cover_image: book.cover_image,
            authors: Vec::new(),
        });
        store.associate_authors(id, book.authors)?;
        store
            .book(id)
            .ok_or_else(|| AppError::Internal("Created book missing from store".to_string()))
    }

    async fn get_book(&self, id: i32) -> AppResult<Option<Book>> {
        Ok(self.lock().book(id))
    }

    async fn filter_books(
        &self,
        filter: &BookFilter,
        skip: i64,
        limit: i64,
    ) -> AppResult<Vec<Book>> {
        let store = self.lock();
        let matching = store
            .books
            .iter()
            .map(|b| store.with_authors(b))
            .filter(|b| match &filter.genre {
                Some(genre) => contains_ignore_case(&b.genre, genre),
                None => true,
            })
            .filter(|b| match &filter.author {
                Some(author) => b.authors.iter().any(|a| contains_ignore_case(&a.name, author)),
                None => true,
            });
        Ok(page(matching, skip, limit))
    }

    async fn search_books(&self, query: &str, skip: i64, limit: i64) -> AppResult<Vec<Book>> {
        let store = self.lock();
        let matching = store
            .books
            .iter()
            .filter(|b| contains_ignore_case(&b.title, query))
            .map(|b| store.with_authors(b));
        Ok(page(matching, skip, limit))
    }

    async fn update_book(&self, id: i32, update: BookUpdate) -> AppResult<Option<Book>> {
        let mut store = self.lock();
        let Some(book) = store.books.iter_mut().find(|b| b.id == id) else {
            return Ok(None);
        };

        if let Some(title) = update.title {
            book.title = title;
        }
        if let Some(genre) = update.genre {
            book.genre = genre;
        }
        if let Some(page_count) = update.page_count {
            book.page_count = page_count;
        }
        if let Some(publication_year) = update.publication_year {
            book.publication_year = publication_year;
        }
        if let Some(description) = update.description {
            book.description = description;
        }
        if let Some(cover_image) = update.cover_image {
            book.cover_image = cover_image;
        }

        if let Some(authors) = update.authors {
            store.book_author.retain(|(b, _)| *b != id);
            store.associate_authors(id, authors)?;
        }

        Ok(store.book(id))
    }

    async fn delete_book(&self, id: i32) -> AppResult<Option<Book>> {
        let mut store = self.lock();
        let Some(book) = store.book(id) else {
            return Ok(None);
        };
        store.books.retain(|b| b.id != id);
        store.book_author.retain(|(b, _)| *b != id);
        store.reviews.retain(|r| r.book_id != Some(id));
        Ok(Some(book))
    }

    async fn create_review(&self, review: NewReview) -> AppResult<Review> {
        let mut store = self.lock();
        if !store.books.iter().any(|b| b.id == review.book_id) {
            return Err(AppError::NotFound("Book not found".to_string()));
        }
        if !store.users.iter().any(|u| u.id == review.user_id) {
            return Err(AppError::NotFound("Referenced resource not found".to_string()));
        }
        let created = Review {
            id: next_id(&mut store.next_review_id),
            book_id: Some(review.book_id),
            user_id: Some(review.user_id),
            rating: review.rating,
            text: review.text,
            created_at: Utc::now(),
        };
        store.reviews.push(created.clone());
        Ok(created)
    }

    async fn list_reviews_for_book(&self, book_id: i32) -> AppResult<Vec<Review>> {
        Ok(self
            .lock()
            .reviews
            .iter()
            .filter(|r| r.book_id == Some(book_id))
            .cloned()
            .collect())
    }
}
