use async_trait::async_trait;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, query_builder::QueryBuilder};
use std::collections::HashMap;

use super::{Repository, distinct_authors};
use crate::{
    error::{AppError, AppResult},
    models::{
        Author, AuthorCreate, Book, BookCreate, BookFilter, BookUpdate, NewReview, NewUser, Review,
        User, UserRecord,
    },
};

const BOOK_COLUMNS: &str =
    "id, title, genre, page_count, publication_year, description, cover_image";
const AUTHOR_COLUMNS: &str = "id, name, biography, birth_date, nationality";
const USER_COLUMNS: &str = "id, email, full_name, is_active, role";
const REVIEW_COLUMNS: &str = "id, book_id, user_id, rating, text, created_at";

/// One `book_author` join row with the author it points to.
#[derive(FromRow)]
struct BookAuthorRow {
    book_id: i32,
    #[sqlx(flatten)]
    author: Author,
}

/// PostgresRepository
///
/// The `Repository` backed by PostgreSQL. Each logical operation borrows one pooled
/// connection; multi-statement writes run inside a transaction that rolls back on
/// every early return and is committed only at the end.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Escapes LIKE metacharacters so user input is matched literally.
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

async fn find_author_by_name(conn: &mut PgConnection, name: &str) -> AppResult<Option<Author>> {
    let author = sqlx::query_as::<_, Author>(&format!(
        "SELECT {} FROM authors WHERE name = $1",
        AUTHOR_COLUMNS
    ))
    .bind(name)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(author)
}

/// get_or_create_author
///
/// Lookup by exact name, then a conflict-tolerant insert. If a concurrent writer
/// inserts the same name between the two steps, `ON CONFLICT DO NOTHING` yields no
/// row and the second lookup returns the winner's row.
async fn get_or_create_author(conn: &mut PgConnection, author: &AuthorCreate) -> AppResult<Author> {
    if let Some(existing) = find_author_by_name(conn, &author.name).await? {
        return Ok(existing);
    }

    let inserted = sqlx::query_as::<_, Author>(&format!(
        "INSERT INTO authors (name, biography, birth_date, nationality) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (name) DO NOTHING \
         RETURNING {}",
        AUTHOR_COLUMNS
    ))
    .bind(&author.name)
    .bind(&author.biography)
    .bind(author.birth_date)
    .bind(&author.nationality)
    .fetch_optional(&mut *conn)
    .await?;

    match inserted {
        Some(created) => {
            tracing::info!(author_id = created.id, name = %created.name, "Created author");
            Ok(created)
        }
        None => find_author_by_name(conn, &author.name).await?.ok_or_else(|| {
            AppError::Internal(format!("Author '{}' vanished during get-or-create", author.name))
        }),
    }
}

/// Replaces nothing; only adds join rows for `book_id`.
async fn associate_authors(
    conn: &mut PgConnection,
    book_id: i32,
    authors: Vec<AuthorCreate>,
) -> AppResult<()> {
    for reference in distinct_authors(authors) {
        let author = get_or_create_author(conn, &reference).await?;
        sqlx::query(
            "INSERT INTO book_author (book_id, author_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(book_id)
        .bind(author.id)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

/// Loads the authors of every book in `books` with a single query.
async fn attach_authors(conn: &mut PgConnection, mut books: Vec<Book>) -> AppResult<Vec<Book>> {
    if books.is_empty() {
        return Ok(books);
    }
    let ids: Vec<i32> = books.iter().map(|b| b.id).collect();

    let rows = sqlx::query_as::<_, BookAuthorRow>(
        r#"
        SELECT ba.book_id, a.id, a.name, a.biography, a.birth_date, a.nationality
        FROM book_author ba
        JOIN authors a ON a.id = ba.author_id
        WHERE ba.book_id = ANY($1)
        ORDER BY a.id
        "#,
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await?;

    let mut by_book: HashMap<i32, Vec<Author>> = HashMap::new();
    for row in rows {
        by_book.entry(row.book_id).or_default().push(row.author);
    }
    for book in &mut books {
        book.authors = by_book.remove(&book.id).unwrap_or_default();
    }
    Ok(books)
}

async fn fetch_book(conn: &mut PgConnection, id: i32) -> AppResult<Option<Book>> {
    let book = sqlx::query_as::<_, Book>(&format!("SELECT {} FROM books WHERE id = $1", BOOK_COLUMNS))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

    match book {
        Some(book) => Ok(attach_authors(conn, vec![book]).await?.pop()),
        None => Ok(None),
    }
}

fn push_page(builder: &mut QueryBuilder<'_, Postgres>, skip: i64, limit: i64) {
    builder.push(" ORDER BY id OFFSET ");
    builder.push_bind(skip);
    builder.push(" LIMIT ");
    builder.push_bind(limit);
}

#[async_trait]
impl Repository for PostgresRepository {
    // --- USERS ---

    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let created = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (email, hashed_password, full_name, role, is_active) \
             VALUES ($1, $2, $3, $4, TRUE) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&user.email)
        .bind(&user.hashed_password)
        .bind(&user.full_name)
        .bind(&user.role)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match AppError::from(e) {
            AppError::Conflict(_) => AppError::Conflict("Email already registered".to_string()),
            other => other,
        })?;
        Ok(created)
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<UserRecord>> {
        let user = sqlx::query_as::<_, UserRecord>(
            "SELECT id, email, hashed_password, full_name, is_active, role FROM users WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    // --- AUTHORS ---

    async fn create_author(&self, author: AuthorCreate) -> AppResult<Author> {
        let created = sqlx::query_as::<_, Author>(&format!(
            "INSERT INTO authors (name, biography, birth_date, nationality) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            AUTHOR_COLUMNS
        ))
        .bind(&author.name)
        .bind(&author.biography)
        .bind(author.birth_date)
        .bind(&author.nationality)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn get_author_by_name(&self, name: &str) -> AppResult<Option<Author>> {
        let mut conn = self.pool.acquire().await?;
        find_author_by_name(&mut conn, name).await
    }

    async fn get_author_by_id(&self, id: i32) -> AppResult<Option<Author>> {
        let author = sqlx::query_as::<_, Author>(&format!(
            "SELECT {} FROM authors WHERE id = $1",
            AUTHOR_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(author)
    }

    async fn list_authors(&self, skip: i64, limit: i64) -> AppResult<Vec<Author>> {
        let authors = sqlx::query_as::<_, Author>(&format!(
            "SELECT {} FROM authors ORDER BY id OFFSET $1 LIMIT $2",
            AUTHOR_COLUMNS
        ))
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(authors)
    }

    // --- BOOKS ---

    async fn create_book(&self, book: BookCreate) -> AppResult<Book> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query_as::<_, Book>(&format!(
            "INSERT INTO books (title, genre, page_count, publication_year, description, cover_image) \
             VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
            BOOK_COLUMNS
        ))
        .bind(&book.title)
        .bind(&book.genre)
        .bind(book.page_count)
        .bind(book.publication_year)
        .bind(&book.description)
        .bind(&book.cover_image)
        .fetch_one(&mut *tx)
        .await?;

        associate_authors(&mut tx, created.id, book.authors).await?;
        let created = attach_authors(&mut tx, vec![created])
            .await?
            .pop()
            .ok_or_else(|| AppError::Internal("Created book missing from result".to_string()))?;

        tx.commit().await?;
        Ok(created)
    }

    async fn get_book(&self, id: i32) -> AppResult<Option<Book>> {
        let mut conn = self.pool.acquire().await?;
        fetch_book(&mut conn, id).await
    }

    /// Uses QueryBuilder so every filter value is a bound parameter.
    async fn filter_books(
        &self,
        filter: &BookFilter,
        skip: i64,
        limit: i64,
    ) -> AppResult<Vec<Book>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM books WHERE TRUE", BOOK_COLUMNS));

        if let Some(genre) = &filter.genre {
            builder.push(" AND genre ILIKE ");
            builder.push_bind(like_pattern(genre));
        }

        if let Some(author) = &filter.author {
            // EXISTS keeps a book matching through several authors to a single row.
            builder.push(
                " AND EXISTS (SELECT 1 FROM book_author ba JOIN authors a ON a.id = ba.author_id \
                 WHERE ba.book_id = books.id AND a.name ILIKE ",
            );
            builder.push_bind(like_pattern(author));
            builder.push(")");
        }

        push_page(&mut builder, skip, limit);

        let mut conn = self.pool.acquire().await?;
        let books = builder.build_query_as::<Book>().fetch_all(&mut *conn).await?;
        attach_authors(&mut conn, books).await
    }

    async fn search_books(&self, query: &str, skip: i64, limit: i64) -> AppResult<Vec<Book>> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM books WHERE title ILIKE ", BOOK_COLUMNS));
        builder.push_bind(like_pattern(query));
        push_page(&mut builder, skip, limit);

        let mut conn = self.pool.acquire().await?;
        let books = builder.build_query_as::<Book>().fetch_all(&mut *conn).await?;
        attach_authors(&mut conn, books).await
    }

    /// COALESCE keeps columns whose field is absent; `cover_image` uses an explicit
    /// flag so that a JSON `null` can clear it.
    async fn update_book(&self, id: i32, update: BookUpdate) -> AppResult<Option<Book>> {
        let mut tx = self.pool.begin().await?;

        let set_cover = update.cover_image.is_some();
        let cover = update.cover_image.flatten();

        let updated = sqlx::query_as::<_, Book>(&format!(
            r#"
            UPDATE books
            SET title = COALESCE($2, title),
                genre = COALESCE($3, genre),
                page_count = COALESCE($4, page_count),
                publication_year = COALESCE($5, publication_year),
                description = COALESCE($6, description),
                cover_image = CASE WHEN $7 THEN $8 ELSE cover_image END
            WHERE id = $1
            RETURNING {}
            "#,
            BOOK_COLUMNS
        ))
        .bind(id)
        .bind(&update.title)
        .bind(&update.genre)
        .bind(update.page_count)
        .bind(update.publication_year)
        .bind(&update.description)
        .bind(set_cover)
        .bind(&cover)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(updated) = updated else {
            return Ok(None);
        };

        if let Some(authors) = update.authors {
            sqlx::query("DELETE FROM book_author WHERE book_id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            associate_authors(&mut tx, id, authors).await?;
        }

        let updated = attach_authors(&mut tx, vec![updated]).await?.pop();
        tx.commit().await?;
        Ok(updated)
    }

    async fn delete_book(&self, id: i32) -> AppResult<Option<Book>> {
        let mut tx = self.pool.begin().await?;

        let Some(book) = fetch_book(&mut tx, id).await? else {
            return Ok(None);
        };

        // book_author and reviews rows go with it through ON DELETE CASCADE.
        sqlx::query("DELETE FROM books WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(book))
    }

    // --- REVIEWS ---

    async fn create_review(&self, review: NewReview) -> AppResult<Review> {
        let book_exists: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM books WHERE id = $1)")
                .bind(review.book_id)
                .fetch_one(&self.pool)
                .await?;
        if !book_exists {
            return Err(AppError::NotFound("Book not found".to_string()));
        }

        let created = sqlx::query_as::<_, Review>(&format!(
            "INSERT INTO reviews (book_id, user_id, rating, text) VALUES ($1, $2, $3, $4) RETURNING {}",
            REVIEW_COLUMNS
        ))
        .bind(review.book_id)
        .bind(review.user_id)
        .bind(review.rating)
        .bind(&review.text)
        .fetch_one(&self.pool)
        .await?;
        Ok(created)
    }

    async fn list_reviews_for_book(&self, book_id: i32) -> AppResult<Vec<Review>> {
        let reviews = sqlx::query_as::<_, Review>(&format!(
            "SELECT {} FROM reviews WHERE book_id = $1 ORDER BY created_at ASC, id ASC",
            REVIEW_COLUMNS
        ))
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(reviews)
    }
}
