use crate::{
    AppState,
    auth::{self, AuthUser},
    error::{AppError, AppResult, ErrorResponse},
    extract::{AppForm, AppJson, AppPath, AppQuery},
    models::{
        Author, Book, BookCreate, BookFilter, BookUpdate, DetailResponse, LoginForm,
        MessageResponse, NewReview, NewUser, RegisterUserRequest, Review, ReviewCreate, Token,
        TokenData, User,
    },
};
use axum::{
    Json,
    body::Bytes,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::StatusCode,
};
use serde::Deserialize;
use validator::Validate;

// --- Query Structs ---

fn default_limit() -> i64 {
    10
}

/// BookQuery
///
/// Query parameters of `GET /books/`. When `search` is present the genre and
/// author filters are ignored.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct BookQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    /// Case-insensitive substring of the title.
    pub search: Option<String>,
    /// Case-insensitive substring of the genre.
    pub genre: Option<String>,
    /// Case-insensitive substring of any author's name.
    pub author: Option<String>,
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PageQuery {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn check_page(skip: i64, limit: i64) -> AppResult<()> {
    if skip < 0 || limit < 0 {
        return Err(AppError::Validation(
            "skip and limit must be non-negative".to_string(),
        ));
    }
    Ok(())
}

/// Blank query values count as absent.
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// --- Health ---

/// ping
///
/// [Public Route] Liveness check.
#[utoipa::path(
    get,
    path = "/ping",
    responses((status = 200, description = "Alive", body = MessageResponse))
)]
pub async fn ping() -> Json<MessageResponse> {
    Json(MessageResponse {
        message: "pong".to_string(),
    })
}

// --- Users ---

/// register_user
///
/// [Public Route] Creates an active user. The password is hashed on the blocking
/// pool; the role defaults to "Member" when not supplied.
#[utoipa::path(
    post,
    path = "/users/register",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "Registered", body = User),
        (status = 400, description = "Invalid input or email already registered", body = ErrorResponse)
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    AppJson(payload): AppJson<RegisterUserRequest>,
) -> AppResult<(StatusCode, Json<User>)> {
    payload.validate()?;

    if state.repo.get_user_by_email(&payload.email).await?.is_some() {
        tracing::info!(email = %payload.email, "Registration rejected: email already registered");
        return Err(AppError::Conflict("Email already registered".to_string()));
    }

    let role = payload.role_or_default();
    let cost = state.config.bcrypt_cost;
    let password = payload.password;
    let hashed_password =
        tokio::task::spawn_blocking(move || auth::hash_password_with_cost(&password, cost))
            .await
            .map_err(|e| AppError::Internal(format!("Hashing task failed: {}", e)))??;

    let user = state
        .repo
        .create_user(NewUser {
            email: payload.email,
            hashed_password,
            full_name: payload.full_name,
            role,
        })
        .await?;

    tracing::info!(user_id = user.id, role = %user.role, "Registered user");
    Ok((StatusCode::CREATED, Json(user)))
}

/// login
///
/// [Public Route] Exchanges form-encoded credentials for a bearer token carrying
/// the user's email, role and id. Unknown email and wrong password produce the
/// same error.
#[utoipa::path(
    post,
    path = "/users/login",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token issued", body = Token),
        (status = 400, description = "Incorrect email or password", body = ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<AppState>,
    AppForm(form): AppForm<LoginForm>,
) -> AppResult<Json<Token>> {
    let Some(user) = state.repo.get_user_by_email(&form.username).await? else {
        tracing::warn!("Login failed: unknown email");
        return Err(AppError::InvalidCredentials);
    };

    let password = form.password;
    let hashed = user.hashed_password.clone();
    let valid = tokio::task::spawn_blocking(move || auth::verify_password(&password, &hashed))
        .await
        .map_err(|e| AppError::Internal(format!("Verification task failed: {}", e)))?;

    if !valid {
        tracing::warn!(user_id = user.id, "Login failed: password mismatch");
        return Err(AppError::InvalidCredentials);
    }

    let token = auth::issue_token(
        &state.config,
        &TokenData {
            email: user.email,
            role: user.role,
            id: user.id,
        },
        state.config.access_token_ttl(),
    )?;

    tracing::info!(user_id = user.id, "User logged in");
    Ok(Json(Token::bearer(token)))
}

// --- Books ---

/// create_book
///
/// [Authenticated Route] Multipart upload: a `book` field holding the JSON book
/// document and an optional `cover_image` file. The cover is stored first and its
/// path recorded on the book; authors are resolved by name, creating missing ones.
#[utoipa::path(
    post,
    path = "/books/",
    request_body(content = BookCreate, content_type = "multipart/form-data",
        description = "Field `book`: JSON-encoded BookCreate. Field `cover_image`: optional file."),
    responses(
        (status = 200, description = "Created", body = Book),
        (status = 400, description = "Malformed book payload", body = ErrorResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    )
)]
pub async fn create_book(
    user: AuthUser,
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<Book>> {
    let mut multipart = multipart?;
    let mut book_json: Option<String> = None;
    let mut cover: Option<(String, Bytes)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("book") => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid book field: {}", e)))?;
                book_json = Some(text);
            }
            Some("cover_image") => {
                let file_name = field.file_name().unwrap_or("cover").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid cover upload: {}", e)))?;
                // Browsers send an empty part when no file was picked.
                if !bytes.is_empty() {
                    cover = Some((file_name, bytes));
                }
            }
            _ => {}
        }
    }

    let raw = book_json.ok_or_else(|| AppError::BadRequest("Missing 'book' field".to_string()))?;
    let mut book: BookCreate = serde_json::from_str(&raw)
        .map_err(|e| AppError::BadRequest(format!("Invalid book data: {}", e)))?;
    book.validate()
        .map_err(|e| AppError::BadRequest(format!("Invalid book data: {}", e)))?;

    if let Some((file_name, bytes)) = cover {
        book.cover_image = Some(state.storage.save_cover(&file_name, &bytes).await?);
    }

    let created = state.repo.create_book(book).await?;
    tracing::info!(
        book_id = created.id,
        user_id = user.id,
        title = %created.title,
        authors = ?created.authors.iter().map(|a| a.name.as_str()).collect::<Vec<_>>(),
        "Created book"
    );
    Ok(Json(created))
}

/// list_books
///
/// [Authenticated Route] Paginated listing. `search` (title only) takes precedence;
/// otherwise the optional `genre` and `author` filters apply together.
#[utoipa::path(
    get,
    path = "/books/",
    params(BookQuery),
    responses(
        (status = 200, description = "Books", body = [Book]),
        (status = 401, description = "Not authenticated", body = ErrorResponse)
    )
)]
pub async fn list_books(
    _user: AuthUser,
    State(state): State<AppState>,
    AppQuery(query): AppQuery<BookQuery>,
) -> AppResult<Json<Vec<Book>>> {
    check_page(query.skip, query.limit)?;

    let books = match non_blank(query.search) {
        Some(search) => state.repo.search_books(&search, query.skip, query.limit).await?,
        None => {
            let filter = BookFilter {
                genre: non_blank(query.genre),
                author: non_blank(query.author),
            };
            state.repo.filter_books(&filter, query.skip, query.limit).await?
        }
    };
    Ok(Json(books))
}

/// get_book
///
/// [Authenticated Route] A single book with its authors.
#[utoipa::path(
    get,
    path = "/books/{id}",
    params(("id" = i32, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Found", body = Book),
        (status = 404, description = "Book not found", body = ErrorResponse)
    )
)]
pub async fn get_book(
    _user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<i32>,
) -> AppResult<Json<Book>> {
    state
        .repo
        .get_book(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Book not found".to_string()))
}

/// update_book
///
/// [Admin Route] Partial update; only fields present in the body change. A present
/// `authors` list replaces the full association set.
#[utoipa::path(
    patch,
    path = "/books/{id}",
    params(("id" = i32, Path, description = "Book ID")),
    request_body = BookUpdate,
    responses(
        (status = 200, description = "Updated", body = Book),
        (status = 403, description = "Admin privileges required", body = ErrorResponse),
        (status = 404, description = "Book not found", body = ErrorResponse)
    )
)]
pub async fn update_book(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<i32>,
    AppJson(payload): AppJson<BookUpdate>,
) -> AppResult<Json<Book>> {
    user.require_admin()?;
    payload.validate()?;

    let updated = state
        .repo
        .update_book(id, payload)
        .await?
        .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;

    tracing::info!(book_id = id, admin_id = user.id, "Updated book");
    Ok(Json(updated))
}

/// delete_book
///
/// [Admin Route] Removes the stored cover file, then the book; its reviews and
/// author links go with it.
#[utoipa::path(
    delete,
    path = "/books/{id}",
    params(("id" = i32, Path, description = "Book ID")),
    responses(
        (status = 200, description = "Deleted", body = DetailResponse),
        (status = 403, description = "Admin privileges required", body = ErrorResponse),
        (status = 404, description = "Book not found", body = ErrorResponse)
    )
)]
pub async fn delete_book(
    user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<i32>,
) -> AppResult<Json<DetailResponse>> {
    user.require_admin()?;

    let book = state
        .repo
        .get_book(id)
        .await?
        .ok_or_else(|| AppError::NotFound("Book not found".to_string()))?;

    if let Some(cover) = &book.cover_image {
        state.storage.remove_cover(cover).await?;
    }

    // A concurrent delete between the lookup and here is still a success for the caller.
    state.repo.delete_book(id).await?;

    tracing::info!(book_id = id, admin_id = user.id, "Deleted book");
    Ok(Json(DetailResponse {
        detail: "Book deleted successfully".to_string(),
    }))
}

// --- Authors ---

/// list_authors
///
/// [Authenticated Route] Paginated author listing.
#[utoipa::path(
    get,
    path = "/authors/",
    params(PageQuery),
    responses((status = 200, description = "Authors", body = [Author]))
)]
pub async fn list_authors(
    _user: AuthUser,
    State(state): State<AppState>,
    AppQuery(page): AppQuery<PageQuery>,
) -> AppResult<Json<Vec<Author>>> {
    check_page(page.skip, page.limit)?;
    Ok(Json(state.repo.list_authors(page.skip, page.limit).await?))
}

/// get_author
///
/// [Authenticated Route]
#[utoipa::path(
    get,
    path = "/authors/{id}",
    params(("id" = i32, Path, description = "Author ID")),
    responses(
        (status = 200, description = "Found", body = Author),
        (status = 404, description = "Author not found", body = ErrorResponse)
    )
)]
pub async fn get_author(
    _user: AuthUser,
    State(state): State<AppState>,
    AppPath(id): AppPath<i32>,
) -> AppResult<Json<Author>> {
    state
        .repo
        .get_author_by_id(id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::NotFound("Author not found".to_string()))
}

// --- Reviews ---

/// create_review
///
/// [Authenticated Route] The reviewer is always the token's user; a `user_id`
/// in the body is ignored.
#[utoipa::path(
    post,
    path = "/reviews/",
    request_body = ReviewCreate,
    responses(
        (status = 201, description = "Created", body = Review),
        (status = 400, description = "Rating outside 1..=5", body = ErrorResponse),
        (status = 404, description = "Book not found", body = ErrorResponse)
    )
)]
pub async fn create_review(
    user: AuthUser,
    State(state): State<AppState>,
    AppJson(payload): AppJson<ReviewCreate>,
) -> AppResult<(StatusCode, Json<Review>)> {
    payload.validate()?;

    let review = state
        .repo
        .create_review(NewReview {
            book_id: payload.book_id,
            user_id: user.id,
            rating: payload.rating,
            text: payload.text,
        })
        .await?;

    tracing::info!(
        review_id = review.id,
        book_id = payload.book_id,
        user_id = user.id,
        "Created review"
    );
    Ok((StatusCode::CREATED, Json(review)))
}

/// list_book_reviews
///
/// [Public Route] Every review of a book; an unknown book yields an empty list.
#[utoipa::path(
    get,
    path = "/reviews/book/{book_id}",
    params(("book_id" = i32, Path, description = "Book ID")),
    responses((status = 200, description = "Reviews", body = [Review]))
)]
pub async fn list_book_reviews(
    State(state): State<AppState>,
    AppPath(book_id): AppPath<i32>,
) -> AppResult<Json<Vec<Review>>> {
    let reviews = state.repo.list_reviews_for_book(book_id).await?;
    tracing::debug!(book_id, count = reviews.len(), "Fetched reviews");
    Ok(Json(reviews))
}
