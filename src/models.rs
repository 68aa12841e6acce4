use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use validator::{Validate, ValidationError};

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// Public view of a row in the `users` table. The password hash is deliberately
/// absent; see `UserRecord` for the full row used during login.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct User {
    pub id: i32,
    pub email: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    // RBAC field: "Member" on registration, "admin" for librarians.
    pub role: String,
}

/// UserRecord
///
/// Full `users` row including the bcrypt hash. Never serialized to clients.
#[derive(Debug, Clone, FromRow)]
pub struct UserRecord {
    pub id: i32,
    pub email: String,
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub is_active: bool,
    pub role: String,
}

impl From<UserRecord> for User {
    fn from(record: UserRecord) -> Self {
        User {
            id: record.id,
            email: record.email,
            full_name: record.full_name,
            is_active: record.is_active,
            role: record.role,
        }
    }
}

/// NewUser
///
/// Insert payload built by the register handler once the password is hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub hashed_password: String,
    pub full_name: Option<String>,
    pub role: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Author {
    pub id: i32,
    pub name: String,
    pub biography: Option<String>,
    #[ts(type = "string | null")]
    pub birth_date: Option<NaiveDate>,
    pub nationality: Option<String>,
}

/// Book
///
/// A row of the `books` table together with its associated authors, which are
/// loaded through `book_author` in a second query.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Book {
    pub id: i32,
    pub title: String,
    pub genre: String,
    pub page_count: i32,
    pub publication_year: i32,
    pub description: String,
    // Path of the stored cover file, if one was uploaded.
    pub cover_image: Option<String>,
    #[sqlx(skip)]
    pub authors: Vec<Author>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default, PartialEq)]
#[ts(export)]
pub struct Review {
    pub id: i32,
    pub book_id: Option<i32>,
    pub user_id: Option<i32>,
    pub rating: i32,
    pub text: Option<String>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// NewReview
///
/// Insert payload. `user_id` always comes from the authenticated caller.
#[derive(Debug, Clone)]
pub struct NewReview {
    pub book_id: i32,
    pub user_id: i32,
    pub rating: i32,
    pub text: Option<String>,
}

// --- Request Payloads (Input Schemas) ---

pub const DEFAULT_ROLE: &str = "Member";

/// RegisterUserRequest
///
/// Input payload for `POST /users/register`.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct RegisterUserRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "reader@example.com")]
    pub email: String,
    #[validate(custom(function = "validate_password_strength"))]
    pub password: String,
    pub full_name: Option<String>,
    pub role: Option<String>,
}

impl RegisterUserRequest {
    /// Role to persist: the requested one, or `DEFAULT_ROLE` when absent or blank.
    pub fn role_or_default(&self) -> String {
        match self.role.as_deref().map(str::trim) {
            Some(role) if !role.is_empty() => role.to_string(),
            _ => DEFAULT_ROLE.to_string(),
        }
    }
}

const PASSWORD_SPECIAL_CHARS: &str = "!@#$%^&*(),.?\":{}|<>";

fn validate_password_strength(password: &str) -> Result<(), ValidationError> {
    let rules: [(bool, &'static str); 5] = [
        (
            password.chars().count() >= 8,
            "Password must be at least 8 characters long",
        ),
        (
            password.chars().any(|c| c.is_ascii_uppercase()),
            "Password must contain at least one uppercase letter",
        ),
        (
            password.chars().any(|c| c.is_ascii_lowercase()),
            "Password must contain at least one lowercase letter",
        ),
        (
            password.chars().any(|c| c.is_ascii_digit()),
            "Password must contain at least one digit",
        ),
        (
            password.chars().any(|c| PASSWORD_SPECIAL_CHARS.contains(c)),
            "Password must contain at least one special character",
        ),
    ];

    match rules.iter().find(|(ok, _)| !ok) {
        Some((_, message)) => {
            Err(ValidationError::new("password_strength").with_message((*message).into()))
        }
        None => Ok(()),
    }
}

/// LoginForm
///
/// Form-encoded body of `POST /users/login`. `username` carries the email.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct Token {
    pub access_token: String,
    pub token_type: String,
}

impl Token {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
        }
    }
}

/// TokenData
///
/// The identity carried inside an access token.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenData {
    pub email: String,
    pub role: String,
    pub id: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct AuthorCreate {
    #[validate(length(min = 1, message = "Author name must not be empty"))]
    pub name: String,
    #[serde(default)]
    pub biography: Option<String>,
    #[serde(default)]
    #[ts(type = "string | null")]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub nationality: Option<String>,
}

impl AuthorCreate {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// BookCreate
///
/// The JSON document sent in the `book` multipart field of `POST /books/`.
/// `cover_image` is overwritten by the handler when a file is uploaded.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate, Default)]
#[ts(export)]
pub struct BookCreate {
    #[validate(length(min = 1, message = "Title must not be empty"))]
    pub title: String,
    pub genre: String,
    pub page_count: i32,
    pub publication_year: i32,
    pub description: String,
    #[validate(nested)]
    pub authors: Vec<AuthorCreate>,
    #[serde(default)]
    pub cover_image: Option<String>,
}

/// BookUpdate
///
/// Partial update payload for `PATCH /books/{id}`. Absent fields are left untouched.
/// `cover_image` distinguishes "absent" (`None`) from an explicit `null`
/// (`Some(None)`, clears the stored path). `authors`, when present, replaces the
/// whole association set.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, Validate, Default)]
pub struct BookUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "Title must not be empty"))]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_count: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub publication_year: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "::serde_with::rust::double_option"
    )]
    #[schema(value_type = Option<String>)]
    pub cover_image: Option<Option<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(nested)]
    pub authors: Option<Vec<AuthorCreate>>,
}

/// BookFilter
///
/// Non-search listing filters; both are case-insensitive substring matches.
#[derive(Debug, Clone, Default)]
pub struct BookFilter {
    pub genre: Option<String>,
    pub author: Option<String>,
}

/// ReviewCreate
///
/// Input payload for `POST /reviews/`. Any `user_id` a client adds is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Validate)]
#[ts(export)]
pub struct ReviewCreate {
    pub book_id: i32,
    #[validate(range(min = 1, max = 5, message = "Rating must be between 1 and 5"))]
    pub rating: i32,
    #[serde(default)]
    pub text: Option<String>,
}

// --- Small Response Schemas ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct DetailResponse {
    pub detail: String,
}
