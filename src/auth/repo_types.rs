use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 hash, never exposed in JSON
    pub name: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
}

/// Row to insert; email is already normalized and the password hashed.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub is_staff: bool,
    pub is_superuser: bool,
}

/// Partial update of a user; `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct UserChanges {
    pub email: Option<String>,
    pub password_hash: Option<String>,
    pub name: Option<String>,
    pub is_staff: Option<bool>,
    pub is_superuser: Option<bool>,
}

/// Opaque API token bound to one user.
#[derive(Debug, Clone, FromRow)]
pub struct Token {
    pub key: String,
    pub user_id: i64,
    pub created_at: OffsetDateTime,
}
