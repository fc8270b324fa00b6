use serde::{Deserialize, Serialize};

use crate::auth::repo_types::User;

/// Body of `POST /user/create/` and `PUT|PATCH /user/me/`.
#[derive(Debug, Default, Deserialize)]
pub struct UserPayload {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

/// Body of `POST /user/token/`.
#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

/// Public part of the user returned to the client.
#[derive(Debug, Serialize)]
pub struct PublicUser {
    pub email: String,
    pub name: String,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            email: user.email,
            name: user.name,
        }
    }
}
