use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use tracing::warn;

use super::{repo_types::User, services::resolve_token};
use crate::{error::AppError, state::AppState};

/// Resolves the bearer token of the request to its user.
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        match resolve_token(state.users.as_ref(), header).await {
            Ok(user) => Ok(AuthUser(user)),
            Err(e) => {
                if let AppError::Unauthenticated(reason) = &e {
                    warn!(reason, "request rejected");
                }
                Err(e)
            }
        }
    }
}
