use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{PublicUser, TokenRequest, TokenResponse, UserPayload},
        extractors::AuthUser,
        services,
    },
    error::{AppError, Payload},
    state::AppState,
};

pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/user/create/", post(create_user))
        .route("/user/token/", post(create_token))
        .route("/user/me/", get(get_me).put(put_me).patch(patch_me))
}

#[instrument(skip(state, payload))]
pub async fn create_user(
    State(state): State<AppState>,
    Payload(payload): Payload<UserPayload>,
) -> Result<(StatusCode, Json<PublicUser>), AppError> {
    let user = services::register(state.users.as_ref(), payload).await?;
    Ok((StatusCode::CREATED, Json(user.into())))
}

#[instrument(skip(state, payload))]
pub async fn create_token(
    State(state): State<AppState>,
    Payload(payload): Payload<TokenRequest>,
) -> Result<Json<TokenResponse>, AppError> {
    let token = services::issue_token(state.users.as_ref(), payload).await?;
    Ok(Json(TokenResponse { token: token.key }))
}

#[instrument(skip(user), fields(user_id = user.id))]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<PublicUser> {
    Json(user.into())
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn put_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Payload(payload): Payload<UserPayload>,
) -> Result<Json<PublicUser>, AppError> {
    let updated = services::update_me(state.users.as_ref(), &user, payload, false).await?;
    Ok(Json(updated.into()))
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn patch_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Payload(payload): Payload<UserPayload>,
) -> Result<Json<PublicUser>, AppError> {
    let updated = services::update_me(state.users.as_ref(), &user, payload, true).await?;
    Ok(Json(updated.into()))
}
