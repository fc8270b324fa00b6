use axum::{
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use tracing::instrument;

use crate::{
    auth::extractors::AuthUser,
    error::{AppError, FieldErrors, PathId, Payload, NON_FIELD_ERRORS},
    state::AppState,
};

use super::dto::{
    AttrPayload, AttrQuery, RecipeDetail, RecipeImage, RecipeListItem, RecipePayload, RecipeQuery,
};
use super::images::{UploadItem, IMAGE_FIELD};
use super::repo_types::{Attr, AttrKind};
use super::services;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024; // 20MB

// --- public routers ---

pub fn recipe_routes() -> Router<AppState> {
    Router::new()
        .route("/recipe/recipes/", get(list_recipes).post(create_recipe))
        .route(
            "/recipe/recipes/:id/",
            get(get_recipe)
                .put(put_recipe)
                .patch(patch_recipe)
                .delete(delete_recipe),
        )
        .route("/recipe/recipes/:id/upload-image/", post(upload_image))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

/// Tag and ingredient endpoints share handlers; the kind rides along as an extension.
pub fn attr_routes(kind: AttrKind) -> Router<AppState> {
    let base = format!("/recipe/{}/", kind.table());
    let item = format!("/recipe/{}/:id/", kind.table());
    Router::new()
        .route(&base, get(list_attrs))
        .route(
            &item,
            get(get_attr).put(put_attr).patch(patch_attr).delete(delete_attr),
        )
        .layer(Extension(kind))
}

// --- recipes ---

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn list_recipes(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(query): Query<RecipeQuery>,
) -> Result<Json<Vec<RecipeListItem>>, AppError> {
    let recipes = services::list_recipes(state.recipes.as_ref(), user.id, &query).await?;
    Ok(Json(recipes.into_iter().map(RecipeListItem::from).collect()))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn get_recipe(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathId(id): PathId,
) -> Result<Json<RecipeDetail>, AppError> {
    let recipe = services::get_recipe(state.recipes.as_ref(), user.id, id).await?;
    Ok(Json(RecipeDetail::new(recipe, &state.config)))
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn create_recipe(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Payload(payload): Payload<RecipePayload>,
) -> Result<(StatusCode, Json<RecipeDetail>), AppError> {
    let recipe = services::create_recipe(state.recipes.as_ref(), user.id, payload).await?;
    Ok((
        StatusCode::CREATED,
        Json(RecipeDetail::new(recipe, &state.config)),
    ))
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn put_recipe(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathId(id): PathId,
    Payload(payload): Payload<RecipePayload>,
) -> Result<Json<RecipeDetail>, AppError> {
    let recipe =
        services::update_recipe(state.recipes.as_ref(), user.id, id, payload, false).await?;
    Ok(Json(RecipeDetail::new(recipe, &state.config)))
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn patch_recipe(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathId(id): PathId,
    Payload(payload): Payload<RecipePayload>,
) -> Result<Json<RecipeDetail>, AppError> {
    let recipe =
        services::update_recipe(state.recipes.as_ref(), user.id, id, payload, true).await?;
    Ok(Json(RecipeDetail::new(recipe, &state.config)))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn delete_recipe(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathId(id): PathId,
) -> Result<StatusCode, AppError> {
    services::delete_recipe(&state, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /recipe/recipes/:id/upload-image/ (multipart, field `image`)
#[instrument(skip(state, user, mp), fields(user_id = user.id))]
pub async fn upload_image(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    PathId(id): PathId,
    mp: Result<Multipart, MultipartRejection>,
) -> Result<Json<RecipeImage>, AppError> {
    // Ownership is checked before the body is looked at.
    services::get_recipe(state.recipes.as_ref(), user.id, id).await?;

    let mut mp = mp.map_err(|e| {
        AppError::Validation(FieldErrors::single(NON_FIELD_ERRORS, e.body_text()))
    })?;
    let mut upload = None;
    while let Some(field) = mp.next_field().await.map_err(|e| {
        AppError::Validation(FieldErrors::single(NON_FIELD_ERRORS, e.body_text()))
    })? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let body = field.bytes().await.map_err(|e| {
            AppError::Validation(FieldErrors::single(IMAGE_FIELD, e.body_text()))
        })?;
        upload = Some(UploadItem { body, file_name });
        break;
    }

    let row = services::upload_image(&state, user.id, id, upload).await?;
    Ok(Json(RecipeImage::new(&row, &state.config)))
}

// --- tags & ingredients ---

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn list_attrs(
    State(state): State<AppState>,
    Extension(kind): Extension<AttrKind>,
    AuthUser(user): AuthUser,
    Query(query): Query<AttrQuery>,
) -> Result<Json<Vec<Attr>>, AppError> {
    let attrs = services::list_attrs(state.recipes.as_ref(), kind, user.id, &query).await?;
    Ok(Json(attrs))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn get_attr(
    State(state): State<AppState>,
    Extension(kind): Extension<AttrKind>,
    AuthUser(user): AuthUser,
    PathId(id): PathId,
) -> Result<Json<Attr>, AppError> {
    let attr = services::get_attr(state.recipes.as_ref(), kind, user.id, id).await?;
    Ok(Json(attr))
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn put_attr(
    State(state): State<AppState>,
    Extension(kind): Extension<AttrKind>,
    AuthUser(user): AuthUser,
    PathId(id): PathId,
    Payload(payload): Payload<AttrPayload>,
) -> Result<Json<Attr>, AppError> {
    let attr =
        services::update_attr(state.recipes.as_ref(), kind, user.id, id, payload, false).await?;
    Ok(Json(attr))
}

#[instrument(skip(state, user, payload), fields(user_id = user.id))]
pub async fn patch_attr(
    State(state): State<AppState>,
    Extension(kind): Extension<AttrKind>,
    AuthUser(user): AuthUser,
    PathId(id): PathId,
    Payload(payload): Payload<AttrPayload>,
) -> Result<Json<Attr>, AppError> {
    let attr =
        services::update_attr(state.recipes.as_ref(), kind, user.id, id, payload, true).await?;
    Ok(Json(attr))
}

#[instrument(skip(state, user), fields(user_id = user.id))]
pub async fn delete_attr(
    State(state): State<AppState>,
    Extension(kind): Extension<AttrKind>,
    AuthUser(user): AuthUser,
    PathId(id): PathId,
) -> Result<StatusCode, AppError> {
    services::delete_attr(state.recipes.as_ref(), kind, user.id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
