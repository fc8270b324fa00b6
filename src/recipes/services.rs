use tracing::{info, warn};

use crate::error::{AppError, FieldErrors};
use crate::recipes::{
    dto::{AttrPayload, AttrQuery, RecipePayload, RecipeQuery},
    images::{self, UploadItem},
    repo::RecipeRepo,
    repo_types::{Attr, AttrKind, Recipe, RecipeFilter, RecipeRow},
};
use crate::state::AppState;

/// Parses a comma separated id list such as `"1,2, 3"`.
pub fn params_to_ints(field: &str, raw: &str) -> Result<Vec<i64>, AppError> {
    raw.split(',')
        .map(|part| part.trim().parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| {
            AppError::Validation(FieldErrors::single(
                field,
                "Enter a comma separated list of integer ids.",
            ))
        })
}

impl RecipeQuery {
    /// Empty parameters are treated as absent.
    pub fn to_filter(&self) -> Result<RecipeFilter, AppError> {
        let parse = |field: &str, raw: &Option<String>| {
            raw.as_deref()
                .filter(|s| !s.is_empty())
                .map(|s| params_to_ints(field, s))
                .transpose()
        };
        Ok(RecipeFilter {
            tags: parse("tags", &self.tags)?,
            ingredients: parse("ingredients", &self.ingredients)?,
        })
    }
}

impl AttrQuery {
    /// `assigned_only` is an integer flag; any non-zero value enables it.
    pub fn assigned_only(&self) -> Result<bool, AppError> {
        match self.assigned_only.as_deref().map(str::trim) {
            None | Some("") => Ok(false),
            Some(raw) => raw.parse::<i64>().map(|v| v != 0).map_err(|_| {
                AppError::Validation(FieldErrors::single(
                    "assigned_only",
                    "A valid integer is required.",
                ))
            }),
        }
    }
}

pub async fn list_recipes(
    recipes: &dyn RecipeRepo,
    user_id: i64,
    query: &RecipeQuery,
) -> Result<Vec<Recipe>, AppError> {
    let filter = query.to_filter()?;
    Ok(recipes.list_recipes(user_id, &filter).await?)
}

pub async fn get_recipe(
    recipes: &dyn RecipeRepo,
    user_id: i64,
    id: i64,
) -> Result<Recipe, AppError> {
    recipes.get_recipe(user_id, id).await?.ok_or(AppError::NotFound)
}

pub async fn create_recipe(
    recipes: &dyn RecipeRepo,
    user_id: i64,
    payload: RecipePayload,
) -> Result<Recipe, AppError> {
    let new = payload.into_new_recipe()?;
    let recipe = recipes.create_recipe(user_id, new).await?;
    info!(user_id, recipe_id = recipe.row.id, "recipe created");
    Ok(recipe)
}

pub async fn update_recipe(
    recipes: &dyn RecipeRepo,
    user_id: i64,
    id: i64,
    payload: RecipePayload,
    partial: bool,
) -> Result<Recipe, AppError> {
    // Unknown or foreign ids are reported before payload errors.
    if recipes.get_recipe(user_id, id).await?.is_none() {
        return Err(AppError::NotFound);
    }
    let changes = payload.into_changes(partial)?;
    let recipe = recipes
        .update_recipe(user_id, id, changes)
        .await?
        .ok_or(AppError::NotFound)?;
    info!(user_id, recipe_id = id, partial, "recipe updated");
    Ok(recipe)
}

pub async fn delete_recipe(st: &AppState, user_id: i64, id: i64) -> Result<(), AppError> {
    let row = st
        .recipes
        .delete_recipe(user_id, id)
        .await?
        .ok_or(AppError::NotFound)?;
    info!(user_id, recipe_id = id, "recipe deleted");
    if let Some(key) = row.image {
        images::discard_image(st, &key).await;
    }
    Ok(())
}

/// Validates and stores the upload, then points the recipe at it.
/// Callers check ownership before reading the body, so an unknown id is
/// reported ahead of upload errors. A rejected upload leaves the recipe and
/// its previous image untouched.
pub async fn upload_image(
    st: &AppState,
    user_id: i64,
    id: i64,
    upload: Option<UploadItem>,
) -> Result<RecipeRow, AppError> {
    let (upload, format) = images::validate_image(upload)?;

    let key = images::store_image(st, upload, format).await?;
    let swap = match st.recipes.set_recipe_image(user_id, id, &key).await {
        Ok(Some(swap)) => swap,
        Ok(None) => {
            warn!(user_id, recipe_id = id, "recipe vanished during upload");
            images::discard_image(st, &key).await;
            return Err(AppError::NotFound);
        }
        Err(e) => {
            images::discard_image(st, &key).await;
            return Err(e.into());
        }
    };
    info!(user_id, recipe_id = id, %key, "recipe image replaced");

    if let Some(old) = swap.previous_image.filter(|old| *old != key) {
        images::discard_image(st, &old).await;
    }
    Ok(swap.row)
}

pub async fn list_attrs(
    recipes: &dyn RecipeRepo,
    kind: AttrKind,
    user_id: i64,
    query: &AttrQuery,
) -> Result<Vec<Attr>, AppError> {
    let assigned_only = query.assigned_only()?;
    Ok(recipes.list_attrs(kind, user_id, assigned_only).await?)
}

pub async fn get_attr(
    recipes: &dyn RecipeRepo,
    kind: AttrKind,
    user_id: i64,
    id: i64,
) -> Result<Attr, AppError> {
    recipes
        .get_attr(kind, user_id, id)
        .await?
        .ok_or(AppError::NotFound)
}

pub async fn update_attr(
    recipes: &dyn RecipeRepo,
    kind: AttrKind,
    user_id: i64,
    id: i64,
    payload: AttrPayload,
    partial: bool,
) -> Result<Attr, AppError> {
    let existing = get_attr(recipes, kind, user_id, id).await?;
    let Some(name) = payload.into_name(partial)? else {
        return Ok(existing);
    };
    let attr = recipes
        .rename_attr(kind, user_id, id, &name)
        .await?
        .ok_or(AppError::NotFound)?;
    info!(user_id, id, table = kind.table(), "attribute renamed");
    Ok(attr)
}

pub async fn delete_attr(
    recipes: &dyn RecipeRepo,
    kind: AttrKind,
    user_id: i64,
    id: i64,
) -> Result<(), AppError> {
    if !recipes.delete_attr(kind, user_id, id).await? {
        return Err(AppError::NotFound);
    }
    info!(user_id, id, table = kind.table(), "attribute deleted");
    Ok(())
}
