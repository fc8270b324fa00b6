use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Transaction};

use crate::db::PgRepo;
use crate::recipes::repo_types::{
    Attr, AttrKind, ImageSwap, NewRecipe, Recipe, RecipeChanges, RecipeFilter, RecipeRow,
};

/// Owner-scoped persistence for recipes, tags and ingredients.
/// Every method takes the requesting user's id; rows owned by anyone else
/// behave exactly like rows that do not exist.
#[async_trait]
pub trait RecipeRepo: Send + Sync {
    /// Newest first (id descending), each recipe at most once.
    async fn list_recipes(&self, user_id: i64, filter: &RecipeFilter)
        -> anyhow::Result<Vec<Recipe>>;
    async fn get_recipe(&self, user_id: i64, id: i64) -> anyhow::Result<Option<Recipe>>;
    async fn create_recipe(&self, user_id: i64, recipe: NewRecipe) -> anyhow::Result<Recipe>;
    async fn update_recipe(
        &self,
        user_id: i64,
        id: i64,
        changes: RecipeChanges,
    ) -> anyhow::Result<Option<Recipe>>;
    /// Returns the deleted row.
    async fn delete_recipe(&self, user_id: i64, id: i64) -> anyhow::Result<Option<RecipeRow>>;
    /// Stores `key` and reports the key it replaced.
    async fn set_recipe_image(
        &self,
        user_id: i64,
        id: i64,
        key: &str,
    ) -> anyhow::Result<Option<ImageSwap>>;

    /// Name descending. With `assigned_only`, only entries linked to a recipe.
    async fn list_attrs(
        &self,
        kind: AttrKind,
        user_id: i64,
        assigned_only: bool,
    ) -> anyhow::Result<Vec<Attr>>;
    async fn get_attr(&self, kind: AttrKind, user_id: i64, id: i64)
        -> anyhow::Result<Option<Attr>>;
    async fn rename_attr(
        &self,
        kind: AttrKind,
        user_id: i64,
        id: i64,
        name: &str,
    ) -> anyhow::Result<Option<Attr>>;
    async fn delete_attr(&self, kind: AttrKind, user_id: i64, id: i64) -> anyhow::Result<bool>;
}

const RECIPE_COLUMNS: &str =
    "id, user_id, title, description, time_minutes, price, link, image";

async fn load_attrs(
    db: &PgPool,
    kind: AttrKind,
    recipe_ids: &[i64],
) -> anyhow::Result<HashMap<i64, Vec<Attr>>> {
    let rows = sqlx::query_as::<_, (i64, i64, i64, String)>(&format!(
        r#"
        SELECT l.recipe_id, a.id, a.user_id, a.name
          FROM {link} l
          JOIN {table} a ON a.id = l.{col}
         WHERE l.recipe_id = ANY($1)
         ORDER BY a.id ASC
        "#,
        link = kind.link_table(),
        table = kind.table(),
        col = kind.link_column(),
    ))
    .bind(recipe_ids)
    .fetch_all(db)
    .await
    .with_context(|| format!("load {} for recipes", kind.table()))?;

    let mut out: HashMap<i64, Vec<Attr>> = HashMap::new();
    for (recipe_id, id, user_id, name) in rows {
        out.entry(recipe_id)
            .or_default()
            .push(Attr { id, user_id, name });
    }
    Ok(out)
}

async fn attach_attrs(db: &PgPool, rows: Vec<RecipeRow>) -> anyhow::Result<Vec<Recipe>> {
    let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
    let mut tags = load_attrs(db, AttrKind::Tag, &ids).await?;
    let mut ingredients = load_attrs(db, AttrKind::Ingredient, &ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| Recipe {
            tags: tags.remove(&row.id).unwrap_or_default(),
            ingredients: ingredients.remove(&row.id).unwrap_or_default(),
            row,
        })
        .collect())
}

/// Look-up-or-create by `(user, name)`.
async fn get_or_create_attr_tx(
    tx: &mut Transaction<'_, Postgres>,
    kind: AttrKind,
    user_id: i64,
    name: &str,
) -> anyhow::Result<i64> {
    let existing = sqlx::query_as::<_, (i64,)>(&format!(
        "SELECT id FROM {} WHERE user_id = $1 AND name = $2 ORDER BY id ASC LIMIT 1",
        kind.table()
    ))
    .bind(user_id)
    .bind(name)
    .fetch_optional(&mut **tx)
    .await
    .with_context(|| format!("look up {} {name:?}", kind.table()))?;
    if let Some((id,)) = existing {
        return Ok(id);
    }

    let (id,) = sqlx::query_as::<_, (i64,)>(&format!(
        "INSERT INTO {} (user_id, name) VALUES ($1, $2) RETURNING id",
        kind.table()
    ))
    .bind(user_id)
    .bind(name)
    .fetch_one(&mut **tx)
    .await
    .with_context(|| format!("insert {} {name:?}", kind.table()))?;
    Ok(id)
}

async fn link_attrs_tx(
    tx: &mut Transaction<'_, Postgres>,
    kind: AttrKind,
    user_id: i64,
    recipe_id: i64,
    names: &[String],
) -> anyhow::Result<()> {
    for name in names {
        let attr_id = get_or_create_attr_tx(tx, kind, user_id, name).await?;
        sqlx::query(&format!(
            "INSERT INTO {} (recipe_id, {}) VALUES ($1, $2) ON CONFLICT DO NOTHING",
            kind.link_table(),
            kind.link_column()
        ))
        .bind(recipe_id)
        .bind(attr_id)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("link {} to recipe {recipe_id}", kind.table()))?;
    }
    Ok(())
}

async fn replace_attrs_tx(
    tx: &mut Transaction<'_, Postgres>,
    kind: AttrKind,
    user_id: i64,
    recipe_id: i64,
    names: &[String],
) -> anyhow::Result<()> {
    sqlx::query(&format!(
        "DELETE FROM {} WHERE recipe_id = $1",
        kind.link_table()
    ))
    .bind(recipe_id)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("clear {} of recipe {recipe_id}", kind.table()))?;
    link_attrs_tx(tx, kind, user_id, recipe_id, names).await
}

#[async_trait]
impl RecipeRepo for PgRepo {
    async fn list_recipes(
        &self,
        user_id: i64,
        filter: &RecipeFilter,
    ) -> anyhow::Result<Vec<Recipe>> {
        let rows = sqlx::query_as::<_, RecipeRow>(&format!(
            r#"
            SELECT {RECIPE_COLUMNS}
              FROM recipes r
             WHERE r.user_id = $1
               AND ($2::BIGINT[] IS NULL OR EXISTS (
                     SELECT 1 FROM recipe_tags rt
                      WHERE rt.recipe_id = r.id AND rt.tag_id = ANY($2)))
               AND ($3::BIGINT[] IS NULL OR EXISTS (
                     SELECT 1 FROM recipe_ingredients ri
                      WHERE ri.recipe_id = r.id AND ri.ingredient_id = ANY($3)))
             ORDER BY r.id DESC
            "#
        ))
        .bind(user_id)
        .bind(filter.tags.clone())
        .bind(filter.ingredients.clone())
        .fetch_all(&self.pool)
        .await
        .context("list recipes")?;

        attach_attrs(&self.pool, rows).await
    }

    async fn get_recipe(&self, user_id: i64, id: i64) -> anyhow::Result<Option<Recipe>> {
        let row = sqlx::query_as::<_, RecipeRow>(&format!(
            "SELECT {RECIPE_COLUMNS} FROM recipes WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("get recipe")?;

        match row {
            Some(row) => Ok(attach_attrs(&self.pool, vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn create_recipe(&self, user_id: i64, recipe: NewRecipe) -> anyhow::Result<Recipe> {
        let mut tx = self.pool.begin().await.context("begin tx")?;
        let row = sqlx::query_as::<_, RecipeRow>(&format!(
            r#"
            INSERT INTO recipes (user_id, title, description, time_minutes, price, link)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {RECIPE_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(&recipe.title)
        .bind(&recipe.description)
        .bind(recipe.time_minutes)
        .bind(recipe.price)
        .bind(&recipe.link)
        .fetch_one(&mut *tx)
        .await
        .context("insert recipe")?;

        link_attrs_tx(&mut tx, AttrKind::Tag, user_id, row.id, &recipe.tags).await?;
        link_attrs_tx(&mut tx, AttrKind::Ingredient, user_id, row.id, &recipe.ingredients).await?;
        tx.commit().await.context("commit tx")?;

        self.get_recipe(user_id, row.id)
            .await?
            .with_context(|| format!("recipe {} missing after insert", row.id))
    }

    async fn update_recipe(
        &self,
        user_id: i64,
        id: i64,
        changes: RecipeChanges,
    ) -> anyhow::Result<Option<Recipe>> {
        let mut tx = self.pool.begin().await.context("begin tx")?;
        let updated = sqlx::query_as::<_, (i64,)>(
            r#"
            UPDATE recipes
               SET title        = COALESCE($3, title),
                   description  = COALESCE($4, description),
                   time_minutes = COALESCE($5, time_minutes),
                   price        = COALESCE($6, price),
                   link         = COALESCE($7, link)
             WHERE id = $1 AND user_id = $2
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(changes.title)
        .bind(changes.description)
        .bind(changes.time_minutes)
        .bind(changes.price)
        .bind(changes.link)
        .fetch_optional(&mut *tx)
        .await
        .context("update recipe")?;
        if updated.is_none() {
            return Ok(None);
        }

        if let Some(tags) = &changes.tags {
            replace_attrs_tx(&mut tx, AttrKind::Tag, user_id, id, tags).await?;
        }
        if let Some(ingredients) = &changes.ingredients {
            replace_attrs_tx(&mut tx, AttrKind::Ingredient, user_id, id, ingredients).await?;
        }
        tx.commit().await.context("commit tx")?;

        self.get_recipe(user_id, id).await
    }

    async fn delete_recipe(&self, user_id: i64, id: i64) -> anyhow::Result<Option<RecipeRow>> {
        let row = sqlx::query_as::<_, RecipeRow>(&format!(
            "DELETE FROM recipes WHERE id = $1 AND user_id = $2 RETURNING {RECIPE_COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .context("delete recipe")?;
        Ok(row)
    }

    async fn set_recipe_image(
        &self,
        user_id: i64,
        id: i64,
        key: &str,
    ) -> anyhow::Result<Option<ImageSwap>> {
        // The locked subquery makes concurrent uploads each see the key they replace.
        let swap = sqlx::query_as::<_, ImageSwap>(
            r#"
            UPDATE recipes r
               SET image = $3
              FROM (SELECT id, image FROM recipes
                     WHERE id = $1 AND user_id = $2
                     FOR UPDATE) old
             WHERE r.id = old.id
            RETURNING r.id, r.user_id, r.title, r.description, r.time_minutes,
                      r.price, r.link, r.image, old.image AS previous_image
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .context("set recipe image")?;
        Ok(swap)
    }

    async fn list_attrs(
        &self,
        kind: AttrKind,
        user_id: i64,
        assigned_only: bool,
    ) -> anyhow::Result<Vec<Attr>> {
        let rows = sqlx::query_as::<_, Attr>(&format!(
            r#"
            SELECT a.id, a.user_id, a.name
              FROM {table} a
             WHERE a.user_id = $1
               AND (NOT $2 OR EXISTS (SELECT 1 FROM {link} l WHERE l.{col} = a.id))
             ORDER BY a.name DESC, a.id DESC
            "#,
            table = kind.table(),
            link = kind.link_table(),
            col = kind.link_column(),
        ))
        .bind(user_id)
        .bind(assigned_only)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("list {}", kind.table()))?;
        Ok(rows)
    }

    async fn get_attr(
        &self,
        kind: AttrKind,
        user_id: i64,
        id: i64,
    ) -> anyhow::Result<Option<Attr>> {
        let row = sqlx::query_as::<_, Attr>(&format!(
            "SELECT id, user_id, name FROM {} WHERE id = $1 AND user_id = $2",
            kind.table()
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("get {}", kind.table()))?;
        Ok(row)
    }

    async fn rename_attr(
        &self,
        kind: AttrKind,
        user_id: i64,
        id: i64,
        name: &str,
    ) -> anyhow::Result<Option<Attr>> {
        let row = sqlx::query_as::<_, Attr>(&format!(
            "UPDATE {} SET name = $3 WHERE id = $1 AND user_id = $2 RETURNING id, user_id, name",
            kind.table()
        ))
        .bind(id)
        .bind(user_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("rename {}", kind.table()))?;
        Ok(row)
    }

    async fn delete_attr(&self, kind: AttrKind, user_id: i64, id: i64) -> anyhow::Result<bool> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE id = $1 AND user_id = $2",
            kind.table()
        ))
        .bind(id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .with_context(|| format!("delete {}", kind.table()))?;
        Ok(result.rows_affected() > 0)
    }
}
