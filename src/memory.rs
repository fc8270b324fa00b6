//! In-memory repositories for unit and router tests.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::auth::{
    repo::UserRepo,
    repo_types::{NewUser, Token, User, UserChanges},
};
use crate::recipes::{
    repo::RecipeRepo,
    repo_types::{Attr, AttrKind, ImageSwap, NewRecipe, Recipe, RecipeChanges, RecipeFilter, RecipeRow},
};

#[derive(Default)]
struct Tables {
    next_id: i64,
    users: BTreeMap<i64, User>,
    tokens: BTreeMap<i64, Token>,
    recipes: BTreeMap<i64, RecipeRow>,
    tags: BTreeMap<i64, Attr>,
    ingredients: BTreeMap<i64, Attr>,
    // (recipe_id, attr_id)
    recipe_tags: BTreeSet<(i64, i64)>,
    recipe_ingredients: BTreeSet<(i64, i64)>,
}

impl Tables {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn attrs(&self, kind: AttrKind) -> &BTreeMap<i64, Attr> {
        match kind {
            AttrKind::Tag => &self.tags,
            AttrKind::Ingredient => &self.ingredients,
        }
    }

    fn attrs_mut(&mut self, kind: AttrKind) -> &mut BTreeMap<i64, Attr> {
        match kind {
            AttrKind::Tag => &mut self.tags,
            AttrKind::Ingredient => &mut self.ingredients,
        }
    }

    fn links(&self, kind: AttrKind) -> &BTreeSet<(i64, i64)> {
        match kind {
            AttrKind::Tag => &self.recipe_tags,
            AttrKind::Ingredient => &self.recipe_ingredients,
        }
    }

    fn links_mut(&mut self, kind: AttrKind) -> &mut BTreeSet<(i64, i64)> {
        match kind {
            AttrKind::Tag => &mut self.recipe_tags,
            AttrKind::Ingredient => &mut self.recipe_ingredients,
        }
    }

    fn get_or_create_attr(&mut self, kind: AttrKind, user_id: i64, name: &str) -> i64 {
        let found = self
            .attrs(kind)
            .values()
            .find(|a| a.user_id == user_id && a.name == name)
            .map(|a| a.id);
        if let Some(id) = found {
            return id;
        }
        let id = self.next_id();
        self.attrs_mut(kind).insert(
            id,
            Attr {
                id,
                user_id,
                name: name.to_string(),
            },
        );
        id
    }

    fn link_attrs(&mut self, kind: AttrKind, user_id: i64, recipe_id: i64, names: &[String]) {
        for name in names {
            let attr_id = self.get_or_create_attr(kind, user_id, name);
            self.links_mut(kind).insert((recipe_id, attr_id));
        }
    }

    fn replace_attrs(&mut self, kind: AttrKind, user_id: i64, recipe_id: i64, names: &[String]) {
        self.links_mut(kind).retain(|(r, _)| *r != recipe_id);
        self.link_attrs(kind, user_id, recipe_id, names);
    }

    fn linked(&self, kind: AttrKind, recipe_id: i64) -> Vec<Attr> {
        self.links(kind)
            .iter()
            .filter(|(r, _)| *r == recipe_id)
            .filter_map(|(_, a)| self.attrs(kind).get(a).cloned())
            .collect()
    }

    fn matches(&self, kind: AttrKind, recipe_id: i64, ids: Option<&Vec<i64>>) -> bool {
        match ids {
            None => true,
            Some(ids) => self
                .links(kind)
                .iter()
                .any(|(r, a)| *r == recipe_id && ids.contains(a)),
        }
    }

    fn load(&self, row: &RecipeRow) -> Recipe {
        Recipe {
            row: row.clone(),
            tags: self.linked(AttrKind::Tag, row.id),
            ingredients: self.linked(AttrKind::Ingredient, row.id),
        }
    }

    fn owned_recipe(&self, user_id: i64, id: i64) -> Option<&RecipeRow> {
        self.recipes.get(&id).filter(|r| r.user_id == user_id)
    }
}

/// Mirrors the Postgres repositories, including owner scoping and ordering.
#[derive(Default)]
pub struct MemoryRepo {
    tables: Mutex<Tables>,
}

impl MemoryRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepo for MemoryRepo {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let t = self.tables.lock().await;
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn insert_user(&self, user: NewUser) -> anyhow::Result<User> {
        let mut t = self.tables.lock().await;
        if t.users.values().any(|u| u.email == user.email) {
            anyhow::bail!("duplicate key value violates unique constraint on users.email");
        }
        let id = t.next_id();
        let user = User {
            id,
            email: user.email,
            password_hash: user.password_hash,
            name: user.name,
            is_active: true,
            is_staff: user.is_staff,
            is_superuser: user.is_superuser,
        };
        t.users.insert(id, user.clone());
        Ok(user)
    }

    async fn update_user(&self, id: i64, changes: UserChanges) -> anyhow::Result<Option<User>> {
        let mut t = self.tables.lock().await;
        let Some(user) = t.users.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(email) = changes.email {
            user.email = email;
        }
        if let Some(hash) = changes.password_hash {
            user.password_hash = hash;
        }
        if let Some(name) = changes.name {
            user.name = name;
        }
        if let Some(is_staff) = changes.is_staff {
            user.is_staff = is_staff;
        }
        if let Some(is_superuser) = changes.is_superuser {
            user.is_superuser = is_superuser;
        }
        Ok(Some(user.clone()))
    }

    async fn get_or_create_token(
        &self,
        user_id: i64,
        candidate_key: &str,
    ) -> anyhow::Result<Token> {
        let mut t = self.tables.lock().await;
        let token = t.tokens.entry(user_id).or_insert_with(|| Token {
            key: candidate_key.to_string(),
            user_id,
            created_at: OffsetDateTime::now_utc(),
        });
        Ok(token.clone())
    }

    async fn find_user_by_token(&self, key: &str) -> anyhow::Result<Option<User>> {
        let t = self.tables.lock().await;
        Ok(t.tokens
            .values()
            .find(|tok| tok.key == key)
            .and_then(|tok| t.users.get(&tok.user_id))
            .cloned())
    }
}

#[async_trait]
impl RecipeRepo for MemoryRepo {
    async fn list_recipes(
        &self,
        user_id: i64,
        filter: &RecipeFilter,
    ) -> anyhow::Result<Vec<Recipe>> {
        let t = self.tables.lock().await;
        Ok(t.recipes
            .values()
            .rev()
            .filter(|r| r.user_id == user_id)
            .filter(|r| t.matches(AttrKind::Tag, r.id, filter.tags.as_ref()))
            .filter(|r| t.matches(AttrKind::Ingredient, r.id, filter.ingredients.as_ref()))
            .map(|r| t.load(r))
            .collect())
    }

    async fn get_recipe(&self, user_id: i64, id: i64) -> anyhow::Result<Option<Recipe>> {
        let t = self.tables.lock().await;
        Ok(t.owned_recipe(user_id, id).map(|r| t.load(r)))
    }

    async fn create_recipe(&self, user_id: i64, recipe: NewRecipe) -> anyhow::Result<Recipe> {
        let mut t = self.tables.lock().await;
        let id = t.next_id();
        let row = RecipeRow {
            id,
            user_id,
            title: recipe.title,
            description: recipe.description,
            time_minutes: recipe.time_minutes,
            price: recipe.price,
            link: recipe.link,
            image: None,
        };
        t.recipes.insert(id, row.clone());
        t.link_attrs(AttrKind::Tag, user_id, id, &recipe.tags);
        t.link_attrs(AttrKind::Ingredient, user_id, id, &recipe.ingredients);
        Ok(t.load(&row))
    }

    async fn update_recipe(
        &self,
        user_id: i64,
        id: i64,
        changes: RecipeChanges,
    ) -> anyhow::Result<Option<Recipe>> {
        let mut t = self.tables.lock().await;
        let Some(row) = t.recipes.get_mut(&id).filter(|r| r.user_id == user_id) else {
            return Ok(None);
        };
        if let Some(title) = changes.title {
            row.title = title;
        }
        if let Some(description) = changes.description {
            row.description = description;
        }
        if let Some(time_minutes) = changes.time_minutes {
            row.time_minutes = time_minutes;
        }
        if let Some(price) = changes.price {
            row.price = price;
        }
        if let Some(link) = changes.link {
            row.link = link;
        }
        let row = row.clone();
        if let Some(tags) = &changes.tags {
            t.replace_attrs(AttrKind::Tag, user_id, id, tags);
        }
        if let Some(ingredients) = &changes.ingredients {
            t.replace_attrs(AttrKind::Ingredient, user_id, id, ingredients);
        }
        Ok(Some(t.load(&row)))
    }

    async fn delete_recipe(&self, user_id: i64, id: i64) -> anyhow::Result<Option<RecipeRow>> {
        let mut t = self.tables.lock().await;
        if t.owned_recipe(user_id, id).is_none() {
            return Ok(None);
        }
        t.recipe_tags.retain(|(r, _)| *r != id);
        t.recipe_ingredients.retain(|(r, _)| *r != id);
        Ok(t.recipes.remove(&id))
    }

    async fn set_recipe_image(
        &self,
        user_id: i64,
        id: i64,
        key: &str,
    ) -> anyhow::Result<Option<ImageSwap>> {
        let mut t = self.tables.lock().await;
        let Some(row) = t.recipes.get_mut(&id).filter(|r| r.user_id == user_id) else {
            return Ok(None);
        };
        let previous_image = row.image.replace(key.to_string());
        Ok(Some(ImageSwap {
            row: row.clone(),
            previous_image,
        }))
    }

    async fn list_attrs(
        &self,
        kind: AttrKind,
        user_id: i64,
        assigned_only: bool,
    ) -> anyhow::Result<Vec<Attr>> {
        let t = self.tables.lock().await;
        let mut attrs: Vec<Attr> = t
            .attrs(kind)
            .values()
            .filter(|a| a.user_id == user_id)
            .filter(|a| !assigned_only || t.links(kind).iter().any(|(_, id)| *id == a.id))
            .cloned()
            .collect();
        attrs.sort_by(|a, b| b.name.cmp(&a.name).then(b.id.cmp(&a.id)));
        Ok(attrs)
    }

    async fn get_attr(
        &self,
        kind: AttrKind,
        user_id: i64,
        id: i64,
    ) -> anyhow::Result<Option<Attr>> {
        let t = self.tables.lock().await;
        Ok(t.attrs(kind)
            .get(&id)
            .filter(|a| a.user_id == user_id)
            .cloned())
    }

    async fn rename_attr(
        &self,
        kind: AttrKind,
        user_id: i64,
        id: i64,
        name: &str,
    ) -> anyhow::Result<Option<Attr>> {
        let mut t = self.tables.lock().await;
        let Some(attr) = t.attrs_mut(kind).get_mut(&id).filter(|a| a.user_id == user_id) else {
            return Ok(None);
        };
        attr.name = name.to_string();
        Ok(Some(attr.clone()))
    }

    async fn delete_attr(&self, kind: AttrKind, user_id: i64, id: i64) -> anyhow::Result<bool> {
        let mut t = self.tables.lock().await;
        let owned = t
            .attrs(kind)
            .get(&id)
            .is_some_and(|a| a.user_id == user_id);
        if !owned {
            return Ok(false);
        }
        t.attrs_mut(kind).remove(&id);
        t.links_mut(kind).retain(|(_, a)| *a != id);
        Ok(true)
    }
}
