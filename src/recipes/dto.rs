use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::services::{MAX_FIELD_LEN, MSG_BLANK, MSG_REQUIRED, MSG_TOO_LONG};
use crate::config::AppConfig;
use crate::error::{AppError, FieldErrors};
use crate::recipes::repo_types::{Attr, NewRecipe, Recipe, RecipeChanges, RecipeRow};

const PRICE_MAX_DIGITS: u32 = 5;
const PRICE_DECIMAL_PLACES: u32 = 2;

const MSG_BAD_INT: &str = "A valid integer is required.";
const MSG_BAD_NUMBER: &str = "A valid number is required.";

// ---- requests ----

#[derive(Debug, Default, Deserialize)]
pub struct AttrPayload {
    pub name: Option<String>,
}

/// Body of recipe create / update. `time_minutes` and `price` arrive as raw
/// JSON so that numbers and numeric strings are both accepted and a bad value
/// becomes a field error instead of a body rejection.
#[derive(Debug, Default, Deserialize)]
pub struct RecipePayload {
    pub title: Option<String>,
    pub description: Option<String>,
    pub time_minutes: Option<Value>,
    pub price: Option<Value>,
    pub link: Option<String>,
    pub tags: Option<Vec<AttrPayload>>,
    pub ingredients: Option<Vec<AttrPayload>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RecipeQuery {
    pub tags: Option<String>,
    pub ingredients: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AttrQuery {
    pub assigned_only: Option<String>,
}

fn check_text(errors: &mut FieldErrors, field: &str, value: &str, allow_blank: bool) {
    if !allow_blank && value.is_empty() {
        errors.add(field, MSG_BLANK);
    } else if value.chars().count() > MAX_FIELD_LEN {
        errors.add(field, MSG_TOO_LONG);
    }
}

fn parse_time_minutes(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}

/// Parses a price and enforces at most 5 digits with 2 decimal places.
/// The result always carries scale 2.
pub fn parse_price(value: &Value) -> Result<Decimal, &'static str> {
    let parsed = match value {
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    };
    let price = parsed.ok_or(MSG_BAD_NUMBER)?.normalize();

    let scale = price.scale();
    let digits = price.mantissa().unsigned_abs().to_string().len() as u32;
    let whole_digits = digits.saturating_sub(scale);
    if whole_digits + scale > PRICE_MAX_DIGITS {
        return Err("Ensure that there are no more than 5 digits in total.");
    }
    if scale > PRICE_DECIMAL_PLACES {
        return Err("Ensure that there are no more than 2 decimal places.");
    }
    if whole_digits > PRICE_MAX_DIGITS - PRICE_DECIMAL_PLACES {
        return Err("Ensure that there are no more than 3 digits before the decimal point.");
    }

    let mut price = price;
    price.rescale(PRICE_DECIMAL_PLACES);
    Ok(price)
}

pub fn format_price(price: Decimal) -> String {
    let mut price = price;
    price.rescale(PRICE_DECIMAL_PLACES);
    price.to_string()
}

fn check_attr_names(errors: &mut FieldErrors, field: &str, items: Vec<AttrPayload>) -> Vec<String> {
    let mut names = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        let key = format!("{field}[{i}].name");
        match item.name.map(|n| n.trim().to_string()) {
            None => errors.add(&key, MSG_REQUIRED),
            Some(name) => {
                check_text(errors, &key, &name, false);
                names.push(name);
            }
        }
    }
    names
}

impl RecipePayload {
    /// Validates every present field; with `require`, missing required
    /// fields are errors too.
    fn validate(self, require: bool) -> Result<RecipeChanges, AppError> {
        let mut errors = FieldErrors::new();
        let mut changes = RecipeChanges::default();

        match self.title.map(|t| t.trim().to_string()) {
            Some(title) => {
                check_text(&mut errors, "title", &title, false);
                changes.title = Some(title);
            }
            None if require => errors.add("title", MSG_REQUIRED),
            None => {}
        }
        match self.time_minutes {
            Some(raw) => match parse_time_minutes(&raw) {
                Some(minutes) => changes.time_minutes = Some(minutes),
                None => errors.add("time_minutes", MSG_BAD_INT),
            },
            None if require => errors.add("time_minutes", MSG_REQUIRED),
            None => {}
        }
        match self.price {
            Some(raw) => match parse_price(&raw) {
                Ok(price) => changes.price = Some(price),
                Err(msg) => errors.add("price", msg),
            },
            None if require => errors.add("price", MSG_REQUIRED),
            None => {}
        }
        if let Some(link) = self.link.map(|l| l.trim().to_string()) {
            check_text(&mut errors, "link", &link, true);
            changes.link = Some(link);
        }
        changes.description = self.description.map(|d| d.trim().to_string());
        changes.tags = self.tags.map(|t| check_attr_names(&mut errors, "tags", t));
        changes.ingredients = self
            .ingredients
            .map(|i| check_attr_names(&mut errors, "ingredients", i));

        errors.finish()?;
        Ok(changes)
    }

    pub fn into_new_recipe(self) -> Result<NewRecipe, AppError> {
        let changes = self.validate(true)?;
        Ok(NewRecipe {
            title: changes.title.unwrap_or_default(),
            description: changes.description.unwrap_or_default(),
            time_minutes: changes.time_minutes.unwrap_or_default(),
            price: changes.price.unwrap_or_default(),
            link: changes.link.unwrap_or_default(),
            tags: changes.tags.unwrap_or_default(),
            ingredients: changes.ingredients.unwrap_or_default(),
        })
    }

    /// `PUT` (`partial == false`) requires title, time_minutes and price.
    pub fn into_changes(self, partial: bool) -> Result<RecipeChanges, AppError> {
        self.validate(!partial)
    }
}

impl AttrPayload {
    /// `Ok(None)` when a partial update carries no name.
    pub fn into_name(self, partial: bool) -> Result<Option<String>, AppError> {
        let mut errors = FieldErrors::new();
        let name = self.name.map(|n| n.trim().to_string());
        match &name {
            Some(name) => check_text(&mut errors, "name", name, false),
            None if !partial => errors.add("name", MSG_REQUIRED),
            None => {}
        }
        errors.finish()?;
        Ok(name)
    }
}

// ---- responses ----

/// Lightweight projection used by the list endpoint.
#[derive(Debug, Serialize)]
pub struct RecipeListItem {
    pub id: i64,
    pub title: String,
    pub time_minutes: i32,
    pub price: String,
    pub link: String,
    pub tags: Vec<Attr>,
}

impl From<Recipe> for RecipeListItem {
    fn from(recipe: Recipe) -> Self {
        let Recipe { row, tags, .. } = recipe;
        Self {
            id: row.id,
            title: row.title,
            time_minutes: row.time_minutes,
            price: format_price(row.price),
            link: row.link,
            tags,
        }
    }
}

/// Full projection used by every single-record endpoint.
#[derive(Debug, Serialize)]
pub struct RecipeDetail {
    pub id: i64,
    pub title: String,
    pub time_minutes: i32,
    pub price: String,
    pub link: String,
    pub tags: Vec<Attr>,
    pub ingredients: Vec<Attr>,
    pub description: String,
    pub image: Option<String>,
}

impl RecipeDetail {
    pub fn new(recipe: Recipe, config: &AppConfig) -> Self {
        let Recipe {
            row,
            tags,
            ingredients,
        } = recipe;
        Self {
            id: row.id,
            image: row.image.as_deref().map(|key| config.media_url(key)),
            title: row.title,
            time_minutes: row.time_minutes,
            price: format_price(row.price),
            link: row.link,
            tags,
            ingredients,
            description: row.description,
        }
    }
}

/// Response of the image upload action.
#[derive(Debug, Serialize)]
pub struct RecipeImage {
    pub id: i64,
    pub image: Option<String>,
}

impl RecipeImage {
    pub fn new(row: &RecipeRow, config: &AppConfig) -> Self {
        Self {
            id: row.id,
            image: row.image.as_deref().map(|key| config.media_url(key)),
        }
    }
}
