use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::FromRow;

/// Which of the two per-user recipe attributes a query targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrKind {
    Tag,
    Ingredient,
}

impl AttrKind {
    pub fn table(self) -> &'static str {
        match self {
            AttrKind::Tag => "tags",
            AttrKind::Ingredient => "ingredients",
        }
    }

    pub fn link_table(self) -> &'static str {
        match self {
            AttrKind::Tag => "recipe_tags",
            AttrKind::Ingredient => "recipe_ingredients",
        }
    }

    pub fn link_column(self) -> &'static str {
        match self {
            AttrKind::Tag => "tag_id",
            AttrKind::Ingredient => "ingredient_id",
        }
    }
}

/// A tag or an ingredient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct Attr {
    pub id: i64,
    #[serde(skip_serializing)]
    pub user_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, FromRow)]
pub struct RecipeRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub description: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
    pub image: Option<String>,
}

/// Result of pointing a recipe at a new image: the updated row and the key
/// it referenced before, read under the same row lock.
#[derive(Debug, Clone)]
pub struct ImageSwap {
    pub row: RecipeRow,
    pub previous_image: Option<String>,
}

// Written out by hand: `#[derive(FromRow)]` with a flattened field named
// `row` shadows the macro's own `row` binding in sqlx 0.7.
impl<'r> FromRow<'r, sqlx::postgres::PgRow> for ImageSwap {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(ImageSwap {
            row: RecipeRow::from_row(row)?,
            previous_image: row.try_get("previous_image")?,
        })
    }
}

/// A recipe with its associations loaded.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub row: RecipeRow,
    pub tags: Vec<Attr>,
    pub ingredients: Vec<Attr>,
}

/// Validated input for a new recipe. Tags and ingredients are referenced by name.
#[derive(Debug, Clone)]
pub struct NewRecipe {
    pub title: String,
    pub description: String,
    pub time_minutes: i32,
    pub price: Decimal,
    pub link: String,
    pub tags: Vec<String>,
    pub ingredients: Vec<String>,
}

/// Validated update. `None` keeps the stored value; `Some` for an
/// association replaces the whole set.
#[derive(Debug, Clone, Default)]
pub struct RecipeChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub time_minutes: Option<i32>,
    pub price: Option<Decimal>,
    pub link: Option<String>,
    pub tags: Option<Vec<String>>,
    pub ingredients: Option<Vec<String>>,
}

/// Listing filter: a recipe matches a list when it is linked to any of its ids.
#[derive(Debug, Clone, Default)]
pub struct RecipeFilter {
    pub tags: Option<Vec<i64>>,
    pub ingredients: Option<Vec<i64>>,
}
