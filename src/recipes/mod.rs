pub mod dto;
pub mod handlers;
pub mod images;
pub mod repo;
pub mod repo_types;
pub mod services;

use crate::state::AppState;
use axum::Router;
use repo_types::AttrKind;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(handlers::recipe_routes())
        .merge(handlers::attr_routes(AttrKind::Tag))
        .merge(handlers::attr_routes(AttrKind::Ingredient))
}
