use std::sync::Arc;

use crate::auth::repo::UserRepo;
use crate::config::AppConfig;
use crate::db::PgRepo;
use crate::recipes::repo::RecipeRepo;
use crate::storage::{Storage, StorageClient};

#[derive(Clone)]
pub struct AppState {
    pub users: Arc<dyn UserRepo>,
    pub recipes: Arc<dyn RecipeRepo>,
    pub config: Arc<AppConfig>,
    pub storage: Arc<dyn StorageClient>,
}

impl AppState {
    pub async fn init(config: AppConfig) -> anyhow::Result<Self> {
        let repo = Arc::new(PgRepo::connect(&config.database_url).await?);
        repo.migrate().await?;

        // S3/MinIO
        let storage = Arc::new(Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;

        Ok(Self::from_parts(repo.clone(), repo, Arc::new(config), storage))
    }

    pub fn from_parts(
        users: Arc<dyn UserRepo>,
        recipes: Arc<dyn RecipeRepo>,
        config: Arc<AppConfig>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        Self {
            users,
            recipes,
            config,
            storage,
        }
    }
}
