use std::time::Duration;

use clap::{Parser, Subcommand};

mod app;
mod auth;
mod config;
mod db;
mod error;
#[cfg(test)]
mod memory;
mod recipes;
mod state;
mod storage;

use crate::config::AppConfig;
use crate::db::PgRepo;
use crate::state::AppState;

#[derive(Parser)]
#[command(name = "recipe-api", version, about = "Recipe API server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Wait for the database, apply migrations and serve HTTP (default)
    Serve,
    /// Block until the database accepts connections
    WaitForDb,
    /// Create a staff superuser
    CreateSuperuser {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
}

fn init_tracing() {
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "recipe_api=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

async fn wait_for_db(config: &AppConfig) {
    let url = config.database_url.clone();
    db::wait_for_db(
        || db::ping(&url),
        Duration::from_secs(config.db_wait_secs),
    )
    .await;
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env()?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            wait_for_db(&config).await;
            let state = AppState::init(config.clone()).await?;
            app::serve(app::build_app(state), &config).await?;
        }
        Command::WaitForDb => wait_for_db(&config).await,
        Command::CreateSuperuser { email, password } => {
            let repo = PgRepo::connect(&config.database_url).await?;
            repo.migrate().await?;
            let user = auth::services::create_superuser(&repo, &email, &password)
                .await
                .map_err(|e| anyhow::anyhow!("create superuser: {e}"))?;
            tracing::info!(user_id = user.id, email = %user.email, "superuser created");
        }
    }

    Ok(())
}
