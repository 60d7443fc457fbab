//! Warband Server - Main Entry Point
//!
//! Connects to the database, applies migrations and optionally seeds the
//! guild administration catalog.

use anyhow::Result;
use tracing::info;

use warband_server::permissions::{catalog, PgAccessStore, Scope};
use warband_server::{config, db};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warband_server=debug".into()),
        )
        .json()
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = config::Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Warband Server"
    );

    // Initialize database
    let db_pool = db::create_pool(&config).await?;
    db::run_migrations(&db_pool).await?;

    let store = PgAccessStore::new(db_pool);

    if config.seed_guild_catalog {
        let group = catalog::ensure_guild_admin_catalog(&store).await?;
        info!(group_id = %group.id, "Guild administration catalog ready");
    }

    let site = catalog::list_by_scope(&store, Some(Scope::Site)).await?.len();
    let guild = catalog::list_by_scope(&store, Some(Scope::Guild)).await?.len();
    info!(site, guild, "Permission catalog loaded");

    Ok(())
}
