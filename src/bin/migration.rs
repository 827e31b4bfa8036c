use anyhow::Context;
use tracing::info;

use tirecrm_api::{config, migrator};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(url) => {
            config::init_tracing("info", false);
            url
        }
        Err(_) => {
            let cfg = config::load_config().context("DATABASE_URL unset and config failed to load")?;
            config::init_tracing(cfg.log_level(), cfg.log_json);
            cfg.database_url
        }
    };

    info!("Starting database migration");
    migrator::run_migration(&database_url).await?;
    info!("Migration completed successfully");
    Ok(())
}
