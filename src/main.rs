use anyhow::Result;
use chrono::Utc;
use log::{debug, error, info, warn};
use tether_database::Database;

#[tokio::main]
async fn main() {
    if std::env::var("RUST_LOG").is_err() {
        #[cfg(debug_assertions)]
        {
            std::env::set_var("RUST_LOG", "tether");
        }

        #[cfg(not(debug_assertions))]
        {
            std::env::set_var("RUST_LOG", "tether=info");
        }
    }

    env_logger::init();

    match dotenvy::dotenv() {
        Ok(path) => debug!("Loaded environment file: {}", path.display()),
        Err(_) => warn!("No .env file found, expecting all necessary environment variables"),
    }

    if let Err(why) = run().await {
        error!("Fatal error: {why}");
        std::process::exit(1);
    }
}

/// Removes every link request that has passed its expiry. Meant to be invoked
/// periodically from a scheduler (cron or similar); a single run sweeps once and
/// exits.
async fn run() -> Result<()> {
    info!("Tether maintenance {}", tether_config::VERSION);

    let database = Database::connect().await?;

    let removed = database
        .sweep_expired_link_requests(Utc::now().naive_utc())
        .await?;

    if removed > 0 {
        info!("Removed {removed} expired link request(s)");
    } else {
        info!("No expired link requests to remove");
    }

    Ok(())
}
