use std::net::SocketAddr;

use tracing::{info, warn};

use labledger_common::{AuthConfig, Database, Role};
use labledger_web::server::{serve, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let addr: SocketAddr = std::env::var("LABLEDGER_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;

    let db_path = std::env::var("LABLEDGER_DB").unwrap_or_else(|_| "labledger.db".to_string());

    let config = AuthConfig::from_env();
    let db = Database::open(&db_path)?;

    bootstrap_admin(&db, &config).await?;

    info!(
        "Starting LabLedger web API on http://{} (db: {})",
        addr, db_path
    );

    let state = AppState::new(db, config);
    serve(addr, state).await
}

/// Seed the first admin account on an empty database. The provisioned
/// credential must be rotated at first login.
async fn bootstrap_admin(db: &Database, config: &AuthConfig) -> anyhow::Result<()> {
    if db.count_accounts()? > 0 {
        return Ok(());
    }

    let secret = std::env::var("LABLEDGER_ADMIN_PASSWORD")
        .unwrap_or_else(|_| "ChangeMe123".to_string());
    let hash = labledger_web::auth::guard::hash_secret(secret, config.hash_cost).await?;
    db.create_account("admin", &hash, Role::Admin, true)?;
    warn!("Created initial 'admin' account; rotate its password at first login");
    Ok(())
}
