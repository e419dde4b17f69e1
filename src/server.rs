//! HTTP server setup: state construction, repository seeding and the serve
//! loop.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::api::build_router;
use crate::config::Config;
use crate::registry::RepositoryRegistry;
use crate::state::AppState;
use crate::upstream::{UpstreamClient, UpstreamConfig};
use crate::validation;

/// Create repositories declared in the config. Idempotent: names that
/// already exist are left untouched.
async fn seed_repositories(registry: &Arc<RepositoryRegistry>, config: &Config) {
    for def in &config.repositories {
        if registry.get(&def.name).await.is_ok() {
            info!(repo = %def.name, "Seeded repository already exists, skipping");
            continue;
        }
        match registry
            .create(&def.name, &def.package_type, def.config.clone())
            .await
        {
            Ok(record) => {
                info!(repo = %record.name, repo_type = %record.config.type_name(),
                      "Seeded repository from config");
            }
            Err(e) => {
                warn!(repo = %def.name, error = %e, "Failed to seed repository from config");
            }
        }
    }
}

/// Start the package repository server and serve until shutdown.
pub async fn run_server(
    host: String,
    port: u16,
    data_dir: PathBuf,
    config_path: Option<PathBuf>,
) -> Result<()> {
    info!("Starting package repository server");
    println!("🚀 Starting package repository server...");

    if let Err(e) = validation::validate_hostname(&host) {
        error!(host = %host, error = %e, "Invalid host parameter");
        anyhow::bail!("Invalid host parameter: {e}");
    }

    let abs_data_dir = match std::fs::canonicalize(&data_dir) {
        Ok(path) => path,
        Err(_) => {
            std::fs::create_dir_all(&data_dir)?;
            std::env::current_dir()?.join(&data_dir)
        }
    };

    info!(data_dir = %abs_data_dir.display(), "Using data directory");
    info!(host = %host, port = %port, "Starting server");
    println!("📂 Using data directory: {}", abs_data_dir.display());

    let config = match &config_path {
        Some(path) => Config::load_or_default(path),
        None => Config::default(),
    };

    let upstream_client = Arc::new(UpstreamClient::new(UpstreamConfig {
        timeout: config.upstream_timeout(),
        ..UpstreamConfig::default()
    })?);
    let registry = Arc::new(RepositoryRegistry::new(
        abs_data_dir,
        upstream_client,
        config.cache_ttl(),
    ));
    registry.load_existing().await?;
    seed_repositories(&registry, &config).await;

    let server_addr = format!("{}://{}:{}", config.server.scheme, host, port);
    let state = Arc::new(AppState {
        registry,
        server_addr,
        config: Arc::new(config),
    });
    let repo_count = state.registry.list().await.len();

    let app = build_router(state);

    let listener = TcpListener::bind((host.as_str(), port)).await.map_err(|e| {
        error!(host = %host, port = %port, error = %e, "Failed to bind to address");
        anyhow::anyhow!("Failed to bind to {}:{}: {}", host, port, e)
    })?;

    println!("✅ Server is running on http://{}:{}", host, port);
    println!();
    println!("📦 Repositories: {}", repo_count);
    println!();
    println!("📋 Quick commands:");
    println!("   Status:     curl http://localhost:{}/status", port);
    println!("   Health:     curl http://localhost:{}/health", port);
    println!(
        "   Index:      curl http://localhost:{}/<repo>/simple/",
        port
    );

    info!("Server listening on {}:{}", host, port);
    axum::serve(listener, app).await.map_err(|e| {
        error!(error = %e, "Server error");
        anyhow::anyhow!("Server error: {}", e)
    })?;

    Ok(())
}
