//! labfleetd — the labfleet inventory daemon.
//!
//! Wires the repository clients, health tracker and read cache into an
//! [`InventoryService`], serves it over REST, and optionally resyncs the
//! cache on a fixed interval.
//!
//! # Usage
//!
//! ```text
//! labfleetd serve --config /etc/labfleet/labfleet.toml --port 8080 --sync-interval 300
//! labfleetd sync --config /etc/labfleet/labfleet.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use labfleet_cache::InventoryCache;
use labfleet_gitstore::{GerritClient, GitilesClient, HttpGerrit, HttpGitiles};
use labfleet_service::{HealthTracker, HttpTracker, InventoryService, ServiceConfig, StaticTracker};
use tokio::sync::watch;
use tracing::{info, warn};

const DEFAULT_FILTER: &str = "info,labfleetd=debug,labfleet=debug";

#[derive(Parser)]
#[command(name = "labfleetd", about = "Lab inventory daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the inventory RPCs over REST.
    Serve {
        /// Path to labfleet.toml.
        #[arg(long)]
        config: PathBuf,

        /// Port to listen on.
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Cache sync interval in seconds. 0 disables the background sync.
        #[arg(long, default_value = "0")]
        sync_interval: u64,
    },
    /// Sync the read cache once and exit.
    Sync {
        /// Path to labfleet.toml.
        #[arg(long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            config,
            port,
            sync_interval,
        } => {
            let service = Arc::new(build_service(&config)?);
            serve(service, port, sync_interval).await
        }
        Command::Sync { config } => {
            let service = build_service(&config)?;
            service.update_cached_inventory().await?;
            info!("cache sync complete");
            Ok(())
        }
    }
}

fn load_config(path: &Path) -> anyhow::Result<ServiceConfig> {
    let config = ServiceConfig::from_file(path)
        .with_context(|| format!("failed to load config from {}", path.display()))?;
    config.validate().context("invalid config")?;
    Ok(config)
}

fn open_cache(config: &ServiceConfig) -> anyhow::Result<InventoryCache> {
    match &config.cache.path {
        Some(path) => {
            if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)?;
            }
            let cache = InventoryCache::open(path)?;
            info!(path = ?path, "cache opened");
            Ok(cache)
        }
        None => {
            info!("no cache path configured, caching in memory");
            Ok(InventoryCache::open_in_memory()?)
        }
    }
}

fn build_service(path: &Path) -> anyhow::Result<InventoryService> {
    let config = load_config(path)?;
    let timeout = config.http_timeout();

    let gitiles: Arc<dyn GitilesClient> = Arc::new(HttpGitiles::new(&config.inventory.gitiles_host, timeout)?);
    let gerrit: Arc<dyn GerritClient> = Arc::new(HttpGerrit::new(&config.inventory.gerrit_host, timeout)?);
    let tracker: Arc<dyn HealthTracker> = if config.tracker.host.is_empty() {
        warn!("no tracker host configured, every dut reports UNKNOWN health");
        Arc::new(StaticTracker::default())
    } else {
        Arc::new(HttpTracker::new(&config.tracker.host, timeout)?)
    };
    let cache = open_cache(&config)?;

    warn!("no task scheduler backend, deploy tasks are recorded in process");
    Ok(InventoryService::new(config, gitiles, gerrit, tracker, cache)?)
}

/// Resync the cache every `interval` until shutdown. A failed sync is
/// logged and retried on the next tick.
async fn sync_loop(service: Arc<InventoryService>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = service.update_cached_inventory().await {
                    warn!(error = %e, "periodic cache sync failed");
                }
            }
            _ = shutdown.changed() => {
                info!("cache sync loop stopping");
                return;
            }
        }
    }
}

async fn serve(service: Arc<InventoryService>, port: u16, sync_interval: u64) -> anyhow::Result<()> {
    info!(env = %service.config().environment, "labfleet daemon starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sync_handle = (sync_interval > 0).then(|| {
        info!(interval = sync_interval, "background cache sync enabled");
        tokio::spawn(sync_loop(
            service.clone(),
            Duration::from_secs(sync_interval),
            shutdown_rx,
        ))
    });

    let router = labfleet_service::build_router(service);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        })
        .await?;

    if let Some(handle) = sync_handle {
        let _ = handle.await;
    }
    info!("labfleet daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn write_config(dir: &Path) -> PathBuf {
        let path = dir.join("labfleet.toml");
        let cache = dir.join("state/cache.redb");
        let text = format!(
            r#"
environment = "ENVIRONMENT_STAGING"

[inventory]
gitiles_host = "https://gitiles.example.com"
gerrit_host = "https://review.example.com"
project = "infra/config"

[queen_drones]
ENVIRONMENT_STAGING = "drone-queen-ENVIRONMENT_STAGING"

[cache]
path = "{}"
"#,
            cache.display()
        );
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn cli_parses_serve_and_sync() {
        let cli = Cli::try_parse_from(["labfleetd", "serve", "--config", "a.toml", "--sync-interval", "30"]).unwrap();
        match cli.command {
            Command::Serve {
                config,
                port,
                sync_interval,
            } => {
                assert_eq!(config, PathBuf::from("a.toml"));
                assert_eq!(port, 8080);
                assert_eq!(sync_interval, 30);
            }
            Command::Sync { .. } => panic!("expected serve"),
        }
        assert!(matches!(
            Cli::try_parse_from(["labfleetd", "sync", "--config", "a.toml"]).unwrap().command,
            Command::Sync { .. }
        ));
        assert!(Cli::try_parse_from(["labfleetd", "serve"]).is_err());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labfleet.toml");
        std::fs::write(&path, "environment = \"ENVIRONMENT_PROD\"\n[inventory]\nproject = \"x\"\n").unwrap();
        let err = build_service(&path).err().unwrap();
        assert!(format!("{err:#}").contains("queen drone"));
    }

    #[tokio::test]
    async fn built_service_serves_healthz_and_creates_the_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_config(dir.path());
        let service = Arc::new(build_service(&path).unwrap());
        assert!(dir.path().join("state/cache.redb").exists());

        let router = labfleet_service::build_router(service);
        let req = Request::builder().uri("/healthz").body(Body::empty()).unwrap();
        let resp = router.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
