//! RetinoNet daemon
//!
//! Serves screening predictions and starts loading the model in the
//! background before accepting traffic.

use anyhow::Context;
use clap::Parser;
use retinonet_api::create_router;
use retinonet_core::{LogFormat, LoggingConfig, ServiceConfig};
use retinonet_manager::ModelManager;
use retinonet_runtime::WeightsFileLoader;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Time allowed for in-flight work, including a stuck loader, at exit
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// retinonetd - retinal-scan screening service
#[derive(Parser, Debug)]
#[command(name = "retinonetd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(long, env = "RETINONET_CONFIG")]
    config: Option<PathBuf>,

    /// Path to the model weights file
    #[arg(long, env = "MODEL_PATH")]
    model_path: Option<PathBuf>,

    /// Directory for the model snapshot cache
    #[arg(long, env = "MODEL_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Address to bind the API server
    #[arg(long)]
    address: Option<String>,

    /// Port for the REST API server
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

impl Args {
    /// Load the configuration file, then apply flag overrides
    fn into_config(self) -> anyhow::Result<ServiceConfig> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => ServiceConfig::default(),
        };

        if let Some(model_path) = self.model_path {
            config.model.model_path = model_path;
        }
        if let Some(cache_dir) = self.cache_dir {
            config.model.cache_dir = cache_dir;
        }
        if let Some(address) = self.address {
            config.api.address = address;
        }
        if let Some(port) = self.port {
            config.api.port = port;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        Ok(config)
    }
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match logging.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("Failed to set subscriber: {}", e);
    }
}

fn main() -> anyhow::Result<()> {
    let config = Args::parse().into_config()?;
    init_logging(&config.logging);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let result = runtime.block_on(serve(config));

    // A loader call on the blocking pool cannot be cancelled; don't wait on it forever
    runtime.shutdown_timeout(SHUTDOWN_TIMEOUT);
    result
}

async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    info!("Starting RetinoNet daemon v{}", env!("CARGO_PKG_VERSION"));

    let manager = ModelManager::new(&config.model, Arc::new(WeightsFileLoader::new()))
        .await
        .context("initializing model manager")?;

    if config.model.background_load {
        manager.start_background_load();
    } else {
        info!("Background loading disabled, model loads on first request");
    }

    let router = create_router(manager.clone(), &config.api);

    let addr: SocketAddr = format!("{}:{}", config.api.address, config.api.port)
        .parse()
        .context("invalid listen address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    info!("API server listening on {}", addr);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Shutting down");
    manager.shutdown().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
