//! kinlore-fn - Kinlore function gateway
//!
//! **Module Identity:**
//! - Name: kinlore-fn
//! - Port: 5740 (default)
//!
//! Serves the stateless functions behind the family-memoir clients:
//! transcription, narrative rewriting, image pass-through and invitation
//! email, plus the role/permission and settings endpoints.

use anyhow::{Context, Result};
use clap::Parser;
use kinlore_common::config::{
    load_toml_config, CompiledDefaults, LoggingConfig, RootFolderInitializer, RootFolderResolver,
    TomlConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use kinlore_fn::config::{resolve_secret, ApiSecret, GatewayConfig};
use kinlore_fn::{build_router, AppState};

/// Command-line arguments for kinlore-fn
#[derive(Parser, Debug)]
#[command(name = "kinlore-fn")]
#[command(about = "Kinlore function gateway")]
#[command(version)]
struct Args {
    /// Root folder holding kinlore.db
    #[arg(short, long, env = "KINLORE_ROOT")]
    root_folder: Option<PathBuf>,

    /// Address to bind (default 127.0.0.1)
    #[arg(short, long, env = "KINLORE_BIND")]
    bind: Option<String>,

    /// Port to listen on (default 5740)
    #[arg(short, long, env = "KINLORE_PORT")]
    port: Option<u16>,

    /// TOML config file (default ~/.config/kinlore/kinlore.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Initialize tracing: `RUST_LOG` wins over the TOML `[logging]` level
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    match &logging.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // TOML is read before tracing so its [logging] section applies; problems
    // are reported once the subscriber is up
    let resolver = RootFolderResolver::new("kinlore")
        .with_cli_arg(args.root_folder.clone())
        .with_config_path(args.config.clone());
    let config_path = resolver.config_file_path();
    let toml_result = load_toml_config(&config_path);
    let toml_config = match &toml_result {
        Ok(Some(config)) => config.clone(),
        _ => TomlConfig::default(),
    };

    init_tracing(&toml_config.logging)?;

    // Log build identification immediately after tracing init
    info!(
        "Starting Kinlore function gateway (kinlore-fn) v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match toml_result {
        Ok(Some(_)) => info!("Config file: {}", config_path.display()),
        Ok(None) => info!("Config file not found: {} (using defaults)", config_path.display()),
        Err(e) => warn!("{} (using defaults)", e),
    }

    // Step 1: Resolve root folder
    let root_folder = resolver.resolve();

    // Step 2: Create root folder directory if missing
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .context("Failed to initialize root folder")?;

    // Step 3: Open or create database
    let db_path = initializer.database_path();
    info!("Database: {}", db_path.display());
    let db_pool = kinlore_fn::db::init_database_pool(&db_path)
        .await
        .context("Failed to open database")?;

    // Step 4: Effective configuration and API keys (Database → ENV → TOML)
    let mut config = GatewayConfig::from_toml(&toml_config, Some(config_path));
    for secret in ApiSecret::ALL {
        let value = resolve_secret(&db_pool, &toml_config, secret).await?;
        config.set_secret(secret, value);
    }

    if config.api_token.is_some() {
        info!("API authentication enabled (bearer token)");
    } else {
        warn!("API authentication disabled: no api_token configured");
    }

    let defaults = CompiledDefaults::for_current_platform();
    let bind = args
        .bind
        .or(toml_config.bind_address.clone())
        .unwrap_or(defaults.bind_address);
    let port = args.port.or(toml_config.port).unwrap_or(defaults.port);
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind, port))?;

    // Step 5: Application state and router
    let state = AppState::new(db_pool, config).context("Failed to build upstream clients")?;
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
