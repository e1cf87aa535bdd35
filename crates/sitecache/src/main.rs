//! sitecache - Offline asset cache for a static marketing site

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod config;

use config::Config;
use sitecache_api::{AppState, create_router};
use sitecache_core::{ChatService, LifecycleManager};
use sitecache_proxy::{ChatClient, ChatClientConfig, OriginClient, OriginClientConfig};
use sitecache_storage::{CacheStore, LocalStorage, ObjectStorage, S3Config};

/// sitecache - Offline asset cache for a static marketing site
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// Bind address
    #[arg(long, env = "SITECACHE_BIND")]
    bind: Option<String>,

    /// Port
    #[arg(short, long, env = "SITECACHE_PORT")]
    port: Option<u16>,

    /// Cache version of this deployment, overrides [worker] cache_version
    #[arg(long, env = "SITECACHE_CACHE_VERSION")]
    cache_version: Option<String>,

    /// Bearer token for the install and activate endpoints, overrides [server] admin_token
    #[arg(long, env = "SITECACHE_ADMIN_TOKEN", hide_env_values = true)]
    admin_token: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load configuration
    let mut config = Config::load(&args.config)?;
    if let Some(version) = args.cache_version {
        config.worker.cache_version = version;
    }
    if let Some(token) = args.admin_token {
        config.server.admin_token = Some(token);
    }

    // Initialize logging
    init_logging(&config.logging.level, &config.logging.format);

    info!("Starting sitecache v{}", env!("CARGO_PKG_VERSION"));

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")?;

    let worker_config = config.worker_config()?;

    // Initialize storage backend
    let store = build_store(&config).await?;

    // Initialize origin client
    let origin = Arc::new(OriginClient::new(OriginClientConfig {
        url: worker_config.origin.clone(),
        skip_tls_verify: config.origin.skip_tls_verify,
        follow_redirects: config.origin.follow_redirects,
    })?);

    let lifecycle = Arc::new(LifecycleManager::new(store, origin));

    // Install and activate the configured generation
    match lifecycle.deploy(worker_config.clone()).await {
        Ok(report) => info!(
            "Cache generation {} active ({} stale generations removed)",
            report.version,
            report.deleted.len()
        ),
        Err(e) => error!(
            "Initial install failed, serving without cache until POST /_sitecache/install succeeds: {}",
            e
        ),
    }

    let chat = build_chat(&config)?;

    // Create application state
    let mut state = AppState::new(lifecycle, Arc::new(worker_config), chat);
    match config.server.admin_token.clone().filter(|t| !t.is_empty()) {
        Some(token) => state = state.with_admin_token(token),
        None => warn!("No admin token configured, install and activate endpoints will refuse all requests"),
    }

    // Create router
    let app = create_router(state, Some(Arc::new(metrics_handle))).layer(TraceLayer::new_for_http());

    // Determine bind address
    let bind_addr = args.bind.unwrap_or(config.server.bind_address);
    let port = args.port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", bind_addr, port)
        .parse()
        .with_context(|| format!("Invalid bind address {}:{}", bind_addr, port))?;

    info!("Listening on {}", addr);
    info!("Origin: {}", config.origin.url);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Open the configured cache store
async fn build_store(config: &Config) -> Result<Arc<dyn CacheStore>> {
    let store: Arc<dyn CacheStore> = match config.storage.backend.as_str() {
        "local" => {
            let path = &config.storage.local.path;
            tokio::fs::create_dir_all(path)
                .await
                .with_context(|| format!("Failed to create storage directory {}", path))?;
            Arc::new(LocalStorage::new(path).await?)
        }
        "memory" => {
            warn!("Using in-memory storage, cached generations are lost on restart");
            Arc::new(ObjectStorage::in_memory())
        }
        "s3" => {
            let s3 = &config.storage.s3;
            let defaults = S3Config::default();
            Arc::new(ObjectStorage::s3(S3Config {
                bucket: s3.bucket.clone().unwrap_or(defaults.bucket),
                region: s3.region.clone().unwrap_or(defaults.region),
                endpoint: s3.endpoint.clone(),
                access_key_id: s3.access_key.clone(),
                secret_access_key: s3.secret_key.clone(),
                prefix: s3.prefix.clone(),
                allow_http: s3.allow_http,
            })?)
        }
        other => anyhow::bail!("Unknown storage backend: {}", other),
    };

    info!("Storage backend: {}", store.kind());
    Ok(store)
}

/// Build the chat function, if enabled and keyed
fn build_chat(config: &Config) -> Result<Option<Arc<ChatService>>> {
    if !config.chat.enabled {
        info!("Chat function disabled");
        return Ok(None);
    }

    let Some(api_key) = config.chat_api_key() else {
        warn!("Chat function enabled but no API key configured, /api/chat will return 503");
        return Ok(None);
    };

    let client = ChatClient::new(ChatClientConfig {
        api_url: config.chat.api_url.clone(),
        api_key,
        api_version: config.chat.anthropic_version.clone(),
        model: config.chat.model.clone(),
        max_tokens: config.chat.max_tokens,
    })?;

    let service = ChatService::new(Arc::new(client), config.chat.system_prompt.clone())
        .with_max_history(config.chat.max_history);
    Ok(Some(Arc::new(service)))
}

/// Initialize logging
fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
