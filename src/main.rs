use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{HeaderValue, Method, header};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use mcp_chat_backend::config::Config;
use mcp_chat_backend::mcp::pool::ConnectionPool;
use mcp_chat_backend::state::{self, AppState};
use mcp_chat_backend::store::{MemoryTurnStore, PgTurnStore, TurnStore};
use mcp_chat_backend::watchdog;

async fn build_store(config: &Config) -> anyhow::Result<Arc<dyn TurnStore>> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set, chat turns are kept in memory only");
        return Ok(Arc::new(MemoryTurnStore::new()));
    };

    let db = PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(3))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(database_url)
        .await
        .context("Failed to connect to Postgres")?;

    sqlx::migrate!("./migrations")
        .run(&db)
        .await
        .context("Failed to run database migrations")?;

    Ok(Arc::new(PgTurnStore::new(db)))
}

fn build_app(config: &Config, state: AppState) -> anyhow::Result<axum::Router> {
    // CORS: explicit allowlist
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(86_400));

    // Rate limiting: 30 req burst, replenish 1 per 2 seconds, per IP
    let governor_conf = GovernorConfigBuilder::default()
        .per_second(2)
        .burst_size(30)
        .finish()
        .context("invalid rate limiter configuration")?;

    let app = mcp_chat_backend::create_router(state)
        .layer(GovernorLayer::new(governor_conf))
        .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024))
        .layer(cors)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
                tracing::info_span!(
                    "http_request",
                    method = %request.method(),
                    uri = %request.uri(),
                )
            }),
        );

    Ok(app)
}

/// Connect every enabled server from `MCP_SERVERS_FILE`. Failures are logged;
/// the service runs without that server.
async fn connect_configured_servers(config: &Config, pool: Arc<ConnectionPool>) {
    let servers = match config.load_servers() {
        Ok(servers) => servers,
        Err(e) => {
            tracing::error!("startup: {}", e);
            return;
        }
    };
    if servers.is_empty() {
        return;
    }

    tracing::info!("startup: connecting {} configured MCP server(s)", servers.len());
    let attempts = servers.into_iter().filter(|s| s.enabled).map(|descriptor| {
        let pool = pool.clone();
        async move {
            let id = descriptor.id.clone();
            if let Err(e) = pool.connect(descriptor).await {
                tracing::error!(server_id = %id, "startup: MCP connect failed: {}", e);
            }
        }
    });
    futures_util::future::join_all(attempts).await;
    tracing::info!("startup: {} MCP server(s) connected", pool.len().await);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::EnvFilter;

    dotenvy::dotenv().ok();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        tracing_subscriber::fmt().with_env_filter(env_filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let config = Config::from_env().context("invalid configuration")?;
    let client = state::build_http_client().context("Failed to build HTTP client")?;
    let store = build_store(&config).await?;
    let state = AppState::new(&config, client, store);
    let pool = state.pool.clone();

    // ── Non-blocking startup: MCP connections in background ──
    {
        let config = config.clone();
        let pool = pool.clone();
        tokio::spawn(async move { connect_configured_servers(&config, pool).await });
    }

    // ── Spawn background watchdog ──
    let shutdown = CancellationToken::new();
    let watchdog = watchdog::spawn(pool.clone(), config.watchdog_interval, shutdown.clone());

    let app = build_app(&config, state)?;
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("MCP chat backend listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // ── Drain the pool so no subprocess or session outlives the server ──
    shutdown.cancel();
    let _ = watchdog.await;
    pool.shutdown().await;
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
