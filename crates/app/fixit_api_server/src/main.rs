//! Fixit auth and session API server binary.
//!
//! Connects to PostgreSQL, applies migrations and serves the HTTP API until
//! interrupted.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use fixit_api::AppState;
use fixit_api::config::ApiConfig;
use fixit_core::auth::session::SessionManager;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "fixit_api_server", about = "Fixit auth and session API server")]
struct Args {
    /// Address to listen on; overrides `BIND_ADDR`.
    #[arg(long)]
    bind_addr: Option<String>,

    /// PostgreSQL connection URL; overrides `DATABASE_URL`.
    #[arg(long)]
    database_url: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 10)]
    max_connections: u32,

    /// Seconds between purges of expired access-token revocations (0 = never).
    #[arg(long, env = "REVOCATION_PURGE_INTERVAL_SECS", default_value_t = 600)]
    purge_interval_secs: u64,
}

/// Periodically drop revoked-jti entries whose tokens have expired anyway.
async fn purge_revocations(sessions: SessionManager, every: Duration, ct: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    loop {
        tokio::select! {
            _ = ct.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = sessions.purge_expired_revocations().await {
                    warn!(error = %e, "revocation purge failed");
                }
            }
        }
    }
}

async fn shutdown_signal(ct: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
    }
    info!("shutdown requested");
    ct.cancel();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,fixit_api=debug,fixit_core=debug".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = ApiConfig::from_env()?;
    if let Some(addr) = args.bind_addr {
        config.bind_addr = addr;
    }
    if let Some(url) = args.database_url {
        config.pg_connection_url = url;
    }

    info!(
        bind_addr = %config.bind_addr,
        max_connections = args.max_connections,
        max_sessions = config.auth.max_sessions_per_user,
        "starting fixit_api_server"
    );

    let pool = fixit_core::db::connect(&config.pg_connection_url, args.max_connections).await?;

    info!("running database migrations");
    fixit_api::migrate(&pool).await?;

    let state = AppState::with_postgres(pool, config.clone());
    let ct = CancellationToken::new();

    let purge_handle = (args.purge_interval_secs > 0).then(|| {
        tokio::spawn(purge_revocations(
            state.sessions.clone(),
            Duration::from_secs(args.purge_interval_secs),
            ct.clone(),
        ))
    });

    let app = fixit_api::router(state);
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(ct.clone()))
    .await;

    ct.cancel();
    if let Some(handle) = purge_handle {
        let _ = handle.await;
    }

    served?;
    Ok(())
}
