//! Beacon Auth API server
//!
//! Startup order:
//! 1. Load `.env` and configuration (missing or weak secrets abort here)
//! 2. Connect to Postgres and run migrations
//! 3. Build OAuth providers from the configured credentials
//! 4. Spawn background sweeps
//! 5. Serve until SIGINT/SIGTERM

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use beacon_auth_api::{
    auth::CredentialHasher,
    config::Config,
    maintenance::MaintenanceTasks,
    oauth::{http_client, ProviderRegistry},
    routes::create_router,
    state::AppState,
    store::PgUserStore,
};
use beacon_auth_shared::{create_pool, run_migrations, ProviderKind};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,beacon_auth_api=debug,tower_http=info,sqlx=warn".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().with_target(false).json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
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
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal in production
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration, refusing to start");
            std::process::exit(1);
        }
    };
    tracing::debug!(?config, "Configuration loaded");

    let pool = create_pool(&config.database_url, config.database_max_connections)
        .await
        .context("Failed to connect to database")?;
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database ready");

    let http = http_client().context("Failed to build HTTP client")?;
    let providers =
        ProviderRegistry::from_config(&config, http).context("Invalid OAuth provider URL")?;
    let enabled = providers.enabled();
    for kind in ProviderKind::ALL {
        if enabled.contains(&kind) {
            tracing::info!(provider = %kind, "OAuth provider enabled");
        } else {
            tracing::warn!(provider = %kind, "OAuth provider not configured");
        }
    }

    let hasher = CredentialHasher::new(Default::default()).context("Invalid Argon2 parameters")?;
    let bind_address = config.bind_address.clone();

    let state = AppState::new(config, Arc::new(PgUserStore::new(pool)), providers, hasher);
    let maintenance = MaintenanceTasks::spawn(&state);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", bind_address))?;
    tracing::info!("Listening on {}", bind_address);

    // with_connect_info feeds the peer address to the rate limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Server error")?;

    maintenance.abort();
    tracing::info!("Server stopped");
    Ok(())
}
