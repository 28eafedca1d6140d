//! crmgate API server binary.
//!
//! Reads configuration from the environment (and `.env`), selects the auth
//! backend, warms up the service token and serves the HTTP API until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use crmgate_api::config::ApiConfig;
use crmgate_core::auth::factory::{AuthBackendDeps, AuthRepositoryRegistry};
use crmgate_core::authz::{AbilityFactory, MissingRolePolicy};
use crmgate_core::store::memory::{MemoryTokenStore, MemoryUserStore};
use crmgate_core::store::postgres::{PgTokenStore, PgUserStore};
use crmgate_core::store::{TokenStore, UserStore};
use crmgate_core::token::{IdentityToolkitAuthenticator, TokenManager};
use crmgate_core::upstream::ServiceApiClient;
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};

/// CLI arguments for the API server.
#[derive(Parser, Debug)]
#[command(name = "crmgate_server", about = "crmgate API server")]
struct Args {
    /// Address to listen on; overrides `BIND_ADDR`.
    #[arg(long)]
    bind: Option<String>,

    /// Maximum number of database connections in the pool.
    #[arg(long, default_value_t = 5)]
    max_connections: u32,

    /// Skip embedded migrations at startup.
    #[arg(long, default_value_t = false)]
    skip_migrations: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,crmgate_api=debug,crmgate_core=debug")
            }),
        )
        .init();

    let args = Args::parse();
    let mut config = ApiConfig::from_env();
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }
    let core = &config.core;

    info!(provider = %core.auth_provider, bind = %config.bind_addr, "starting crmgate_server");

    let pool = match &core.database_url {
        Some(url) => {
            info!(max_connections = args.max_connections, "connecting to PostgreSQL");
            let pool = PgPoolOptions::new()
                .max_connections(args.max_connections)
                .acquire_timeout(Duration::from_secs(30))
                .connect(url)
                .await?;
            if !args.skip_migrations {
                info!("running database migrations");
                crmgate_api::migrate(&pool).await?;
            }
            Some(pool)
        }
        None => {
            warn!("DATABASE_URL not set; users and the service token are kept in memory only");
            None
        }
    };

    let (users, token_store): (Arc<dyn UserStore>, Arc<dyn TokenStore>) = match &pool {
        Some(pool) => (
            Arc::new(PgUserStore::new(pool.clone())),
            Arc::new(PgTokenStore::new(pool.clone())),
        ),
        None => (
            Arc::new(MemoryUserStore::new()),
            Arc::new(MemoryTokenStore::new()),
        ),
    };

    let http = reqwest::Client::new();

    // Fails here, not on the first request, when the backend is misconfigured.
    let deps = AuthBackendDeps::new(core, http.clone()).with_user_store(users);
    let auth = AuthRepositoryRegistry::with_builtin_backends().build(core.auth_provider, &deps)?;

    if core.missing_role_policy == MissingRolePolicy::Admin {
        warn!("AUTH_MISSING_ROLE_POLICY=admin: users without a role are granted full access");
    }

    let authenticator = IdentityToolkitAuthenticator::new(
        http.clone(),
        core.service_identity.web_api_key.clone(),
        core.service_api.timeout,
    );
    let tokens = Arc::new(TokenManager::new(
        core.service_identity.credentials(),
        Arc::new(authenticator),
        token_store,
    ));
    tokio::spawn({
        let tokens = tokens.clone();
        async move { tokens.warm_up().await }
    });

    let service_api = ServiceApiClient::new(core.service_api.api_client(http), tokens);

    let state = crmgate_api::AppState {
        auth,
        abilities: AbilityFactory::new(core.missing_role_policy),
        service_api,
        pool,
    };
    let app = crmgate_api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!(addr = %listener.local_addr()?, "REST API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
