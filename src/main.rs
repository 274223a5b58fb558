use anyhow::{Context, Result};
use lazy_uploader::{
    config::{AppConfig, Mode},
    routes::routes::app,
    services::{
        account_service::AccountService,
        metadata_store::{MIGRATOR, MetadataStore, SqliteMetadataStore},
        object_store_client::{ObjectStoreClient, RemoteObjectStore},
        rate_limiter::RateLimiter,
        reconciler::OrphanReconciler,
    },
    state::AppState,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{io::ErrorKind, net::SocketAddr, path::Path, str::FromStr, sync::Arc, time::Duration};
use tokio::{net::TcpListener, time};
use tracing_subscriber::EnvFilter;

/// How often stale rate-limit windows are dropped.
const RATE_LIMIT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    // --- Parse config + run mode ---
    let (cfg, mode) = AppConfig::from_env_and_args()?;
    tracing::info!(addr = %cfg.addr(), database = %cfg.database_url, bucket = %cfg.s3.bucket, "starting lazy-uploader");

    // --- Initialize SQLite connection ---
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {:?}", parent))?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect_options = SqliteConnectOptions::from_str(&cfg.database_url)
        .with_context(|| format!("parsing database URL `{}`", cfg.database_url))?
        .create_if_missing(true)
        .busy_timeout(cfg.store_timeout);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .acquire_timeout(cfg.store_timeout)
        .connect_with(connect_options)
        .await?;

    MIGRATOR.run(&pool).await.context("running migrations")?;
    if mode == Mode::Migrate {
        tracing::info!("Database migration complete.");
        pool.close().await;
        return Ok(()); // exit after migration
    }

    let pool = Arc::new(pool);
    let metadata: Arc<dyn MetadataStore> = Arc::new(SqliteMetadataStore::new(pool.clone()));

    if let Mode::CreateAccount {
        display_name,
        domain,
    } = &mode
    {
        let user = AccountService::new(metadata.clone())
            .create_account(display_name, domain, "127.0.0.1")
            .await?;
        println!("{}", user.api_key);
        pool.close().await;
        return Ok(());
    }

    // --- Object store ---
    let objects: Arc<dyn ObjectStoreClient> =
        Arc::new(RemoteObjectStore::s3(&cfg.s3, cfg.store_timeout)?);

    // --- Background tasks ---
    let rate_limiter = RateLimiter::new(cfg.rate_limit_max, cfg.rate_limit_window);
    {
        let limiter = rate_limiter.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval(RATE_LIMIT_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                let dropped = limiter.sweep();
                if dropped > 0 {
                    tracing::debug!(dropped, tracked = limiter.tracked(), "rate limit windows swept");
                }
            }
        });
    }

    if !cfg.reconcile_interval.is_zero() {
        let reconciler = Arc::new(OrphanReconciler::new(
            metadata.clone(),
            objects.clone(),
            cfg.reconcile_grace,
        ));
        tokio::spawn(reconciler.run(cfg.reconcile_interval));
    }

    // --- Build router ---
    let state = AppState::new(
        metadata,
        objects,
        cfg.verify_policy(),
        rate_limiter,
        cfg.public_base_url.clone(),
    );
    let app = app(state, cfg.max_upload_bytes);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    pool.close().await;
    tracing::info!("Shutdown complete.");
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "SIGTERM handler unavailable, waiting for Ctrl-C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("Shutdown signal received. Stopping server...");
}
