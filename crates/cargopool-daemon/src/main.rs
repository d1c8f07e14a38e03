//! cargopool-daemon entry point.
//!
//! Loads configuration, opens the database, wires the intake pipeline, and
//! serves HTTP until SIGINT/SIGTERM. The daemon runs in the foreground and
//! expects a process supervisor; it does not fork.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use cargopool_core::intake::{IntakeLimits, IntakePipeline};
use cargopool_core::ratelimit::RateLimiterConfig;
use cargopool_daemon::config::DaemonConfig;
use cargopool_daemon::http::{router, AppState};
use cargopool_daemon::notify::EmailNotifier;
use cargopool_daemon::store::SqliteStore;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// cargopool intake daemon.
#[derive(Parser, Debug)]
#[command(name = "cargopool-daemon")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "cargopool.toml")]
    config: PathBuf,

    /// Log filter (tracing `EnvFilter` syntax).
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = if args.config.exists() {
        DaemonConfig::from_file(&args.config)
            .with_context(|| format!("loading {}", args.config.display()))?
    } else {
        info!(path = %args.config.display(), "no config file, using defaults");
        DaemonConfig::default()
    };

    let store = Arc::new(
        SqliteStore::open(&config.database.path)
            .with_context(|| format!("opening {}", config.database.path.display()))?,
    );

    let notifier = match &config.email {
        Some(email) => {
            if email.api_key.is_none() {
                warn!("email section present but no api key: running in stub mode");
            }
            EmailNotifier::new(email.clone())
        },
        None => {
            info!("no email configured: notifications run in stub mode");
            EmailNotifier::new(Default::default())
        },
    };

    let limits = IntakeLimits {
        submit: RateLimiterConfig::per_minute(config.limits.pledges_per_minute),
        preview: RateLimiterConfig::per_minute(config.limits.quotes_per_minute),
    };
    let mut pipeline = IntakePipeline::new(
        store.clone(),
        store.clone(),
        Arc::new(notifier),
        store.clone(),
        limits,
    );
    if let Some(surcharge) = &config.surcharge {
        let rule = surcharge.to_rule().context("resolving surcharge rule")?;
        info!(threshold_lb = rule.threshold_lb, "heavy-item surcharge enabled");
        pipeline = pipeline.with_surcharge(rule);
    }

    if config.admin.token.is_none() {
        info!("no admin token configured: administrative routes disabled");
    }

    let state = AppState {
        pipeline: Arc::new(pipeline),
        store,
        admin_token: config.admin.token.clone(),
    };

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    info!(addr = %config.server.bind, "cargopool-daemon listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("http server failed")?;

    // Give spawned notification sends a moment to drain.
    tokio::time::sleep(Duration::from_millis(100)).await;
    info!("shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            },
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }
}
