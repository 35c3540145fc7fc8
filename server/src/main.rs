// Copyright (c) 2026 Wardrobe Contributors. MIT License.
// See LICENSE for details.

//! # Wardrobe Marketplace Server
//!
//! Entry point for the `wardrobe-server` binary. Parses CLI arguments,
//! initializes logging and metrics, and serves the HTTP/WS API.
//!
//! The binary supports four subcommands:
//!
//! - `run`    : start the API server
//! - `init`   : initialize the data directory and generate the session key
//! - `token`  : issue a session token for a user id
//! - `version`: print build version information

mod api;
mod cli;
mod logging;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use wardrobe_core::artifact::FsArtifactStore;
use wardrobe_core::config::{
    ARTIFACT_DIR_NAME, DB_DIR_NAME, EVENT_CHANNEL_CAPACITY, OUTBOX_DRAIN_INTERVAL,
    SESSION_KEY_FILE, STORAGE_FORMAT_VERSION,
};
use wardrobe_core::identity::{SessionKey, SessionVerifier};
use wardrobe_core::notify::{LogNotifier, Notifier, OutboxNotifier};
use wardrobe_core::storage::MarketDB;
use wardrobe_engine::{RatingGate, TransactionEngine};

use cli::{Commands, NotifierKind, WardrobeCli};
use logging::LogFormat;
use metrics::MarketMetrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = WardrobeCli::parse();

    match cli.command {
        Commands::Run(args) => run_server(args).await,
        Commands::Init(args) => init_data_dir(args),
        Commands::Token(args) => issue_token(args),
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Starts the API server and the metrics endpoint.
async fn run_server(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "wardrobe_server=info,wardrobe_engine=info,wardrobe_core=info,tower_http=debug",
        args.log_format,
    );

    tracing::info!(
        http_port = args.http_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        notifier = ?args.notifier,
        "starting wardrobe-server"
    );

    // --- Persistent storage ---
    let db_path = args.data_dir.join(DB_DIR_NAME);
    std::fs::create_dir_all(&db_path)
        .with_context(|| format!("failed to create database directory: {}", db_path.display()))?;

    let db = Arc::new(
        MarketDB::open(&db_path)
            .with_context(|| format!("failed to open database at {}", db_path.display()))?,
    );
    tracing::info!(path = %db_path.display(), "database opened");

    // --- Collaborators ---
    let key = load_session_key(&args.data_dir, args.session_key.as_deref())?;
    let verifier = Arc::new(SessionVerifier::new(key));

    let uploads_path = args.data_dir.join(ARTIFACT_DIR_NAME);
    let artifacts = Arc::new(FsArtifactStore::open(&uploads_path).with_context(|| {
        format!("failed to open upload directory {}", uploads_path.display())
    })?);

    let outbox = match args.notifier {
        NotifierKind::Log => None,
        NotifierKind::Outbox => Some(Arc::new(OutboxNotifier::new(Arc::clone(&db)))),
    };
    let notifier: Arc<dyn Notifier> = match &outbox {
        Some(outbox) => outbox.clone(),
        None => Arc::new(LogNotifier),
    };

    let engine = Arc::new(TransactionEngine::new(
        Arc::clone(&db),
        notifier,
        db.clone(),
    ));
    let ratings = Arc::new(RatingGate::new(Arc::clone(&db)));

    // --- Metrics ---
    let market_metrics = Arc::new(MarketMetrics::new());

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    // --- Application state ---
    let app_state = api::AppState {
        engine,
        ratings,
        db: Arc::clone(&db),
        verifier,
        artifacts,
        event_tx,
        metrics: Arc::clone(&market_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.http_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind HTTP listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&market_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Mailer ---
    let mailer = outbox
        .clone()
        .map(|outbox| spawn_mailer(outbox, OUTBOX_DRAIN_INTERVAL));

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    if let Some(mailer) = mailer {
        mailer.abort();
    }
    if let Some(outbox) = &outbox {
        // Final pass over mail queued by in-flight requests.
        if let Err(e) = outbox.drain(&LogNotifier) {
            tracing::warn!(error = %e, "failed to drain mail outbox");
        }
    }

    db.flush().context("failed to flush database")?;
    tracing::info!("wardrobe-server stopped");
    Ok(())
}

/// Drains the mail outbox every `every`, handing mail to the log deliverer.
fn spawn_mailer(outbox: Arc<OutboxNotifier>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        loop {
            interval.tick().await;
            if let Err(e) = outbox.drain(&LogNotifier) {
                tracing::warn!(error = %e, "failed to drain mail outbox");
            }
        }
    })
}

/// Initializes a data directory: database, upload directory and a fresh
/// session signing key.
fn init_data_dir(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("wardrobe_server=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing data directory");

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;

    let db_path = data_dir.join(DB_DIR_NAME);
    let db = MarketDB::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    db.flush().context("failed to flush database")?;

    let uploads_path = data_dir.join(ARTIFACT_DIR_NAME);
    std::fs::create_dir_all(&uploads_path).with_context(|| {
        format!("failed to create upload directory: {}", uploads_path.display())
    })?;

    let key_path = data_dir.join(SESSION_KEY_FILE);
    if key_path.exists() && !args.force {
        anyhow::bail!(
            "session key already exists at {} (pass --force to replace it)",
            key_path.display()
        );
    }

    let key = SessionKey::generate();
    std::fs::write(&key_path, key.to_hex())
        .with_context(|| format!("failed to write session key to {}", key_path.display()))?;

    // Restrict permissions on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600))?;
    }

    tracing::info!(key_path = %key_path.display(), "session key generated");

    println!("Data directory initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Database       : {}", db_path.display());
    println!("  Uploads        : {}", uploads_path.display());
    println!("  Session key    : {}", key_path.display());

    Ok(())
}

/// Prints a session token for the requested user to stdout.
fn issue_token(args: cli::TokenArgs) -> Result<()> {
    let key = load_session_key(&args.data_dir, args.session_key.as_deref())?;
    let ttl = Duration::from_secs(args.ttl_hours.saturating_mul(3600));
    let token = SessionVerifier::new(key).issue(args.user_id, ttl);
    println!("{token}");
    Ok(())
}

/// Resolves the session key from an explicit hex value or the key file.
fn load_session_key(data_dir: &Path, explicit: Option<&str>) -> Result<SessionKey> {
    if let Some(hex_key) = explicit {
        return SessionKey::from_hex(hex_key).context("invalid session key");
    }
    let key_path = data_dir.join(SESSION_KEY_FILE);
    let encoded = std::fs::read_to_string(&key_path).with_context(|| {
        format!(
            "failed to read session key from {} (run `wardrobe-server init` first)",
            key_path.display()
        )
    })?;
    SessionKey::from_hex(&encoded)
        .with_context(|| format!("invalid session key in {}", key_path.display()))
}

/// Prints version information to stdout.
fn print_version() {
    println!("wardrobe-server {}", env!("CARGO_PKG_VERSION"));
    println!("storage format  v{}", STORAGE_FORMAT_VERSION);
    println!("rustc           {}", rustc_version());
}

/// Returns the Rust compiler version used to build this binary.
fn rustc_version() -> &'static str {
    option_env!("RUSTC_VERSION").unwrap_or("unknown")
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
