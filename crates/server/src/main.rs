//! Haggle server entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Router, middleware, routing::get};
use haggle_api::{AppState, router as api_router, streaming_handler};
use haggle_common::Config;
use haggle_common::config::RedisConfig;
use haggle_core::{
    ChatEngine, HttpTransactionTrigger, LoggingNotificationSink, NoOpTransactionTrigger,
    NotificationSinkService, TransactionTriggerService,
};
use haggle_queue::RedisNotificationSink;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

/// Redis when configured and reachable, log lines otherwise.
async fn notification_sink(redis: Option<&RedisConfig>) -> NotificationSinkService {
    let Some(redis) = redis else {
        info!("Redis not configured, offline notifications will only be logged");
        return Arc::new(LoggingNotificationSink);
    };

    match RedisNotificationSink::new(&redis.url, &redis.prefix).await {
        Ok(sink) => {
            info!("Connected to Redis for offline notifications");
            Arc::new(sink)
        }
        Err(e) => {
            warn!(error = %e, "Redis unavailable, offline notifications will only be logged");
            Arc::new(LoggingNotificationSink)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "haggle=debug,tower_http=debug".into()),
        )
        .init();

    info!("Starting haggle server...");

    // Load configuration
    let config = Config::load()?;

    // Connect to database
    let db = haggle_db::init(&config).await?;
    info!("Connected to database");

    // Run migrations
    info!("Running database migrations...");
    haggle_db::migrate(&db).await?;
    info!("Migrations completed");

    let notifier = notification_sink(config.redis.as_ref()).await;

    let transaction_trigger: TransactionTriggerService = match config.transactions.url.as_deref()
    {
        Some(url) => {
            info!(url, "Accepted offers will open transactions");
            Arc::new(HttpTransactionTrigger::new(url)?)
        }
        None => Arc::new(NoOpTransactionTrigger),
    };

    let engine = ChatEngine::new(Arc::new(db), notifier, &config.chat);
    let state = AppState::new(engine, transaction_trigger, config.chat.clone());

    // Build router
    let app = Router::new()
        .route("/streaming", get(streaming_handler))
        .nest("/api", api_router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            haggle_api::middleware::auth_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
