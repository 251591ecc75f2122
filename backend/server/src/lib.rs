//! Backend for a Telegram click game.
//!
//! The client reports clicks as they happen, the server keeps a running counter per user and a
//! background job periodically folds new clicks into a durable total.
//!
//!
//!
//! # Endpoints
//!
//! - `GET /api/user?telegramId=<id>`: full user record, `404 {"message":"User not found"}` if unknown
//! - `POST /api/clicks` with `{"telegramId","name","clicks"}`: adds `clicks` to the running counter,
//!   creating the user on first submission, returns the updated record
//!
//! Store failures come back as `500 {"message":<error>}`.
//!
//!
//!
//! # Environment
//!
//! - `REDIS_URL` (required, also read from `/run/secrets/REDIS_URL`)
//! - `PORT` (default `3000`)
//! - `SYNC_INTERVAL_SECS` (default `10`)
//! - `REDIS_KEY_PREFIX` (default `clicker`)
//! - `RUST_LOG` (default `info`)
//!
//!
//!
//! # Notes
//!
//! Single instance only. Two servers pointed at the same Redis would both run the sync job and
//! race on the watermark.
//!
//!
//!
//! # Setup
//!
//! Run against a local Redis.
//! ```sh
//! docker run -p 6379:6379 redis
//! REDIS_URL=redis://localhost:6379 cargo run --bin clicker
//! ```
//!
//! Poke it.
//! ```sh
//! cargo run --bin tester -- 42 Alice 5
//! ```
use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod config;
pub mod database;
pub mod error;
pub mod routes;
pub mod state;
pub mod sync;
pub mod user;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

use config::Config;
use error::StartupError;
use routes::{clicks_handler, user_handler};
use state::AppState;
use sync::ClickSync;

pub async fn start_server() -> Result<(), StartupError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    run().await.inspect_err(|e| error!("{e}"))
}

async fn run() -> Result<(), StartupError> {
    info!("Loading config...");
    let config = Config::load()?;

    info!("Initializing state...");
    let state = AppState::new(config).await?;

    info!("Starting click sync every {:?}", state.config.sync_interval);
    let sync = ClickSync::new(state.users.clone())
        .with_interval(state.config.sync_interval)
        .spawn();

    info!("Starting server...");
    let app = router(state.clone());

    let address = format!("0.0.0.0:{}", state.config.port);
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address)
        .await
        .map_err(|source| StartupError::Bind {
            address: address.clone(),
            source,
        })?;
    info!("Server running on {address}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(StartupError::Serve);

    sync.abort();
    info!("Server shutting down...");

    served
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/api/user", get(user_handler))
        .route("/api/clicks", post(clicks_handler))
        .layer(cors)
        .with_state(state)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }

        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }

        info!("Received terminate signal, shutting down");
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
