//! Studio Server - Main entry point.
//!
//! This binary starts the studio API server with:
//! - Structured JSON logging
//! - Graceful shutdown handling (SIGTERM/SIGINT)
//!
//! # Configuration
//!
//! See [`studio_server::config`] for environment variable configuration.
//!
//! # Example
//!
//! ```bash
//! # Development mode (no auth)
//! STUDIO_UNSAFE_NO_AUTH=true cargo run --bin studio-server
//!
//! # Production mode
//! STUDIO_USERS="cody:Cody Rose:1111,ill:iLL:2222" \
//! PASSCODE_SECRET="secret" \
//! STUDIO_DATA_FILE=/var/lib/studio/data.json \
//! PORT=8080 \
//! cargo run --release --bin studio-server
//! ```

use std::process::ExitCode;

use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use studio_server::config::Config;
use studio_server::routes::{create_router, AppState};

#[tokio::main]
async fn main() -> ExitCode {
    init_logging();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "Failed to load configuration");
            eprintln!("Error: {err}");
            eprintln!();
            eprintln!("Required environment variables (when auth enabled):");
            eprintln!("  STUDIO_USERS           - Format: slug:Name:passcode,slug2:Name2:passcode2");
            eprintln!("  PASSCODE_SECRET        - Secret mixed into session hashes");
            eprintln!();
            eprintln!("Optional environment variables:");
            eprintln!("  PORT                   - HTTP server port (default: 8080)");
            eprintln!("  STUDIO_BASE_DIR        - Directory holding the workspace (default: current dir)");
            eprintln!("  STUDIO_DATA_FILE       - JSON snapshot for records (default: <base>/data/studio.json)");
            eprintln!("  DB_MAX_BYTES           - Snapshot size limit for /api/db/health (default: 52428800)");
            eprintln!("  RUST_LOG               - Log level filter (default: info)");
            eprintln!("  STUDIO_UNSAFE_NO_AUTH  - Disable auth (dev only, set to 'true')");
            return ExitCode::from(1);
        }
    };

    let auth_mode = if config.unsafe_no_auth {
        "disabled (UNSAFE)"
    } else {
        "enabled"
    };
    info!(
        port = config.port,
        auth_mode = auth_mode,
        user_count = config.users.len(),
        workspace = %config.workspace_root().display(),
        persistent = config.data_file.is_some(),
        "Studio server starting"
    );

    let port = config.port;
    let state = match AppState::new(config) {
        Ok(state) => state,
        Err(err) => {
            error!(error = %err, "Failed to open application state");
            eprintln!("Error: {err}");
            return ExitCode::from(1);
        }
    };

    let app = create_router(state);

    let bind_addr = format!("0.0.0.0:{port}");
    let listener = match TcpListener::bind(&bind_addr).await {
        Ok(listener) => {
            info!(port, address = %bind_addr, "Server listening");
            listener
        }
        Err(err) => {
            error!(error = %err, address = %bind_addr, "Failed to bind to address");
            return ExitCode::from(1);
        }
    };

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    info!("Server ready to accept connections");

    if let Err(err) = server.await {
        error!(error = %err, "Server error");
        return ExitCode::from(1);
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}

/// Initialize structured logging with tracing.
///
/// JSON output, filtered by `RUST_LOG` with a default of `info`.
fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));

    let json_layer = fmt::layer()
        .json()
        .with_target(true)
        .with_level(true)
        .with_file(false)
        .with_line_number(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .init();
}

/// Resolves when SIGINT or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
