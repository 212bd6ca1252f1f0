use std::future::IntoFuture;
use std::net::SocketAddr;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;

use relay_server::auth::{token, Role};
use relay_server::bridge;
use relay_server::config::{generate_config_template, Cli, Config};
use relay_server::routes;
use relay_server::state::AppState;

/// Lifetime of tokens printed by --mint-token.
const MINTED_TOKEN_TTL_SECS: i64 = 3600;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Handle --generate-config: print template and exit
    if cli.generate_config {
        print!("{}", generate_config_template());
        return Ok(());
    }

    // Load config with layered precedence: defaults < TOML < env < CLI
    let config = Config::load(&cli)?;

    init_tracing(config.json_logs);

    if let Some(request) = cli.mint_token.as_deref() {
        return mint_token(&config, request);
    }

    config.validate()?;

    tracing::info!("Notification relay v{} starting", env!("CARGO_PKG_VERSION"));

    let state = AppState::new(
        config.jwt_secret.as_bytes(),
        config.bridge_secret.as_bytes(),
        config.relay_settings(),
    );

    let ws_addr = format!("{}:{}", config.bind_address, config.ws_port);
    let ws_listener = TcpListener::bind(&ws_addr)
        .await
        .map_err(|e| format!("failed to bind WebSocket listener on {}: {}", ws_addr, e))?;
    let bridge_addr = format!("{}:{}", config.bind_address, config.bridge_port);
    let bridge_listener = TcpListener::bind(&bridge_addr)
        .await
        .map_err(|e| format!("failed to bind bridge listener on {}: {}", bridge_addr, e))?;

    tracing::info!("WebSocket listener on {}", ws_listener.local_addr()?);
    tracing::info!(
        path = %config.bridge_path,
        "Bridge listener on {}",
        bridge_listener.local_addr()?
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
                // Keep the sender alive so the servers keep running
                std::future::pending::<()>().await;
            }
        }
    });

    let ws_server = axum::serve(
        ws_listener,
        routes::build_router(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_shutdown(shutdown_rx.clone()));

    let bridge_server = axum::serve(
        bridge_listener,
        bridge::build_bridge_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(wait_for_shutdown(shutdown_rx));

    tokio::try_join!(ws_server.into_future(), bridge_server.into_future())?;

    tracing::info!("Notification relay stopped");
    Ok(())
}

fn init_tracing(json_logs: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("relay_server=info"));

    if json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}

/// Print a development token for `USER_ID:ROLE` and exit.
fn mint_token(config: &Config, request: &str) -> Result<(), Box<dyn std::error::Error>> {
    if config.jwt_secret.is_empty() {
        return Err("--mint-token needs a JWT secret (set JWT_SECRET or --jwt-secret)".into());
    }
    let (user_id, role) = request
        .split_once(':')
        .ok_or("--mint-token expects USER_ID:ROLE")?;
    let user_id: i64 = user_id
        .trim()
        .parse()
        .map_err(|e| format!("invalid user id {:?}: {}", user_id, e))?;
    if user_id <= 0 {
        return Err("user id must be a positive integer".into());
    }

    let token = token::issue_token(
        config.jwt_secret.as_bytes(),
        user_id,
        &Role::from(role.trim()),
        MINTED_TOKEN_TTL_SECS,
    )?;
    println!("{}", token);
    Ok(())
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
