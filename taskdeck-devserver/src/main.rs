//! `taskdeck-devserver`: in-memory GraphQL task API.
//!
//! Serves `POST /graphql` for queries and mutations and `GET /graphql`
//! (`graphql-transport-ws`) for subscriptions. State lives in memory and is
//! lost on exit.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 127.0.0.1:3000
//! cargo run --bin taskdeck-devserver
//!
//! # Require a bearer token
//! cargo run --bin taskdeck-devserver -- --require-token secret
//! ```

use std::sync::Arc;

use clap::Parser;
use taskdeck_devserver::config::{ServerCliArgs, ServerConfig};
use taskdeck_devserver::server::{self, ServerState};

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(
        addr = %config.bind_addr,
        auth = config.require_token.is_some(),
        "starting taskdeck dev server"
    );

    let state = Arc::new(ServerState::from_config(&config));

    match server::start_server_with_state(&config.bind_addr, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "listening on http://{bound_addr}/graphql");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
