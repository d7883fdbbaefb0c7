//! `WireChat` test backend -- standalone stub server for manual runs.
//!
//! Seeds two demo accounts, prints their tokens, and serves the WebSocket
//! and REST surfaces the client expects.
//!
//! ```bash
//! # Run on the default address 0.0.0.0:4000
//! cargo run --bin wirechat-testkit
//!
//! # Run on a custom address
//! cargo run --bin wirechat-testkit -- --bind 127.0.0.1:8080
//! ```

use std::sync::Arc;

use clap::Parser;

use wirechat_testkit::BackendState;

#[derive(Debug, Parser)]
#[command(name = "wirechat-testkit", about = "Stub chat backend for WireChat")]
struct CliArgs {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:4000", env = "WIRECHAT_TESTKIT_BIND")]
    bind: String,

    /// Log level filter.
    #[arg(long, default_value = "info", env = "WIRECHAT_TESTKIT_LOG")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!(addr = %cli.bind, "starting wirechat test backend");

    let state = Arc::new(BackendState::new());
    seed_demo_world(&state).await;

    match wirechat_testkit::start_server(&cli.bind, state).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "test backend listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "test backend task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start test backend");
            std::process::exit(1);
        }
    }
}

/// Two accounts with a bit of history, tokens printed for copy-paste.
async fn seed_demo_world(state: &Arc<BackendState>) {
    state.add_user(1, "Alice", "alice@example.com").await;
    state.add_user(2, "Bob", "bob@example.com").await;
    state.seed_message(2, 1, "ready when you are", false).await;

    let (alice_access, _) = state.issue_tokens(1).await;
    let (bob_access, _) = state.issue_tokens(2).await;
    println!("seeded users:");
    println!("  1 alice@example.com  token: {alice_access}");
    println!("  2 bob@example.com    token: {bob_access}");
}
