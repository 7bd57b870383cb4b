//! # Varve - Immutable Fact Database Server
//!
//! The main binary for the Varve fact database.
//!
//! This application provides:
//! - HTTP REST API server (axum-based)
//! - CLI interface for transactions, queries, and log interchange
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                 apps/varve (THE BINARY)                │
//! │                                                        │
//! │    ┌─────────────┐            ┌─────────────┐          │
//! │    │   CLI       │            │   HTTP API  │          │
//! │    │  (clap)     │            │   (axum)    │          │
//! │    └──────┬──────┘            └──────┬──────┘          │
//! │           │                          │                 │
//! │           └────────────┬─────────────┘                 │
//! │                        ▼                               │
//! │                ┌───────────────┐                       │
//! │                │  varve-core   │                       │
//! │                │ (THE LOGIC)   │                       │
//! │                └───────────────┘                       │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! varve server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! varve status
//! varve transact -f ops.json
//! varve query -f query.json
//! ```

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use varve::cli;

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // Initialize tracing — VARVE_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("VARVE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "varve=info,tower_http=debug".into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    // Parse CLI arguments
    let cli = cli::Cli::parse();

    // Display startup banner
    if !cli.quiet {
        print_banner();
    }

    // Execute command
    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the Varve startup banner.
fn print_banner() {
    println!(
        r#"
  ██╗   ██╗ █████╗ ██████╗ ██╗   ██╗███████╗
  ██║   ██║██╔══██╗██╔══██╗██║   ██║██╔════╝
  ██║   ██║███████║██████╔╝██║   ██║█████╗
  ╚██╗ ██╔╝██╔══██║██╔══██╗╚██╗ ██╔╝██╔══╝
   ╚████╔╝ ██║  ██║██║  ██║ ╚████╔╝ ███████╗
    ╚═══╝  ╚═╝  ╚═╝╚═╝  ╚═╝  ╚═══╝  ╚══════╝

  Immutable Fact Database v{}

  Append-only • Snapshot-isolated • Deterministic
"#,
        env!("CARGO_PKG_VERSION")
    );
}
