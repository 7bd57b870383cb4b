//! # Varve CLI Module
//!
//! This module implements the CLI interface for Varve.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show database status
//! - `transact` - Submit a transaction from a JSON file
//! - `query` - Execute a query from a JSON file
//! - `export` - Export the fact log in canonical format
//! - `import` - Import a fact log from canonical format
//! - `init` - Initialize a new database

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use varve_core::VarveError;

pub use commands::*;
pub use config::AppConfig;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Default database path, used to detect whether the flag was left alone
/// so a config file may supply it instead.
const DEFAULT_DATABASE: &str = "varve.db";

/// Varve - Immutable Fact Database
///
/// An append-only fact store with a unification query engine.
/// Every transaction lays down a new layer; every snapshot stays frozen.
#[derive(Parser, Debug)]
#[command(name = "varve")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the database
    #[arg(short = 'D', long, global = true, default_value = DEFAULT_DATABASE)]
    pub database: PathBuf,

    /// Storage backend: "redb" (durable log) or "file" (canonical file)
    #[arg(short = 'B', long, global = true, default_value = "redb")]
    pub backend: String,

    /// Optional TOML configuration file (database, backend, server host/port)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },

    /// Show database status
    Status,

    /// Submit a transaction from a JSON file of operations
    Transact {
        /// Path to the input file (JSON array of operations)
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Execute a query from a JSON file
    Query {
        /// Path to the query file (JSON with "query" and optional "inputs")
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Export the fact log in canonical format
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Import a fact log from canonical format (file backend only)
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Initialize a new empty database
    Init {
        /// Force initialization even if database exists
        #[arg(short, long)]
        force: bool,
    },
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), VarveError> {
    let config = match &cli.config {
        Some(path) => config::load(path)?,
        None => AppConfig::default(),
    };

    // A config file fills in whatever the flags left at their defaults.
    let database = if cli.database == PathBuf::from(DEFAULT_DATABASE) {
        config.database.clone().unwrap_or(cli.database)
    } else {
        cli.database
    };
    let backend = if cli.backend == "redb" {
        config.backend.clone().unwrap_or(cli.backend)
    } else {
        cli.backend
    };
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { host, port }) => {
            let host = config.server.host.clone().unwrap_or(host);
            let port = config.server.port.unwrap_or(port);
            cmd_server(&database, &backend, &host, port).await
        }
        Some(Commands::Status) => cmd_status(&database, &backend, json_mode),
        Some(Commands::Transact { file }) => cmd_transact(&database, &backend, json_mode, &file),
        Some(Commands::Query { file }) => cmd_query(&database, &backend, &file),
        Some(Commands::Export { output }) => cmd_export(&database, &backend, &output),
        Some(Commands::Import { input }) => cmd_import(&database, &backend, &input),
        Some(Commands::Init { force }) => cmd_init(&database, &backend, force),
        None => {
            // No subcommand - show status by default
            cmd_status(&database, &backend, json_mode)
        }
    }
}
