//! # CLI Configuration
//!
//! Optional TOML configuration file for the CLI and server.
//!
//! ```toml
//! database = "data/varve.db"
//! backend = "redb"
//!
//! [server]
//! host = "0.0.0.0"
//! port = 9090
//! ```
//!
//! Values from the file fill in whatever the command-line flags left at
//! their defaults; explicit flags win.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use varve_core::VarveError;

/// Top-level configuration file contents.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Database path.
    pub database: Option<PathBuf>,
    /// Storage backend: "redb" or "file".
    pub backend: Option<String>,
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,
}

/// `[server]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Load and parse a configuration file.
pub fn load(path: &Path) -> Result<AppConfig, VarveError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| VarveError::Io(format!("Cannot read config '{}': {}", path.display(), e)))?;
    toml::from_str(&contents)
        .map_err(|e| VarveError::Serialization(format!("Invalid config: {}", e)))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_config_parses() {
        let config: AppConfig = toml::from_str(
            r#"
            database = "data/varve.db"
            backend = "file"

            [server]
            host = "0.0.0.0"
            port = 9090
            "#,
        )
        .expect("parse");
        assert_eq!(config.database, Some(PathBuf::from("data/varve.db")));
        assert_eq!(config.backend.as_deref(), Some("file"));
        assert_eq!(config.server.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(config.server.port, Some(9090));
    }

    #[test]
    fn empty_config_is_all_defaults() {
        let config: AppConfig = toml::from_str("").expect("parse");
        assert!(config.database.is_none());
        assert!(config.backend.is_none());
        assert!(config.server.host.is_none());
        assert!(config.server.port.is_none());
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load(Path::new("/nonexistent/varve.toml"));
        assert!(matches!(err, Err(VarveError::Io(_))));
    }
}
