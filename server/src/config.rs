//! Configuration for the stream-size scheduler server, loaded from `server.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_polling_delay_seconds() -> u64 {
    30
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./data/schedules.sqlite3")
}

fn default_stream_root() -> PathBuf {
    PathBuf::from("./streams")
}

fn default_dispatch_program_root() -> PathBuf {
    PathBuf::from("./programs")
}

/// Server configuration loaded from `server.toml` (see `SPEC_FULL.md` E.4).
///
/// Unlike `agent.toml`, this carries no fixed `namespace`/`application` — the
/// server hosts one registry shared across every tenant that reaches it over
/// HTTP, and each request's path carries its own namespace/application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerConfig {
    /// Address the HTTP API listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Path to this server's SQLite schedule store.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Cadence of the polling fallback, in seconds.
    #[serde(default = "default_polling_delay_seconds")]
    pub polling_delay_seconds: u64,
    /// Directory whose files back the streams this server probes and watches.
    #[serde(default = "default_stream_root")]
    pub stream_root: PathBuf,
    /// Directory containing the programs a firing dispatches, one
    /// subdirectory per program type (see `SPEC_FULL.md` E.7).
    #[serde(default = "default_dispatch_program_root")]
    pub dispatch_program_root: PathBuf,
}

impl ServerConfig {
    /// Loads and parses `path` as a TOML-encoded `ServerConfig`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read server config at {}", path.display()))?;
        let config: ServerConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse server config at {}", path.display()))?;
        Ok(config)
    }
}

#[cfg(test)]
mod inline_tests {
    use super::*;

    #[test]
    fn empty_toml_fills_in_every_default() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert_eq!(config.polling_delay_seconds, 30);
        assert_eq!(config.database_path, PathBuf::from("./data/schedules.sqlite3"));
        assert_eq!(config.stream_root, PathBuf::from("./streams"));
        assert_eq!(config.dispatch_program_root, PathBuf::from("./programs"));
    }

    #[test]
    fn full_toml_overrides_every_default() {
        let config: ServerConfig = toml::from_str(
            r#"
            listen_addr = "127.0.0.1:9000"
            database_path = "/var/lib/scheduler-server/schedules.sqlite3"
            polling_delay_seconds = 5
            stream_root = "/data/streams"
            dispatch_program_root = "/opt/programs"
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.polling_delay_seconds, 5);
    }
}
