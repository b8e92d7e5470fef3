//! Configuration for the stream-size scheduler agent, loaded from `agent.toml`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_polling_delay_seconds() -> u64 {
    30
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_stream_root() -> PathBuf {
    PathBuf::from("./streams")
}

fn default_dispatch_program_root() -> PathBuf {
    PathBuf::from("./programs")
}

/// Agent configuration loaded from `agent.toml` (see `SPEC_FULL.md` E.4).
///
/// `namespace`/`application` scope every schedule this agent process manages;
/// a deployment wanting multiple namespaces or applications runs one agent
/// process per combination, matching the teacher's one-agent-per-host model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgentConfig {
    /// Namespace schedules created by this agent are scoped to.
    pub namespace: String,
    /// Application schedules created by this agent are scoped to.
    pub application: String,
    /// Directory holding this agent's SQLite schedule store.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Cadence of the polling fallback, in seconds.
    #[serde(default = "default_polling_delay_seconds")]
    pub polling_delay_seconds: u64,
    /// Directory whose files back the streams this agent probes and watches;
    /// a stream named `logs` resolves to `stream_root/logs`.
    #[serde(default = "default_stream_root")]
    pub stream_root: PathBuf,
    /// Directory containing the programs a firing dispatches, one
    /// subdirectory per program type (see `SPEC_FULL.md` E.7).
    #[serde(default = "default_dispatch_program_root")]
    pub dispatch_program_root: PathBuf,
}

impl AgentConfig {
    /// Loads and parses `path` as a TOML-encoded `AgentConfig`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read agent config at {}", path.display()))?;
        let config: AgentConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse agent config at {}", path.display()))?;
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("schedules.sqlite3")
    }
}

#[cfg(test)]
mod inline_tests {
    use super::*;

    #[test]
    fn minimal_toml_fills_in_defaults() {
        let config: AgentConfig = toml::from_str(
            r#"
            namespace = "ns"
            application = "app"
            "#,
        )
        .unwrap();
        assert_eq!(config.polling_delay_seconds, 30);
        assert_eq!(config.data_dir, PathBuf::from("./data"));
        assert_eq!(config.stream_root, PathBuf::from("./streams"));
        assert_eq!(config.dispatch_program_root, PathBuf::from("./programs"));
    }

    #[test]
    fn full_toml_overrides_every_default() {
        let config: AgentConfig = toml::from_str(
            r#"
            namespace = "ns"
            application = "app"
            data_dir = "/var/lib/scheduler-agent"
            polling_delay_seconds = 5
            stream_root = "/data/streams"
            dispatch_program_root = "/opt/programs"
            "#,
        )
        .unwrap();
        assert_eq!(config.polling_delay_seconds, 5);
        assert_eq!(config.database_path(), PathBuf::from("/var/lib/scheduler-agent/schedules.sqlite3"));
    }
}
