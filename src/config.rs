//! Configuration for both halves of the pipeline. Every field has a
//! default so an empty file (or no file at all) yields a working setup.

use std::{path::Path, time::Duration};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{MonitoredUser, Tag, TagKeyword};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub server: ServerConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {path:?}"))?;
        let config = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config from {path:?}"))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the ingestion server.
    pub server_url: String,
    /// Seconds between sampler ticks; also the duration attached to
    /// every observation.
    pub tick_seconds: u32,
    /// Seconds between keystroke buffer flushes.
    pub keylog_flush_seconds: u32,
    /// Reconstructed text is capped to this many most-recent characters.
    pub keylog_max_chars: usize,
    /// Observations accumulated before a delivery attempt.
    pub batch_size: usize,
    /// Per-request network timeout in seconds.
    pub network_timeout_seconds: u64,
    /// Window-title substrings (matched case-insensitively) whose
    /// keystrokes are never emitted.
    pub keylog_denylist: Vec<String>,
    /// Directory holding the delivery spool and logs.
    pub data_dir: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            server_url: "http://127.0.0.1:8220".into(),
            tick_seconds: 10,
            keylog_flush_seconds: 25,
            keylog_max_chars: 2000,
            batch_size: 6,
            network_timeout_seconds: 30,
            keylog_denylist: vec![
                "password".into(),
                "senha".into(),
                "pin ".into(),
                "passcode".into(),
                "one-time".into(),
            ],
            data_dir: ".deskwatch".into(),
        }
    }
}

impl AgentConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_seconds as u64)
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.keylog_flush_seconds as u64)
    }

    pub fn network_timeout(&self) -> Duration {
        Duration::from_secs(self.network_timeout_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// Decoded screenshot payloads above this many bytes are stripped.
    pub screenshot_max_bytes: usize,
    /// Hard cap on report page size.
    pub page_size_cap: u64,
    /// Idle fallback: at or above this many idle seconds the
    /// observation is "Away".
    pub away_idle_seconds: u32,
    /// Idle fallback: at or above this many idle seconds the
    /// observation is "Idle".
    pub idle_idle_seconds: u32,
    /// Administrator-configured classification tags and monitored
    /// users, loaded into the store at startup.
    pub tags: Vec<Tag>,
    pub tag_keywords: Vec<TagKeyword>,
    pub monitored_users: Vec<MonitoredUser>,
    /// Directory holding the server logs.
    pub data_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 8220,
            screenshot_max_bytes: 200_000,
            page_size_cap: 100,
            away_idle_seconds: 300,
            idle_idle_seconds: 600,
            tags: vec![],
            tag_keywords: vec![],
            monitored_users: vec![],
            data_dir: ".deskwatch".into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::Config;

    #[test]
    fn empty_config_uses_defaults() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.agent.tick_seconds, 10);
        assert_eq!(config.agent.batch_size, 6);
        assert_eq!(config.server.page_size_cap, 100);
        assert_eq!(config.server.screenshot_max_bytes, 200_000);
    }

    #[test]
    fn partial_config_overrides_only_named_fields() {
        let config: Config =
            serde_json::from_str(r#"{"agent": {"tick_seconds": 5}}"#).unwrap();
        assert_eq!(config.agent.tick_seconds, 5);
        assert_eq!(config.agent.keylog_flush_seconds, 25);
    }

    #[test]
    fn load_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server": {{"port": 9000}}}}"#).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9000);
    }
}
