//! Configuration (§3, §10): a TOML document read once at library load,
//! producing the immutable snapshot the rest of the crate is built from.
//!
//! A missing or unparsable file is `ConfigMissing` (§7) — never fatal. The
//! shim always has a complete, working [`Config::default`].

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ShimError;

pub const CFG_FILE_NAME: &str = "tapagent.toml";
const ENV_CONFIG_PATH: &str = "TAPAGENT_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Udp,
    Tcp,
    File,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// `host:port` for udp/tcp, filesystem path for `file`.
    pub destination: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            kind: TransportKind::Udp,
            destination: "127.0.0.1:8125".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    pub path: String,
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            path: "/tmp/tapagent.log".to_string(),
            level: "warn".to_string(),
        }
    }
}

/// Raw, partially-specified document as it appears on disk; every field is
/// optional so a minimal or empty file is valid.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    transport: Option<TransportConfig>,
    period_seconds: Option<u64>,
    delay_start_seconds: Option<u64>,
    periodic_net_bytes: Option<bool>,
    log_data_path: Option<bool>,
    log: Option<LogConfig>,
    statsd_max_len: Option<usize>,
    statsd_prefix: Option<String>,
    statsd_field_filter: Option<String>,
}

/// The immutable snapshot consumed by [`crate::lifecycle`] and released once
/// the periodic thread has started.
#[derive(Debug, Clone)]
pub struct Config {
    pub transport: TransportConfig,
    pub period_seconds: u64,
    pub delay_start_seconds: u64,
    pub periodic_net_bytes: bool,
    pub log_data_path: bool,
    pub log: LogConfig,
    pub statsd_max_len: usize,
    pub statsd_prefix: String,
    pub statsd_field_filter: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            transport: TransportConfig::default(),
            period_seconds: 10,
            delay_start_seconds: 5,
            periodic_net_bytes: true,
            log_data_path: false,
            log: LogConfig::default(),
            statsd_max_len: 512,
            statsd_prefix: String::new(),
            statsd_field_filter: None,
        }
    }
}

impl From<RawConfig> for Config {
    fn from(raw: RawConfig) -> Self {
        let defaults = Config::default();
        Config {
            transport: raw.transport.unwrap_or(defaults.transport),
            period_seconds: raw.period_seconds.unwrap_or(defaults.period_seconds),
            delay_start_seconds: raw
                .delay_start_seconds
                .unwrap_or(defaults.delay_start_seconds),
            periodic_net_bytes: raw
                .periodic_net_bytes
                .unwrap_or(defaults.periodic_net_bytes),
            log_data_path: raw.log_data_path.unwrap_or(defaults.log_data_path),
            log: raw.log.unwrap_or(defaults.log),
            statsd_max_len: raw.statsd_max_len.unwrap_or(defaults.statsd_max_len),
            statsd_prefix: raw.statsd_prefix.unwrap_or(defaults.statsd_prefix),
            statsd_field_filter: raw.statsd_field_filter.or(defaults.statsd_field_filter),
        }
    }
}

impl Config {
    /// `Config::path(name)` — the location the constructor looks for the
    /// config file. Honors `TAPAGENT_CONFIG` if set (useful for tests and
    /// for sidecar injection setups where `/etc` isn't writable), otherwise
    /// `/etc/tapagent/<name>`.
    pub fn path(name: &str) -> PathBuf {
        if let Ok(over) = std::env::var(ENV_CONFIG_PATH) {
            return PathBuf::from(over);
        }
        Path::new("/etc/tapagent").join(name)
    }

    /// `Config::read(path)` — parse the file at `path`, or fall back to
    /// defaults with a `ConfigMissing` diagnostic.
    pub fn read(path: &Path) -> (Config, Option<ShimError>) {
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str::<RawConfig>(&text) {
                Ok(raw) => (Config::from(raw), None),
                Err(e) => (
                    Config::default(),
                    Some(ShimError::ConfigMissing(format!(
                        "{}: parse error: {e}",
                        path.display()
                    ))),
                ),
            },
            Err(e) => (
                Config::default(),
                Some(ShimError::ConfigMissing(format!(
                    "{}: {e}",
                    path.display()
                ))),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_yields_defaults_and_error() {
        let (cfg, err) = Config::read(Path::new("/nonexistent/tapagent.toml"));
        assert_eq!(cfg.period_seconds, 10);
        assert!(matches!(err, Some(ShimError::ConfigMissing(_))));
    }

    #[test]
    fn partial_file_fills_remaining_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "period_seconds = 30").unwrap();
        let (cfg, err) = Config::read(file.path());
        assert!(err.is_none());
        assert_eq!(cfg.period_seconds, 30);
        assert_eq!(cfg.delay_start_seconds, 5);
        assert_eq!(cfg.transport.destination, "127.0.0.1:8125");
    }

    #[test]
    fn full_file_overrides_everything() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
            period_seconds = 15
            delay_start_seconds = 2
            periodic_net_bytes = false
            log_data_path = true
            statsd_max_len = 256
            statsd_prefix = "app."

            [transport]
            kind = "tcp"
            destination = "10.0.0.5:8126"

            [log]
            path = "/var/log/tapagent.log"
            level = "debug"
            "#
        )
        .unwrap();
        let (cfg, err) = Config::read(file.path());
        assert!(err.is_none());
        assert_eq!(cfg.period_seconds, 15);
        assert_eq!(cfg.transport.kind, TransportKind::Tcp);
        assert_eq!(cfg.transport.destination, "10.0.0.5:8126");
        assert!(!cfg.periodic_net_bytes);
        assert!(cfg.log_data_path);
        assert_eq!(cfg.log.level, "debug");
    }
}
