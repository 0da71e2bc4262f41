//! Configuration for the pool server
//!
//! A TOML config file covers the daemon endpoint, listener ports, vardiff,
//! banning and share-trust tuning; a small clap surface selects the file and
//! overrides logging.

use crate::error::{Error, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command-line arguments
#[derive(Parser, Debug)]
#[clap(
    name = "cryptonote-pool",
    about = "CryptoNote mining-pool server",
    version
)]
pub struct Args {
    /// Configuration file path
    #[clap(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,

    /// Log level override
    #[clap(short, long, env = "POOL_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format override (plain, json)
    #[clap(long, env = "POOL_LOG_FORMAT")]
    pub log_format: Option<String>,
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Daemon connection
    pub daemon: DaemonConfig,

    /// Pool server behaviour
    pub pool: PoolConfig,

    /// Logging
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Daemon connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Daemon base URL, e.g. "http://127.0.0.1:18081"
    pub url: String,

    /// Request timeout in seconds
    #[serde(default = "default_daemon_timeout")]
    pub timeout_secs: u64,
}

/// Pool server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Pool wallet address blocks are mined to
    pub pool_address: String,

    /// Listener ports
    pub ports: Vec<PortConfig>,

    /// Template poll interval in milliseconds
    #[serde(default = "default_refresh_interval_ms")]
    pub refresh_interval_ms: u64,

    /// Force a full template fetch every N poll ticks
    #[serde(default = "default_force_refresh_every")]
    pub force_refresh_every: u64,

    /// Seconds of silence before a miner is evicted
    #[serde(default = "default_miner_timeout_secs")]
    pub miner_timeout_secs: u64,

    /// TLS material for ports with `tls = true`
    pub tls: Option<TlsConfig>,

    /// Variable difficulty tuning
    #[serde(default)]
    pub var_diff: VarDiffConfig,

    /// Abuse banning
    #[serde(default)]
    pub banning: BanConfig,

    /// Share trust sampling
    #[serde(default)]
    pub share_trust: TrustConfig,
}

/// One listener port
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortConfig {
    /// TCP port to listen on
    pub port: u16,

    /// Starting difficulty for sessions created on this port
    pub difficulty: u64,

    /// Serve TLS on this port
    #[serde(default)]
    pub tls: bool,
}

/// TLS key material
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsConfig {
    /// PEM certificate chain
    pub cert: PathBuf,
    /// PEM private key
    pub key: PathBuf,
}

/// Variable difficulty configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDiffConfig {
    /// Lowest difficulty vardiff will assign
    #[serde(default = "default_min_diff")]
    pub min_diff: u64,

    /// Highest difficulty vardiff will assign
    #[serde(default = "default_max_diff")]
    pub max_diff: u64,

    /// Desired seconds between shares
    #[serde(default = "default_target_time")]
    pub target_time: u64,

    /// Seconds between retarget sweeps
    #[serde(default = "default_retarget_time")]
    pub retarget_time: u64,

    /// Tolerated deviation around the target time, in percent
    #[serde(default = "default_variance_percent")]
    pub variance_percent: u64,

    /// Largest allowed difficulty change per retarget, in percent
    #[serde(default = "default_max_jump")]
    pub max_jump: u64,
}

/// Banning configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BanConfig {
    /// Master switch
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Ban duration in seconds
    #[serde(default = "default_ban_time_secs")]
    pub time_secs: u64,

    /// Invalid-share percentage that triggers a ban
    #[serde(default = "default_invalid_percent")]
    pub invalid_percent: u64,

    /// Shares accumulated before the ratio is evaluated
    #[serde(default = "default_check_threshold")]
    pub check_threshold: u64,
}

/// Share trust configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Master switch
    #[serde(default)]
    pub enabled: bool,

    /// Floor for the verification probability, in percent
    #[serde(default = "default_trust_min")]
    pub min: u64,

    /// Percent the verification probability drops per accepted share
    #[serde(default = "default_trust_step_down")]
    pub step_down: u64,

    /// Accepted shares required before sampling may begin
    #[serde(default = "default_trust_threshold")]
    pub threshold: i64,

    /// Penalty shares imposed after a rejected share
    #[serde(default = "default_trust_penalty")]
    pub penalty: i64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (plain, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_true() -> bool {
    true
}

fn default_daemon_timeout() -> u64 {
    30
}

fn default_refresh_interval_ms() -> u64 {
    1000
}

fn default_force_refresh_every() -> u64 {
    30
}

fn default_miner_timeout_secs() -> u64 {
    900
}

fn default_min_diff() -> u64 {
    100
}

fn default_max_diff() -> u64 {
    100_000_000
}

fn default_target_time() -> u64 {
    60
}

fn default_retarget_time() -> u64 {
    30
}

fn default_variance_percent() -> u64 {
    30
}

fn default_max_jump() -> u64 {
    100
}

fn default_ban_time_secs() -> u64 {
    600
}

fn default_invalid_percent() -> u64 {
    25
}

fn default_check_threshold() -> u64 {
    30
}

fn default_trust_min() -> u64 {
    20
}

fn default_trust_step_down() -> u64 {
    1
}

fn default_trust_threshold() -> i64 {
    10
}

fn default_trust_penalty() -> i64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "plain".to_string()
}

impl Default for VarDiffConfig {
    fn default() -> Self {
        Self {
            min_diff: default_min_diff(),
            max_diff: default_max_diff(),
            target_time: default_target_time(),
            retarget_time: default_retarget_time(),
            variance_percent: default_variance_percent(),
            max_jump: default_max_jump(),
        }
    }
}

impl Default for BanConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time_secs: default_ban_time_secs(),
            invalid_percent: default_invalid_percent(),
            check_threshold: default_check_threshold(),
        }
    }
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min: default_trust_min(),
            step_down: default_trust_step_down(),
            threshold: default_trust_threshold(),
            penalty: default_trust_penalty(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read {}: {e}", path.display())))?;

        let config: Self = toml::from_str(&contents)
            .map_err(|e| Error::config(format!("failed to parse {}: {e}", path.display())))?;

        config.validate()?;
        Ok(config)
    }

    /// Load from the file named in `Args`, applying CLI overrides.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = Self::from_file(&args.config)?;
        if let Some(level) = &args.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &args.log_format {
            config.logging.format = format.clone();
        }
        Ok(config)
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> Result<()> {
        if self.pool.pool_address.is_empty() {
            return Err(Error::config("pool_address must not be empty"));
        }
        if self.pool.ports.is_empty() {
            return Err(Error::config("at least one listener port is required"));
        }
        if self.pool.ports.iter().any(|p| p.difficulty == 0) {
            return Err(Error::config("port difficulty must be greater than 0"));
        }
        if self.pool.ports.iter().any(|p| p.tls) && self.pool.tls.is_none() {
            return Err(Error::config("tls ports configured without [pool.tls] material"));
        }
        if self.pool.var_diff.min_diff == 0 {
            return Err(Error::config("var_diff.min_diff must be greater than 0"));
        }
        if self.pool.var_diff.min_diff > self.pool.var_diff.max_diff {
            return Err(Error::config("var_diff.min_diff exceeds max_diff"));
        }
        if self.pool.var_diff.target_time == 0 || self.pool.var_diff.retarget_time == 0 {
            return Err(Error::config("var_diff times must be greater than 0"));
        }
        if self.pool.banning.check_threshold == 0 {
            return Err(Error::config("banning.check_threshold must be greater than 0"));
        }
        if self.daemon.url.is_empty() {
            return Err(Error::config("daemon.url must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn minimal_toml() -> &'static str {
        r#"
            [daemon]
            url = "http://127.0.0.1:18081"

            [pool]
            pool_address = "44pool"

            [[pool.ports]]
            port = 3333
            difficulty = 100
        "#
    }

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(minimal_toml()).unwrap();
        assert_eq!(config.pool.ports.len(), 1);
        assert_eq!(config.pool.refresh_interval_ms, 1000);
        assert_eq!(config.pool.force_refresh_every, 30);
        assert_eq!(config.pool.var_diff.target_time, 60);
        assert_eq!(config.pool.banning.invalid_percent, 25);
        assert!(config.pool.banning.enabled);
        assert!(!config.pool.share_trust.enabled);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(minimal_toml().as_bytes()).unwrap();
        let config = Config::from_file(&file.path().to_path_buf()).unwrap();
        assert_eq!(config.daemon.url, "http://127.0.0.1:18081");
    }

    #[test]
    fn test_validation_rejects_empty_ports() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.pool.ports.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_port_difficulty() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.pool.ports[0].difficulty = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_tls_without_material() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.pool.ports[0].tls = true;
        assert!(config.validate().is_err());

        config.pool.tls = Some(TlsConfig {
            cert: "cert.pem".into(),
            key: "key.pem".into(),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_inverted_vardiff_bounds() {
        let mut config: Config = toml::from_str(minimal_toml()).unwrap();
        config.pool.var_diff.min_diff = 1_000;
        config.pool.var_diff.max_diff = 10;
        assert!(config.validate().is_err());
    }
}
