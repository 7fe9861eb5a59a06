use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 8090;
pub const DEFAULT_BIND: &str = "127.0.0.1";

/// Top-level config (chime.toml + CHIME_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChimeConfig {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

impl Default for ChimeConfig {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            database: DatabaseConfig::default(),
            engine: EngineConfig::default(),
            dispatch: DispatchConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Execution-engine tuning.
///
/// The defaults are conservative enough for a single instance polling a few
/// thousand schedules; multiple instances can share one database and split
/// the work via lease claims without any config change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between due-schedule polls.
    #[serde(default = "default_poll_seconds")]
    pub poll_seconds: u64,
    /// Max schedules claimed per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Lease duration; a claimed schedule whose lease expires without a
    /// commit becomes claimable again.
    #[serde(default = "default_lease_seconds")]
    pub lease_seconds: u64,
    /// Max dispatches in flight at once per instance.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    /// Transient failures tolerated before a schedule is marked failed.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First retry delay; doubles per attempt.
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    /// Upper bound on any retry delay.
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_seconds: default_poll_seconds(),
            batch_size: default_batch_size(),
            lease_seconds: default_lease_seconds(),
            max_concurrent: default_max_concurrent(),
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            backoff_cap_secs: default_backoff_cap_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Scenario-run API root, with trailing slash.
    #[serde(default = "default_dispatch_base_url")]
    pub base_url: String,
    /// Per-request timeout; a timed-out dispatch counts as a transient failure.
    #[serde(default = "default_dispatch_timeout_seconds")]
    pub timeout_seconds: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            base_url: default_dispatch_base_url(),
            timeout_seconds: default_dispatch_timeout_seconds(),
        }
    }
}

fn default_port() -> u16 {
    DEFAULT_PORT
}
fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chime/chime.db", home)
}
fn default_poll_seconds() -> u64 {
    30
}
fn default_batch_size() -> u32 {
    200
}
fn default_lease_seconds() -> u64 {
    120
}
fn default_max_concurrent() -> usize {
    100
}
fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    30
}
fn default_backoff_cap_secs() -> u64 {
    1800
}
fn default_dispatch_base_url() -> String {
    "https://api.puzzlebot.top/".to_string()
}
fn default_dispatch_timeout_seconds() -> u64 {
    20
}

impl ChimeConfig {
    /// Load config from a TOML file with CHIME_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.chime/chime.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: ChimeConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("CHIME_").split("_"))
            .extract()
            .map_err(|e| crate::error::ChimeError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.chime/chime.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = ChimeConfig::default();
        assert_eq!(cfg.engine.poll_seconds, 30);
        assert_eq!(cfg.engine.batch_size, 200);
        assert_eq!(cfg.engine.lease_seconds, 120);
        assert_eq!(cfg.engine.max_retries, 3);
        assert!(cfg.engine.backoff_base_secs <= cfg.engine.backoff_cap_secs);
        assert!(cfg.dispatch.base_url.ends_with('/'));
    }

    #[test]
    fn toml_overrides_defaults_per_field() {
        let cfg: ChimeConfig = Figment::new()
            .merge(Toml::string(
                r#"
                [engine]
                poll_seconds = 5
                max_concurrent = 8

                [dispatch]
                base_url = "http://localhost:9/"
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(cfg.engine.poll_seconds, 5);
        assert_eq!(cfg.engine.max_concurrent, 8);
        // untouched fields keep their defaults
        assert_eq!(cfg.engine.batch_size, 200);
        assert_eq!(cfg.dispatch.base_url, "http://localhost:9/");
        assert_eq!(cfg.dispatch.timeout_seconds, 20);
    }
}
