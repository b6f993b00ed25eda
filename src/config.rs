use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};

/// Command-line overrides. Environment variables (and `.env`) provide the
/// baseline; flags win when both are present.
#[derive(Debug, Parser)]
#[command(name = "gatekeep", about = "Request admission control service")]
pub struct Cli {
    /// Server bind address
    #[arg(long)]
    pub bind: Option<SocketAddr>,

    /// Redis connection URL (omit to run with the in-process store)
    #[arg(long)]
    pub redis_url: Option<String>,

    /// Path to a JSON policy file
    #[arg(long)]
    pub policy_file: Option<PathBuf>,

    /// Admit requests when the store is unavailable instead of failing closed
    #[arg(long)]
    pub fail_open: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub redis_url: Option<String>,
    pub key_prefix: String,
    pub store_timeout: Duration,
    pub store_retries: u32,
    pub fail_open: bool,
    pub policy_file: Option<PathBuf>,
    pub cache_ttl: Duration,
    pub log_level: String,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let bind_addr = env_or("BIND_ADDR", "127.0.0.1:3000")
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("invalid BIND_ADDR: {e}")))?;

        let redis_url = std::env::var("REDIS_URL").ok().filter(|v| !v.is_empty());

        let store_timeout_ms = env_or("STORE_TIMEOUT_MS", "250")
            .parse::<u64>()
            .map_err(|e| Error::Config(format!("invalid STORE_TIMEOUT_MS: {e}")))?;

        let store_retries = env_or("STORE_RETRIES", "3")
            .parse::<u32>()
            .map_err(|e| Error::Config(format!("invalid STORE_RETRIES: {e}")))?;

        let cache_ttl_secs = env_or("CACHE_TTL_SECS", "60")
            .parse::<u64>()
            .map_err(|e| Error::Config(format!("invalid CACHE_TTL_SECS: {e}")))?;

        let fail_open = env_or("FAIL_OPEN", "false")
            .parse::<bool>()
            .map_err(|e| Error::Config(format!("invalid FAIL_OPEN: {e}")))?;

        let policy_file = std::env::var("POLICY_FILE")
            .ok()
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let config = Self {
            bind_addr,
            redis_url,
            key_prefix: env_or("KEY_PREFIX", "gatekeep"),
            store_timeout: Duration::from_millis(store_timeout_ms),
            store_retries,
            fail_open,
            policy_file,
            cache_ttl: Duration::from_secs(cache_ttl_secs),
            log_level: env_or("LOG_LEVEL", "info"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn apply_cli(mut self, cli: Cli) -> Result<Self> {
        if let Some(bind) = cli.bind {
            self.bind_addr = bind;
        }
        if let Some(url) = cli.redis_url {
            self.redis_url = Some(url);
        }
        if let Some(path) = cli.policy_file {
            self.policy_file = Some(path);
        }
        if cli.fail_open {
            self.fail_open = true;
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_timeout.is_zero() {
            return Err(Error::Config("store timeout must be greater than 0".into()));
        }
        // Store round-trips bound the admission decision's own latency;
        // a timeout above one second defeats that bound.
        if self.store_timeout > Duration::from_secs(1) {
            return Err(Error::Config(
                "store timeout must not exceed one second".into(),
            ));
        }
        if self.store_retries == 0 || self.store_retries > 3 {
            return Err(Error::Config("store retries must be between 1 and 3".into()));
        }
        if self.key_prefix.is_empty() {
            return Err(Error::Config("key prefix must not be empty".into()));
        }
        if self.cache_ttl.is_zero() {
            return Err(Error::Config("cache ttl must be greater than 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            bind_addr: "127.0.0.1:3000".parse().unwrap(),
            redis_url: None,
            key_prefix: "gatekeep".to_string(),
            store_timeout: Duration::from_millis(250),
            store_retries: 3,
            fail_open: false,
            policy_file: None,
            cache_ttl: Duration::from_secs(60),
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = base_config();
        config.store_timeout = Duration::ZERO;
        assert!(config.validate().is_err());
    }

    #[test]
    fn timeout_above_one_second_rejected() {
        let mut config = base_config();
        config.store_timeout = Duration::from_secs(2);
        assert!(config.validate().is_err());
    }

    #[test]
    fn retries_bounded() {
        let mut config = base_config();
        config.store_retries = 0;
        assert!(config.validate().is_err());
        config.store_retries = 4;
        assert!(config.validate().is_err());
        config.store_retries = 3;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cli_overrides_apply() {
        let cli = Cli {
            bind: Some("0.0.0.0:8080".parse().unwrap()),
            redis_url: Some("redis://example:6379".to_string()),
            policy_file: None,
            fail_open: true,
        };

        let config = base_config().apply_cli(cli).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:8080".parse().unwrap());
        assert_eq!(config.redis_url.as_deref(), Some("redis://example:6379"));
        assert!(config.fail_open);
    }
}
