//! Service configuration.
//!
//! Load from: an explicit path, else env `BLOCKCACHE_CONFIG_PATH`, else
//! `./config/blockcache.json`, else built-in defaults. Every field is optional
//! in the file.

use crate::cache::CacheConfig;
use crate::chain::FetchConfig;
use crate::limit::LimiterConfig;
use crate::refresh::RefresherConfig;
use crate::resolve::ResolverConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

pub const CONFIG_PATH_ENV: &str = "BLOCKCACHE_CONFIG_PATH";
const DEFAULT_CONFIG_PATH: &str = "./config/blockcache.json";
const DEFAULT_DB_PATH: &str = "./data/blockcache.sqlite";

// Upper bounds keep backoff and window arithmetic far from overflow.
const MAX_RETRIES: u32 = 16;
const MAX_RETRY_BACKOFF_MS: u64 = 60_000;
const MAX_WINDOW_SECS: u64 = 86_400;
const MAX_EXPIRY_SECS: u64 = 7 * 86_400;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("io: {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid rpc url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    pub rpc: FetchConfig,
    pub db_path: PathBuf,
    pub resolver: ResolverConfig,
    pub limiter: LimiterConfig,
    pub refresher: RefresherConfig,
    pub cache: CacheConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            rpc: FetchConfig::default(),
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            resolver: ResolverConfig::default(),
            limiter: LimiterConfig::default(),
            refresher: RefresherConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl ServiceConfig {
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_json(&content)?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Resolve the config source as described in the module docs. An explicit
    /// path must exist; the fallbacks are optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load_from_path(path);
        }
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::load_from_path(Path::new(&path));
        }
        let fallback = Path::new(DEFAULT_CONFIG_PATH);
        if fallback.exists() {
            return Self::load_from_path(fallback);
        }
        let config = Self::default();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = url::Url::parse(&self.rpc.url)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!(
                "rpc url scheme must be http or https, got {}",
                url.scheme()
            )));
        }
        if self.rpc.max_retries > MAX_RETRIES {
            return Err(ConfigError::Invalid(format!(
                "rpc.max_retries must be <= {}",
                MAX_RETRIES
            )));
        }
        if self.rpc.retry_backoff_ms > MAX_RETRY_BACKOFF_MS {
            return Err(ConfigError::Invalid(format!(
                "rpc.retry_backoff_ms must be <= {}",
                MAX_RETRY_BACKOFF_MS
            )));
        }
        if self.limiter.limit == 0 {
            return Err(ConfigError::Invalid("limiter.limit must be > 0".into()));
        }
        if self.limiter.window_secs == 0 {
            return Err(ConfigError::Invalid("limiter.window_secs must be > 0".into()));
        }
        if self.limiter.window_secs > MAX_WINDOW_SECS {
            return Err(ConfigError::Invalid(format!(
                "limiter.window_secs must be <= {}",
                MAX_WINDOW_SECS
            )));
        }
        if self.limiter.expiry_secs > MAX_EXPIRY_SECS {
            return Err(ConfigError::Invalid(format!(
                "limiter.expiry_secs must be <= {}",
                MAX_EXPIRY_SECS
            )));
        }
        if self.limiter.expiry_secs < self.limiter.window_secs {
            return Err(ConfigError::Invalid(
                "limiter.expiry_secs must cover the window".into(),
            ));
        }
        if self.refresher.interval_secs == 0 {
            return Err(ConfigError::Invalid("refresher.interval_secs must be > 0".into()));
        }
        if self.resolver.special_ttl_secs == 0 || self.refresher.ttl_secs == 0 {
            return Err(ConfigError::Invalid("snapshot ttl must be > 0".into()));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigError::Invalid("cache.capacity must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limit::FailurePolicy;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_documented_constants() {
        let c = ServiceConfig::default();
        assert_eq!(c.limiter.limit, 5);
        assert_eq!(c.limiter.window_secs, 60);
        assert_eq!(c.limiter.expiry_secs, 300);
        assert_eq!(c.limiter.failure_policy, FailurePolicy::Closed);
        assert_eq!(c.resolver.special_ttl_secs, 60);
        assert_eq!(c.refresher.interval_secs, 60);
        c.validate().unwrap();
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let c = ServiceConfig::from_json(
            r#"{"rpc": {"url": "https://rpc.example.org"}, "limiter": {"failure_policy": "open"}}"#,
        )
        .unwrap();
        assert_eq!(c.rpc.url, "https://rpc.example.org");
        assert_eq!(c.rpc.max_retries, 3);
        assert_eq!(c.limiter.failure_policy, FailurePolicy::Open);
        assert_eq!(c.limiter.limit, 5);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            ServiceConfig::from_json(r#"{"rpc": {"url": "not a url"}}"#),
            Err(ConfigError::Url(_))
        ));
        assert!(matches!(
            ServiceConfig::from_json(r#"{"limiter": {"limit": 0}}"#),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ServiceConfig::from_json(r#"{"unknown": 1}"#),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn nested_typos_are_rejected() {
        for json in [
            r#"{"limiter": {"limt": 3}}"#,
            r#"{"rpc": {"max_retry": 1}}"#,
            r#"{"resolver": {"ttl": 5}}"#,
            r#"{"refresher": {"interval": 5}}"#,
            r#"{"cache": {"size": 5}}"#,
        ] {
            assert!(
                matches!(ServiceConfig::from_json(json), Err(ConfigError::Parse(_))),
                "accepted {}",
                json
            );
        }
    }

    #[test]
    fn rejects_values_that_would_overflow() {
        for json in [
            r#"{"rpc": {"max_retries": 64}}"#,
            r#"{"rpc": {"retry_backoff_ms": 18446744073709551615}}"#,
            r#"{"limiter": {"window_secs": 18446744073709551615, "expiry_secs": 18446744073709551615}}"#,
            r#"{"limiter": {"expiry_secs": 31536000}}"#,
            r#"{"cache": {"capacity": 0}}"#,
        ] {
            assert!(
                matches!(ServiceConfig::from_json(json), Err(ConfigError::Invalid(_))),
                "accepted {}",
                json
            );
        }
        let c = ServiceConfig::from_json(r#"{"rpc": {"max_retries": 16}, "limiter": {"window_secs": 86400, "expiry_secs": 86400}}"#)
            .unwrap();
        assert_eq!(c.rpc.max_retries, 16);
    }

    #[test]
    fn load_explicit_path() {
        let mut tmp = NamedTempFile::new().unwrap();
        write!(tmp, r#"{{"db_path": "/tmp/x.sqlite"}}"#).unwrap();
        let c = ServiceConfig::load(Some(tmp.path())).unwrap();
        assert_eq!(c.db_path, PathBuf::from("/tmp/x.sqlite"));
        assert!(ServiceConfig::load(Some(Path::new("/nonexistent/blockcache.json"))).is_err());
    }
}
