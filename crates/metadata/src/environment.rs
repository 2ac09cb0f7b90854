use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::MetadataError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum KeyType {
    ApiKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeySpec {
    #[serde(rename = "type")]
    pub key_type: KeyType,
    pub description: Option<String>,
    pub required: Option<bool>,
    pub fields: Vec<String>,
    /// Where to read the values from, e.g. `env:BX_API_KEY,BX_API_SECRET`
    pub source: Option<String>,
}

/// TTLs for the memoized REST accessors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    #[serde(default = "default_balances_ttl_secs")]
    pub balances_ttl_secs: u64,
    #[serde(default = "default_orders_ttl_secs")]
    pub orders_ttl_secs: u64,
    #[serde(default = "default_tickers_ttl_secs")]
    pub tickers_ttl_secs: u64,
    /// Upper bound on distinct argument sets kept per accessor
    pub max_entries: Option<usize>,
}

pub const DEFAULT_BALANCES_TTL_SECS: u64 = 30;
pub const DEFAULT_ORDERS_TTL_SECS: u64 = 30;
pub const DEFAULT_TICKERS_TTL_SECS: u64 = 5;

fn default_balances_ttl_secs() -> u64 {
    DEFAULT_BALANCES_TTL_SECS
}

fn default_orders_ttl_secs() -> u64 {
    DEFAULT_ORDERS_TTL_SECS
}

fn default_tickers_ttl_secs() -> u64 {
    DEFAULT_TICKERS_TTL_SECS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            balances_ttl_secs: default_balances_ttl_secs(),
            orders_ttl_secs: default_orders_ttl_secs(),
            tickers_ttl_secs: default_tickers_ttl_secs(),
            max_entries: None,
        }
    }
}

impl CacheConfig {
    pub fn balances_ttl(&self) -> Duration {
        Duration::from_secs(self.balances_ttl_secs)
    }

    pub fn orders_ttl(&self) -> Duration {
        Duration::from_secs(self.orders_ttl_secs)
    }

    pub fn tickers_ttl(&self) -> Duration {
        Duration::from_secs(self.tickers_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Environment {
    pub name: String,
    pub feed: String,
    pub keys: Option<HashMap<String, KeySpec>>,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Seconds between background REST refreshes; unset disables polling
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

impl Environment {
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        MetadataError::load_yaml(path)
    }

    /// First key of the given type, if any
    pub fn key_of_type(&self, key_type: KeyType) -> Option<(&str, &KeySpec)> {
        self.keys
            .as_ref()?
            .iter()
            .find(|(_, spec)| spec.key_type == key_type)
            .map(|(name, spec)| (name.as_str(), spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_load_environment() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
name: bittrex-prod
feed: bittrex
keys:
  bittrex:
    type: api_key
    fields:
      - api_key
      - api_secret
    source: env:BX_API_KEY,BX_API_SECRET
cache:
  tickers_ttl_secs: 2
poll_interval_secs: 60
"#
        )
        .unwrap();

        let env = Environment::load(file.path()).unwrap();
        assert_eq!(env.name, "bittrex-prod");
        assert_eq!(env.feed, "bittrex");
        assert_eq!(env.cache.balances_ttl(), Duration::from_secs(30));
        assert_eq!(env.cache.orders_ttl(), Duration::from_secs(30));
        assert_eq!(env.cache.tickers_ttl(), Duration::from_secs(2));
        assert_eq!(env.poll_interval_secs, Some(60));

        let (name, spec) = env.key_of_type(KeyType::ApiKey).unwrap();
        assert_eq!(name, "bittrex");
        assert_eq!(spec.source.as_deref(), Some("env:BX_API_KEY,BX_API_SECRET"));
    }

    #[test]
    fn test_unknown_key_type_rejected() {
        let result: Result<Environment, _> = serde_yaml::from_str(
            r#"
name: bittrex-prod
feed: bittrex
keys:
  alerts:
    type: webhook
    fields:
      - url
"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults_without_keys_or_cache() {
        let env: Environment = serde_yaml::from_str(
            r#"
name: bittrex-public
feed: bittrex
"#,
        )
        .unwrap();
        assert!(env.keys.is_none());
        assert!(env.key_of_type(KeyType::ApiKey).is_none());
        assert_eq!(env.cache, CacheConfig::default());
        assert!(env.poll_interval_secs.is_none());
    }
}
