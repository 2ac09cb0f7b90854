use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use crate::error::MetadataError;

/// Channel reserved by the hub for liveness pushes. Never configurable.
pub const HEARTBEAT_CATEGORY: &str = "heartbeat";

pub const DEFAULT_HUB: &str = "c3";
pub const DEFAULT_REST_URL: &str = "https://api.bittrex.com/v3";
pub const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 6;
pub const DEFAULT_INVOKE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    #[default]
    Active,
    Disabled,
}

/// One subscribed category, optionally parameterized by market symbols.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subscription {
    pub category: String,
    #[serde(default)]
    pub markets: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feed {
    pub name: String,
    pub display_name: Option<String>,
    #[serde(default)]
    pub status: FeedStatus,
    /// Hub endpoint, e.g. https://socket-v3.bittrex.com/signalr
    pub endpoint: String,
    #[serde(default = "default_hub")]
    pub hub: String,
    #[serde(default = "default_rest_url")]
    pub rest_url: String,
    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    /// `null` disables the invoke timeout
    #[serde(default = "default_invoke_timeout_secs")]
    pub invoke_timeout_secs: Option<u64>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

fn default_hub() -> String {
    DEFAULT_HUB.to_string()
}

fn default_rest_url() -> String {
    DEFAULT_REST_URL.to_string()
}

fn default_heartbeat_timeout_secs() -> u64 {
    DEFAULT_HEARTBEAT_TIMEOUT_SECS
}

fn default_invoke_timeout_secs() -> Option<u64> {
    Some(DEFAULT_INVOKE_TIMEOUT_SECS)
}

impl Feed {
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        let feed: Feed = MetadataError::load_yaml(path)?;
        feed.validate()?;
        Ok(feed)
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.name.trim().is_empty() {
            return Err(MetadataError::Validation("feed name is empty".to_string()));
        }
        if self.endpoint.trim().is_empty() {
            return Err(MetadataError::Validation(format!(
                "feed '{}' has no endpoint",
                self.name
            )));
        }
        if self.heartbeat_timeout_secs == 0 {
            return Err(MetadataError::Validation(
                "heartbeat_timeout_secs must be positive".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for sub in &self.subscriptions {
            if sub.category.eq_ignore_ascii_case(HEARTBEAT_CATEGORY) {
                return Err(MetadataError::Validation(format!(
                    "category '{}' is reserved",
                    HEARTBEAT_CATEGORY
                )));
            }
            if !seen.insert(sub.category.to_ascii_lowercase()) {
                return Err(MetadataError::Validation(format!(
                    "duplicate subscription category '{}'",
                    sub.category
                )));
            }
        }
        Ok(())
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn invoke_timeout(&self) -> Option<Duration> {
        self.invoke_timeout_secs.map(Duration::from_secs)
    }

    /// Subscribed categories in declaration order
    pub fn categories(&self) -> Vec<&str> {
        self.subscriptions.iter().map(|s| s.category.as_str()).collect()
    }

    /// Category -> market symbols, for categories that are parameterized
    pub fn markets(&self) -> HashMap<String, Vec<String>> {
        self.subscriptions
            .iter()
            .filter_map(|s| s.markets.clone().map(|m| (s.category.clone(), m)))
            .collect()
    }

    pub fn is_enabled(&self) -> bool {
        self.status == FeedStatus::Active
    }
}
