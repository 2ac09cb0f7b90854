use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{ExchangeError, ResolverError};
use crate::messages::FeedEvent;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;
pub type HandlerResult = Result<(), HandlerError>;

/// Consumer of decoded hub events for one or more categories
#[async_trait]
pub trait FeedHandler: Send + Sync {
    async fn handle(&self, event: Arc<FeedEvent>) -> HandlerResult;
}

/// REST endpoints behind the memoized accessors. Records are returned raw
/// and decoded by the caller.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    async fn balances(&self) -> Result<Vec<Value>, ExchangeError>;

    async fn open_orders(&self) -> Result<Vec<Value>, ExchangeError>;

    /// Most recent closed orders, at most `page_size`
    async fn closed_orders(&self, page_size: usize) -> Result<Vec<Value>, ExchangeError>;

    async fn tickers(&self) -> Result<Vec<Value>, ExchangeError>;
}

/// KeyResolver trait for credential sources (env vars, Vault, etc.)
pub trait KeyResolver: Send + Sync {
    /// Resolve keys from a source string (e.g., "env:VAR1,VAR2")
    fn resolve(&self, source: &str) -> Result<HashMap<String, String>, ResolverError>;
}
