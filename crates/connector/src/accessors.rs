//! Memoized REST accessors
//!
//! Each accessor caches its decoded result per argument set. TTLs come from
//! the environment's cache config; `CallOptions` override them per call.

use bxfeed_metadata::CacheConfig;
use bxfeed_middleware::{CallArgs, CallOptions, Memo};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::debug;

use crate::error::ExchangeError;
use crate::messages::{Balance, Order, Ticker};
use crate::traits::ExchangeApi;

fn memo<V: Clone>(lifetime: Duration, max_entries: Option<usize>) -> Memo<V> {
    match max_entries.and_then(NonZeroUsize::new) {
        Some(capacity) => Memo::bounded(lifetime, capacity),
        None => Memo::new(lifetime),
    }
}

fn decode_records<T: DeserializeOwned>(records: Vec<Value>) -> Result<Vec<T>, ExchangeError> {
    records
        .into_iter()
        .map(|record| serde_json::from_value(record).map_err(ExchangeError::from))
        .collect()
}

pub struct RestAccessors<A: ExchangeApi> {
    api: A,
    balances: Memo<Vec<Balance>>,
    orders: Memo<Vec<Order>>,
    tickers: Memo<Vec<Ticker>>,
}

impl<A: ExchangeApi> RestAccessors<A> {
    pub fn new(api: A, config: &CacheConfig) -> Self {
        Self {
            api,
            balances: memo(config.balances_ttl(), config.max_entries),
            orders: memo(config.orders_ttl(), config.max_entries),
            tickers: memo(config.tickers_ttl(), config.max_entries),
        }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Account balances, without zero totals when `skip_empty` is set
    pub async fn balances(
        &self,
        skip_empty: bool,
        options: CallOptions,
    ) -> Result<Vec<Balance>, ExchangeError> {
        let args = CallArgs::new().kwarg("skip_empty", &skip_empty);
        self.balances
            .try_get_or_insert_async(&args, options, || async {
                debug!(skip_empty, "Fetching balances");
                let mut balances: Vec<Balance> = decode_records(self.api.balances().await?)?;
                if skip_empty {
                    balances.retain(|b| !b.total.is_zero());
                }
                Ok(balances)
            })
            .await
    }

    /// Open orders followed by recently closed ones, at most `limit` in total.
    /// Both lists are fetched concurrently.
    pub async fn orders(
        &self,
        opened: bool,
        closed: bool,
        limit: usize,
        options: CallOptions,
    ) -> Result<Vec<Order>, ExchangeError> {
        let args = CallArgs::new()
            .kwarg("opened", &opened)
            .kwarg("closed", &closed)
            .kwarg("limit", &limit);
        self.orders
            .try_get_or_insert_async(&args, options, || async {
                debug!(opened, closed, limit, "Fetching orders");
                let open = async {
                    if opened {
                        self.api.open_orders().await
                    } else {
                        Ok(Vec::new())
                    }
                };
                let done = async {
                    if closed {
                        self.api.closed_orders(limit).await
                    } else {
                        Ok(Vec::new())
                    }
                };
                let (open, done) = tokio::try_join!(open, done)?;

                let mut orders: Vec<Order> = decode_records(open)?;
                orders.extend(decode_records::<Order>(done)?);
                orders.truncate(limit);
                Ok(orders)
            })
            .await
    }

    pub async fn tickers(&self, options: CallOptions) -> Result<Vec<Ticker>, ExchangeError> {
        self.tickers
            .try_get_or_insert_async(&CallArgs::new(), options, || async {
                debug!("Fetching tickers");
                decode_records(self.api.tickers().await?)
            })
            .await
    }
}
