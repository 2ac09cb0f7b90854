//! Event sink that writes decoded hub events to the log

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

use bxfeed_connector_lib::{FeedEvent, FeedHandler, HandlerResult};

pub struct LogSink;

#[async_trait]
impl FeedHandler for LogSink {
    async fn handle(&self, event: Arc<FeedEvent>) -> HandlerResult {
        match event.as_ref() {
            FeedEvent::Ticker(t) => info!(
                symbol = %t.symbol,
                last = %t.last_trade_rate,
                bid = %t.bid_rate,
                ask = %t.ask_rate,
                "ticker"
            ),
            FeedEvent::Trades(trades) => {
                for t in trades {
                    info!(
                        market = t.market_symbol.as_deref().unwrap_or("unknown"),
                        id = %t.id,
                        rate = %t.rate,
                        quantity = %t.quantity,
                        side = ?t.taker_side,
                        "trade"
                    );
                }
            }
            FeedEvent::Order(o) => info!(
                id = %o.id,
                market = %o.market_symbol,
                direction = ?o.direction,
                status = %o.status,
                filled = %o.fill_quantity,
                "order"
            ),
            FeedEvent::Balance(b) => info!(
                currency = %b.currency_symbol,
                total = %b.total,
                available = %b.available,
                "balance"
            ),
            FeedEvent::Executions(executions) => {
                for e in executions {
                    info!(
                        id = %e.id,
                        market = %e.market_symbol,
                        order_id = %e.order_id,
                        rate = %e.rate,
                        quantity = %e.quantity,
                        taker = e.is_taker,
                        "execution"
                    );
                }
            }
            FeedEvent::Raw { category, payload } => {
                debug!(category = %category, payload = %payload, "event")
            }
        }
        Ok(())
    }
}
