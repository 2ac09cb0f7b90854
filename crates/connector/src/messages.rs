//! Typed hub events
//!
//! Each subscription category decodes its JSON payload into one `FeedEvent`.
//! Fields the venue may omit are `Option`; `observed_at` is stamped locally
//! at decode time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DecodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticker {
    pub symbol: String,
    pub last_trade_rate: Decimal,
    pub bid_rate: Decimal,
    pub ask_rate: Decimal,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: String,
    pub market_symbol: String,
    pub direction: Side,
    /// LIMIT, MARKET, CEILING_LIMIT, ...
    #[serde(rename = "type")]
    pub order_type: String,
    #[serde(default)]
    pub quantity: Option<Decimal>,
    #[serde(default)]
    pub limit: Option<Decimal>,
    #[serde(default)]
    pub ceiling: Option<Decimal>,
    #[serde(default)]
    pub time_in_force: Option<String>,
    pub fill_quantity: Decimal,
    pub commission: Decimal,
    pub proceeds: Decimal,
    pub status: String,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub currency_symbol: String,
    pub total: Decimal,
    pub available: Decimal,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    #[serde(default)]
    pub market_symbol: Option<String>,
    pub id: String,
    #[serde(with = "timestamp")]
    pub executed_at: DateTime<Utc>,
    pub quantity: Decimal,
    pub rate: Decimal,
    pub taker_side: Side,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub id: String,
    pub market_symbol: String,
    #[serde(with = "timestamp")]
    pub executed_at: DateTime<Utc>,
    pub quantity: Decimal,
    pub rate: Decimal,
    pub order_id: String,
    pub commission: Decimal,
    pub is_taker: bool,
    #[serde(skip_deserializing, default = "Utc::now")]
    pub observed_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TradeDeltas {
    #[serde(default)]
    market_symbol: Option<String>,
    #[serde(default)]
    deltas: Vec<Trade>,
}

#[derive(Deserialize)]
struct OrderDelta {
    delta: Order,
}

#[derive(Deserialize)]
struct BalanceDelta {
    delta: Balance,
}

#[derive(Deserialize)]
struct ExecutionDeltas {
    #[serde(default)]
    deltas: Vec<Execution>,
}

/// One decoded hub push
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum FeedEvent {
    Ticker(Ticker),
    Trades(Vec<Trade>),
    Order(Order),
    Balance(Balance),
    Executions(Vec<Execution>),
    /// Category without a typed decoder
    Raw { category: String, payload: Value },
}

impl FeedEvent {
    pub fn category(&self) -> &str {
        match self {
            FeedEvent::Ticker(_) => "ticker",
            FeedEvent::Trades(_) => "trade",
            FeedEvent::Order(_) => "order",
            FeedEvent::Balance(_) => "balance",
            FeedEvent::Executions(_) => "execution",
            FeedEvent::Raw { category, .. } => category,
        }
    }
}

/// Subscription category and its payload decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    Ticker,
    Trade,
    Order,
    Balance,
    Execution,
    Other(String),
}

impl Category {
    pub fn from_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "ticker" => Category::Ticker,
            "trade" => Category::Trade,
            "order" => Category::Order,
            "balance" => Category::Balance,
            "execution" => Category::Execution,
            _ => Category::Other(name.to_string()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Category::Ticker => "ticker",
            Category::Trade => "trade",
            Category::Order => "order",
            Category::Balance => "balance",
            Category::Execution => "execution",
            Category::Other(name) => name,
        }
    }

    pub fn decode(&self, payload: Value) -> Result<FeedEvent, DecodeError> {
        let event = match self {
            Category::Ticker => FeedEvent::Ticker(serde_json::from_value(payload)?),
            Category::Trade => {
                let TradeDeltas {
                    market_symbol,
                    mut deltas,
                } = serde_json::from_value(payload)?;
                // the enclosing symbol wins over anything on the delta
                if let Some(symbol) = market_symbol {
                    for trade in &mut deltas {
                        trade.market_symbol = Some(symbol.clone());
                    }
                }
                FeedEvent::Trades(deltas)
            }
            Category::Order => {
                let OrderDelta { delta } = serde_json::from_value(payload)?;
                FeedEvent::Order(delta)
            }
            Category::Balance => {
                let BalanceDelta { delta } = serde_json::from_value(payload)?;
                FeedEvent::Balance(delta)
            }
            Category::Execution => {
                let ExecutionDeltas { deltas } = serde_json::from_value(payload)?;
                FeedEvent::Executions(deltas)
            }
            Category::Other(name) => FeedEvent::Raw {
                category: name.clone(),
                payload,
            },
        };
        Ok(event)
    }
}

/// Venue timestamps: `2024-01-15T10:30:00.123Z`, or without fractional seconds
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FRACTIONAL: &str = "%Y-%m-%dT%H:%M:%S%.fZ";
    const WHOLE: &str = "%Y-%m-%dT%H:%M:%SZ";

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
        NaiveDateTime::parse_from_str(raw, FRACTIONAL)
            .or_else(|_| NaiveDateTime::parse_from_str(raw, WHOLE))
            .map(|naive| naive.and_utc())
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(ts) => serializer.serialize_some(&ts.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| parse(&raw).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use serde_json::json;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_decode_ticker() {
        let before = Utc::now();
        let event = Category::Ticker
            .decode(json!({
                "symbol": "BTC-USD",
                "lastTradeRate": "43000.12",
                "bidRate": "42999.50",
                "askRate": "43001.00"
            }))
            .unwrap();

        let FeedEvent::Ticker(ticker) = event else {
            panic!("expected ticker");
        };
        assert_eq!(ticker.symbol, "BTC-USD");
        assert_eq!(ticker.last_trade_rate, dec("43000.12"));
        assert_eq!(ticker.bid_rate, dec("42999.50"));
        assert!(ticker.observed_at >= before);
    }

    #[test]
    fn test_decode_trades_applies_outer_symbol() {
        let event = Category::Trade
            .decode(json!({
                "marketSymbol": "ETH-USD",
                "sequence": 42,
                "deltas": [
                    {"id": "t1", "executedAt": "2024-01-15T10:30:00.123Z",
                     "quantity": "0.5", "rate": "2500", "takerSide": "BUY"},
                    {"id": "t2", "executedAt": "2024-01-15T10:30:01Z",
                     "quantity": "1", "rate": "2501", "takerSide": "SELL",
                     "marketSymbol": "IGNORED"}
                ]
            }))
            .unwrap();

        let FeedEvent::Trades(trades) = event else {
            panic!("expected trades");
        };
        assert_eq!(trades.len(), 2);
        assert!(trades
            .iter()
            .all(|t| t.market_symbol.as_deref() == Some("ETH-USD")));
        assert_eq!(trades[0].taker_side, Side::Buy);
        assert_eq!(trades[0].executed_at.nanosecond(), 123_000_000);
        assert_eq!(trades[1].executed_at.second(), 1);
    }

    #[test]
    fn test_decode_order_keeps_absent_fields_unset() {
        let event = Category::Order
            .decode(json!({
                "accountId": "acc",
                "sequence": 3,
                "delta": {
                    "id": "o1",
                    "marketSymbol": "BTC-USD",
                    "direction": "SELL",
                    "type": "MARKET",
                    "fillQuantity": "0",
                    "commission": "0",
                    "proceeds": "0",
                    "status": "OPEN",
                    "createdAt": "2024-01-15T10:30:00Z"
                }
            }))
            .unwrap();

        let FeedEvent::Order(order) = event else {
            panic!("expected order");
        };
        assert_eq!(order.direction, Side::Sell);
        assert_eq!(order.order_type, "MARKET");
        assert_eq!(order.quantity, None);
        assert_eq!(order.limit, None);
        assert_eq!(order.updated_at, None);
        assert_eq!(order.closed_at, None);
        assert_eq!(order.created_at.year(), 2024);
    }

    #[test]
    fn test_decode_order_with_optional_fields() {
        let event = Category::Order
            .decode(json!({
                "delta": {
                    "id": "o2",
                    "marketSymbol": "BTC-USD",
                    "direction": "BUY",
                    "type": "LIMIT",
                    "quantity": "0.1",
                    "limit": 40000,
                    "timeInForce": "GOOD_TIL_CANCELLED",
                    "fillQuantity": "0.1",
                    "commission": "3.2",
                    "proceeds": "4000",
                    "status": "CLOSED",
                    "createdAt": "2024-01-15T10:30:00.5Z",
                    "updatedAt": "2024-01-15T10:31:00Z",
                    "closedAt": "2024-01-15T10:31:00.000Z"
                }
            }))
            .unwrap();

        let FeedEvent::Order(order) = event else {
            panic!("expected order");
        };
        assert_eq!(order.quantity, Some(dec("0.1")));
        assert_eq!(order.limit, Some(dec("40000")));
        assert_eq!(order.time_in_force.as_deref(), Some("GOOD_TIL_CANCELLED"));
        assert_eq!(order.updated_at, order.closed_at);
    }

    #[test]
    fn test_decode_balance_and_executions() {
        let balance = Category::Balance
            .decode(json!({
                "accountId": "acc",
                "sequence": 9,
                "delta": {
                    "currencySymbol": "BTC",
                    "total": "1.25",
                    "available": "1.00",
                    "updatedAt": "2024-01-15T10:30:00Z"
                }
            }))
            .unwrap();
        assert!(matches!(balance, FeedEvent::Balance(ref b) if b.total == dec("1.25")));

        let executions = Category::Execution
            .decode(json!({
                "accountId": "acc",
                "sequence": 10,
                "deltas": [{
                    "id": "e1",
                    "marketSymbol": "BTC-USD",
                    "executedAt": "2024-01-15T10:30:00.250Z",
                    "quantity": "0.1",
                    "rate": "43000",
                    "orderId": "o1",
                    "commission": "1.1",
                    "isTaker": true
                }]
            }))
            .unwrap();
        let FeedEvent::Executions(executions) = executions else {
            panic!("expected executions");
        };
        assert_eq!(executions[0].order_id, "o1");
        assert!(executions[0].is_taker);
    }

    #[test]
    fn test_missing_required_field_is_an_error() {
        let err = Category::Ticker
            .decode(json!({"symbol": "BTC-USD", "bidRate": "1", "askRate": "2"}))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Json(_)));
    }

    #[test]
    fn test_bad_timestamp_is_an_error() {
        let result = Category::Balance.decode(json!({
            "delta": {
                "currencySymbol": "BTC",
                "total": "1",
                "available": "1",
                "updatedAt": "15/01/2024"
            }
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_unknown_category_passes_payload_through() {
        let category = Category::from_name("orderbook");
        assert_eq!(category, Category::Other("orderbook".to_string()));

        let payload = json!({"marketSymbol": "BTC-USD", "bidDeltas": []});
        let event = category.decode(payload.clone()).unwrap();
        assert_eq!(event.category(), "orderbook");
        assert_eq!(
            event,
            FeedEvent::Raw {
                category: "orderbook".to_string(),
                payload
            }
        );
    }

    #[test]
    fn test_category_names_are_case_insensitive() {
        assert_eq!(Category::from_name("Ticker"), Category::Ticker);
        assert_eq!(Category::from_name("EXECUTION"), Category::Execution);
        assert_eq!(Category::from_name("trade").name(), "trade");
    }
}
