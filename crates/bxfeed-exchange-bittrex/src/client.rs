use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use bxfeed_connector_lib::auth::{content_hash, ApiCredentials};
use bxfeed_connector_lib::{ExchangeApi, ExchangeError};

use crate::types::*;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
const MIN_REQUEST_GAP: Duration = Duration::from_millis(200);
/// Largest `pageSize` the closed-orders endpoint accepts
const MAX_PAGE_SIZE: usize = 200;

pub const DEFAULT_BASE_URL: &str = "https://api.bittrex.com/v3";

/// Bittrex v3 REST client
pub struct BittrexClient {
    http: Client,
    credentials: Option<ApiCredentials>,
    base_url: String,
    last_request: tokio::sync::Mutex<tokio::time::Instant>,
}

impl BittrexClient {
    /// `base_url` includes the version prefix, e.g. `https://api.bittrex.com/v3`.
    /// Without credentials only public endpoints work.
    pub fn new(
        base_url: impl Into<String>,
        credentials: Option<ApiCredentials>,
    ) -> Result<Self, ExchangeError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ExchangeError::Request(e.to_string()))?;

        Ok(Self {
            http,
            credentials,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            last_request: tokio::sync::Mutex::new(tokio::time::Instant::now()),
        })
    }

    /// Enforce minimum gap between requests (rate limiting)
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        if elapsed < MIN_REQUEST_GAP {
            tokio::time::sleep(MIN_REQUEST_GAP - elapsed).await;
        }
        *last = tokio::time::Instant::now();
    }

    /// GET `path` and return the JSON array body. Signed requests carry the
    /// API key headers.
    async fn get_records(&self, path: &str, signed: bool) -> Result<Vec<Value>, ExchangeError> {
        self.throttle().await;

        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, signed, "GET request");

        let mut request = self.http.get(&url);
        if signed {
            let credentials = self
                .credentials
                .as_ref()
                .ok_or_else(|| ExchangeError::Auth(format!("{} requires API credentials", path)))?;
            let timestamp = chrono::Utc::now().timestamp_millis().to_string();
            let hash = content_hash(b"");
            let signature = credentials
                .sign_rest_request(&timestamp, &url, "GET", &hash)
                .map_err(|e| ExchangeError::Auth(e.to_string()))?;
            request = request
                .header(HEADER_API_KEY, &credentials.api_key)
                .header(HEADER_TIMESTAMP, &timestamp)
                .header(HEADER_CONTENT_HASH, &hash)
                .header(HEADER_SIGNATURE, &signature);
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ExchangeError::Timeout {
                    timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
                }
            } else {
                ExchangeError::Request(e.to_string())
            }
        })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| ExchangeError::Request(e.to_string()))?;
        if !status.is_success() {
            let body = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.describe())
                .unwrap_or(body);
            warn!(url = %url, status = status.as_u16(), body = %body, "Request failed");
            return Err(ExchangeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl ExchangeApi for BittrexClient {
    async fn balances(&self) -> Result<Vec<Value>, ExchangeError> {
        self.get_records("/balances", true).await
    }

    async fn open_orders(&self) -> Result<Vec<Value>, ExchangeError> {
        self.get_records("/orders/open", true).await
    }

    async fn closed_orders(&self, page_size: usize) -> Result<Vec<Value>, ExchangeError> {
        let page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        let path = format!("/orders/closed?pageSize={}", page_size);
        self.get_records(&path, true).await
    }

    async fn tickers(&self) -> Result<Vec<Value>, ExchangeError> {
        self.get_records("/markets/tickers", false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const EMPTY_SHA512: &str = "cf83e1357eefb8bdf1542850d66d8007d620e4050b5715dc83f4a921d36ce9ce47d0d13c5d85f2b0ff8318d2877eec2f63b931bd47417a81a538327af927da3e";

    async fn setup() -> (MockServer, BittrexClient) {
        let server = MockServer::start().await;
        let credentials = ApiCredentials::new("test-api-key", "test-api-secret");
        let client = BittrexClient::new(server.uri(), Some(credentials)).unwrap();
        (server, client)
    }

    #[tokio::test]
    async fn test_balances_signed() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/balances"))
            .and(header("Api-Key", "test-api-key"))
            .and(header("Api-Content-Hash", EMPTY_SHA512))
            .and(header_exists("Api-Timestamp"))
            .and(header_exists("Api-Signature"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"currencySymbol": "BTC", "total": "1.5", "available": "1.0", "updatedAt": "2024-01-15T10:00:00Z"}
            ])))
            .mount(&server)
            .await;

        let balances = client.balances().await.unwrap();
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0]["currencySymbol"], "BTC");

        // signature covers timestamp + full url + method + content hash
        let requests = server.received_requests().await.unwrap();
        let request = &requests[0];
        let timestamp = request.headers.get("Api-Timestamp").unwrap().to_str().unwrap();
        let expected = ApiCredentials::new("test-api-key", "test-api-secret")
            .sign_rest_request(
                timestamp,
                &format!("{}/balances", server.uri()),
                "GET",
                EMPTY_SHA512,
            )
            .unwrap();
        assert_eq!(
            request.headers.get("Api-Signature").unwrap().to_str().unwrap(),
            expected
        );
    }

    #[tokio::test]
    async fn test_closed_orders_page_size_is_clamped() {
        let (server, client) = setup().await;

        for (requested, sent) in [(0, "1"), (500, "200")] {
            Mock::given(method("GET"))
                .and(path("/orders/closed"))
                .and(query_param("pageSize", sent))
                .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": sent}])))
                .expect(1)
                .mount(&server)
                .await;

            let orders = client.closed_orders(requested).await.unwrap();
            assert_eq!(orders, vec![json!({"id": sent})]);
        }
    }

    #[tokio::test]
    async fn test_closed_orders_page_size() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/orders/closed"))
            .and(query_param("pageSize", "25"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;

        let orders = client.closed_orders(25).await.unwrap();
        assert!(orders.is_empty());
    }

    #[tokio::test]
    async fn test_tickers_are_public() {
        let server = MockServer::start().await;
        let client = BittrexClient::new(format!("{}/", server.uri()), None).unwrap();

        Mock::given(method("GET"))
            .and(path("/markets/tickers"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"symbol": "BTC-USD", "lastTradeRate": "43000", "bidRate": "42999", "askRate": "43001"}
            ])))
            .mount(&server)
            .await;

        let tickers = client.tickers().await.unwrap();
        assert_eq!(tickers[0]["symbol"], "BTC-USD");
        let requests = server.received_requests().await.unwrap();
        assert!(requests[0].headers.get("Api-Key").is_none());
    }

    #[tokio::test]
    async fn test_signed_call_without_credentials() {
        let server = MockServer::start().await;
        let client = BittrexClient::new(server.uri(), None).unwrap();

        let result = client.open_orders().await;
        assert!(matches!(result, Err(ExchangeError::Auth(_))));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_error_status() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/orders/open"))
            .respond_with(
                ResponseTemplate::new(401).set_body_json(json!({"code": "INVALID_SIGNATURE"})),
            )
            .mount(&server)
            .await;

        match client.open_orders().await.unwrap_err() {
            ExchangeError::Status { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, "INVALID_SIGNATURE");
            }
            e => panic!("expected Status, got: {:?}", e),
        }
    }

    #[tokio::test]
    async fn test_unexpected_body_is_decode_error() {
        let (server, client) = setup().await;

        Mock::given(method("GET"))
            .and(path("/balances"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"not\": \"a list\"}"))
            .mount(&server)
            .await;

        assert!(matches!(
            client.balances().await,
            Err(ExchangeError::Decode(_))
        ));
    }
}
