//! Hub transport
//!
//! `HubTransport` is the seam between the subscription client and the
//! network. `SignalrTransport` speaks the classic SignalR handshake
//! (negotiate, websocket connect, start) and then shuttles text frames
//! through channels.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ConnectorError;

pub const CLIENT_PROTOCOL: &str = "1.5";

/// Timeout for negotiate, websocket handshake and start
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Error(String),
    Closed,
}

/// One live connection. Dropping `outbound` closes it.
pub struct HubConnection {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait HubTransport: Send + Sync {
    async fn connect(&self, hub: &str) -> Result<HubConnection, ConnectorError>;
}

#[derive(Deserialize)]
struct NegotiateResponse {
    #[serde(rename = "ConnectionToken")]
    connection_token: String,
}

pub struct SignalrTransport {
    endpoint: Url,
    http: reqwest::Client,
    timeout: Duration,
}

impl SignalrTransport {
    /// `endpoint` is the SignalR base URL, e.g. https://socket-v3.bittrex.com/signalr
    pub fn new(endpoint: &str) -> Result<Self, ConnectorError> {
        Self::with_timeout(endpoint, CONNECTION_TIMEOUT)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> Result<Self, ConnectorError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| ConnectorError::ConnectionFailed(format!("invalid endpoint: {}", e)))?;
        if endpoint.cannot_be_a_base() {
            return Err(ConnectorError::ConnectionFailed(format!(
                "invalid endpoint: {}",
                endpoint
            )));
        }
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;
        Ok(Self {
            endpoint,
            http,
            timeout,
        })
    }

    fn connection_data(hub: &str) -> String {
        serde_json::json!([{ "name": hub }]).to_string()
    }

    fn url(&self, action: &str, params: &[(&str, &str)]) -> Result<Url, ConnectorError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| ConnectorError::ConnectionFailed("invalid endpoint".to_string()))?
            .pop_if_empty()
            .push(action);
        url.query_pairs_mut().extend_pairs(params);
        Ok(url)
    }

    fn websocket_url(&self, params: &[(&str, &str)]) -> Result<Url, ConnectorError> {
        let mut url = self.url("connect", params)?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ConnectorError::ConnectionFailed(format!("cannot use {} for {}", scheme, url)))?;
        Ok(url)
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, ConnectorError> {
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(format!("{}: {}", url.path(), e)))?;
        if !response.status().is_success() {
            return Err(ConnectorError::ConnectionFailed(format!(
                "{} returned {}",
                url.path(),
                response.status()
            )));
        }
        Ok(response)
    }

    async fn negotiate(&self, connection_data: &str) -> Result<String, ConnectorError> {
        let url = self.url(
            "negotiate",
            &[("clientProtocol", CLIENT_PROTOCOL), ("connectionData", connection_data)],
        )?;
        let negotiated: NegotiateResponse = self
            .get(url)
            .await?
            .json()
            .await
            .map_err(|e| ConnectorError::ConnectionFailed(format!("negotiate: {}", e)))?;
        Ok(negotiated.connection_token)
    }
}

#[async_trait]
impl HubTransport for SignalrTransport {
    async fn connect(&self, hub: &str) -> Result<HubConnection, ConnectorError> {
        let connection_data = Self::connection_data(hub);
        let token = self.negotiate(&connection_data).await?;
        let params = [
            ("transport", "webSockets"),
            ("clientProtocol", CLIENT_PROTOCOL),
            ("connectionToken", token.as_str()),
            ("connectionData", connection_data.as_str()),
        ];

        let ws_url = self.websocket_url(&params)?;
        info!(endpoint = %self.endpoint, hub, "Connecting to hub websocket");
        let (ws, _) = tokio::time::timeout(self.timeout, connect_async(ws_url.as_str()))
            .await
            .map_err(|_| ConnectorError::ConnectionFailed("websocket connect timed out".to_string()))?
            .map_err(|e| ConnectorError::ConnectionFailed(e.to_string()))?;

        let (mut write, mut read) = ws.split();
        let (in_tx, in_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (out_tx, mut out_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);

        // Reader runs before start so no early frame is lost
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                let event = match msg {
                    Ok(Message::Text(text)) => TransportEvent::Frame(text),
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(e) => {
                            warn!(error = %e, "Dropping non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Hub websocket closed by server");
                        let _ = in_tx.send(TransportEvent::Closed).await;
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        let _ = in_tx.send(TransportEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                if in_tx.send(event).await.is_err() {
                    return;
                }
            }
            let _ = in_tx.send(TransportEvent::Closed).await;
        });

        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text)).await {
                    warn!(error = %e, "Hub websocket write failed");
                    break;
                }
            }
            let _ = write.close().await;
            debug!("Hub websocket writer finished");
        });

        let start = self.url("start", &params)?;
        self.get(start).await?;
        info!(hub, "Hub connection started");

        Ok(HubConnection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiate_url() {
        let transport = SignalrTransport::new("https://socket-v3.bittrex.com/signalr").unwrap();
        let data = SignalrTransport::connection_data("c3");
        let url = transport
            .url("negotiate", &[("clientProtocol", CLIENT_PROTOCOL), ("connectionData", &data)])
            .unwrap();

        assert_eq!(url.path(), "/signalr/negotiate");
        let pairs: Vec<_> = url.query_pairs().into_owned().collect();
        assert_eq!(
            pairs,
            vec![
                ("clientProtocol".to_string(), "1.5".to_string()),
                ("connectionData".to_string(), r#"[{"name":"c3"}]"#.to_string()),
            ]
        );
    }

    #[test]
    fn test_trailing_slash_endpoint() {
        let transport = SignalrTransport::new("http://localhost:9000/signalr/").unwrap();
        let url = transport.url("start", &[]).unwrap();
        assert_eq!(url.path(), "/signalr/start");
    }

    #[test]
    fn test_websocket_url_scheme() {
        let secure = SignalrTransport::new("https://socket-v3.bittrex.com/signalr").unwrap();
        let url = secure.websocket_url(&[("transport", "webSockets")]).unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/signalr/connect");

        let plain = SignalrTransport::new("http://127.0.0.1:8080/signalr").unwrap();
        assert_eq!(plain.websocket_url(&[]).unwrap().scheme(), "ws");
    }

    #[test]
    fn test_invalid_endpoint() {
        assert!(SignalrTransport::new("not a url").is_err());
        assert!(SignalrTransport::new("mailto:ops@example.com").is_err());
    }
}
