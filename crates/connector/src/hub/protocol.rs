//! SignalR (classic) JSON frames
//!
//! Outbound invocations are `{"H": hub, "M": method, "A": args, "I": id}`.
//! Inbound frames are one of: `{}` keepalive, a response carrying `R` and/or
//! `I`, a hub error carrying `E`, or a batch of pushes under `M`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Serialize)]
pub struct HubInvocation<'a> {
    #[serde(rename = "H")]
    pub hub: &'a str,
    #[serde(rename = "M")]
    pub method: &'a str,
    #[serde(rename = "A")]
    pub args: &'a [Value],
    #[serde(rename = "I")]
    pub id: u64,
}

/// Server-to-client method call
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HubPush {
    #[serde(rename = "H", default)]
    pub hub: String,
    #[serde(rename = "M")]
    pub method: String,
    #[serde(rename = "A", default)]
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    KeepAlive,
    Response { id: Option<u64>, result: Value },
    HubError { id: Option<u64>, message: String },
    Pushes(Vec<HubPush>),
    /// Init and progress frames; not used by the client
    Other,
}

/// Result shape of `Authenticate` and of each `Subscribe` entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InvokeStatus {
    #[serde(rename = "Success")]
    pub success: bool,
    #[serde(rename = "ErrorCode", default)]
    pub error_code: Option<String>,
}

impl InvokeStatus {
    pub fn error_code(&self) -> &str {
        self.error_code.as_deref().unwrap_or("unknown")
    }
}

/// Invocation ids come back as strings (`"I": "3"`) or numbers
fn invocation_id(map: &Map<String, Value>) -> Option<u64> {
    match map.get("I")? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

pub fn parse_frame(text: &str) -> Result<InboundFrame, serde_json::Error> {
    let Value::Object(map) = serde_json::from_str::<Value>(text)? else {
        return Ok(InboundFrame::Other);
    };
    if map.is_empty() {
        return Ok(InboundFrame::KeepAlive);
    }
    if let Some(error) = map.get("E") {
        let message = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(InboundFrame::HubError {
            id: invocation_id(&map),
            message,
        });
    }
    if let Some(Value::Array(messages)) = map.get("M") {
        let pushes = messages
            .iter()
            .cloned()
            .map(serde_json::from_value)
            .collect::<Result<Vec<HubPush>, _>>()?;
        return Ok(InboundFrame::Pushes(pushes));
    }
    if map.contains_key("R") || map.contains_key("I") {
        // progress updates reuse "I" with a "P" payload
        if map.contains_key("P") {
            return Ok(InboundFrame::Other);
        }
        return Ok(InboundFrame::Response {
            id: invocation_id(&map),
            result: map.get("R").cloned().unwrap_or(Value::Null),
        });
    }
    Ok(InboundFrame::Other)
}
