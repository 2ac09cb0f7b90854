use serde::Deserialize;

/// Error body returned with non-2xx responses
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ErrorResponse {
    /// `code`, plus `detail` when present
    pub fn describe(&self) -> String {
        match &self.detail {
            Some(detail) => format!("{}: {}", self.code, detail),
            None => self.code.clone(),
        }
    }
}

/// Request headers carried by signed calls
pub const HEADER_API_KEY: &str = "Api-Key";
pub const HEADER_TIMESTAMP: &str = "Api-Timestamp";
pub const HEADER_CONTENT_HASH: &str = "Api-Content-Hash";
pub const HEADER_SIGNATURE: &str = "Api-Signature";
