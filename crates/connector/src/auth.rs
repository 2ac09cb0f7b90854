use hmac::{Hmac, Mac};
use sha2::{Digest, Sha512};
use thiserror::Error;
use uuid::Uuid;

type HmacSha512 = Hmac<Sha512>;

/// API key pair used for both the hub challenge and signed REST calls
#[derive(Clone)]
pub struct ApiCredentials {
    pub api_key: String,
    api_secret: String,
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid signing key: {0}")]
    InvalidKey(String),
}

/// Signed hub authentication challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Unix time in milliseconds, truncated to whole seconds
    pub timestamp: String,
    pub nonce: String,
    /// Hex HMAC-SHA512 over `timestamp + nonce`
    pub signature: String,
}

impl ApiCredentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Build the arguments for the hub `Authenticate` call
    pub fn sign_challenge(&self) -> Result<Challenge, AuthError> {
        let timestamp = (chrono::Utc::now().timestamp() * 1000).to_string();
        let nonce = Uuid::new_v4().to_string();
        let signature = self.sign(&format!("{}{}", timestamp, nonce))?;
        Ok(Challenge {
            timestamp,
            nonce,
            signature,
        })
    }

    /// Signature for a REST request: HMAC over
    /// `timestamp + uri + method + content_hash`
    pub fn sign_rest_request(
        &self,
        timestamp: &str,
        uri: &str,
        method: &str,
        content_hash: &str,
    ) -> Result<String, AuthError> {
        self.sign(&format!("{}{}{}{}", timestamp, uri, method, content_hash))
    }

    pub fn sign(&self, message: &str) -> Result<String, AuthError> {
        let mut mac = HmacSha512::new_from_slice(self.api_secret.as_bytes())
            .map_err(|e| AuthError::InvalidKey(e.to_string()))?;
        mac.update(message.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

/// Hex SHA-512 of a request body
pub fn content_hash(body: &[u8]) -> String {
    hex::encode(Sha512::digest(body))
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}
