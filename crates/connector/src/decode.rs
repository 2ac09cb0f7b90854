//! Hub push payload decoding
//!
//! Push arguments carry base64 text wrapping deflate-compressed JSON. Raw
//! deflate is tried first; zlib-framed data is accepted as a fallback.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use flate2::read::{DeflateDecoder, ZlibDecoder};
use serde_json::Value;
use std::io::Read;

use crate::error::DecodeError;

/// Decode the first push argument. An empty argument list yields `None`.
pub fn decode_payload(args: &[Value]) -> Result<Option<Value>, DecodeError> {
    let Some(first) = args.first() else {
        return Ok(None);
    };
    let text = first
        .as_str()
        .ok_or_else(|| DecodeError::Shape(format!("expected base64 string, got {}", first)))?;
    let compressed = BASE64.decode(text)?;
    let json = inflate(&compressed)?;
    Ok(Some(serde_json::from_slice(&json)?))
}

fn inflate(data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    if DeflateDecoder::new(data).read_to_end(&mut out).is_ok() {
        return Ok(out);
    }
    out.clear();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(DecodeError::Inflate)?;
    Ok(out)
}
