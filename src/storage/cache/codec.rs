//! Wire encoding for cache payloads stored outside the process.
//!
//! A one-byte tag selects the payload kind:
//!
//! | Tag | Payload |
//! |-----|---------|
//! | `J` | UTF-8 JSON document |
//! | `B` | raw bytes |

use super::CacheValue;
use crate::{Error, Result};

const TAG_JSON: u8 = b'J';
const TAG_BYTES: u8 = b'B';

/// Encodes a cache value.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] if the JSON document cannot be serialized.
pub fn encode(value: &CacheValue) -> Result<Vec<u8>> {
    match value {
        CacheValue::Json(json) => {
            let mut out = vec![TAG_JSON];
            serde_json::to_writer(&mut out, json).map_err(|e| Error::OperationFailed {
                operation: "cache_encode".to_string(),
                cause: e.to_string(),
            })?;
            Ok(out)
        },
        CacheValue::Bytes(bytes) => {
            let mut out = Vec::with_capacity(bytes.len() + 1);
            out.push(TAG_BYTES);
            out.extend_from_slice(bytes);
            Ok(out)
        },
    }
}

/// Decodes a cache value.
///
/// # Errors
///
/// Returns [`Error::OperationFailed`] for an empty payload, an unknown tag,
/// or malformed JSON.
pub fn decode(raw: &[u8]) -> Result<CacheValue> {
    match raw.split_first() {
        Some((&TAG_JSON, body)) => serde_json::from_slice(body)
            .map(CacheValue::Json)
            .map_err(|e| Error::OperationFailed {
                operation: "cache_decode".to_string(),
                cause: e.to_string(),
            }),
        Some((&TAG_BYTES, body)) => Ok(CacheValue::Bytes(body.to_vec())),
        Some((tag, _)) => Err(Error::OperationFailed {
            operation: "cache_decode".to_string(),
            cause: format!("unknown payload tag 0x{tag:02x}"),
        }),
        None => Err(Error::OperationFailed {
            operation: "cache_decode".to_string(),
            cause: "empty payload".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_payload_is_tagged() {
        let encoded = encode(&CacheValue::Json(json!({"herb": "ginseng"}))).unwrap_or_default();
        assert_eq!(encoded.first(), Some(&b'J'));
        assert_eq!(&encoded[1..], br#"{"herb":"ginseng"}"#);
    }

    #[test]
    fn test_bytes_survive_encoding() {
        let value = CacheValue::Bytes(vec![b'J', 0, 255]);
        let decoded = encode(&value).and_then(|raw| decode(&raw));
        assert_eq!(decoded.ok(), Some(value));
    }

    #[test]
    fn test_rejects_bad_payloads() {
        assert!(decode(&[]).is_err());
        assert!(decode(b"Xabc").is_err());
        assert!(decode(b"J{not json").is_err());
    }
}
