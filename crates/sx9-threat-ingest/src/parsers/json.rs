//! JSON pass-through parser.

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{IngestError, Result};

/// Decode `body` into `T`, wrapping any failure as `IngestError::Parse`
/// rather than the raw `serde_json::Error` (sources return arbitrary
/// malformed bodies; adapters never need the full `serde_json` error
/// chain, just a message).
pub fn decode<T: DeserializeOwned>(body: &str) -> Result<T> {
    serde_json::from_str(body).map_err(|err| IngestError::Parse(err.to_string()))
}

/// Decode into a raw `Value` when the caller has not yet settled on a
/// concrete shape (adapter-boundary permissive decode, per the "dynamic
/// shape of upstream payloads" pattern).
pub fn decode_value(body: &str) -> Result<Value> {
    decode(body)
}
