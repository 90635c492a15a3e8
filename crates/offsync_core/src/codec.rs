//! CBOR encoding for persisted records.
//!
//! Every value written to a [`offsync_storage::KvStore`] by this crate goes
//! through these two functions, so the on-disk format is plain CBOR that
//! external tools can read back as a generic `ciborium::Value`.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a value to CBOR bytes.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if serialization fails.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf).map_err(|e| CoreError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Decodes a value from CBOR bytes.
///
/// # Errors
///
/// Returns [`CoreError::Codec`] if the bytes are not valid CBOR for `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::de::from_reader(bytes).map_err(|e| CoreError::Codec(e.to_string()))
}
