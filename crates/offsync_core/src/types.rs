//! Shared identifier and time types.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Unique key of a pending write record.
///
/// Keys double as storage keys and as the idempotency key sent with every
/// remote write, so a replayed record can be recognised by the endpoint.
/// Generated keys look like `pw-3f2a9c...` (a v4 UUID in simple form).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    /// Prefix of generated keys.
    pub const PREFIX: &'static str = "pw-";

    /// Generates a fresh random key.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("{}{}", Self::PREFIX, Uuid::new_v4().simple()))
    }

    /// Wraps an existing key after validating it as a storage name.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not a valid storage name.
    pub fn parse(key: impl Into<String>) -> CoreResult<Self> {
        let key = key.into();
        offsync_storage::validate_name(&key)?;
        Ok(Self(key))
    }

    /// Returns the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RecordKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for RecordKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Milliseconds since the Unix epoch.
///
/// A clock set before 1970 reads as zero.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
