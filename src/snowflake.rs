//! Snowflake message identifiers.
//!
//! Discord ids are 64-bit snowflakes whose top 42 bits encode the creation
//! time in milliseconds since the Discord epoch. The wire format is a JSON
//! string; internally they are kept numeric so ordering and timestamp
//! extraction stay cheap.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Milliseconds between the Unix epoch and the Discord epoch (2015-01-01).
pub const DISCORD_EPOCH_MS: u64 = 1_420_070_400_000;

/// A 64-bit monotone message/channel/guild identifier.
///
/// Ordering follows creation time: snowflakes compare by their numeric
/// value, and the timestamp occupies the most significant bits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, derive_more::Display, derive_more::From,
)]
#[display("{}", _0)]
pub struct Snowflake(u64);

impl Snowflake {
    /// Raw numeric value.
    pub fn value(self) -> u64 {
        self.0
    }

    /// Creation time in milliseconds since the Unix epoch.
    pub fn timestamp_ms(self) -> u64 {
        (self.0 >> 22) + DISCORD_EPOCH_MS
    }

    /// Creation time as a UTC datetime.
    pub fn created_at(self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.timestamp_ms() as i64)
            .single()
            .unwrap_or_else(Utc::now)
    }

    /// Build a snowflake whose timestamp field holds `unix_ms`.
    ///
    /// The non-timestamp bits are zero; useful for constructing ordering
    /// boundaries ("everything created after T").
    pub fn from_unix_ms(unix_ms: u64) -> Self {
        Self((unix_ms.saturating_sub(DISCORD_EPOCH_MS)) << 22)
    }
}

impl std::str::FromStr for Snowflake {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>().map(Self)
    }
}

impl Serialize for Snowflake {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Snowflake {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
