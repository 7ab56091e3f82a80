//! Zone serial number generation.
//!
//! Serials never move backwards. The value persisted with the zone is the
//! only input besides the clock, so restarts and clock skew cannot produce a
//! serial at or below one that secondaries have already seen.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ConfigError;

/// Serial assigned to a freshly created zone
pub const INITIAL_SERIAL: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerialScheme {
    /// Plain `current + 1`
    #[default]
    Increment,
    /// RFC 1912 style `YYYYMMDDnn`, falling back to `current + 1` once the
    /// current serial is already at or past today's base value
    DateBased,
}

impl FromStr for SerialScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "increment" => Ok(SerialScheme::Increment),
            "date" | "date_based" | "datebased" => Ok(SerialScheme::DateBased),
            other => Err(ConfigError::InvalidSerialScheme(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SerialManager {
    scheme: SerialScheme,
}

impl SerialManager {
    pub fn new(scheme: SerialScheme) -> Self {
        Self { scheme }
    }

    /// Compute the serial following `current`.
    ///
    /// Returns `None` when no larger `u32` exists; callers must refuse the
    /// mutation rather than wrap.
    pub fn next(&self, current: u32, now: DateTime<Utc>) -> Option<u32> {
        let incremented = current.checked_add(1)?;
        match self.scheme {
            SerialScheme::Increment => Some(incremented),
            SerialScheme::DateBased => {
                let base = date_base(now);
                Some(base.max(incremented))
            }
        }
    }
}

/// `YYYYMMDD00` for the given instant
fn date_base(now: DateTime<Utc>) -> u32 {
    now.year() as u32 * 1_000_000 + now.month() * 10_000 + now.day() * 100
}
