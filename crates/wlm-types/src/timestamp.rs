//! Store-assigned save timestamps.
//!
//! A save timestamp is an opaque version token the store hands back on every
//! write. Its textual form is fixed-width (`YYYY-MM-DD HH:MM:SS.ffffff`), so
//! string order and chronological order agree. Callers compare tokens for
//! equality; only the changed-since filter relies on the ordering.

use std::str::FromStr;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// `chrono` format string for the wire form.
pub const SAVE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Errors produced when parsing a save timestamp.
#[derive(Debug, thiserror::Error)]
pub enum TimestampError {
    /// The text is not `YYYY-MM-DD HH:MM:SS.ffffff`.
    #[error("invalid save timestamp {value:?}: {source}")]
    Format {
        /// The rejected text.
        value: String,
        /// The underlying parse error.
        source: chrono::ParseError,
    },
}

/// Version token assigned by the store on every write.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SaveTimestamp(String);

impl SaveTimestamp {
    /// Parse and validate the wire form.
    ///
    /// # Errors
    ///
    /// Returns [`TimestampError::Format`] if `value` is not a valid
    /// timestamp with microsecond precision.
    pub fn parse(value: &str) -> Result<Self, TimestampError> {
        let parsed = NaiveDateTime::parse_from_str(value, SAVE_TIMESTAMP_FORMAT).map_err(
            |source| TimestampError::Format {
                value: value.to_owned(),
                source,
            },
        )?;
        Ok(Self::from_datetime(parsed))
    }

    /// Format a date-time into the wire form, truncating below microseconds.
    pub fn from_datetime(value: NaiveDateTime) -> Self {
        Self(value.format(SAVE_TIMESTAMP_FORMAT).to_string())
    }

    /// The timestamp as a date-time.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.0, SAVE_TIMESTAMP_FORMAT).ok()
    }

    /// Borrow the wire form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for SaveTimestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SaveTimestamp {
    type Error = TimestampError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<SaveTimestamp> for String {
    fn from(value: SaveTimestamp) -> Self {
        value.0
    }
}

impl core::fmt::Display for SaveTimestamp {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}
