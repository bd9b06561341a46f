//! Time-ordered identifiers shared by commits and releases.
//!
//! Format: `YYYY-MM-DD_HH-MM-SS.ffffff__NNNN`, a UTC timestamp with
//! microsecond resolution followed by a random four-digit suffix. Every
//! field is zero-padded and fixed width, so byte order equals time order.
//! The suffix only separates ids minted in the same microsecond; it carries
//! no ordering meaning.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.6f";
const TIMESTAMP_LEN: usize = 26;
const SEPARATOR: &str = "__";

/// Total length of a well-formed id.
pub const ID_LEN: usize = TIMESTAMP_LEN + 2 + 4;

/// Sentinel used when nothing has been committed yet.
const EPOCH_ID: &str = "1970-01-01_00-00-00.000000__0000";

// Byte template: `d` is an ASCII digit, anything else must match literally.
const TEMPLATE: &[u8; ID_LEN] = b"dddd-dd-dd_dd-dd-dd.dddddd__dddd";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UniqueId(String);

impl UniqueId {
    /// Mint an id for the current UTC instant.
    pub fn generate() -> Self {
        Self::at(Utc::now())
    }

    /// Mint an id for `timestamp` with a random suffix.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        let suffix: u16 = rand::thread_rng().gen_range(0..10_000);
        Self::with_suffix(timestamp, suffix)
    }

    /// Mint an id for `timestamp` with an explicit suffix (`0..=9999`).
    pub fn with_suffix(timestamp: DateTime<Utc>, suffix: u16) -> Self {
        Self(format!(
            "{}{SEPARATOR}{:04}",
            timestamp.format(TIMESTAMP_FORMAT),
            suffix % 10_000
        ))
    }

    /// Parse `value` and return the embedded timestamp.
    pub fn parse(value: &str) -> Result<DateTime<Utc>, CoreError> {
        let malformed = |reason: &'static str| CoreError::MalformedId {
            value: value.to_string(),
            reason,
        };

        let bytes = value.as_bytes();
        if bytes.len() != ID_LEN {
            return Err(malformed("wrong length"));
        }
        for (byte, expected) in bytes.iter().zip(TEMPLATE.iter()) {
            let ok = match expected {
                b'd' => byte.is_ascii_digit(),
                literal => byte == literal,
            };
            if !ok {
                return Err(malformed("does not match the fixed-width pattern"));
            }
        }

        let field = |start: usize, end: usize| -> u32 {
            value[start..end]
                .bytes()
                .fold(0, |acc, b| acc * 10 + u32::from(b - b'0'))
        };
        let year = field(0, 4) as i32;
        let (month, day) = (field(5, 7), field(8, 10));
        let (hour, minute, second) = (field(11, 13), field(14, 16), field(17, 19));
        let micros = field(20, 26);

        NaiveDate::from_ymd_opt(year, month, day)
            .and_then(|date| date.and_hms_micro_opt(hour, minute, second, micros))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| malformed("not a valid calendar time"))
    }

    /// `true` iff [`UniqueId::parse`] succeeds.
    pub fn is_valid(value: &str) -> bool {
        Self::parse(value).is_ok()
    }

    /// The embedded timestamp.
    pub fn timestamp(&self) -> DateTime<Utc> {
        // Construction always validates, so re-parsing cannot fail.
        Self::parse(&self.0).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        Self(EPOCH_ID.to_string())
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for UniqueId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)?;
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for UniqueId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)?;
        Ok(Self(s))
    }
}

impl From<UniqueId> for String {
    fn from(id: UniqueId) -> Self {
        id.0
    }
}

impl AsRef<str> for UniqueId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
