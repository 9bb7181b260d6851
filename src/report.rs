//! Report data model shared by the reporting client and the collector.
//!
//! A [`Report`] carries a [`Key`] (the quasi-identifying domain/country/date
//! tuple that the collector protects with k-anonymity), an ordered list of
//! validated [`Value`] labels, and the client's bin assignment for that key.

use std::fmt;

use chrono::NaiveDate;
use derive_more::{Display, Error};
use serde_derive::Serialize;

/// Dates travel inside query names in this form, e.g. `20200203`.
pub const DATE_FORMAT: &str = "%Y%m%d";

/// Including a huge number of values is impractical for reasonable DNS
/// queries, and is unlikely if this library is being used as intended.
pub const MAX_VALUES: usize = 255;

#[derive(Debug, Display, Error)]
pub enum ValueError {
    #[display(fmt = "values cannot contain '.': {}", value)]
    ContainsDot { value: String },
    #[display(fmt = "values must be all lower-case: {}", value)]
    UpperCase { value: String },
    #[display(fmt = "value is longer than 63 bytes: {}", value)]
    TooLong { value: String },
    #[display(fmt = "values must contain only basic ASCII characters: {}", value)]
    NonAscii { value: String },
}

/// A string that has been validated as correctly formatted for inclusion in a
/// [`Report`]: at most 63 bytes, no `'.'`, no upper-case characters, and
/// nothing beyond basic ASCII. These restrictions ensure that a `Value` can be
/// passed through the DNS as a single label without data loss.
///
/// Values are revealed to the recursive resolver and are *not* protected by
/// k-anonymity, so they must never contain identifying information.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Value(String);

impl Value {
    /// Validates `v` and converts it to a `Value`.
    pub fn new(v: &str) -> Result<Value, ValueError> {
        if v.contains('.') {
            return Err(ValueError::ContainsDot { value: v.to_string() });
        }
        if v.chars().any(char::is_uppercase) {
            return Err(ValueError::UpperCase { value: v.to_string() });
        }
        if v.len() > 63 {
            return Err(ValueError::TooLong { value: v.to_string() });
        }
        if !v.is_ascii() {
            return Err(ValueError::NonAscii { value: v.to_string() });
        }
        Ok(Value(v.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The quasi-identifying information associated with a report. It is
/// protected by k-anonymity when bin count filtering is in use.
///
/// `domain` is lower-case without a trailing dot, `country` is a two-letter
/// lower-case code, and `date` is a calendar day in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Key {
    pub domain: String,
    pub country: String,
    pub date: NaiveDate,
}

/// A full report as it travels from the reporting client to the collector.
///
/// The bin assignment is attached by the report builder and consumed by the
/// collector's anonymity filter; reports released by the filter carry no bin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub key: Key,
    /// Zero or more values. A single user can make multiple reports with the
    /// same or different values, but only one report is sent for each key.
    pub values: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) bin: Option<String>,
}

impl Report {
    /// The bin label assigned to this report, if it still carries one.
    pub fn bin(&self) -> Option<&str> {
        self.bin.as_deref()
    }
}

/// Domains are always handled in lower case, without the trailing ".".
pub(crate) fn normalize_domain(domain: &str) -> String {
    domain.strip_suffix('.').unwrap_or(domain).to_lowercase()
}
