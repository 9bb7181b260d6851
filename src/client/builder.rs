//! Assembles validated reports from raw domains and values.

use chrono::{NaiveDate, Utc};
use derive_more::{Display, Error, From};

use crate::client::binner::Binner;
use crate::report::{normalize_domain, Key, Report, Value};
use crate::wire::protocol::{validate_name, ProtocolError};

#[derive(Debug, Display, From, Error)]
pub enum BuildError {
    #[display(fmt = "wrong number of values: {} != {}", got, want)]
    #[from(ignore)]
    WrongValueCount { got: usize, want: usize },
    Domain(ProtocolError),
}

type Result<T> = std::result::Result<T, BuildError>;

/// The current wall-clock date in UTC.
pub(crate) fn today() -> NaiveDate {
    Utc::now().date_naive()
}

/// Builds a [`Report`] for a domain, tagging it with the client's country,
/// the current UTC date and the bin assigned by the binner.
pub struct ReportBuilder {
    values: usize,
    country: String,
    binner: Box<dyn Binner>,
}

impl ReportBuilder {
    /// `country` must already be validated and lower-cased, and `values`
    /// bounded; the public constructor in the client module does both.
    pub(crate) fn new(values: usize, country: String, binner: Box<dyn Binner>) -> ReportBuilder {
        ReportBuilder {
            values,
            country,
            binner,
        }
    }

    /// Encapsulates the domain and values, along with the other information
    /// needed for correct anonymous reconstruction. All inputs must be
    /// lower-case ASCII text, and each value at most 63 characters.
    pub fn build(&self, domain: &str, values: &[Value]) -> Result<Report> {
        if values.len() != self.values {
            return Err(BuildError::WrongValueCount {
                got: values.len(),
                want: self.values,
            });
        }
        validate_name(domain)?;

        let key = Key {
            domain: normalize_domain(domain),
            country: self.country.clone(),
            date: today(),
        };
        let bin = self.binner.bin(&key);

        Ok(Report {
            key,
            values: values.to_vec(),
            bin: Some(bin),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A binner that assigns every key the same fixed label.
    struct FixedBinner(&'static str);

    impl Binner for FixedBinner {
        fn bin(&self, _key: &Key) -> String {
            self.0.to_string()
        }
    }

    fn test_values() -> Vec<Value> {
        vec![Value::new("150ms").unwrap(), Value::new("hsts").unwrap()]
    }

    fn test_builder() -> ReportBuilder {
        ReportBuilder::new(2, "zz".to_string(), Box::new(FixedBinner("q")))
    }

    #[test]
    fn test_build() {
        let builder = test_builder();
        // This could be slightly flaky when run exactly at UTC midnight.
        let now = Utc::now().date_naive();
        let report = builder.build("destination.example", &test_values()).unwrap();

        assert_eq!(report.key.domain, "destination.example");
        assert_eq!(report.key.country, "zz");
        assert_eq!(report.key.date, now);
        assert_eq!(report.values, test_values());
        assert_eq!(report.bin(), Some("q"));
    }

    #[test]
    fn test_build_normalizes_domain() {
        let builder = test_builder();
        let report = builder
            .build("Destination.Example.", &test_values())
            .unwrap();
        assert_eq!(report.key.domain, "destination.example");
    }

    #[test]
    fn test_wrong_value_count() {
        let builder = test_builder();
        assert!(matches!(
            builder.build("destination.example", &[]),
            Err(BuildError::WrongValueCount { got: 0, want: 2 })
        ));
    }

    #[test]
    fn test_invalid_domain() {
        let builder = test_builder();
        assert!(matches!(
            builder.build("", &test_values()),
            Err(BuildError::Domain(_))
        ));
        assert!(matches!(
            builder.build("a..example", &test_values()),
            Err(BuildError::Domain(_))
        ));
    }
}
