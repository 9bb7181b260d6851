//! The collector side: turning query names back into reports and gating
//! them behind k-anonymity.
//!
//! The authoritative server for the collector's zone sees each report as the
//! name of an incoming TXT query, asked by some recursive resolver. The
//! [`Receiver`] inverts the client's name encoding; the [`filter`] operator
//! in the `anonymity` module holds the resulting reports back until enough
//! distinct bins vouch for their key.
//!
//! [`filter`]: anonymity::filter

use chrono::NaiveDate;
use derive_more::{Display, Error, From};

use crate::report::{normalize_domain, Key, Report, Value, ValueError, DATE_FORMAT};
use crate::wire::buffer::BytePacketBuffer;
use crate::wire::protocol::{DnsPacket, ProtocolError};

/// Streaming k-anonymity filtering
pub mod anonymity;

#[derive(Debug, Display, From, Error)]
pub enum ParseError {
    #[display(fmt = "non-ASCII characters are unsupported")]
    NonAscii,
    #[display(fmt = "name is missing the receiver suffix")]
    MissingSuffix,
    #[display(fmt = "name is too short: {} labels", labels)]
    #[from(ignore)]
    TooShort { labels: usize },
    Value(ValueError),
    #[display(fmt = "malformed date label: {}", _0)]
    Date(chrono::format::ParseError),
    Packet(ProtocolError),
    #[display(fmt = "query contains no question")]
    NoQuestion,
    #[display(fmt = "query does not fit a datagram: {} bytes", size)]
    #[from(ignore)]
    Oversized { size: usize },
}

type Result<T> = std::result::Result<T, ParseError>;

/// The configuration of a metrics collector, required to receive reports in
/// query form.
pub struct Receiver {
    /// The name of the collector's zone, e.g. `metrics.example.com`.
    pub suffix: String,
    /// The number of values in each report.
    pub values: usize,
}

impl Receiver {
    /// Inverts the client's name encoding, recovering the report carried by
    /// a query name under this receiver's suffix.
    pub fn parse_report(&self, name: &str) -> Result<Report> {
        if !name.is_ascii() {
            return Err(ParseError::NonAscii);
        }
        let name = normalize_domain(name);
        let suffix = normalize_domain(&self.suffix);

        let rest = name.strip_suffix(&suffix).ok_or(ParseError::MissingSuffix)?;
        let rest = rest.strip_suffix('.').unwrap_or(rest);

        let labels: Vec<&str> = rest.split('.').collect();
        // Values, bin, country and date are fixed-position; at least one
        // label of domain must remain beyond them.
        if labels.len() <= self.values + 3 {
            return Err(ParseError::TooShort {
                labels: labels.len(),
            });
        }

        let (value_labels, rest_labels) = labels.split_at(self.values);
        let values = value_labels
            .iter()
            .map(|v| Value::new(v))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let bin = rest_labels[0];
        let country = rest_labels[1];
        let date = NaiveDate::parse_from_str(rest_labels[2], DATE_FORMAT)?;
        let domain = rest_labels[3..].join(".");

        Ok(Report {
            key: Key {
                domain,
                country: country.to_string(),
                date,
            },
            values,
            bin: Some(bin.to_string()),
        })
    }

    /// Extracts a report straight from a serialized DNS query, as an
    /// authoritative server would receive it off the wire. The report is
    /// carried by the first question's name.
    pub fn parse_query(&self, query: &[u8]) -> Result<Report> {
        let mut buffer = BytePacketBuffer::new();
        if query.len() > buffer.buf.len() {
            return Err(ParseError::Oversized { size: query.len() });
        }
        buffer.buf[..query.len()].copy_from_slice(query);

        let packet = DnsPacket::from_buffer(&mut buffer)?;
        let question = packet.questions.first().ok_or(ParseError::NoQuestion)?;
        self.parse_report(&question.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_receiver() -> Receiver {
        Receiver {
            suffix: "metrics.example.com".to_string(),
            values: 2,
        }
    }

    #[test]
    fn test_parse_report() {
        let receiver = test_receiver();
        let report = receiver
            .parse_report("150ms.hsts.q.zz.14131211.destination.example.metrics.example.com")
            .unwrap();

        assert_eq!(report.values[0].as_str(), "150ms");
        assert_eq!(report.values[1].as_str(), "hsts");
        assert_eq!(report.bin(), Some("q"));
        assert_eq!(report.key.country, "zz");
        assert_eq!(
            report.key.date,
            NaiveDate::from_ymd_opt(1413, 12, 11).unwrap()
        );
        assert_eq!(report.key.domain, "destination.example");
    }

    #[test]
    fn test_parse_report_case_and_trailing_dot() {
        let receiver = test_receiver();
        let report = receiver
            .parse_report("150MS.hsts.q.zz.14131211.Destination.Example.Metrics.Example.Com.")
            .unwrap();
        assert_eq!(report.values[0].as_str(), "150ms");
        assert_eq!(report.key.domain, "destination.example");
    }

    #[test]
    fn test_mismatched_suffix() {
        let receiver = test_receiver();
        assert!(matches!(
            receiver.parse_report("value1.value2.bin.domain.name.country.date.wrong.suffix"),
            Err(ParseError::MissingSuffix)
        ));
    }

    #[test]
    fn test_short_name() {
        let receiver = Receiver {
            suffix: "metrics.example.com".to_string(),
            values: 3,
        };
        assert!(matches!(
            receiver.parse_report("bin.short.name.country.date.metrics.example.com"),
            Err(ParseError::TooShort { .. })
        ));
    }

    #[test]
    fn test_non_ascii_rejected() {
        let receiver = test_receiver();
        assert!(matches!(
            receiver.parse_report("150ms.hsts.q.zz.14131211.⌘.metrics.example.com"),
            Err(ParseError::NonAscii)
        ));
    }

    #[test]
    fn test_malformed_date() {
        let receiver = test_receiver();
        assert!(matches!(
            receiver.parse_report("150ms.hsts.q.zz.notadate.destination.example.metrics.example.com"),
            Err(ParseError::Date(_))
        ));
    }

    #[test]
    fn test_malformed_value() {
        let receiver = Receiver {
            suffix: "metrics.example.com".to_string(),
            values: 1,
        };
        let long = "a".repeat(64);
        let name = format!("{}.q.zz.14131211.destination.example.metrics.example.com", long);
        assert!(matches!(
            receiver.parse_report(&name),
            Err(ParseError::Value(_))
        ));
    }

    #[test]
    fn test_name_roundtrip() {
        use chrono::NaiveDate;

        use crate::wire::query::encode_name;

        let receiver = test_receiver();
        let original = Report {
            key: Key {
                domain: "www.destination.example".to_string(),
                country: "zz".to_string(),
                date: NaiveDate::from_ymd_opt(1413, 12, 11).unwrap(),
            },
            values: vec![Value::new("150ms").unwrap(), Value::new("hsts").unwrap()],
            bin: Some("q".to_string()),
        };

        let name = encode_name(&original, &receiver.suffix).unwrap();
        assert_eq!(
            name,
            "150ms.hsts.q.zz.14131211.www.destination.example.metrics.example.com"
        );

        let duplicate = receiver.parse_report(&name).unwrap();
        assert_eq!(duplicate.key, original.key);
        assert_eq!(duplicate.values, original.values);
        assert_eq!(duplicate.bin(), original.bin());
    }

    #[test]
    fn test_parse_query_roundtrip() {
        use chrono::NaiveDate;

        use crate::wire::query::format_query;

        let receiver = test_receiver();
        let original = Report {
            key: Key {
                domain: "destination.example".to_string(),
                country: "zz".to_string(),
                date: NaiveDate::from_ymd_opt(1413, 12, 11).unwrap(),
            },
            values: vec![Value::new("150ms").unwrap(), Value::new("hsts").unwrap()],
            bin: Some("q".to_string()),
        };

        let query = format_query(&original, &receiver.suffix).unwrap();
        let parsed = receiver.parse_query(&query).unwrap();
        assert_eq!(parsed.key, original.key);
        assert_eq!(parsed.values, original.values);
        assert_eq!(parsed.bin(), original.bin());
    }

    #[test]
    fn test_parse_query_garbage() {
        let receiver = test_receiver();
        assert!(receiver.parse_query(&[0x13, 0x37]).is_err());
    }
}
