//! The reporting client.
//!
//! Reports are sent to the collector through the client's own recursive
//! resolver, preventing the collector from learning the client's IP address.
//! Each report is deterministically assigned to a "bin", enabling the
//! collector to determine a lower bound on the number of users reporting a
//! value. Each client keeps a fixed random salt used to tag reports, so a
//! user isn't double-counted; bin assignments are re-randomized every day so
//! users can't be linked across time, even weakly. Bursts of reports are
//! suppressed to avoid sending correlated reports.
//!
//! # Pipeline
//!
//! ```text
//! Reporter::report -> builder -> once-a-day filter -> burst suppressor -> ReportSender
//! ```
//!
//! De-duplication runs before burst suppression, so a duplicate domain costs
//! nothing: it is dropped before it can compete in the reservoir. Burst
//! suppression runs before the transport, so the transport only ever sees
//! the one selected survivor of each window.

use std::error::Error;
use std::io::{Read, Write};
use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, From};

use crate::report::{Report, Value, MAX_VALUES};

/// Deterministic bin assignment with a persisted secret salt
pub mod binner;

/// Report construction and validation
pub mod builder;

/// Burst suppression by reservoir sampling
pub mod burst;

/// Once-a-day report de-duplication
pub mod dedup;

use self::binner::{BinnerError, HashBinner};
use self::builder::{BuildError, ReportBuilder};
use self::burst::BurstSender;
use self::dedup::OnceADaySender;

/// Errors from embedder-supplied senders. The pipeline logs and discards
/// them; they are never surfaced to the original `report` caller.
pub type SendError = Box<dyn Error + Send + Sync>;

/// A general interface for sending a [`Report`] towards a metrics collector.
/// The standard pipeline terminates in an embedder-supplied implementation
/// that owns the actual DNS transport.
pub trait ReportSender: Send + Sync {
    /// Required to be safe for concurrent invocation.
    fn send(&self, report: Report) -> Result<(), SendError>;
}

#[derive(Debug, Display, From)]
pub enum ConfigError {
    #[display(fmt = "unreasonable number of values: {}", count)]
    #[from(ignore)]
    UnreasonableValueCount { count: usize },
    #[display(fmt = "country code should be two characters: {}", country)]
    #[from(ignore)]
    BadCountry { country: String },
    Binner(BinnerError),
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ConfigError::Binner(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Display, From)]
pub enum ReportError {
    Build(BuildError),
    Send(SendError),
}

impl Error for ReportError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ReportError::Build(e) => Some(e),
            ReportError::Send(e) => Some(e.as_ref()),
        }
    }
}

/// Wraps values into reports and pushes them through the privacy pipeline.
///
/// A `Reporter` should be long-lived and shared: the once-per-day guarantees
/// only hold within one instance, and the salt stream it reads at
/// construction must be the same across runs for bin assignments to remain
/// stable over the course of a day.
pub struct Reporter {
    builder: ReportBuilder,
    sender: OnceADaySender,
}

impl Reporter {
    /// Builds a reporter that uses the salt in `storage` (which may initially
    /// be empty) to assign reports with exactly `values` values to one of
    /// `bins` bins for the client's `country`. Bursts of reports are
    /// accumulated for `burst`, and one report from each burst is passed
    /// asynchronously to `sender`.
    pub fn new<S: Read + Write>(
        storage: &mut S,
        bins: u64,
        values: usize,
        country: &str,
        burst: Duration,
        sender: Arc<dyn ReportSender>,
    ) -> Result<Reporter, ConfigError> {
        if values > MAX_VALUES {
            return Err(ConfigError::UnreasonableValueCount { count: values });
        }
        if country.chars().count() != 2 {
            return Err(ConfigError::BadCountry {
                country: country.to_string(),
            });
        }
        let binner = HashBinner::new(storage, bins)?;
        let builder = ReportBuilder::new(values, country.to_lowercase(), Box::new(binner));

        let burst_sender = BurstSender::new(sender, burst);
        let once_a_day = OnceADaySender::new(Arc::new(burst_sender));

        Ok(Reporter {
            builder,
            sender: once_a_day,
        })
    }

    /// Reports the provided values for this domain. All inputs must be
    /// lower-case ASCII text. Returns an error only for malformed input;
    /// whether the report survives the privacy pipeline is deliberately not
    /// observable.
    pub fn report(&self, domain: &str, values: &[Value]) -> Result<(), ReportError> {
        let report = self.builder.build(domain, values)?;
        self.sender.send(report).map_err(ReportError::Send)
    }
}
