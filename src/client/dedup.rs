//! Once-a-day report de-duplication.
//!
//! Only one report is permitted for each domain each day; duplicates are
//! dropped before they reach the rest of the pipeline. The cache is purely
//! in-memory and hard-bounded, so it can never grow into a persistent record
//! of the client's activity.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::NaiveDate;
use derive_more::{Display, Error};
use parking_lot::Mutex;

use crate::client::{ReportSender, SendError};
use crate::report::{Key, Report};

/// Maximum number of reports per day. This limits cache memory usage: if an
/// individual client reports more than 1000 unique domains per day, this
/// library is probably not being used in the intended manner.
pub const MAX_REPORTS: usize = 1000;

#[derive(Debug, Display, Error)]
pub enum CacheError {
    #[display(fmt = "old date: {} < {}", date, current)]
    OldDate { date: NaiveDate, current: NaiveDate },
    #[display(fmt = "cache is full")]
    CacheFull,
}

/// Cache of domains that have already been reported today. The cache is
/// flushed on the first report of each new day.
pub struct DayCache {
    date: NaiveDate,
    domains: HashSet<String>,
}

impl DayCache {
    pub fn new() -> DayCache {
        DayCache {
            date: NaiveDate::MIN,
            domains: HashSet::new(),
        }
    }

    /// Records `key` in the cache. Returns `Ok(false)` if the domain was
    /// already reported today, and an error if the key's date is older than
    /// the cache or the daily report allowance is exhausted.
    pub fn add(&mut self, key: &Key) -> Result<bool, CacheError> {
        if key.date != self.date {
            if key.date < self.date {
                return Err(CacheError::OldDate {
                    date: key.date,
                    current: self.date,
                });
            }
            // The date has changed. Flush the cache.
            self.domains.clear();
            self.date = key.date;
        }
        if self.domains.contains(&key.domain) {
            return Ok(false);
        }
        if self.domains.len() >= MAX_REPORTS {
            return Err(CacheError::CacheFull);
        }
        self.domains.insert(key.domain.clone());
        Ok(true)
    }
}

impl Default for DayCache {
    fn default() -> Self {
        DayCache::new()
    }
}

/// Implements [`ReportSender`] by wrapping another sender, dropping any
/// report whose domain has already been reported today.
///
/// Cache rejections are logged and swallowed: the caller sees success either
/// way, so a duplicate report costs nothing and reveals nothing.
pub struct OnceADaySender {
    sender: Arc<dyn ReportSender>,
    cache: Mutex<DayCache>,
}

impl OnceADaySender {
    pub fn new(sender: Arc<dyn ReportSender>) -> OnceADaySender {
        OnceADaySender {
            sender,
            cache: Mutex::new(DayCache::new()),
        }
    }
}

impl ReportSender for OnceADaySender {
    fn send(&self, report: Report) -> Result<(), SendError> {
        let added = self.cache.lock().add(&report.key);
        match added {
            Err(e) => {
                log::warn!("Failed to add report to cache: {}", e);
                Ok(())
            }
            Ok(false) => {
                log::debug!("Dropping duplicate report");
                Ok(())
            }
            Ok(true) => self.sender.send(report),
        }
    }
}
