//! Streaming k-anonymity filtering.
//!
//! Each key has an associated dam, which holds reports back until a
//! threshold number of distinct bins has been observed and the dam "bursts",
//! releasing the buffered reports and any future reports for that key.
//! Distinct bins come from distinct clients (up to hash collisions), so a
//! burst key has been reported by at least `threshold` different users.

use std::collections::{HashMap, HashSet};
use std::sync::mpsc;
use std::thread;

use crate::report::{Key, Report};

/// Per-key state buffering reports until k-anonymity is satisfied.
struct Dam {
    /// Observed bin labels.
    bins: HashSet<String>,
    /// All observed values, in arrival order. Never shorter than `bins`.
    observations: Vec<Vec<crate::report::Value>>,
}

impl Dam {
    fn new() -> Dam {
        Dam {
            bins: HashSet::new(),
            observations: Vec::new(),
        }
    }

    /// Adds a report behind the dam. If the distinct-bin count reaches
    /// `threshold`, the dam bursts and all buffered observations are
    /// returned, stripped of their bins.
    fn add(&mut self, report: Report, threshold: usize) -> Option<Vec<Report>> {
        let bin = report
            .bin
            .expect("report is missing its bin assignment; filter output must not be fed back in");

        self.bins.insert(bin);
        self.observations.push(report.values);

        if self.bins.len() >= threshold {
            let key = report.key;
            let released = self
                .observations
                .drain(..)
                .map(|values| Report {
                    key: key.clone(),
                    values,
                    bin: None,
                })
                .collect();
            return Some(released);
        }
        None
    }
}

/// Accepts a stream of reports (e.g. everything arriving at the collector)
/// and delivers each one to the output only once its key has been observed
/// in at least `threshold` distinct bins.
///
/// Reports released in a single burst keep their arrival order. When the
/// input channel closes, the output closes too, and any reports still held
/// behind un-burst dams are discarded: their keys never met the threshold
/// and must not be revealed.
pub fn filter(input: mpsc::Receiver<Report>, threshold: usize) -> mpsc::Receiver<Report> {
    let (tx, rx) = mpsc::channel();

    let worker = thread::Builder::new()
        .name("anonymity-filter".to_string())
        .spawn(move || {
            // A key maps to `None` once its dam has burst; the buffered
            // observations are no longer needed at that point.
            let mut pending: HashMap<Key, Option<Dam>> = HashMap::new();

            for report in input {
                let entry = pending
                    .entry(report.key.clone())
                    .or_insert_with(|| Some(Dam::new()));

                let released = match entry {
                    Some(dam) => match dam.add(report, threshold) {
                        Some(burst) => {
                            *entry = None;
                            burst
                        }
                        None => continue,
                    },
                    // Already burst: pass the report through immediately.
                    None => vec![report],
                };

                for report in released {
                    if tx.send(report).is_err() {
                        log::debug!("Filter output receiver dropped; stopping");
                        return;
                    }
                }
            }
        });

    if let Err(e) = worker {
        // The sender half was moved into the dead closure, so the output
        // channel is already closed; the caller just sees an empty stream.
        log::error!("Failed to start anonymity filter: {}", e);
    }

    rx
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc::channel;

    use chrono::NaiveDate;

    use super::*;
    use crate::report::Value;

    fn test_key(domain: &str) -> Key {
        Key {
            domain: domain.to_string(),
            country: "zz".to_string(),
            date: NaiveDate::from_ymd_opt(1413, 12, 11).unwrap(),
        }
    }

    fn numbered_report(key: &Key, bin: &str, i: usize) -> Report {
        Report {
            key: key.clone(),
            values: vec![Value::new(&i.to_string()).unwrap()],
            bin: Some(bin.to_string()),
        }
    }

    #[test]
    fn test_release_at_threshold() {
        let (tx, rx) = channel();
        let out = filter(rx, 2);

        let key = test_key("d1.example");
        for i in 0..10 {
            tx.send(numbered_report(&key, "1", i)).unwrap();
        }
        // A second distinct bin bursts the dam.
        tx.send(numbered_report(&key, "2", 10)).unwrap();
        drop(tx);

        let released: Vec<Report> = out.iter().collect();
        assert_eq!(released.len(), 11);
        for (i, report) in released.iter().enumerate() {
            assert_eq!(report.key, key);
            assert_eq!(report.bin(), None);
            // Arrival order is preserved within the burst.
            assert_eq!(report.values[0].as_str(), i.to_string());
        }
    }

    #[test]
    fn test_no_output_below_threshold() {
        let (tx, rx) = channel();
        let out = filter(rx, 2);

        let key = test_key("d1.example");
        for i in 0..10 {
            tx.send(numbered_report(&key, "1", i)).unwrap();
        }
        drop(tx);

        // One bin only: the dam never bursts, and closing the input
        // discards everything behind it.
        assert_eq!(out.iter().count(), 0);
    }

    #[test]
    fn test_forwards_after_burst() {
        let (tx, rx) = channel();
        let out = filter(rx, 2);

        let key = test_key("d1.example");
        tx.send(numbered_report(&key, "1", 0)).unwrap();
        tx.send(numbered_report(&key, "2", 1)).unwrap();
        assert_eq!(out.iter().take(2).count(), 2);

        // The dam has burst; later reports pass straight through.
        tx.send(numbered_report(&key, "1", 2)).unwrap();
        let forwarded = out.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(forwarded.values[0].as_str(), "2");
        assert_eq!(forwarded.bin(), Some("1"));
        drop(tx);
    }

    #[test]
    fn test_keys_filtered_independently() {
        let (tx, rx) = channel();
        let out = filter(rx, 2);

        let hot = test_key("hot.example");
        let cold = test_key("cold.example");
        tx.send(numbered_report(&cold, "1", 0)).unwrap();
        tx.send(numbered_report(&hot, "1", 1)).unwrap();
        tx.send(numbered_report(&hot, "2", 2)).unwrap();
        drop(tx);

        let released: Vec<Report> = out.iter().collect();
        assert_eq!(released.len(), 2);
        assert!(released.iter().all(|r| r.key == hot));
    }

    #[test]
    fn test_repeated_bin_does_not_count_twice() {
        let (tx, rx) = channel();
        let out = filter(rx, 3);

        let key = test_key("d1.example");
        tx.send(numbered_report(&key, "1", 0)).unwrap();
        tx.send(numbered_report(&key, "2", 1)).unwrap();
        tx.send(numbered_report(&key, "2", 2)).unwrap();
        drop(tx);

        assert_eq!(out.iter().count(), 0);
    }

    #[test]
    #[should_panic(expected = "missing its bin assignment")]
    fn test_missing_bin_is_fatal() {
        let key = test_key("d1.example");
        let mut report = numbered_report(&key, "1", 0);
        report.bin = None;
        Dam::new().add(report, 2);
    }

    #[test]
    fn test_threshold_one_releases_immediately() {
        let (tx, rx) = channel();
        let out = filter(rx, 1);

        let key = test_key("d1.example");
        tx.send(numbered_report(&key, "1", 0)).unwrap();
        let released = out.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
        assert_eq!(released.key, key);
        assert_eq!(released.bin(), None);
        drop(tx);
    }
}
