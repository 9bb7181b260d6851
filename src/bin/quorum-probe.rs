//! Demo reporting client.
//!
//! Reads whitespace-separated reports from standard input, one per line: a
//! domain followed by the configured number of values. Each report is pushed
//! through the privacy pipeline, and the survivor of each burst window is
//! sent to the recursive resolver as a DNS query.
//!
//! The resolver address and the client country are flags; discovering either
//! automatically is the embedding application's job.

use std::env;
use std::fs::OpenOptions;
use std::io::{self, BufRead};
use std::net::UdpSocket;
use std::sync::Arc;
use std::time::Duration;

use getopts::Options;

use quorum::client::{ReportSender, Reporter, SendError};
use quorum::report::{Report, Value};
use quorum::wire::buffer::BytePacketBuffer;
use quorum::wire::protocol::{DnsPacket, ResultCode};
use quorum::wire::query::format_query;

/// Sends each report to the recursive resolver as a UDP DNS query. An
/// encrypted transport is recommended where one is available.
struct UdpReportSender {
    resolver: String,
    suffix: String,
}

impl ReportSender for UdpReportSender {
    fn send(&self, report: Report) -> Result<(), SendError> {
        let query = format_query(&report, &self.suffix)?;

        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(self.resolver.as_str())?;
        socket.send(&query)?;
        socket.set_read_timeout(Some(Duration::from_secs(5)))?;

        let mut response = BytePacketBuffer::new();
        match socket.recv(&mut response.buf) {
            Ok(_) => match DnsPacket::from_buffer(&mut response) {
                Ok(packet) if packet.header.rescode == ResultCode::NXDOMAIN => {
                    log::info!("Report complete");
                }
                Ok(packet) => {
                    // The queried TXT record shouldn't exist, so anything but
                    // NXDOMAIN is surprising. Diagnostic only.
                    log::warn!("Unexpected response: {:?}", packet.header.rescode);
                }
                Err(e) => log::warn!("Bad response: {}", e),
            },
            Err(e) => log::warn!("Reading response failed: {}", e),
        }
        Ok(())
    }
}

fn print_usage(program: &str, opts: Options) {
    let brief = format!(
        "Usage: {} -c COUNTRY [options]\n\n\
         Reads one report per line from stdin: DOMAIN VALUE...",
        program
    );
    print!("{}", opts.usage(&brief));
}

fn main() {
    simple_logger::init().expect("Failed to initialize logger");

    let args: Vec<String> = env::args().collect();
    let program = args[0].clone();

    let mut opts = Options::new();
    opts.optflag("h", "help", "print this help menu");
    opts.optopt(
        "c",
        "country",
        "Two-letter country code to tag reports with",
        "CC",
    );
    opts.optopt(
        "r",
        "resolver",
        "Recursive resolver address (default 127.0.0.1:53)",
        "ADDR",
    );
    opts.optopt(
        "s",
        "suffix",
        "Collector zone to report under (default metrics.example)",
        "NAME",
    );
    opts.optopt("n", "values", "Values per report (default 2)", "COUNT");
    opts.optopt(
        "",
        "salt-file",
        "Salt file path; keep it stable so bin assignments stay consistent",
        "FILE",
    );
    opts.optopt(
        "b",
        "burst",
        "Burst suppression window in seconds (default 10)",
        "SECONDS",
    );

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}", e);
            print_usage(&program, opts);
            std::process::exit(1);
        }
    };
    if matches.opt_present("h") {
        print_usage(&program, opts);
        return;
    }

    let country = match matches.opt_str("c") {
        Some(c) => c,
        None => {
            print_usage(&program, opts);
            std::process::exit(1);
        }
    };
    let resolver = matches
        .opt_str("r")
        .unwrap_or_else(|| "127.0.0.1:53".to_string());
    let suffix = matches
        .opt_str("s")
        .unwrap_or_else(|| "metrics.example".to_string());
    let values: usize = matches
        .opt_str("n")
        .map(|v| v.parse().expect("values must be a number"))
        .unwrap_or(2);
    let burst = matches
        .opt_str("b")
        .map(|v| v.parse().expect("burst must be a number of seconds"))
        .unwrap_or(10);
    let salt_path = matches
        .opt_str("salt-file")
        .map(Into::into)
        .unwrap_or_else(|| env::temp_dir().join("quorum_salt"));

    let mut salt_file = match OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&salt_path)
    {
        Ok(f) => f,
        Err(e) => {
            log::error!("Failed to open salt file {}: {}", salt_path.display(), e);
            std::process::exit(1);
        }
    };

    let sender = Arc::new(UdpReportSender { resolver, suffix });
    const BINS: u64 = 32;
    let reporter = match Reporter::new(
        &mut salt_file,
        BINS,
        values,
        &country,
        Duration::from_secs(burst),
        sender,
    ) {
        Ok(r) => r,
        Err(e) => {
            log::error!("Failed to construct reporter: {}", e);
            std::process::exit(1);
        }
    };

    log::info!(
        "Reading reports from stdin ({} values per domain); Ctrl-C to exit",
        values
    );
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to read stdin: {}", e);
                break;
            }
        };
        let mut tokens = line.split_whitespace();
        let domain = match tokens.next() {
            Some(d) => d,
            None => continue,
        };
        let parsed: Result<Vec<Value>, _> = tokens.map(Value::new).collect();
        let report_values = match parsed {
            Ok(v) => v,
            Err(e) => {
                log::warn!("Skipping line: {}", e);
                continue;
            }
        };
        if let Err(e) = reporter.report(domain, &report_values) {
            log::warn!("Skipping line: {}", e);
        }
    }

    // Give the final burst window a chance to drain before exiting.
    std::thread::sleep(Duration::from_secs(burst + 1));
}
