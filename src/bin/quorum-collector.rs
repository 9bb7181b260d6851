//! Demo collector.
//!
//! Reads one query name per line from standard input, in the form an
//! authoritative server's query log yields, runs the reports through the
//! k-anonymity filter, and prints each released report as a line of JSON.

use std::env;
use std::io::{self, BufRead};
use std::sync::mpsc::channel;
use std::thread;

use getopts::Options;

use quorum::server::{anonymity, Receiver};

fn print_usage(program: &str, opts: Options) {
    let brief = format!(
        "Usage: {} [options]\n\n\
         Reads one query name per line from stdin; prints released reports \
         as JSON lines.",
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
        "s",
        "suffix",
        "Collector zone the reports were sent under (default metrics.example)",
        "NAME",
    );
    opts.optopt("n", "values", "Values per report (default 2)", "COUNT");
    opts.optopt(
        "k",
        "threshold",
        "Distinct bins required before a key is released (default 2)",
        "COUNT",
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

    let suffix = matches
        .opt_str("s")
        .unwrap_or_else(|| "metrics.example".to_string());
    let values: usize = matches
        .opt_str("n")
        .map(|v| v.parse().expect("values must be a number"))
        .unwrap_or(2);
    let threshold: usize = matches
        .opt_str("k")
        .map(|v| v.parse().expect("threshold must be a number"))
        .unwrap_or(2);

    let receiver = Receiver { suffix, values };

    let (tx, rx) = channel();
    let released = anonymity::filter(rx, threshold);

    let printer = thread::Builder::new()
        .name("collector-output".to_string())
        .spawn(move || {
            for report in released {
                match serde_json::to_string(&report) {
                    Ok(line) => println!("{}", line),
                    Err(e) => log::error!("Failed to serialize report: {}", e),
                }
            }
        })
        .expect("Failed to start output thread");

    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                log::error!("Failed to read stdin: {}", e);
                break;
            }
        };
        let name = line.trim();
        if name.is_empty() {
            continue;
        }
        match receiver.parse_report(name) {
            Ok(report) => {
                if tx.send(report).is_err() {
                    break;
                }
            }
            Err(e) => log::warn!("Ignoring unparseable name: {}", e),
        }
    }

    // Closing the input releases nothing further: reports still behind
    // un-burst dams are discarded by design.
    drop(tx);
    printer.join().expect("Output thread panicked");
}
