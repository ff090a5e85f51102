use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display},
    time::Duration,
};

use crate::error::BoxError;

/// Column the dot spacer of the `CODES` block pads to.
const CODE_COLUMN: usize = 30;

/// Responses observed for one `(code, success)` pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseCount {
    pub code: String,
    pub success: bool,
    pub count: u64,
}

/// One quantile of a latency or delivery summary. `percentile` is the
/// quantile times 100: 50, 90, 95, 99.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyPercentile {
    pub success: bool,
    pub percentile: u32,
    pub value: Duration,
}

/// Immutable snapshot of a finished run, produced by
/// [`Metrics::result`](crate::Metrics::result).
///
/// `Display` renders the fixed textual layout printed at the end of a run.
/// Blocks without data are left out, except `CODES` which is always present.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub duration: Duration,
    pub requests: u64,
    pub responses: Vec<ResponseCount>,
    pub messages: u64,
    pub consumed: u64,
    pub sent_bytes: u64,
    pub received_bytes: u64,
    pub latency: Vec<LatencyPercentile>,
    pub delivery: Vec<LatencyPercentile>,
    pub avg_message_delivery: Option<Duration>,
}

impl Report {
    /// Sum of every response count.
    pub fn total_responses(&self) -> u64 {
        self.responses.iter().map(|r| r.count).sum()
    }

    /// Sum of the unsuccessful response counts.
    pub fn errors(&self) -> u64 {
        self.responses
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.count)
            .sum()
    }

    /// `n` per second of the measured duration, zero for an empty duration.
    fn rate(&self, n: u64) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 { n as f64 / secs } else { 0.0 }
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\nRESULTS:")?;
        writeln!(f, "elapsed ....................... {:?}", self.duration)?;
        for p in &self.delivery {
            writeln!(f, "delivery p({}) ................ {:?}", p.percentile, p.value)?;
        }
        if let Some(avg) = self.avg_message_delivery {
            writeln!(f, "delivery avg .................. {avg:?}")?;
        }
        if self.consumed > 0 {
            writeln!(f, "consumed ...................... {}", self.consumed)?;
        }

        if self.requests > 0 {
            writeln!(f, "\nREQUESTS:")?;
            writeln!(f, "responses ..................... {}", self.total_responses())?;
            writeln!(f, "errors ........................ {}", self.errors())?;
            writeln!(f, "total ......................... {}", self.requests)?;
            writeln!(
                f,
                "throughput .................... {:.2} req/s",
                self.rate(self.requests)
            )?;

            for (title, success) in [("SUCCEEDED:", true), ("FAILED:", false)] {
                let mut group = self.latency.iter().filter(|p| p.success == success).peekable();
                if group.peek().is_none() {
                    continue;
                }
                writeln!(f, "{title}")?;
                for p in group {
                    writeln!(f, "  latency p({}) ................. {:?}", p.percentile, p.value)?;
                }
            }
        }

        writeln!(f, "\nCODES:")?;
        for r in &self.responses {
            writeln!(f, "{} {} {}", r.code, spacer(&r.code), r.count)?;
        }

        if self.messages > 0 {
            writeln!(f, "\nMESSAGES:")?;
            writeln!(f, "total ......................... {}", self.messages)?;
            writeln!(
                f,
                "throughput .................... {:.2} msg/s",
                self.rate(self.messages)
            )?;
        }

        let data = self.sent_bytes.saturating_add(self.received_bytes);
        if data > 0 {
            writeln!(f, "\nDATA:")?;
            writeln!(f, "sent .......................... {}", byte_count_iec(self.sent_bytes))?;
            writeln!(f, "received ...................... {}", byte_count_iec(self.received_bytes))?;
            writeln!(f, "total ......................... {}", byte_count_iec(data))?;
            writeln!(
                f,
                "throughput .................... {}/s",
                byte_count_iec(self.rate(data) as u64)
            )?;
        }
        Ok(())
    }
}

/// Dots filling `code` up to the code column, none for longer codes.
fn spacer(code: &str) -> String {
    ".".repeat(CODE_COLUMN.saturating_sub(code.len()))
}

/// Format a byte count with binary prefixes: `1023 B`, `1.5 KiB`, `2.0 GiB`.
pub fn byte_count_iec(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{bytes} B");
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    format!("{:.1} {}iB", bytes as f64 / div as f64, b"KMGTPE"[exp] as char)
}

/// A [`Reporter`] consumes a [`Report`] and performs side effects: displaying
/// it, sending it to a service, or persisting it somewhere.
///
/// # Example
/// ```rust
/// use async_trait::async_trait;
/// use stinger::{BoxError, Report, Reporter};
///
/// struct RequestCountReporter;
///
/// #[async_trait]
/// impl Reporter for RequestCountReporter {
///     async fn report(&self, report: &Report) -> Result<(), BoxError> {
///         println!("{} requests", report.requests);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Reporter
where
    Self: Send + Sync,
{
    async fn report(&self, report: &Report) -> Result<(), BoxError>;
}

/// Prints the textual layout to standard output.
pub struct StdoutReporter;

#[async_trait]
impl Reporter for StdoutReporter {
    async fn report(&self, report: &Report) -> Result<(), BoxError> {
        print!("{report}");
        Ok(())
    }
}

/// Prints the snapshot as pretty JSON to standard output.
pub struct JsonReporter;

#[async_trait]
impl Reporter for JsonReporter {
    async fn report(&self, report: &Report) -> Result<(), BoxError> {
        println!("{}", serde_json::to_string_pretty(report)?);
        Ok(())
    }
}
