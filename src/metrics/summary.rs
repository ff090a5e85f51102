use std::{fmt::Write, time::Duration};

use hdrhistogram::Histogram;
use parking_lot::Mutex;

use crate::error::StingerError;

/// Quantile objectives `(quantile, tolerated error)` of every summary.
pub const OBJECTIVES: [(f64, f64); 4] = [(0.5, 0.05), (0.9, 0.01), (0.95, 0.005), (0.99, 0.001)];

/// Longest trackable observation, one hour.
const HIGHEST_NANOS: u64 = 3_600_000_000_000;
/// Value precision: 3 significant digits keeps the relative error under 0.1%,
/// tighter than the smallest objective tolerance.
const SIGNIFICANT_DIGITS: u8 = 3;

/// Streaming quantile estimator over durations, recorded in nanoseconds.
///
/// Quantiles are extracted without resetting the recorded samples.
pub struct Summary {
    inner: Mutex<Inner>,
}

struct Inner {
    histogram: Histogram<u64>,
    sum_nanos: u128,
}

#[derive(Clone, Debug, Default)]
pub struct SummarySnapshot {
    pub count: u64,
    pub sum: Duration,
    /// `(quantile, value)` for each objective, ascending.
    pub quantiles: Vec<(f64, Duration)>,
}

impl Summary {
    pub fn new() -> Result<Self, StingerError> {
        let histogram = Histogram::new_with_bounds(1, HIGHEST_NANOS, SIGNIFICANT_DIGITS)
            .map_err(|e| StingerError::Metrics(format!("summary histogram: {e}")))?;
        Ok(Self {
            inner: Mutex::new(Inner {
                histogram,
                sum_nanos: 0,
            }),
        })
    }

    pub fn observe(&self, value: Duration) {
        let nanos = u64::try_from(value.as_nanos()).unwrap_or(u64::MAX);
        let mut inner = self.inner.lock();
        inner.histogram.saturating_record(nanos);
        inner.sum_nanos += u128::from(nanos);
    }

    pub fn count(&self) -> u64 {
        self.inner.lock().histogram.len()
    }

    pub fn snapshot(&self) -> SummarySnapshot {
        let inner = self.inner.lock();
        let count = inner.histogram.len();
        if count == 0 {
            return SummarySnapshot::default();
        }

        let quantiles = OBJECTIVES
            .iter()
            .map(|&(q, _)| (q, Duration::from_nanos(inner.histogram.value_at_quantile(q))))
            .collect();
        SummarySnapshot {
            count,
            sum: nanos_to_duration(inner.sum_nanos),
            quantiles,
        }
    }

    /// Append the summary in the text exposition format. `labels` is a
    /// pre-rendered label list such as `success="true"`, possibly empty.
    pub(crate) fn render(&self, name: &str, labels: &str, out: &mut String) {
        let snapshot = self.snapshot();
        let sep = if labels.is_empty() { "" } else { "," };

        // an empty summary still exposes its quantile series
        for &(q, _) in &OBJECTIVES {
            let value = snapshot
                .quantiles
                .iter()
                .find(|(sq, _)| *sq == q)
                .map(|(_, v)| v.as_nanos().to_string())
                .unwrap_or_else(|| "NaN".to_string());
            let _ = writeln!(out, "{name}{{{labels}{sep}quantile=\"{q}\"}} {value}");
        }

        let braces = if labels.is_empty() {
            String::new()
        } else {
            format!("{{{labels}}}")
        };
        let _ = writeln!(out, "{name}_sum{braces} {}", snapshot.sum.as_nanos());
        let _ = writeln!(out, "{name}_count{braces} {}", snapshot.count);
    }
}

fn nanos_to_duration(nanos: u128) -> Duration {
    let secs = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % 1_000_000_000) as u32)
}
