//! Metrics — the shared sink every worker reports into
//!
//! A single [`Metrics`] instance is created per run and handed explicitly to
//! every component that records something: actors, byte-observing streams and
//! the orchestrator. Creating a second instance for the same run is invalid:
//! the two would split the counts and neither snapshot would be complete.
//!
//! Counters and gauges live in a [`prometheus::Registry`] owned by the
//! instance, so nothing is registered globally. Quantile summaries are kept in
//! [`Summary`] since they are not part of the prometheus crate.
//!
//! # Recording
//!
//! [`Metrics::observe_request`] is the single instrumentation point for
//! request/response workloads: it counts the request, times the work, and
//! classifies the outcome by `(code, success)`. The remaining `inc_*`/`add_*`
//! methods cover asynchronous workloads (published messages, consumed
//! messages, delivery time, transferred bytes).
//!
//! # Snapshot
//!
//! [`Metrics::result`] turns the current state into an immutable [`Report`].
//! It should be taken once, after every worker has stopped.
pub mod summary;

#[cfg(feature = "exposition")]
pub mod exposition;

pub use summary::{OBJECTIVES, Summary, SummarySnapshot};

use std::{
    collections::BTreeMap,
    future::Future,
    sync::atomic::{AtomicBool, Ordering},
    time::{Duration, Instant},
};

use parking_lot::{Mutex, RwLock};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::{
    error::StingerError,
    report::{LatencyPercentile, Report, ResponseCount},
};

pub struct Metrics {
    registry: Registry,
    enabled: AtomicBool,
    requests: IntCounter,
    messages: IntCounter,
    consumed: IntCounter,
    responses: IntCounterVec,
    /// Children of `responses` by `(code, success)`, in a stable order.
    response_index: RwLock<BTreeMap<(String, bool), IntCounter>>,
    sent_bytes: IntGauge,
    received_bytes: IntGauge,
    /// Indexed by `success as usize`.
    latency: [Summary; 2],
    delivery: Summary,
    timer: Mutex<Timer>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("enabled", &self.is_enabled())
            .field("requests", &self.requests.get())
            .field("sent_bytes", &self.sent_bytes.get())
            .field("received_bytes", &self.received_bytes.get())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Timer {
    start: Option<Instant>,
    duration: Option<Duration>,
}

impl Metrics {
    pub fn new() -> Result<Self, StingerError> {
        let registry = Registry::new();

        let requests = IntCounter::with_opts(Opts::new(
            "requests_total",
            "total number of issued requests",
        ))?;
        let messages = IntCounter::with_opts(Opts::new(
            "messages_total",
            "total number of published messages",
        ))?;
        let consumed = IntCounter::with_opts(Opts::new(
            "consumed_total",
            "total number of consumed messages",
        ))?;
        let responses = IntCounterVec::new(
            Opts::new("responses_total", "total number of responses"),
            &["code", "success"],
        )?;
        let sent_bytes = IntGauge::with_opts(Opts::new(
            "sent_bytes",
            "bytes sent from the clients to the service",
        ))?;
        let received_bytes = IntGauge::with_opts(Opts::new(
            "received_bytes",
            "bytes received by the clients from the service",
        ))?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(messages.clone()))?;
        registry.register(Box::new(consumed.clone()))?;
        registry.register(Box::new(responses.clone()))?;
        registry.register(Box::new(sent_bytes.clone()))?;
        registry.register(Box::new(received_bytes.clone()))?;

        Ok(Self {
            registry,
            enabled: AtomicBool::new(false),
            requests,
            messages,
            consumed,
            responses,
            response_index: RwLock::new(BTreeMap::new()),
            sent_bytes,
            received_bytes,
            latency: [Summary::new()?, Summary::new()?],
            delivery: Summary::new()?,
            timer: Mutex::new(Timer::default()),
        })
    }

    /// Start accumulating transferred bytes.
    ///
    /// Byte gauges are off by default so that traffic produced while setting
    /// up connections is not counted.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn start_timer(&self) {
        let mut timer = self.timer.lock();
        timer.start = Some(Instant::now());
        timer.duration = None;
    }

    pub fn stop_timer(&self) {
        let mut timer = self.timer.lock();
        timer.duration = timer.start.map(|start| start.elapsed());
    }

    /// Measured run duration. While the timer is running this is the time
    /// elapsed so far, before it was ever started it is zero.
    pub fn elapsed(&self) -> Duration {
        let timer = self.timer.lock();
        match (timer.duration, timer.start) {
            (Some(duration), _) => duration,
            (None, Some(start)) => start.elapsed(),
            (None, None) => Duration::ZERO,
        }
    }

    /// Time and classify one unit of work.
    ///
    /// `work` resolves to `(code, success, result)`. The request is counted
    /// before `work` is polled; once it resolves its latency goes into the
    /// `success` series and `responses_total{code, success}` is incremented.
    /// `result` is handed back unchanged.
    pub async fn observe_request<C, R, E, Fut>(&self, work: Fut) -> Result<R, E>
    where
        C: AsRef<str>,
        Fut: Future<Output = (C, bool, Result<R, E>)>,
    {
        let start = Instant::now();
        self.inc_requests(1);
        let (code, success, result) = work.await;
        self.latency[usize::from(success)].observe(start.elapsed());
        self.inc_responses(code.as_ref(), success, 1);
        result
    }

    pub fn inc_requests(&self, n: u64) {
        self.requests.inc_by(n);
    }

    pub fn requests(&self) -> u64 {
        self.requests.get()
    }

    pub fn inc_messages(&self, n: u64) {
        self.messages.inc_by(n);
    }

    pub fn messages(&self) -> u64 {
        self.messages.get()
    }

    pub fn inc_consumed(&self, n: u64) {
        self.consumed.inc_by(n);
    }

    pub fn consumed(&self) -> u64 {
        self.consumed.get()
    }

    pub fn inc_responses(&self, code: &str, success: bool, n: u64) {
        if let Some(counter) = self.response_index.read().get(&(code.to_owned(), success)) {
            counter.inc_by(n);
            return;
        }

        let mut index = self.response_index.write();
        index
            .entry((code.to_owned(), success))
            .or_insert_with(|| {
                self.responses
                    .with_label_values(&[code, if success { "true" } else { "false" }])
            })
            .inc_by(n);
    }

    /// Every observed `(code, success)` pair, ordered by code.
    pub fn responses(&self) -> Vec<ResponseCount> {
        self.response_index
            .read()
            .iter()
            .map(|((code, success), counter)| ResponseCount {
                code: code.clone(),
                success: *success,
                count: counter.get(),
            })
            .collect()
    }

    pub fn add_sent_bytes(&self, n: u64) {
        if self.is_enabled() {
            self.sent_bytes.add(i64::try_from(n).unwrap_or(i64::MAX));
        }
    }

    pub fn sent_bytes(&self) -> u64 {
        u64::try_from(self.sent_bytes.get()).unwrap_or_default()
    }

    pub fn add_received_bytes(&self, n: u64) {
        if self.is_enabled() {
            self.received_bytes.add(i64::try_from(n).unwrap_or(i64::MAX));
        }
    }

    pub fn received_bytes(&self) -> u64 {
        u64::try_from(self.received_bytes.get()).unwrap_or_default()
    }

    /// Record the end-to-end delivery time of one message.
    pub fn observe_delivery(&self, value: Duration) {
        self.delivery.observe(value);
    }

    /// Latency percentiles of every series with samples, successful first.
    pub fn latency(&self) -> Vec<LatencyPercentile> {
        [true, false]
            .into_iter()
            .flat_map(|success| {
                percentiles(&self.latency[usize::from(success)].snapshot(), success)
            })
            .collect()
    }

    /// Snapshot everything into an immutable [`Report`].
    pub fn result(&self) -> Report {
        let delivery = self.delivery.snapshot();
        let avg_message_delivery = (delivery.count > 0).then(|| {
            Duration::from_nanos(
                u64::try_from(delivery.sum.as_nanos() / u128::from(delivery.count))
                    .unwrap_or(u64::MAX),
            )
        });

        Report {
            duration: self.elapsed(),
            requests: self.requests(),
            responses: self.responses(),
            messages: self.messages(),
            consumed: self.consumed(),
            sent_bytes: self.sent_bytes(),
            received_bytes: self.received_bytes(),
            latency: self.latency(),
            delivery: percentiles(&delivery, true),
            avg_message_delivery,
        }
    }

    /// Render every metric in the prometheus text exposition format.
    pub fn export(&self) -> Result<String, StingerError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        let mut out = String::from_utf8(buffer)
            .map_err(|e| StingerError::Metrics(format!("exposition is not utf-8: {e}")))?;

        out.push_str("# HELP latency request latency in nanoseconds\n");
        out.push_str("# TYPE latency summary\n");
        for success in [false, true] {
            let summary = &self.latency[usize::from(success)];
            if summary.count() > 0 {
                summary.render("latency", &format!("success=\"{success}\""), &mut out);
            }
        }

        out.push_str(
            "# HELP message_delivery message delivery time from publisher to consumers in nanoseconds\n",
        );
        out.push_str("# TYPE message_delivery summary\n");
        self.delivery.render("message_delivery", "", &mut out);

        Ok(out)
    }
}

fn percentiles(snapshot: &SummarySnapshot, success: bool) -> Vec<LatencyPercentile> {
    snapshot
        .quantiles
        .iter()
        .map(|&(q, value)| LatencyPercentile {
            success,
            percentile: (q * 100.0).round() as u32,
            value,
        })
        .collect()
}
