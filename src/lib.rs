//! Stinger — a load-testing harness for request/response and messaging services.
//!
//! Stinger drives a configurable number of concurrent actors against a target
//! service for a bounded duration and reports throughput, per-code outcomes
//! and latency distributions. The library provides the engine; the protocol
//! bindings and data fakers are small pieces of user code plugged in through
//! traits.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`Runnable`]: a scenario. Sets up shared resources, says how many workers
//!   it needs and builds one [`Actor`] per worker.
//! - [`Actor`]: one worker's unit of work, typically a single request recorded
//!   through [`Metrics::observe_request`].
//! - [`Generator`]: a pull-based data source feeding actors. Expensive sources
//!   go behind a [`BufferedProducer`], which fills a bounded queue from
//!   background tasks so request issuance never waits on data generation.
//! - [`RoundRobinPool`]: cycles a worker's connections or clients.
//! - [`Metrics`]: the single concurrency-safe sink of a run: counters, gauges
//!   and quantile summaries.
//! - [`benchmark`]: the orchestrator wiring runnables, metrics and a deadline
//!   into a bounded concurrent run that yields a [`Report`].
//! - [`Reporter`]: consumes the [`Report`] and sends it somewhere.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//! use stinger::{BenchmarkConfig, Metrics, Reporter, StdoutReporter};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run(scenario: Box<dyn stinger::Runnable>) -> Result<(), stinger::BoxError> {
//! let metrics = Arc::new(Metrics::new()?);
//! let config = BenchmarkConfig::builder().duration(Duration::from_secs(30)).build();
//!
//! let report = stinger::benchmark(&CancellationToken::new(), metrics, config, vec![scenario]).await?;
//! StdoutReporter.report(&report).await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Feature flags
//! - `macros` (default): the `#[record]` attribute under [`macros`].
//! - `exposition` (default): an HTTP scrape endpoint for the metrics of a
//!   running benchmark, see `metrics::exposition`.

extern crate self as stinger;

/// Error types
pub mod error;
/// Orchestration of a benchmark run
pub mod executor;
/// Data sources feeding actors
pub mod generator;
/// Counters, gauges and quantile summaries of a run
pub mod metrics;
/// Connection fan-out for network scenarios
pub mod net;
/// Round-robin resource pools
pub mod pool;
/// Run snapshots and Reporters
pub mod report;
/// Scenario traits
pub mod scenario;
/// Slice helpers
pub mod util;

pub use error::{BoxError, RunError, StingerError};
pub use executor::{BenchmarkConfig, benchmark};
pub use generator::{
    BufferedProducer, FileReader, FileWriter, FnGenerator, Generator, IterGenerator,
    ProducerConfig, Record,
};
pub use metrics::Metrics;
pub use net::{Connector, NetBencher, NetConfig, ObservedStream};
pub use pool::{RoundRobinPool, SyncRoundRobinPool};
pub use report::{JsonReporter, Report, Reporter, StdoutReporter};
pub use scenario::{Actor, Runnable};

#[cfg(feature = "macros")]
pub mod macros {
    pub use stinger_macros::*;
}
