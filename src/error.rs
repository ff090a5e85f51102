use std::time::Duration;

use thiserror::Error;

/// Opaque error crossing the scenario seams (user setup code, protocol clients).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Conditions that abort a whole benchmark run.
#[derive(Error, Debug)]
pub enum StingerError {
    #[error("runnable setup failed: {0}")]
    SetUp(#[source] BoxError),

    #[error("actor setup failed for worker {worker}: {source}")]
    ActorSetup {
        worker: usize,
        #[source]
        source: BoxError,
    },

    #[error("connect to {endpoint} failed: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    #[error("connect to {endpoint} timed out after {timeout:?}")]
    ConnectTimeout { endpoint: String, timeout: Duration },

    #[error("replay error: {0}")]
    Replay(String),

    #[error("record writer error: {0}")]
    Record(String),

    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    #[error("metrics error: {0}")]
    Metrics(String),

    #[error("metrics exposition error: {0}")]
    Exposition(String),

    #[error("worker task panicked: {0}")]
    WorkerPanicked(String),
}

/// Outcome of a single [`crate::Actor::run`] call that did not succeed.
#[derive(Error, Debug)]
pub enum RunError {
    /// The actor's data source is exhausted; the worker exits cleanly.
    #[error("end of data")]
    EndOfData,

    /// A request failed. Already accounted for in the metrics, the worker keeps going.
    #[error(transparent)]
    Failed(BoxError),

    /// Unrecoverable condition, the run is aborted.
    #[error(transparent)]
    Fatal(StingerError),
}

impl RunError {
    pub fn failed<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        Self::Failed(err.into())
    }
}

impl From<StingerError> for RunError {
    fn from(err: StingerError) -> Self {
        Self::Fatal(err)
    }
}
