use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{
    error::{BoxError, RunError},
    metrics::Metrics,
};

/// A [`Runnable`] describes one scenario of a benchmark: what has to be
/// prepared before the run, how many workers it needs and how each worker's
/// [`Actor`] is built.
///
/// Runnables are set up in order, before any worker starts. Setup is the
/// place to open connection pools, spawn generators or pre-fill buffers.
/// Everything started there should observe the token it receives: the run
/// scope, cancelled when the duration elapses and again whenever
/// [`benchmark`](crate::benchmark) returns, set-up failures included.
///
/// # Example
/// ```rust
/// use async_trait::async_trait;
/// use stinger::{Actor, BoxError, Metrics, RunError, Runnable};
/// use tokio_util::sync::CancellationToken;
///
/// struct Noop;
///
/// #[async_trait]
/// impl Actor for Noop {
///     async fn run(&mut self, metrics: &Metrics) -> Result<(), RunError> {
///         metrics
///             .observe_request(async { ("OK", true, Ok::<_, RunError>(())) })
///             .await
///     }
/// }
///
/// struct NoopScenario;
///
/// #[async_trait]
/// impl Runnable for NoopScenario {
///     async fn set_up(&mut self, _: &CancellationToken) -> Result<(), BoxError> {
///         Ok(())
///     }
///
///     fn parallelism(&self) -> usize {
///         4
///     }
///
///     async fn actor_setup(
///         &self,
///         _: &CancellationToken,
///         _worker: usize,
///     ) -> Result<Box<dyn Actor>, BoxError> {
///         Ok(Box::new(Noop))
///     }
/// }
/// ```
#[async_trait]
pub trait Runnable
where
    Self: Send + Sync,
{
    /// Name used in logs.
    fn name(&self) -> &str {
        "scenario"
    }

    /// Prepare shared resources. An error aborts the run before it starts.
    async fn set_up(&mut self, ctx: &CancellationToken) -> Result<(), BoxError>;

    /// Number of workers to spawn for this scenario.
    fn parallelism(&self) -> usize;

    /// Build the actor of worker `worker`, in `0..parallelism()`. Called
    /// exactly once per worker; an error aborts the run.
    async fn actor_setup(
        &self,
        ctx: &CancellationToken,
        worker: usize,
    ) -> Result<Box<dyn Actor>, BoxError>;
}

/// One worker's unit of work, called in a loop until the run ends.
///
/// A call performs one request (or one batch) and records it in `metrics`,
/// normally through [`Metrics::observe_request`]. The returned
/// [`RunError`] decides what the worker does next: keep going on
/// [`RunError::Failed`], exit on [`RunError::EndOfData`], abort the run on
/// [`RunError::Fatal`].
#[async_trait]
pub trait Actor
where
    Self: Send,
{
    async fn run(&mut self, metrics: &Metrics) -> Result<(), RunError>;
}
