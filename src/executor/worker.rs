use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    error::{RunError, StingerError},
    metrics::Metrics,
    scenario::Runnable,
};

/// Body of one worker task: build the actor, then run it until the scope is
/// cancelled or the actor runs out of data.
///
/// The scope is only checked between calls, an in-flight call always
/// completes so its request is accounted for.
pub(super) async fn run(
    runner: Arc<dyn Runnable>,
    id: usize,
    scope: CancellationToken,
    metrics: Arc<Metrics>,
    verbose: bool,
) -> Result<(), StingerError> {
    let mut actor = runner
        .actor_setup(&scope, id)
        .await
        .map_err(|source| StingerError::ActorSetup { worker: id, source })?;
    tracing::debug!("Worker {id} of {} started.", runner.name());

    let mut iterations: u64 = 0;
    while !scope.is_cancelled() {
        match actor.run(&metrics).await {
            Ok(()) => {}
            Err(RunError::EndOfData) => {
                tracing::debug!("Worker {id} of {}: end of data.", runner.name());
                break;
            }
            Err(RunError::Failed(e)) => {
                if verbose {
                    tracing::warn!("run err: {e}");
                }
            }
            Err(RunError::Fatal(e)) => return Err(e),
        }
        iterations += 1;
        // actors that never suspend must not starve the rest of the runtime
        tokio::task::consume_budget().await;
    }

    tracing::debug!(
        "Worker {id} of {} stopped after {iterations} iterations.",
        runner.name()
    );
    Ok(())
}
