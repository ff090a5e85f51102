//! Executor — orchestration of a benchmark run
//!
//! [`benchmark`] drives a set of [`Runnable`]s for a bounded duration and
//! returns the [`Report`] of the run.
//!
//! # High-level flow
//! 1. A run scope is derived from the caller's token. Every runnable's
//!    [`Runnable::set_up`] runs with it, in order. The first error aborts the
//!    run before any worker exists.
//! 2. The timer is started.
//! 3. [`Runnable::parallelism`] workers are spawned per runnable. Each worker
//!    builds its [`Actor`](crate::Actor) once, then calls
//!    [`Actor::run`](crate::Actor::run) in a loop until the scope is cancelled
//!    or its data runs out.
//! 4. When `duration` elapses the scope is cancelled, which also stops the
//!    producers started during set-up. Workers finish the call they are in, so
//!    every started request is accounted for. Workers still busy after
//!    `grace` are aborted.
//! 5. The timer is stopped and the metrics are snapshotted into a [`Report`].
//!    The scope is cancelled on every way out of [`benchmark`].
//!
//! Per-request failures never stop a worker. An actor setup failure, a
//! [`RunError::Fatal`](crate::RunError::Fatal) or a panicking worker cancel
//! the scope and make [`benchmark`] return the error.
mod worker;

use std::{sync::Arc, time::Duration};

use tokio::{
    task::{JoinError, JoinSet},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::{error::StingerError, metrics::Metrics, report::Report, scenario::Runnable};

/// Upper bound used when a configured duration does not fit in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

#[derive(Clone, Debug, TypedBuilder)]
pub struct BenchmarkConfig {
    /// How long workers keep issuing requests.
    pub duration: Duration,
    /// Log every failed request.
    #[builder(default = false)]
    pub verbose: bool,
    /// How long in-flight calls may take to finish once the run is over.
    #[builder(default = Duration::from_secs(10))]
    pub grace: Duration,
}

/// Run `runners` against `metrics` for `config.duration`.
///
/// The run also stops when `ctx` is cancelled or when every worker ran out of
/// data, whichever comes first.
pub async fn benchmark(
    ctx: &CancellationToken,
    metrics: Arc<Metrics>,
    config: BenchmarkConfig,
    mut runners: Vec<Box<dyn Runnable>>,
) -> Result<Report, StingerError> {
    let scope = ctx.child_token();
    let _cancel_on_exit = scope.clone().drop_guard();

    tracing::info!("Setting up {} scenarios...", runners.len());
    for runner in runners.iter_mut() {
        runner.set_up(&scope).await.map_err(StingerError::SetUp)?;
    }
    let runners: Vec<Arc<dyn Runnable>> = runners.into_iter().map(Arc::from).collect();

    metrics.start_timer();

    let mut workers = JoinSet::new();
    for runner in &runners {
        let parallelism = runner.parallelism();
        tracing::info!("Spawning {parallelism} workers for {}...", runner.name());
        for id in 0..parallelism {
            workers.spawn(worker::run(
                Arc::clone(runner),
                id,
                scope.clone(),
                Arc::clone(&metrics),
                config.verbose,
            ));
        }
    }

    tracing::info!("Running now!");
    let outcome = drain(&mut workers, &scope, &config).await;
    scope.cancel();
    metrics.stop_timer();
    outcome?;

    tracing::info!("Done running benchmark in {:?}!", metrics.elapsed());
    Ok(metrics.result())
}

/// Join every worker, enforcing the run duration and the grace period.
async fn drain(
    workers: &mut JoinSet<Result<(), StingerError>>,
    scope: &CancellationToken,
    config: &BenchmarkConfig,
) -> Result<(), StingerError> {
    let timer = tokio::time::sleep_until(after(config.duration));
    tokio::pin!(timer);
    let mut stopping = false;

    loop {
        tokio::select! {
            joined = workers.join_next() => {
                let Some(joined) = joined else {
                    return Ok(());
                };
                if let Err(e) = outcome(joined) {
                    tracing::error!("Aborting run: {e}");
                    scope.cancel();
                    workers.abort_all();
                    return Err(e);
                }
            }
            _ = scope.cancelled(), if !stopping => {
                tracing::info!("Run cancelled, waiting for {} workers...", workers.len());
                stopping = true;
                timer.as_mut().reset(after(config.grace));
            }
            _ = &mut timer => {
                if !stopping {
                    tracing::info!("Duration elapsed, waiting for {} workers...", workers.len());
                    scope.cancel();
                    stopping = true;
                    timer.as_mut().reset(after(config.grace));
                    continue;
                }

                tracing::warn!(
                    "{} workers still busy after {:?}, aborting them",
                    workers.len(),
                    config.grace
                );
                workers.abort_all();
                while workers.join_next().await.is_some() {}
                return Ok(());
            }
        }
    }
}

fn outcome(joined: Result<Result<(), StingerError>, JoinError>) -> Result<(), StingerError> {
    match joined {
        Ok(res) => res,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(StingerError::WorkerPanicked(e.to_string())),
    }
}

fn after(d: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(d).unwrap_or(now + FAR_FUTURE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::{BoxError, RunError},
        generator::{BufferedProducer, Generator, ProducerConfig},
        scenario::Actor,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    const GUARD: Duration = Duration::from_secs(10);

    /// Succeeds `budget` times, then reports end of data.
    struct Countdown {
        budget: usize,
    }

    #[async_trait]
    impl Actor for Countdown {
        async fn run(&mut self, metrics: &Metrics) -> Result<(), RunError> {
            if self.budget == 0 {
                return Err(RunError::EndOfData);
            }
            self.budget -= 1;
            metrics
                .observe_request(async { ("OK", true, Ok::<_, RunError>(())) })
                .await
        }
    }

    struct CountdownScenario {
        workers: usize,
        budget: usize,
        set_up_calls: Arc<AtomicUsize>,
        actor_setups: Arc<AtomicUsize>,
    }

    impl CountdownScenario {
        fn new(workers: usize, budget: usize) -> Self {
            Self {
                workers,
                budget,
                set_up_calls: Arc::default(),
                actor_setups: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl Runnable for CountdownScenario {
        async fn set_up(&mut self, _: &CancellationToken) -> Result<(), BoxError> {
            self.set_up_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn parallelism(&self) -> usize {
            self.workers
        }

        async fn actor_setup(
            &self,
            _: &CancellationToken,
            worker: usize,
        ) -> Result<Box<dyn Actor>, BoxError> {
            assert!(worker < self.workers);
            self.actor_setups.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(Countdown {
                budget: self.budget,
            }))
        }
    }

    fn config(duration: Duration) -> BenchmarkConfig {
        BenchmarkConfig::builder().duration(duration).build()
    }

    #[tokio::test]
    async fn spawns_parallelism_workers_per_runnable() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let first = CountdownScenario::new(3, 2);
        let second = CountdownScenario::new(5, 1);
        let (set_ups, actors) = (Arc::clone(&first.set_up_calls), Arc::clone(&first.actor_setups));
        let second_actors = Arc::clone(&second.actor_setups);

        let report = timeout(
            GUARD,
            benchmark(
                &CancellationToken::new(),
                Arc::clone(&metrics),
                config(Duration::from_secs(60)),
                vec![Box::new(first), Box::new(second)],
            ),
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(set_ups.load(Ordering::SeqCst), 1);
        assert_eq!(actors.load(Ordering::SeqCst), 3);
        assert_eq!(second_actors.load(Ordering::SeqCst), 5);
        assert_eq!(report.requests, 3 * 2 + 5);
    }

    #[tokio::test]
    async fn no_runnables_is_an_empty_run() {
        let metrics = Arc::new(Metrics::new().unwrap());

        let report = benchmark(
            &CancellationToken::new(),
            metrics,
            config(Duration::from_secs(60)),
            vec![],
        )
        .await
        .unwrap();

        assert_eq!(report.requests, 0);
        assert!(report.responses.is_empty());
    }

    #[tokio::test]
    async fn parent_cancellation_stops_the_run() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let ctx = CancellationToken::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let report = timeout(
            GUARD,
            benchmark(
                &ctx,
                metrics,
                config(Duration::from_secs(3_600)),
                vec![Box::new(CountdownScenario::new(2, usize::MAX))],
            ),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(report.requests > 0);
        assert_eq!(report.total_responses(), report.requests);
    }

    /// Never yields an item.
    struct Stalled;

    impl Generator<u8> for Stalled {
        async fn next(&self) -> Result<Option<u8>, StingerError> {
            std::future::pending().await
        }
    }

    struct Drain {
        data: Arc<BufferedProducer<u8, Stalled>>,
    }

    #[async_trait]
    impl Actor for Drain {
        async fn run(&mut self, _: &Metrics) -> Result<(), RunError> {
            match self.data.next().await.map_err(RunError::Fatal)? {
                Some(_) => Ok(()),
                None => Err(RunError::EndOfData),
            }
        }
    }

    #[derive(Default)]
    struct StalledScenario {
        data: Option<Arc<BufferedProducer<u8, Stalled>>>,
        set_up_token: Arc<parking_lot::Mutex<Option<CancellationToken>>>,
    }

    #[async_trait]
    impl Runnable for StalledScenario {
        async fn set_up(&mut self, ctx: &CancellationToken) -> Result<(), BoxError> {
            *self.set_up_token.lock() = Some(ctx.clone());
            let data = BufferedProducer::new(
                ctx,
                Stalled,
                ProducerConfig::builder().capacity(4).parallelism(2).build(),
            );
            data.generate();
            self.data = Some(Arc::new(data));
            Ok(())
        }

        fn parallelism(&self) -> usize {
            2
        }

        async fn actor_setup(
            &self,
            _: &CancellationToken,
            _: usize,
        ) -> Result<Box<dyn Actor>, BoxError> {
            let data = self.data.clone().ok_or("set_up did not run")?;
            Ok(Box::new(Drain { data }))
        }
    }

    #[tokio::test]
    async fn deadline_reaches_producers_started_in_set_up() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let scenario = StalledScenario::default();
        let set_up_token = Arc::clone(&scenario.set_up_token);
        let config = BenchmarkConfig::builder()
            .duration(Duration::from_millis(200))
            .grace(Duration::from_secs(30))
            .build();

        let started = Instant::now();
        let report = timeout(
            GUARD,
            benchmark(&CancellationToken::new(), metrics, config, vec![Box::new(scenario)]),
        )
        .await
        .unwrap()
        .unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(report.duration < Duration::from_secs(5));
        let token = set_up_token.lock().clone().unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn set_up_token_is_cancelled_when_set_up_fails() {
        struct Failing(Arc<parking_lot::Mutex<Option<CancellationToken>>>);

        #[async_trait]
        impl Runnable for Failing {
            async fn set_up(&mut self, ctx: &CancellationToken) -> Result<(), BoxError> {
                *self.0.lock() = Some(ctx.clone());
                Err("no pool".into())
            }

            fn parallelism(&self) -> usize {
                1
            }

            async fn actor_setup(
                &self,
                _: &CancellationToken,
                _: usize,
            ) -> Result<Box<dyn Actor>, BoxError> {
                unreachable!()
            }
        }

        let seen = Arc::new(parking_lot::Mutex::new(None));
        let res = benchmark(
            &CancellationToken::new(),
            Arc::new(Metrics::new().unwrap()),
            config(Duration::from_secs(1)),
            vec![Box::new(Failing(Arc::clone(&seen)))],
        )
        .await;

        assert!(matches!(res, Err(StingerError::SetUp(_))));
        assert!(seen.lock().clone().unwrap().is_cancelled());
    }

    #[test]
    fn oversized_durations_do_not_overflow() {
        assert!(after(Duration::MAX) > Instant::now());
    }
}
