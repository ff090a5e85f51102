use std::{
    io::Write,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stinger::{
    Actor, BenchmarkConfig, BoxError, BufferedProducer, FileReader, FnGenerator,
    Metrics, NetBencher, NetConfig, ObservedStream, ProducerConfig, Record, RoundRobinPool,
    RunError, Runnable, StingerError, benchmark, generator::FileReaderConfig,
    net::StreamConnector,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_util::sync::CancellationToken;

const GUARD: Duration = Duration::from_secs(30);

fn config(duration: Duration) -> BenchmarkConfig {
    BenchmarkConfig::builder()
        .duration(duration)
        .verbose(true)
        .build()
}

/// Runs `budget` successful requests, then reports end of data.
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

/// Never runs out of work; every fourth request fails.
struct Endless {
    n: u64,
}

#[async_trait]
impl Actor for Endless {
    async fn run(&mut self, metrics: &Metrics) -> Result<(), RunError> {
        self.n += 1;
        let fail = self.n % 4 == 0;
        metrics
            .observe_request(async move {
                tokio::time::sleep(Duration::from_millis(1)).await;
                if fail {
                    ("Unavailable", false, Err(RunError::failed("service unavailable")))
                } else {
                    ("OK", true, Ok(()))
                }
            })
            .await
    }
}

type ActorFactory = Box<dyn Fn(usize) -> Result<Box<dyn Actor>, BoxError> + Send + Sync>;

fn factory<F>(f: F) -> ActorFactory
where
    F: Fn(usize) -> Result<Box<dyn Actor>, BoxError> + Send + Sync + 'static,
{
    Box::new(f)
}

struct Scenario {
    parallelism: usize,
    factory: ActorFactory,
    set_up_error: Option<&'static str>,
    actor_setups: Arc<AtomicUsize>,
}

impl Scenario {
    fn new(parallelism: usize, factory: ActorFactory) -> Self {
        Self {
            parallelism,
            factory,
            set_up_error: None,
            actor_setups: Arc::default(),
        }
    }
}

#[async_trait]
impl Runnable for Scenario {
    async fn set_up(&mut self, _: &CancellationToken) -> Result<(), BoxError> {
        match self.set_up_error {
            Some(msg) => Err(msg.into()),
            None => Ok(()),
        }
    }

    fn parallelism(&self) -> usize {
        self.parallelism
    }

    async fn actor_setup(
        &self,
        _: &CancellationToken,
        worker: usize,
    ) -> Result<Box<dyn Actor>, BoxError> {
        self.actor_setups.fetch_add(1, Ordering::SeqCst);
        (self.factory)(worker)
    }
}

#[tokio::test]
async fn end_of_data_finishes_before_the_deadline() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let scenario = Scenario::new(2, factory(|_| Ok(Box::new(Countdown { budget: 1 }))));
    let setups = Arc::clone(&scenario.actor_setups);

    let started = Instant::now();
    let report = timeout(
        GUARD,
        benchmark(
            &CancellationToken::new(),
            Arc::clone(&metrics),
            config(Duration::from_secs(60)),
            vec![Box::new(scenario)],
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(setups.load(Ordering::SeqCst), 2);
    assert_eq!(report.requests, 2);
    assert_eq!(report.total_responses(), 2);
    assert_eq!(report.errors(), 0);
    assert_eq!(metrics.requests(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deadline_stops_endless_actors() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let scenario = Scenario::new(4, factory(|_| Ok(Box::new(Endless { n: 0 }))));

    let report = timeout(
        GUARD,
        benchmark(
            &CancellationToken::new(),
            metrics,
            config(Duration::from_millis(300)),
            vec![Box::new(scenario)],
        ),
    )
    .await
    .unwrap()
    .unwrap();

    assert!(report.duration >= Duration::from_millis(300));
    assert!(report.duration < Duration::from_secs(10));
    assert!(report.requests > 0);
    // in-flight requests complete, nothing is lost at shutdown
    assert_eq!(report.total_responses(), report.requests);
    assert!(report.errors() > 0);
    assert!(report.latency.iter().any(|p| p.success));
    assert!(report.latency.iter().any(|p| !p.success));

    let text = report.to_string();
    assert!(text.contains("\nREQUESTS:\n"));
    assert!(text.contains("SUCCEEDED:\n"));
    assert!(text.contains("FAILED:\n"));
    assert!(text.contains("\nCODES:\nOK "));
}

#[tokio::test]
async fn set_up_failure_aborts_before_any_worker() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let mut scenario = Scenario::new(3, factory(|_| Ok(Box::new(Countdown { budget: 1 }))));
    scenario.set_up_error = Some("pool exhausted");
    let setups = Arc::clone(&scenario.actor_setups);

    let res = benchmark(
        &CancellationToken::new(),
        Arc::clone(&metrics),
        config(Duration::from_secs(60)),
        vec![Box::new(scenario)],
    )
    .await;

    assert!(matches!(res, Err(StingerError::SetUp(_))));
    assert_eq!(setups.load(Ordering::SeqCst), 0);
    assert_eq!(metrics.requests(), 0);
}

#[tokio::test]
async fn actor_setup_failure_is_fatal() {
    let metrics = Arc::new(Metrics::new().unwrap());
    let scenario = Scenario::new(
        3,
        factory(|worker| {
            if worker == 2 {
                Err("connection refused".into())
            } else {
                Ok(Box::new(Endless { n: 0 }))
            }
        }),
    );

    let res = timeout(
        GUARD,
        benchmark(
            &CancellationToken::new(),
            metrics,
            config(Duration::from_secs(3_600)),
            vec![Box::new(scenario)],
        ),
    )
    .await
    .unwrap();

    assert!(matches!(res, Err(StingerError::ActorSetup { worker: 2, .. })));
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Line {
    n: u64,
}

impl Record for Line {}

struct Replay {
    source: Arc<BufferedProducer<Line, FileReader<Line>>>,
}

#[async_trait]
impl Actor for Replay {
    async fn run(&mut self, metrics: &Metrics) -> Result<(), RunError> {
        let Some(_line) = self.source.next().await? else {
            return Err(RunError::EndOfData);
        };
        metrics.inc_messages(1);
        Ok(())
    }
}

#[tokio::test]
async fn corrupt_replay_record_is_fatal() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "{{\"n\":1}}").unwrap();
    writeln!(file, "{{\"n\":").unwrap();

    let ctx = CancellationToken::new();
    let source = Arc::new(BufferedProducer::new(
        &ctx,
        FileReader::new(FileReaderConfig::builder().path(file.path()).build()),
        ProducerConfig::builder().capacity(4).parallelism(1).build(),
    ));
    source.generate();

    let factory_source = Arc::clone(&source);
    let scenario = Scenario::new(
        1,
        factory(move |_| {
            Ok(Box::new(Replay {
                source: Arc::clone(&factory_source),
            }))
        }),
    );

    let res = timeout(
        GUARD,
        benchmark(
            &ctx,
            Arc::new(Metrics::new().unwrap()),
            config(Duration::from_secs(3_600)),
            vec![Box::new(scenario)],
        ),
    )
    .await
    .unwrap();

    assert!(matches!(res, Err(StingerError::Replay(msg)) if msg.contains(":2:")));
}

const PAYLOAD: &str = "ping";

fn payload() -> String {
    PAYLOAD.to_string()
}

async fn echo_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(async move {
                let (read, mut write) = stream.into_split();
                let mut lines = BufReader::new(read).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    addr
}

type Payloads = BufferedProducer<String, FnGenerator<fn() -> String>>;

struct EchoActor {
    pool: RoundRobinPool<BufReader<ObservedStream<TcpStream>>>,
    data: Arc<Payloads>,
    reply: String,
}

#[async_trait]
impl Actor for EchoActor {
    async fn run(&mut self, metrics: &Metrics) -> Result<(), RunError> {
        let Some(payload) = self.data.next().await? else {
            return Err(RunError::EndOfData);
        };
        let Some(conn) = self.pool.next_mut() else {
            return Err(StingerError::SetUp("worker without connections".into()).into());
        };
        let reply = &mut self.reply;

        metrics
            .observe_request(async move {
                reply.clear();
                let res = async {
                    conn.get_mut().write_all(format!("{payload}\n").as_bytes()).await?;
                    conn.read_line(reply).await
                }
                .await;
                match res {
                    Ok(_) => ("OK", true, Ok(())),
                    Err(e) => ("IO", false, Err(RunError::failed(e))),
                }
            })
            .await
    }
}

struct EchoScenario {
    bencher: NetBencher<StreamConnector>,
    capacity: usize,
    data: Option<Arc<Payloads>>,
}

#[async_trait]
impl Runnable for EchoScenario {
    fn name(&self) -> &str {
        "echo"
    }

    async fn set_up(&mut self, ctx: &CancellationToken) -> Result<(), BoxError> {
        self.bencher.set_up()?;

        let data = BufferedProducer::new(
            ctx,
            FnGenerator::new(payload as fn() -> String),
            ProducerConfig::builder()
                .capacity(self.capacity)
                .parallelism(2)
                .sample_interval(Duration::from_millis(10))
                .build(),
        );
        data.generate();
        data.wait(true).await;
        self.data = Some(Arc::new(data));
        Ok(())
    }

    fn parallelism(&self) -> usize {
        self.bencher.parallelism()
    }

    async fn actor_setup(
        &self,
        ctx: &CancellationToken,
        worker: usize,
    ) -> Result<Box<dyn Actor>, BoxError> {
        let data = self.data.clone().ok_or("set_up did not run")?;
        let clients = self.bencher.create_clients(ctx, worker).await?;
        Ok(Box::new(EchoActor {
            pool: RoundRobinPool::new(clients.into_iter().map(BufReader::new).collect()),
            data,
            reply: String::new(),
        }))
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pre_generated_echo_run_counts_every_byte() {
    let addr = echo_server().await;
    let metrics = Arc::new(Metrics::new().unwrap());
    let capacity = 64;
    let scenario = EchoScenario {
        bencher: NetBencher::new(
            Arc::clone(&metrics),
            StreamConnector,
            NetConfig::builder()
                .endpoints(vec![addr])
                .clients(2)
                .parallelism(2)
                .build(),
        ),
        capacity,
        data: None,
    };

    let report = timeout(
        GUARD,
        benchmark(
            &CancellationToken::new(),
            metrics,
            config(Duration::from_secs(60)),
            vec![Box::new(scenario)],
        ),
    )
    .await
    .unwrap()
    .unwrap();

    let line = (PAYLOAD.len() + 1) as u64;
    assert_eq!(report.requests, capacity as u64);
    assert_eq!(report.errors(), 0);
    assert_eq!(report.sent_bytes, capacity as u64 * line);
    assert_eq!(report.received_bytes, capacity as u64 * line);
    assert!(report.to_string().contains("\nDATA:\n"));
}
