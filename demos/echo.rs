//! Line echo benchmark.
//!
//! Every request is a JSON encoded greeting written as one line; the target
//! must answer with the very same line. Start a local echo server and run
//! against it:
//!
//! ```text
//! cargo run --release --example echo -- --serve --uri 127.0.0.1:7878 -d 10s --publishers 8
//! ```
//!
//! Record a data set once, then replay it:
//!
//! ```text
//! cargo run --example echo -- --record greetings.jsonl --records 100000
//! cargo run --example echo -- --serve --replay greetings.jsonl --pre-generation-only
//! ```
use std::{
    io,
    net::SocketAddr,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use clap::Parser;
use rand::Rng;
use stinger::{
    Actor, BenchmarkConfig, BoxError, BufferedProducer, FileReader, FileWriter, FnGenerator,
    Generator, JsonReporter, Metrics, NetBencher, NetConfig, ObservedStream, ProducerConfig,
    Reporter, RoundRobinPool, RunError, Runnable, StdoutReporter, StingerError,
    generator::{FileReaderConfig, FileWriterConfig},
    macros::record,
    metrics::exposition,
    net::StreamConnector,
    util::parse_endpoints,
};
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
    net::{TcpListener, TcpStream},
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Line echo load test", long_about = None)]
struct Cli {
    /// Comma separated list of echo server endpoints
    #[arg(long, env = "STINGER_URI", default_value = "127.0.0.1:7878")]
    uri: String,

    /// Runtime worker threads (number of CPUs if not provided)
    #[arg(long, env = "STINGER_PROCS")]
    procs: Option<usize>,

    /// Test duration, e.g. `500ms`, `30s`, `2m`
    #[arg(short = 'd', long, env = "STINGER_DURATION", default_value = "10s", value_parser = parse_duration)]
    duration: Duration,

    /// Log every failed request
    #[arg(short, long, env = "STINGER_VERBOSE")]
    verbose: bool,

    /// Requests buffer size
    #[arg(long = "bs", env = "STINGER_BUFFER_SIZE", default_value_t = 1 << 16)]
    buffer_size: usize,

    /// Number of tasks filling the requests buffer
    #[arg(long, env = "STINGER_PRODUCERS", default_value_t = 2)]
    producers: usize,

    /// Stop generating data once the buffer is full and only send what was buffered
    #[arg(long)]
    pre_generation_only: bool,

    /// Number of parallel publishers
    #[arg(long, env = "STINGER_PUBLISHERS", default_value_t = 1)]
    publishers: usize,

    /// Connections per endpoint and publisher
    #[arg(long, env = "STINGER_CLIENTS", default_value_t = 1)]
    clients: usize,

    /// Bound on establishing a single connection
    #[arg(long, default_value = "10s", value_parser = parse_duration)]
    connect_timeout: Duration,

    /// Address serving prometheus metrics (disabled by default)
    #[arg(long, env = "STINGER_PROMETHEUS_ADDR")]
    prometheus_addr: Option<SocketAddr>,

    /// Start an echo server on the first endpoint
    #[arg(long)]
    serve: bool,

    /// Write `--records` greetings to this file and exit
    #[arg(long)]
    record: Option<PathBuf>,

    /// Number of greetings written by `--record`
    #[arg(long, default_value_t = 10_000)]
    records: u64,

    /// Replay greetings from a file written with `--record`
    #[arg(long, conflicts_with = "record")]
    replay: Option<PathBuf>,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (value, unit) = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .map_or((s, "s"), |i| s.split_at(i));
    let value: f64 = value.parse().map_err(|e| format!("invalid duration {s:?}: {e}"))?;
    let secs = match unit {
        "ms" => value / 1_000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3_600.0,
        _ => return Err(format!("unknown duration unit {unit:?}, expected ms, s, m or h")),
    };
    Duration::try_from_secs_f64(secs).map_err(|e| format!("invalid duration {s:?}: {e}"))
}

#[record]
struct Greeting {
    name: String,
    seq: u64,
}

const FIRST_NAMES: [&str; 6] = ["Ada", "Grace", "Alan", "Barbara", "Edsger", "Margaret"];
const LAST_NAMES: [&str; 6] = ["Lovelace", "Hopper", "Turing", "Liskov", "Dijkstra", "Hamilton"];

fn faker() -> FnGenerator<impl Fn() -> Greeting + Send + Sync + 'static> {
    let seq = AtomicU64::new(0);
    FnGenerator::new(move || {
        let mut rng = rand::rng();
        let name = format!(
            "{} {}",
            FIRST_NAMES[rng.random_range(0..FIRST_NAMES.len())],
            LAST_NAMES[rng.random_range(0..LAST_NAMES.len())]
        );
        Greeting {
            name,
            seq: seq.fetch_add(1, Ordering::Relaxed),
        }
    })
}

type Connection = BufReader<ObservedStream<TcpStream>>;

struct EchoBencher<G> {
    net: NetBencher<StreamConnector>,
    source: Option<G>,
    producer: ProducerConfig,
    pre_generation_only: bool,
    data: Option<Arc<BufferedProducer<Greeting, G>>>,
}

impl<G> EchoBencher<G>
where
    G: Generator<Greeting> + 'static,
{
    fn new(
        net: NetBencher<StreamConnector>,
        source: G,
        producer: ProducerConfig,
        pre_generation_only: bool,
    ) -> Self {
        Self {
            net,
            source: Some(source),
            producer,
            pre_generation_only,
            data: None,
        }
    }
}

#[async_trait]
impl<G> Runnable for EchoBencher<G>
where
    G: Generator<Greeting> + 'static,
{
    fn name(&self) -> &str {
        "echo"
    }

    async fn set_up(&mut self, ctx: &CancellationToken) -> Result<(), BoxError> {
        self.net.set_up()?;

        let source = self.source.take().ok_or("echo bencher set up twice")?;
        let data = BufferedProducer::new(ctx, source, self.producer.clone());
        data.generate();
        data.wait(self.pre_generation_only).await;
        self.data = Some(Arc::new(data));
        Ok(())
    }

    fn parallelism(&self) -> usize {
        self.net.parallelism()
    }

    async fn actor_setup(
        &self,
        ctx: &CancellationToken,
        worker: usize,
    ) -> Result<Box<dyn Actor>, BoxError> {
        let data = self.data.clone().ok_or("echo bencher is not set up")?;
        let clients = self.net.create_clients(ctx, worker).await?;

        Ok(Box::new(EchoActor {
            pool: RoundRobinPool::new(clients.into_iter().map(BufReader::new).collect()),
            data,
            reply: String::new(),
        }))
    }
}

struct EchoActor<G> {
    pool: RoundRobinPool<Connection>,
    data: Arc<BufferedProducer<Greeting, G>>,
    reply: String,
}

#[async_trait]
impl<G> Actor for EchoActor<G>
where
    G: Generator<Greeting> + 'static,
{
    async fn run(&mut self, metrics: &Metrics) -> Result<(), RunError> {
        let Some(greeting) = self.data.next().await? else {
            return Err(RunError::EndOfData);
        };
        let mut line = serde_json::to_string(&greeting).map_err(RunError::failed)?;
        line.push('\n');

        let Some(conn) = self.pool.next_mut() else {
            return Err(StingerError::SetUp("publisher without connections".into()).into());
        };
        let reply = &mut self.reply;
        metrics.inc_messages(1);

        metrics
            .observe_request(async move {
                reply.clear();
                let res = async {
                    conn.get_mut().write_all(line.as_bytes()).await?;
                    conn.read_line(reply).await
                }
                .await;

                match res {
                    Ok(0) => (
                        "EOF",
                        false,
                        Err(RunError::failed("connection closed by peer")),
                    ),
                    Ok(_) if *reply == line => ("OK", true, Ok(())),
                    Ok(_) => (
                        "Mismatch",
                        false,
                        Err(RunError::failed(format!("unexpected reply {reply:?}"))),
                    ),
                    Err(e) => (io_code(&e), false, Err(RunError::failed(e))),
                }
            })
            .await
    }
}

fn io_code(e: &io::Error) -> &'static str {
    match e.kind() {
        io::ErrorKind::ConnectionReset => "ConnectionReset",
        io::ErrorKind::BrokenPipe => "BrokenPipe",
        io::ErrorKind::TimedOut => "TimedOut",
        io::ErrorKind::UnexpectedEof => "EOF",
        _ => "IO",
    }
}

async fn spawn_echo_server(addr: &str) -> Result<(), BoxError> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Echo server listening on {}", listener.local_addr()?);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(echo(stream));
                }
                Err(e) => tracing::warn!("accept failed: {e}"),
            }
        }
    });
    Ok(())
}

async fn echo(stream: TcpStream) {
    let (read, mut write) = stream.into_split();
    let mut read = BufReader::new(read);
    let mut line = Vec::new();
    loop {
        line.clear();
        match read.read_until(b'\n', &mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if write.write_all(&line).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn run(cli: Cli) -> Result<(), BoxError> {
    let ctx = CancellationToken::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping...");
            interrupt.cancel();
        }
    });

    if let Some(path) = &cli.record {
        let writer = FileWriter::new(
            &ctx,
            faker(),
            FileWriterConfig::builder()
                .path(path)
                .records(cli.records)
                .build(),
        );
        writer.generate().await?;
        return Ok(());
    }

    let endpoints = parse_endpoints(&cli.uri);
    if cli.serve {
        let addr = endpoints.first().ok_or("no endpoint to serve on")?;
        spawn_echo_server(addr).await?;
    }

    let metrics = Arc::new(Metrics::new()?);
    if let Some(addr) = cli.prometheus_addr {
        let (metrics, token) = (Arc::clone(&metrics), ctx.clone());
        tokio::spawn(async move {
            if let Err(e) = exposition::serve(metrics, addr, token).await {
                tracing::error!("{e}");
            }
        });
    }

    let net = NetBencher::new(
        Arc::clone(&metrics),
        StreamConnector,
        NetConfig::builder()
            .endpoints(endpoints)
            .clients(cli.clients)
            .parallelism(cli.publishers)
            .connect_timeout(cli.connect_timeout)
            .build(),
    );
    let producer = ProducerConfig::builder()
        .capacity(cli.buffer_size)
        .parallelism(cli.producers)
        .build();

    let runner: Box<dyn Runnable> = match &cli.replay {
        Some(path) => Box::new(EchoBencher::new(
            net,
            FileReader::new(FileReaderConfig::builder().path(path).build()),
            producer,
            cli.pre_generation_only,
        )),
        None => Box::new(EchoBencher::new(
            net,
            faker(),
            producer,
            cli.pre_generation_only,
        )),
    };
    tracing::info!("echo runner created");

    let config = BenchmarkConfig::builder()
        .duration(cli.duration)
        .verbose(cli.verbose)
        .build();
    let report = stinger::benchmark(&ctx, metrics, config, vec![runner]).await?;
    // stops the producers and the scrape endpoint
    ctx.cancel();

    if cli.json {
        JsonReporter.report(&report).await
    } else {
        StdoutReporter.report(&report).await
    }
}

fn main() -> Result<(), BoxError> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cli.procs.unwrap_or_else(num_cpus::get).max(1))
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))
}
