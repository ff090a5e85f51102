//! Networking scenarios — connection fan-out for request/response protocols
//!
//! [`NetBencher`] spreads a configured number of client connections over a
//! list of endpoints and hands every worker its own share. Protocol bindings
//! plug in through [`Connector`], which turns a raw (byte-observed) TCP stream
//! into a client. A scenario embeds a `NetBencher` in its
//! [`Runnable`](crate::Runnable):
//!
//! - [`NetBencher::set_up`] from `Runnable::set_up`,
//! - [`NetBencher::parallelism`] from `Runnable::parallelism`,
//! - [`NetBencher::create_clients`] from `Runnable::actor_setup`, the clients
//!   usually ending up in a private [`RoundRobinPool`](crate::RoundRobinPool).
//!
//! # Distribution
//!
//! Every endpoint is repeated `clients * parallelism` times, the list is
//! shuffled and cut into `parallelism` slices of `endpoints * clients`
//! entries. Worker `i` connects to every entry of slice `i`, so each endpoint
//! receives `clients * parallelism` connections overall.
pub mod observed;

pub use observed::ObservedStream;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::future::try_join_all;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::{
    error::{BoxError, StingerError},
    metrics::Metrics,
    util::{multiply_slice, shuffle, split_slice},
};

/// Turns an established connection into a protocol client.
#[async_trait]
pub trait Connector
where
    Self: Send + Sync,
{
    type Client: Send;

    async fn connect(&self, stream: ObservedStream<TcpStream>) -> Result<Self::Client, BoxError>;
}

/// [`Connector`] handing out the observed stream itself, for line or
/// frame based protocols driven directly by the actor.
#[derive(Clone, Copy, Debug, Default)]
pub struct StreamConnector;

#[async_trait]
impl Connector for StreamConnector {
    type Client = ObservedStream<TcpStream>;

    async fn connect(&self, stream: ObservedStream<TcpStream>) -> Result<Self::Client, BoxError> {
        Ok(stream)
    }
}

#[derive(Clone, Debug, TypedBuilder)]
pub struct NetConfig {
    /// Target `host:port` list.
    #[builder(setter(into))]
    pub endpoints: Vec<String>,
    /// Connections per endpoint and worker.
    #[builder(default = 1)]
    pub clients: usize,
    /// Number of workers.
    #[builder(default = num_cpus::get())]
    pub parallelism: usize,
    /// Bound on establishing a single connection.
    #[builder(default = Duration::from_secs(10))]
    pub connect_timeout: Duration,
}

pub struct NetBencher<C> {
    metrics: Arc<Metrics>,
    connector: C,
    config: NetConfig,
    slices: Vec<Vec<String>>,
}

impl<C> NetBencher<C>
where
    C: Connector,
{
    pub fn new(metrics: Arc<Metrics>, connector: C, config: NetConfig) -> Self {
        Self {
            metrics,
            connector,
            config,
            slices: Vec::new(),
        }
    }

    /// Distribute the connections over the workers and start counting
    /// transferred bytes.
    pub fn set_up(&mut self) -> Result<(), StingerError> {
        if self.config.endpoints.is_empty() {
            return Err(StingerError::SetUp("no endpoints configured".into()));
        }
        if self.config.clients == 0 {
            return Err(StingerError::SetUp(
                "at least one client per endpoint is required".into(),
            ));
        }

        let mut endpoints = multiply_slice(
            &self.config.endpoints,
            self.config.clients * self.config.parallelism,
        );
        shuffle(&mut endpoints);
        self.slices = split_slice(&endpoints, self.config.endpoints.len() * self.config.clients);
        tracing::info!(
            "Distributing {} connections over {} workers",
            endpoints.len(),
            self.slices.len()
        );

        self.metrics.enable();
        Ok(())
    }

    pub fn parallelism(&self) -> usize {
        self.config.parallelism
    }

    /// Endpoints assigned to each worker, empty before [`NetBencher::set_up`].
    pub fn slices(&self) -> &[Vec<String>] {
        &self.slices
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Open one client per endpoint of worker `worker`'s slice. The first
    /// connection failure fails the whole call.
    pub async fn create_clients(
        &self,
        ctx: &CancellationToken,
        worker: usize,
    ) -> Result<Vec<C::Client>, StingerError> {
        if self.slices.is_empty() {
            return Err(StingerError::SetUp(
                "create_clients called before set_up".into(),
            ));
        }

        let slice = &self.slices[worker % self.slices.len()];
        tracing::debug!("Worker {worker}: opening {} connections", slice.len());
        try_join_all(slice.iter().map(|endpoint| self.connect(ctx, endpoint))).await
    }

    async fn connect(
        &self,
        ctx: &CancellationToken,
        endpoint: &str,
    ) -> Result<C::Client, StingerError> {
        let timeout = self.config.connect_timeout;
        let connected = tokio::select! {
            _ = ctx.cancelled() => {
                return Err(StingerError::Connect {
                    endpoint: endpoint.to_owned(),
                    source: "cancelled".into(),
                });
            }
            res = tokio::time::timeout(timeout, TcpStream::connect(endpoint)) => res,
        };

        let stream = connected
            .map_err(|_| StingerError::ConnectTimeout {
                endpoint: endpoint.to_owned(),
                timeout,
            })?
            .map_err(|e| StingerError::Connect {
                endpoint: endpoint.to_owned(),
                source: e.into(),
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("set_nodelay on {endpoint}: {e}");
        }

        self.connector
            .connect(ObservedStream::new(stream, Arc::clone(&self.metrics)))
            .await
            .map_err(|source| StingerError::Connect {
                endpoint: endpoint.to_owned(),
                source,
            })
    }
}
