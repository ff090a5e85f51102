//! BufferedProducer — bounded, concurrently filled queue in front of a generator.
//!
//! `P` producer tasks pull from the wrapped [`Generator`] and push into a queue
//! of capacity `S`. Consumers pull with [`BufferedProducer::next`]. Items from
//! different producer tasks are not ordered relative to each other.
//!
//! # Lifecycle
//!
//! 1. [`BufferedProducer::new`] derives a child token from the caller's token.
//! 2. [`BufferedProducer::generate`] spawns the producer tasks.
//! 3. Optionally [`BufferedProducer::wait`] samples occupancy until the queue is
//!    full. With `stop = true` it then cancels the producers and closes the queue:
//!    the buffered items become a fixed data set that is drained by the run, after
//!    which `next` returns the exhaustion sentinel.
//!
//! If the token fires while `wait` is still sampling, `wait` returns **without**
//! closing the queue. Consumers drain whatever is buffered and then receive the
//! sentinel since nothing refills the queue.
//!
//! The queue is also closed when the source reports an error, or once every
//! producer task has exited after the source reported exhaustion. Items that
//! are already pulled are always pushed before that happens.
//!
//! Dropping the producer cancels its tasks.
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use tokio::{
    sync::{Semaphore, TryAcquireError},
    time::{Instant, interval_at},
};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use super::Generator;
use crate::error::StingerError;

#[derive(Clone, Debug, TypedBuilder)]
pub struct ProducerConfig {
    /// Queue capacity.
    pub capacity: usize,
    /// Number of producer tasks.
    #[builder(default = num_cpus::get())]
    pub parallelism: usize,
    /// How often `wait` samples the queue occupancy.
    #[builder(default = Duration::from_secs(1))]
    pub sample_interval: Duration,
}

pub struct BufferedProducer<T, G> {
    source: Arc<G>,
    queue: Arc<BoundedQueue<T>>,
    token: CancellationToken,
    failure: Arc<Mutex<Option<StingerError>>>,
    /// Producer tasks still running.
    live: Arc<AtomicUsize>,
    parallelism: usize,
    sample_interval: Duration,
}

impl<T, G> BufferedProducer<T, G>
where
    T: Send + 'static,
    G: Generator<T> + 'static,
{
    /// The producer stops when `parent` is cancelled.
    pub fn new(parent: &CancellationToken, source: G, config: ProducerConfig) -> Self {
        Self {
            source: Arc::new(source),
            queue: Arc::new(BoundedQueue::new(config.capacity)),
            token: parent.child_token(),
            failure: Arc::new(Mutex::new(None)),
            live: Arc::new(AtomicUsize::new(0)),
            parallelism: config.parallelism,
            sample_interval: config.sample_interval,
        }
    }

    /// Spawn the producer tasks. Must be called from within a tokio runtime.
    pub fn generate(&self) {
        tracing::debug!("Spawning {} producer tasks...", self.parallelism);
        self.live.fetch_add(self.parallelism, Ordering::AcqRel);
        for i in 0..self.parallelism {
            let source = Arc::clone(&self.source);
            let queue = Arc::clone(&self.queue);
            let token = self.token.clone();
            let failure = Arc::clone(&self.failure);
            let live = Arc::clone(&self.live);

            tokio::spawn(async move {
                loop {
                    let item = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        item = source.next() => item,
                    };

                    match item {
                        Ok(Some(item)) => {
                            let pushed = tokio::select! {
                                biased;
                                _ = token.cancelled() => break,
                                pushed = queue.push(item) => pushed,
                            };
                            if pushed.is_err() {
                                break;
                            }
                        }
                        Ok(None) => {
                            tracing::debug!("Producer {i}: source exhausted.");
                            break;
                        }
                        Err(e) => {
                            tracing::error!("Producer {i}: source failed: {e}");
                            failure.lock().get_or_insert(e);
                            queue.close();
                            token.cancel();
                            break;
                        }
                    }
                }

                // the last one out closes, unless cancelled: see the module docs
                if live.fetch_sub(1, Ordering::AcqRel) == 1 && !token.is_cancelled() {
                    queue.close();
                }
                tracing::debug!("Producer {i} shutting down.");
            });
        }
    }

    /// Pop one item, suspending while the queue is empty.
    ///
    /// Returns `Ok(None)` once the queue is closed and drained, or once the
    /// token fired and nothing is left. A source failure is returned once, to
    /// the first caller that observes it.
    pub async fn next(&self) -> Result<Option<T>, StingerError> {
        if let Some(e) = self.failure.lock().take() {
            return Err(e);
        }

        let item = tokio::select! {
            biased;
            item = self.queue.pop() => item,
            _ = self.token.cancelled() => self.queue.try_pop(),
        };

        if item.is_none() {
            if let Some(e) = self.failure.lock().take() {
                return Err(e);
            }
        }
        Ok(item)
    }

    /// Sample the queue occupancy every `sample_interval` until it is full.
    ///
    /// Once full, `stop = true` cancels the producers and closes the queue.
    /// Returns early, leaving the queue open, when the token fires first. A
    /// closed queue (exhausted or failed source) never fills up, so `wait`
    /// returns as soon as it sees one.
    pub async fn wait(&self, stop: bool) {
        let period = self.sample_interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + period, period);
        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let len = self.queue.len();
            tracing::info!("buffer size: {len} of {}", self.queue.capacity());
            if self.queue.is_closed() {
                tracing::info!("Source drained with {len} items buffered.");
                return;
            }
            if len >= self.queue.capacity() {
                if stop {
                    self.stop();
                }
                return;
            }
        }
    }

    /// Cancel the producer tasks and close the queue.
    pub fn stop(&self) {
        self.token.cancel();
        self.queue.close();
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }
}

impl<T, G> Drop for BufferedProducer<T, G> {
    fn drop(&mut self) {
        self.token.cancel();
        self.queue.close();
    }
}

impl<T, G> Generator<T> for BufferedProducer<T, G>
where
    T: Send + 'static,
    G: Generator<T> + 'static,
{
    async fn next(&self) -> Result<Option<T>, StingerError> {
        BufferedProducer::next(self).await
    }
}

/// Bounded FIFO. `slots` counts free places, `filled` counts buffered items.
/// Closing both semaphores wakes every suspended pusher and popper.
pub(crate) struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    slots: Semaphore,
    filled: Semaphore,
    closed: AtomicBool,
}

impl<T> BoundedQueue<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.min(Semaphore::MAX_PERMITS);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1 << 16))),
            capacity,
            slots: Semaphore::new(capacity),
            filled: Semaphore::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Suspends while the queue is full. Hands the item back if the queue is closed.
    pub(crate) async fn push(&self, item: T) -> Result<(), T> {
        match self.slots.acquire().await {
            Ok(permit) => permit.forget(),
            Err(_) => return Err(item),
        }
        self.items.lock().push_back(item);
        self.filled.add_permits(1);
        Ok(())
    }

    /// Suspends while the queue is empty and open. After close, drains the
    /// remaining items and then returns `None`.
    pub(crate) async fn pop(&self) -> Option<T> {
        match self.filled.acquire().await {
            Ok(permit) => {
                permit.forget();
                let item = self.items.lock().pop_front();
                self.slots.add_permits(1);
                item
            }
            Err(_) => self.items.lock().pop_front(),
        }
    }

    pub(crate) fn try_pop(&self) -> Option<T> {
        match self.filled.try_acquire() {
            Ok(permit) => {
                permit.forget();
                let item = self.items.lock().pop_front();
                self.slots.add_permits(1);
                item
            }
            Err(TryAcquireError::NoPermits) => None,
            Err(TryAcquireError::Closed) => self.items.lock().pop_front(),
        }
    }

    /// Returns `true` only for the call that actually closed the queue.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.slots.close();
        self.filled.close();
        true
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }
}
