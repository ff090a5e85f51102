use parking_lot::Mutex;

/// Cycles through a fixed set of resources (connections, clients, keys).
///
/// Not synchronized: every worker is expected to own its own pool. Use
/// [`SyncRoundRobinPool`] when a pool has to be shared.
#[derive(Debug, Clone)]
pub struct RoundRobinPool<T> {
    next: usize,
    pool: Vec<T>,
}

impl<T> RoundRobinPool<T> {
    pub fn new(pool: Vec<T>) -> Self {
        Self { next: 0, pool }
    }

    /// Index of the next element; the cursor stays put on an empty pool.
    fn advance(&mut self) -> Option<usize> {
        if self.pool.is_empty() {
            return None;
        }
        let cur = self.next % self.pool.len();
        self.next = self.next.wrapping_add(1);
        Some(cur)
    }

    /// Mutable access to the next element, `None` on an empty pool.
    pub fn next_mut(&mut self) -> Option<&mut T> {
        self.advance().map(|i| &mut self.pool[i])
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn into_inner(self) -> Vec<T> {
        self.pool
    }
}

impl<T: Clone + Default> RoundRobinPool<T> {
    /// The next element, or `T::default()` on an empty pool.
    pub fn next(&mut self) -> T {
        match self.advance() {
            Some(i) => self.pool[i].clone(),
            None => T::default(),
        }
    }
}

impl<T> From<Vec<T>> for RoundRobinPool<T> {
    fn from(pool: Vec<T>) -> Self {
        Self::new(pool)
    }
}

/// [`RoundRobinPool`] behind a mutex, for pools shared between workers.
#[derive(Debug)]
pub struct SyncRoundRobinPool<T> {
    inner: Mutex<RoundRobinPool<T>>,
}

impl<T> SyncRoundRobinPool<T> {
    pub fn new(pool: RoundRobinPool<T>) -> Self {
        Self {
            inner: Mutex::new(pool),
        }
    }

    /// Run `f` on the next element while holding the lock.
    pub fn with_next<R>(&self, f: impl FnOnce(Option<&mut T>) -> R) -> R {
        f(self.inner.lock().next_mut())
    }
}

impl<T: Clone + Default> SyncRoundRobinPool<T> {
    pub fn next(&self) -> T {
        self.inner.lock().next()
    }
}
