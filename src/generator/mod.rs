//! Generators — pull-based data sources feeding actors
//!
//! A [`Generator`] hands out one item per call. Implementations range from
//! in-memory fakers ([`FnGenerator`]) and finite fixtures ([`IterGenerator`])
//! to replay files ([`FileReader`]). Anything expensive to produce should be
//! wrapped in a [`BufferedProducer`], which fills a bounded queue from several
//! background tasks so that request issuance never waits on data generation.
//!
//! # Exhaustion
//!
//! `Ok(None)` is the exhaustion sentinel. Infinite sources never return it;
//! finite ones return it once drained and keep returning it afterwards. Actors
//! translate it into [`RunError::EndOfData`](crate::RunError::EndOfData).
//!
//! # Errors
//!
//! An `Err` from a generator is unrecoverable (for example a corrupt replay
//! record). It is surfaced to the actor, which aborts the run with
//! [`RunError::Fatal`](crate::RunError::Fatal).
pub mod buffered;
pub mod file;

pub use buffered::{BufferedProducer, ProducerConfig};
pub use file::{FileReader, FileReaderConfig, FileWriter, FileWriterConfig};

use std::{fmt::Debug, future::Future};

use parking_lot::Mutex;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::StingerError;

/// Data items that can be persisted to and replayed from files.
///
/// Usually implemented through the `#[record]` attribute macro.
pub trait Record
where
    Self: Serialize + DeserializeOwned + Debug + Clone + Send + Sync,
{
}

/// Single-item pull source.
///
/// `next` may suspend until an item is ready. Implementations are shared
/// between producer tasks, hence `&self`.
pub trait Generator<T>
where
    Self: Send + Sync,
{
    fn next(&self) -> impl Future<Output = Result<Option<T>, StingerError>> + Send;
}

/// Infinite generator backed by a closure.
pub struct FnGenerator<F> {
    f: F,
}

impl<F> FnGenerator<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<T, F> Generator<T> for FnGenerator<F>
where
    T: Send,
    F: Fn() -> T + Send + Sync,
{
    async fn next(&self) -> Result<Option<T>, StingerError> {
        Ok(Some((self.f)()))
    }
}

/// Finite generator draining an iterator.
pub struct IterGenerator<I> {
    iter: Mutex<I>,
}

impl<I> IterGenerator<I> {
    pub fn new<C>(items: C) -> Self
    where
        C: IntoIterator<IntoIter = I>,
    {
        Self {
            iter: Mutex::new(items.into_iter()),
        }
    }
}

impl<T, I> Generator<T> for IterGenerator<I>
where
    T: Send,
    I: Iterator<Item = T> + Send,
{
    async fn next(&self) -> Result<Option<T>, StingerError> {
        Ok(self.iter.lock().next())
    }
}
