//! Replay files: one JSON encoded [`Record`] per line.
use std::{
    marker::PhantomData,
    path::PathBuf,
    time::{Duration, Instant},
};

use tokio::{
    fs::File,
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter},
    sync::{Mutex, OnceCell},
};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use super::{Generator, Record};
use crate::error::StingerError;

const READ_BUFFER: usize = 1 << 20;
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone, Debug, TypedBuilder)]
pub struct FileReaderConfig {
    #[builder(setter(into))]
    pub path: PathBuf,
}

/// Generator replaying records from a file.
///
/// The file is opened on the first pull and shared by every caller, so it can
/// sit behind a [`BufferedProducer`](super::BufferedProducer) with several
/// producer tasks. End of file is the exhaustion sentinel. A line that does not
/// decode is a fatal [`StingerError::Replay`].
pub struct FileReader<T> {
    path: PathBuf,
    cursor: OnceCell<Mutex<Cursor>>,
    _record: PhantomData<fn() -> T>,
}

struct Cursor {
    reader: BufReader<File>,
    line: u64,
}

impl<T: Record> FileReader<T> {
    pub fn new(config: FileReaderConfig) -> Self {
        Self {
            path: config.path,
            cursor: OnceCell::new(),
            _record: PhantomData,
        }
    }

    async fn cursor(&self) -> Result<&Mutex<Cursor>, StingerError> {
        self.cursor
            .get_or_try_init(|| async {
                let file = File::open(&self.path).await.map_err(|e| {
                    StingerError::Replay(format!("open {}: {e}", self.path.display()))
                })?;
                Ok(Mutex::new(Cursor {
                    reader: BufReader::with_capacity(READ_BUFFER, file),
                    line: 0,
                }))
            })
            .await
    }
}

impl<T: Record> Generator<T> for FileReader<T> {
    async fn next(&self) -> Result<Option<T>, StingerError> {
        let mut buf = Vec::new();
        let line = {
            let mut cursor = self.cursor().await?.lock().await;
            let n = cursor
                .reader
                .read_until(b'\n', &mut buf)
                .await
                .map_err(|e| StingerError::Replay(format!("read {}: {e}", self.path.display())))?;
            if n == 0 {
                return Ok(None);
            }
            cursor.line += 1;
            cursor.line
        };

        serde_json::from_slice(&buf).map(Some).map_err(|e| {
            StingerError::Replay(format!("{}:{line}: {e}", self.path.display()))
        })
    }
}

#[derive(Clone, Debug, TypedBuilder)]
pub struct FileWriterConfig {
    #[builder(setter(into))]
    pub path: PathBuf,
    /// Number of records to write.
    pub records: u64,
}

/// Pre-records a data set: pulls records from a generator and writes them to
/// a replay file.
pub struct FileWriter<T, G> {
    source: G,
    config: FileWriterConfig,
    token: CancellationToken,
    _record: PhantomData<fn() -> T>,
}

impl<T, G> FileWriter<T, G>
where
    T: Record,
    G: Generator<T>,
{
    pub fn new(token: &CancellationToken, source: G, config: FileWriterConfig) -> Self {
        Self {
            source,
            config,
            token: token.clone(),
            _record: PhantomData,
        }
    }

    /// Write up to `records` records and return how many were written.
    ///
    /// Stops early when the token fires or the source is exhausted; whatever
    /// was written so far is flushed in every case.
    pub async fn generate(&self) -> Result<u64, StingerError> {
        let path = &self.config.path;
        let file = File::create(path)
            .await
            .map_err(|e| StingerError::Record(format!("create {}: {e}", path.display())))?;
        let mut writer = BufWriter::new(file);
        let mut last_progress = Instant::now();
        let mut written = 0;

        while written < self.config.records && !self.token.is_cancelled() {
            let Some(record) = self.source.next().await? else {
                break;
            };

            let mut line = serde_json::to_vec(&record)
                .map_err(|e| StingerError::Record(format!("encode: {e}")))?;
            line.push(b'\n');
            writer
                .write_all(&line)
                .await
                .map_err(|e| StingerError::Record(format!("write {}: {e}", path.display())))?;
            written += 1;

            if last_progress.elapsed() >= PROGRESS_INTERVAL {
                tracing::info!("wrote {written} records...");
                last_progress = Instant::now();
            }
        }

        writer
            .flush()
            .await
            .map_err(|e| StingerError::Record(format!("flush {}: {e}", path.display())))?;
        tracing::info!("successfully wrote {written} records");
        Ok(written)
    }
}
