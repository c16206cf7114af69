use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::BreakerConfig;
use crate::dedup::DedupStore;
use crate::errors::WriteError;
use crate::traits::StageRecord;
use crate::types::Stage;

/// What happened to a candidate record handed to the writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Appended and durably flushed; the key is now marked seen
    Written,
    /// Key already seen; dropped as an idempotent no-op
    Duplicate,
    /// Structurally empty; dropped and counted toward the circuit breaker
    EmptyBody,
}

/// Durable, crash-safe, append-only output channel for one stage.
///
/// Records are persisted one JSON object per line, in write-call order, each
/// flushed before the call returns. An empty-body circuit breaker escalates
/// to `SystemicCorruption` when anomalous input crosses the configured
/// thresholds, after which every further write is rejected.
pub struct RecordWriter<R: StageRecord> {
    stage: Stage,
    path: PathBuf,
    dedup: Arc<DedupStore>,
    breaker: BreakerConfig,
    inner: Mutex<WriterInner>,
    _record: PhantomData<fn() -> R>,
}

struct WriterInner {
    out: BufWriter<File>,
    empty_bodies: u64,
    written: u64,
    tripped: bool,
}

impl<R: StageRecord> RecordWriter<R> {
    /// Open the stage output file, replaying existing records into the dedup
    /// index so a restart does not reintroduce duplicates.
    pub fn open(
        path: impl AsRef<Path>,
        dedup: Arc<DedupStore>,
        breaker: BreakerConfig,
    ) -> Result<Self, WriteError> {
        let stage = R::stage();
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut replayed = 0u64;
        let mut skipped = 0u64;
        if path.exists() {
            let raw = fs::read_to_string(&path)?;
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<R>(line) {
                    Ok(record) => {
                        dedup.add_if_new(&scoped_key(stage, &record.dedup_key()))?;
                        replayed += 1;
                    }
                    Err(error) => {
                        skipped += 1;
                        tracing::warn!(
                            stage = %stage,
                            error = %error,
                            "Skipped unparseable record while replaying stage output"
                        );
                    }
                }
            }
        }
        if replayed > 0 || skipped > 0 {
            tracing::info!(
                stage = %stage,
                path = %path.display(),
                replayed,
                skipped,
                "Seeded dedup index from existing stage output"
            );
        }

        let out = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            stage,
            path,
            dedup,
            breaker,
            inner: Mutex::new(WriterInner {
                out: BufWriter::new(out),
                empty_bodies: 0,
                written: 0,
                tripped: false,
            }),
            _record: PhantomData,
        })
    }

    fn lock(&self) -> MutexGuard<'_, WriterInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Admit one candidate record. Check-seen, append, and mark-seen are a
    /// single unit with respect to concurrent writers.
    pub fn write(&self, record: &R) -> Result<WriteOutcome, WriteError> {
        let key = scoped_key(self.stage, &record.dedup_key());
        let mut inner = self.lock();

        if inner.tripped {
            return Err(WriteError::StageTerminated);
        }

        if self.dedup.seen(&key) {
            tracing::trace!(stage = %self.stage, key = %key, "Dropped duplicate record");
            return Ok(WriteOutcome::Duplicate);
        }

        if record.has_empty_body() {
            inner.empty_bodies += 1;
            let seen = self.dedup.count();
            let ratio = inner.empty_bodies as f64 / (seen as f64 + 1.0);
            if inner.empty_bodies > self.breaker.min_empty_bodies
                && ratio > self.breaker.max_empty_ratio
            {
                inner.tripped = true;
                tracing::error!(
                    stage = %self.stage,
                    empty_bodies = inner.empty_bodies,
                    seen,
                    ratio,
                    "Empty-body ratio breached, terminating stage"
                );
                return Err(WriteError::SystemicCorruption {
                    empty_bodies: inner.empty_bodies,
                    seen,
                    ratio,
                });
            }
            tracing::debug!(stage = %self.stage, key = %key, "Dropped empty-body record");
            return Ok(WriteOutcome::EmptyBody);
        }

        let line = serde_json::to_string(record)?;
        writeln!(inner.out, "{line}")?;
        inner.out.flush()?;
        self.dedup.add_if_new(&key)?;
        inner.written += 1;
        Ok(WriteOutcome::Written)
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended by this writer instance
    pub fn written(&self) -> u64 {
        self.lock().written
    }

    pub fn empty_bodies(&self) -> u64 {
        self.lock().empty_bodies
    }

    pub fn terminated(&self) -> bool {
        self.lock().tripped
    }

    /// Flush and release the output file, syncing it to disk. Runs on every
    /// exit path, early termination included.
    pub fn close(self) -> Result<(), WriteError> {
        let inner = self
            .inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let file = inner.out.into_inner().map_err(|e| WriteError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }
}

fn scoped_key(stage: Stage, key: &str) -> String {
    format!("{}/{}", stage.slug(), key)
}
