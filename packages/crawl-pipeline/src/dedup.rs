use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::errors::StoreError;

/// Durable set of previously seen dedup keys, shared by every stage.
///
/// The backing file is an append-only log, one key per line, replayed fully
/// into memory at open. Membership is the only query; entries are never
/// removed within a run.
#[derive(Debug)]
pub struct DedupStore {
    path: PathBuf,
    inner: Mutex<DedupInner>,
}

#[derive(Debug)]
struct DedupInner {
    seen: HashSet<String>,
    log: BufWriter<File>,
}

impl DedupStore {
    /// Open the store, replaying the backing log into the in-memory index.
    ///
    /// An unreadable backing file is fatal. Individual blank or mangled lines
    /// are logged and skipped, so one corrupt entry does not discard the rest.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let unavailable = |source: std::io::Error| StoreError::Unavailable {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(unavailable)?;
            }
        }

        let mut seen = HashSet::new();
        let mut skipped = 0u64;
        if path.exists() {
            let raw = fs::read(&path).map_err(unavailable)?;
            for line in String::from_utf8_lossy(&raw).lines() {
                let key = line.trim();
                if key.is_empty() || key.contains('\u{fffd}') {
                    skipped += 1;
                    continue;
                }
                seen.insert(key.to_string());
            }
        }
        if skipped > 0 {
            tracing::warn!(
                path = %path.display(),
                skipped,
                "Skipped unreadable entries while replaying dedup log"
            );
        }

        let log = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(unavailable)?;

        tracing::debug!(
            path = %path.display(),
            entries = seen.len(),
            "Dedup index loaded"
        );

        Ok(Self {
            path,
            inner: Mutex::new(DedupInner {
                seen,
                log: BufWriter::new(log),
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, DedupInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn seen(&self, key: &str) -> bool {
        self.lock().seen.contains(key)
    }

    /// Atomic check-and-insert: returns true iff the key was not already
    /// present, in which case it is now durably marked seen. The key is
    /// appended and flushed before the in-memory insert, so a failed append
    /// never produces a member that would vanish on restart.
    pub fn add_if_new(&self, key: &str) -> Result<bool, StoreError> {
        let mut inner = self.lock();
        if inner.seen.contains(key) {
            return Ok(false);
        }
        writeln!(inner.log, "{key}")?;
        inner.log.flush()?;
        inner.seen.insert(key.to_string());
        Ok(true)
    }

    pub fn count(&self) -> u64 {
        self.lock().seen.len() as u64
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.lock().log.flush()?;
        Ok(())
    }

    /// Flush and release the backing log, syncing it to disk.
    pub fn close(self) -> Result<(), StoreError> {
        let inner = self
            .inner
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let file = inner.log.into_inner().map_err(|e| StoreError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn temp_store() -> (TempDir, DedupStore) {
        let dir = TempDir::new().unwrap();
        let store = DedupStore::open(dir.path().join("dedup.log")).unwrap();
        (dir, store)
    }

    #[test]
    fn add_if_new_is_true_exactly_once() {
        let (_dir, store) = temp_store();
        assert!(store.add_if_new("https://uconn.edu/a").unwrap());
        assert!(!store.add_if_new("https://uconn.edu/a").unwrap());
        assert!(store.seen("https://uconn.edu/a"));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn add_if_new_is_true_exactly_once_under_contention() {
        let (_dir, store) = temp_store();
        let store = Arc::new(store);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.add_if_new("same-key").unwrap())
            })
            .collect();
        let wins: usize = handles
            .into_iter()
            .map(|h| h.join().unwrap() as usize)
            .sum();
        assert_eq!(wins, 1);
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn entries_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dedup.log");
        {
            let store = DedupStore::open(&path).unwrap();
            store.add_if_new("a").unwrap();
            store.add_if_new("b").unwrap();
            store.close().unwrap();
        }
        let store = DedupStore::open(&path).unwrap();
        assert_eq!(store.count(), 2);
        assert!(store.seen("a"));
        assert!(!store.add_if_new("b").unwrap());
    }

    #[test]
    fn blank_lines_are_skipped_not_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("dedup.log");
        std::fs::write(&path, "good-key\n\n   \nother-key\n").unwrap();

        let store = DedupStore::open(&path).unwrap();
        assert_eq!(store.count(), 2);
        assert!(store.seen("good-key"));
        assert!(store.seen("other-key"));
    }

    #[test]
    fn missing_parent_directory_is_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("state").join("dedup.log");
        let store = DedupStore::open(&path).unwrap();
        store.add_if_new("k").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn unreadable_backing_path_is_unavailable() {
        let dir = TempDir::new().unwrap();
        // A directory where the log file should be makes open fail outright.
        let path = dir.path().join("dedup.log");
        std::fs::create_dir(&path).unwrap();
        let err = DedupStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }
}
