use std::collections::VecDeque;
use std::io::ErrorKind;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_CAPACITY: NonZeroUsize = NonZeroUsize::new(10).unwrap();
pub const DEFAULT_HISTORY_FILE: &str = "conversion_history.json";

/// Why a snapshot could not be adopted.
#[derive(Debug, Error)]
pub enum ReadFailure {
    #[error("snapshot not found: {0}")]
    NotFound(String),
    #[error("malformed snapshot: {0}")]
    Malformed(String),
    #[error("I/O error: {0}")]
    Io(String),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("Persistence read error: {0}")]
    PersistenceRead(#[from] ReadFailure),
    #[error("Persistence write error: {0}")]
    PersistenceWrite(String),
}

/// When a persisted history is written back to its snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPolicy {
    /// Only when the owning [`HistoryGuard`] is dropped.
    #[default]
    OnExit,
    /// After every append, and again on drop.
    EveryAppend,
}

impl FromStr for FlushPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "on-exit" | "exit" => Ok(FlushPolicy::OnExit),
            "every-append" | "append" => Ok(FlushPolicy::EveryAppend),
            other => Err(format!(
                "Unknown flush policy: {} (expected 'on-exit' or 'every-append')",
                other
            )),
        }
    }
}

/// Durable location of a history snapshot: a JSON array of strings,
/// oldest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Vec<String>, HistoryError> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ReadFailure::NotFound(self.path.display().to_string()).into());
            }
            Err(e) => return Err(ReadFailure::Io(e.to_string()).into()),
        };

        serde_json::from_str::<Vec<String>>(&content)
            .map_err(|e| ReadFailure::Malformed(e.to_string()).into())
    }

    pub fn write<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), HistoryError> {
        let entries: Vec<&str> = entries.into_iter().collect();
        let json = serde_json::to_string(&entries)
            .map_err(|e| HistoryError::PersistenceWrite(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| HistoryError::PersistenceWrite(e.to_string()))?;
            }
        }

        std::fs::write(&self.path, json).map_err(|e| HistoryError::PersistenceWrite(e.to_string()))
    }
}

/// Insertion-ordered buffer of result strings that keeps at most
/// `capacity` entries, evicting the oldest first.
#[derive(Debug, Clone)]
pub struct BoundedHistory {
    entries: VecDeque<String>,
    capacity: NonZeroUsize,
    store: Option<SnapshotStore>,
    flush: FlushPolicy,
}

impl BoundedHistory {
    /// In-memory history with no snapshot.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.get()),
            capacity,
            store: None,
            flush: FlushPolicy::OnExit,
        }
    }

    /// History backed by `store`, hydrated from it immediately.
    ///
    /// A missing, unreadable or malformed snapshot leaves the history empty
    /// and is only reported through the log.
    pub fn with_store(capacity: NonZeroUsize, store: SnapshotStore, flush: FlushPolicy) -> Self {
        let mut history = Self {
            entries: VecDeque::with_capacity(capacity.get()),
            capacity,
            store: Some(store),
            flush,
        };
        history.load();
        history
    }

    pub fn append(&mut self, entry: impl Into<String>) {
        self.entries.push_back(entry.into());
        if self.entries.len() > self.capacity.get() {
            self.entries.pop_front();
        }

        if self.flush == FlushPolicy::EveryAppend {
            self.save();
        }
    }

    pub fn last(&self) -> Option<&str> {
        self.entries.back().map(String::as_str)
    }

    /// Up to `n` most recent entries, oldest first.
    pub fn recent(&self, n: usize) -> Vec<String> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    pub fn store(&self) -> Option<&SnapshotStore> {
        self.store.as_ref()
    }

    pub fn flush_policy(&self) -> FlushPolicy {
        self.flush
    }

    pub fn try_save(&self) -> Result<(), HistoryError> {
        match &self.store {
            Some(store) => store.write(self.iter()),
            None => Ok(()),
        }
    }

    pub fn save(&self) {
        let Some(store) = &self.store else {
            return;
        };

        match self.try_save() {
            Ok(()) => debug!(
                path = %store.path().display(),
                entries = self.entries.len(),
                "history saved"
            ),
            Err(e) => warn!(path = %store.path().display(), "could not save history: {}", e),
        }
    }

    /// Replaces the entries with the last `capacity` records of the snapshot
    /// and returns how many were adopted. On error the entries are untouched.
    pub fn try_load(&mut self) -> Result<usize, HistoryError> {
        let Some(store) = &self.store else {
            return Ok(0);
        };

        let stored = store.read()?;
        let skip = stored.len().saturating_sub(self.capacity.get());
        self.entries = stored.into_iter().skip(skip).collect();
        Ok(self.entries.len())
    }

    pub fn load(&mut self) {
        match self.try_load() {
            Ok(count) => debug!(entries = count, "history loaded"),
            Err(HistoryError::PersistenceRead(ReadFailure::NotFound(path))) => {
                debug!(%path, "no history snapshot, starting empty");
                self.entries.clear();
            }
            Err(e) => {
                warn!("could not load history: {}", e);
                self.entries.clear();
            }
        }
    }
}

pub type SharedHistory = Arc<Mutex<BoundedHistory>>;

/// Locks a shared history. A poisoned lock still yields the buffer, since
/// every mutation leaves it consistent.
pub fn lock_history(history: &SharedHistory) -> MutexGuard<'_, BoundedHistory> {
    history.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the process's history for a scope: loads on open, saves on drop.
pub struct HistoryGuard {
    shared: SharedHistory,
}

impl HistoryGuard {
    pub fn open(capacity: NonZeroUsize, store: Option<SnapshotStore>, flush: FlushPolicy) -> Self {
        let history = match store {
            Some(store) => BoundedHistory::with_store(capacity, store, flush),
            None => BoundedHistory::new(capacity),
        };
        Self::from_history(history)
    }

    pub fn from_history(history: BoundedHistory) -> Self {
        Self {
            shared: Arc::new(Mutex::new(history)),
        }
    }

    pub fn handle(&self) -> SharedHistory {
        Arc::clone(&self.shared)
    }

    pub fn lock(&self) -> MutexGuard<'_, BoundedHistory> {
        lock_history(&self.shared)
    }
}

impl Drop for HistoryGuard {
    fn drop(&mut self) {
        lock_history(&self.shared).save();
    }
}
