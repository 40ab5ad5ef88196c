use crate::memory::{
    DEFAULT_CAPACITY, DEFAULT_HISTORY_FILE, FlushPolicy, HistoryGuard, SnapshotStore,
};
use crate::rates::{ConversionError, RateTable, load_rates};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use tracing::info;

/// Runtime settings, assembled by the binary from flags, environment and
/// `.env`.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentConfig {
    /// `None` keeps history in memory only.
    pub history_file: Option<PathBuf>,
    pub capacity: NonZeroUsize,
    pub flush: FlushPolicy,
    pub rates_file: Option<PathBuf>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            history_file: Some(PathBuf::from(DEFAULT_HISTORY_FILE)),
            capacity: DEFAULT_CAPACITY,
            flush: FlushPolicy::default(),
            rates_file: None,
        }
    }
}

impl AgentConfig {
    pub fn store(&self) -> Option<SnapshotStore> {
        self.history_file.as_ref().map(SnapshotStore::new)
    }

    pub fn open_history(&self) -> HistoryGuard {
        let guard = HistoryGuard::open(self.capacity, self.store(), self.flush);
        info!(
            path = ?self.history_file,
            capacity = self.capacity.get(),
            flush = ?self.flush,
            entries = guard.lock().len(),
            "history opened"
        );
        guard
    }

    pub async fn load_rates(&self) -> Result<RateTable, ConversionError> {
        match &self.rates_file {
            Some(path) => load_rates(path).await,
            None => Ok(RateTable::default()),
        }
    }
}
