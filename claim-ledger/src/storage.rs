//! Durable ledger storage
//!
//! # Stores
//!
//! - [`JsonFileStore`] - single JSON document, committed with
//!   write-to-temporary + fsync + rename
//! - [`MemoryStore`] - in-memory store for tests
//!
//! A store is constructed once and handed to the engine; it never caches
//! state between calls.

use crate::{
    error::{Error, Result},
    types::{ChannelId, LedgerState},
};
use parking_lot::Mutex;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Backend holding the ledger document
pub trait LedgerStore: Send + Sync {
    /// Read the current committed state. Call with the lock held.
    ///
    /// A missing or unparseable document yields empty defaults; the file
    /// store moves an unparseable document aside first.
    fn load(&self) -> Result<LedgerState>;

    /// Read the current committed state without touching the store, for
    /// callers that do not hold the lock. An unparseable document is an
    /// error here.
    fn snapshot(&self) -> Result<LedgerState>;

    /// Replace the committed state. Either the whole state is written or
    /// the previous state stays in place.
    fn commit(&self, state: &LedgerState) -> Result<()>;
}

/// File-backed ledger store
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    channels: Vec<ChannelId>,
}

impl JsonFileStore {
    /// Store at `path`, normalizing every load to contain `channels`
    pub fn new(path: impl Into<PathBuf>, channels: Vec<ChannelId>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        tracing::info!(path = %path.display(), channels = channels.len(), "Opened ledger store");

        Ok(Self { path, channels })
    }

    /// Ledger file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn defaults(&self) -> LedgerState {
        LedgerState::with_channels(&self.channels)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(suffix);
        PathBuf::from(name)
    }

    fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn with_configured_channels(&self, mut state: LedgerState) -> LedgerState {
        for id in &self.channels {
            state.ensure_channel(id);
        }
        state
    }

    /// Move an unparseable ledger aside so it can be inspected later
    fn quarantine(&self) -> Option<PathBuf> {
        let target = self.sibling(&format!(
            ".corrupt-{}",
            chrono::Utc::now().timestamp_millis()
        ));
        match fs::rename(&self.path, &target) {
            Ok(()) => Some(target),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to quarantine corrupt ledger");
                None
            }
        }
    }
}

impl LedgerStore for JsonFileStore {
    fn load(&self) -> Result<LedgerState> {
        let Some(bytes) = self.read_bytes()? else {
            tracing::debug!(path = %self.path.display(), "No ledger yet, using defaults");
            return Ok(self.defaults());
        };

        let state = match serde_json::from_slice::<LedgerState>(&bytes) {
            Ok(state) => state,
            Err(e) => {
                let moved_to = self.quarantine();
                tracing::error!(
                    path = %self.path.display(),
                    error = %e,
                    quarantined = ?moved_to,
                    "LEDGER CORRUPTION: unreadable ledger replaced by empty defaults, claim history reset"
                );
                return Ok(self.defaults());
            }
        };

        Ok(self.with_configured_channels(state))
    }

    fn snapshot(&self) -> Result<LedgerState> {
        let Some(bytes) = self.read_bytes()? else {
            return Ok(self.defaults());
        };
        let state = serde_json::from_slice::<LedgerState>(&bytes)
            .map_err(|e| Error::Corrupt(format!("{}: {}", self.path.display(), e)))?;
        Ok(self.with_configured_channels(state))
    }

    fn commit(&self, state: &LedgerState) -> Result<()> {
        let tmp = self.sibling(".tmp");

        let write = || -> Result<()> {
            let mut file = File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, state)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
            Ok(())
        };

        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        fs::rename(&tmp, &self.path)?;

        tracing::debug!(path = %self.path.display(), "Ledger committed");

        Ok(())
    }
}

/// In-memory ledger store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<LedgerState>,
    commits: AtomicUsize,
}

impl MemoryStore {
    /// Store seeded with empty channels
    pub fn new<'a>(channels: impl IntoIterator<Item = &'a ChannelId>) -> Self {
        Self::with_state(LedgerState::with_channels(channels))
    }

    /// Store seeded with a given state
    pub fn with_state(state: LedgerState) -> Self {
        Self {
            state: Mutex::new(state),
            commits: AtomicUsize::new(0),
        }
    }

    /// Number of commits so far
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

impl LedgerStore for MemoryStore {
    fn load(&self) -> Result<LedgerState> {
        Ok(self.state.lock().clone())
    }

    fn snapshot(&self) -> Result<LedgerState> {
        self.load()
    }

    fn commit(&self, state: &LedgerState) -> Result<()> {
        state.check_invariants()?;
        *self.state.lock() = state.clone();
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl From<LedgerState> for MemoryStore {
    fn from(state: LedgerState) -> Self {
        Self::with_state(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttemptEntry, ClaimRecord, ParticipantId};
    use chrono::Utc;

    fn channels() -> Vec<ChannelId> {
        vec![ChannelId::new("base-usdt"), ChannelId::new("sepolia-eth")]
    }

    fn create_test_store() -> (tempfile::TempDir, JsonFileStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("giveaway_state.json"), channels()).unwrap();
        (dir, store)
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let (_dir, store) = create_test_store();
        let state = store.load().unwrap();
        assert_eq!(state.channels.len(), 2);
        assert_eq!(state.channel(&ChannelId::new("base-usdt")).unwrap().total, 0);
    }

    #[test]
    fn test_commit_then_load() {
        let (_dir, store) = create_test_store();
        let mut state = store.load().unwrap();
        let base = state.channel_mut(&ChannelId::new("base-usdt"));
        base.paused = true;
        base.record_success(
            ParticipantId::new("7"),
            ClaimRecord {
                address: "0xaa".to_string(),
                reference: "0x01".to_string(),
                block_height: Some(12),
                timestamp: Utc::now(),
            },
        );
        store.commit(&state).unwrap();

        let reloaded = store.load().unwrap();
        let base = reloaded.channel(&ChannelId::new("base-usdt")).unwrap();
        assert!(base.paused);
        assert_eq!(base.total, 1);
        assert_eq!(base.users[&ParticipantId::new("7")].block_height, Some(12));
        assert!(!store.sibling(".tmp").exists());
    }

    #[test]
    fn test_corrupt_file_falls_back_and_is_quarantined() {
        let (dir, store) = create_test_store();
        fs::write(store.path(), b"{ not json").unwrap();

        let state = store.load().unwrap();
        assert_eq!(state, store.defaults());
        assert!(!store.path().exists());

        let quarantined = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .any(|e| e.file_name().to_string_lossy().contains(".corrupt-"));
        assert!(quarantined);
    }

    #[test]
    fn test_snapshot_leaves_corrupt_file_in_place() {
        let (dir, store) = create_test_store();
        fs::write(store.path(), b"{ not json").unwrap();

        assert!(matches!(store.snapshot(), Err(Error::Corrupt(_))));
        assert_eq!(fs::read(store.path()).unwrap(), b"{ not json");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_snapshot_matches_load() {
        let (_dir, store) = create_test_store();
        assert_eq!(store.snapshot().unwrap(), store.defaults());

        let mut state = store.load().unwrap();
        state.channel_mut(&ChannelId::new("sepolia-eth")).paused = true;
        store.commit(&state).unwrap();
        assert_eq!(store.snapshot().unwrap(), store.load().unwrap());
    }

    #[test]
    fn test_load_adds_configured_channels() {
        let (_dir, store) = create_test_store();
        fs::write(store.path(), br#"{ "base-usdt": { "total": 0 } }"#).unwrap();

        let state = store.load().unwrap();
        assert!(state.channel(&ChannelId::new("sepolia-eth")).is_some());
    }

    #[test]
    fn test_memory_store_rejects_broken_invariants() {
        let store = MemoryStore::new(&channels());
        let mut state = store.load().unwrap();
        state.channel_mut(&ChannelId::new("base-usdt")).total = 1;
        assert!(store.commit(&state).is_err());
        assert_eq!(store.commit_count(), 0);

        let mut state = store.load().unwrap();
        state
            .channel_mut(&ChannelId::new("base-usdt"))
            .push_attempt(AttemptEntry::failure(ParticipantId::new("1"), "0x", "paused", Utc::now()));
        store.commit(&state).unwrap();
        assert_eq!(store.commit_count(), 1);
    }
}
