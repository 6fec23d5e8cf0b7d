//! Lock coordination for ledger mutations
//!
//! One lock serializes every mutation across all channels. Acquisition
//! returns a [`LockGuard`]; dropping the guard releases the lock, so
//! release runs on every exit path of the protected section.
//!
//! # Implementations
//!
//! - [`FileLock`] - marker file created with `create_new`, shared by
//!   cooperating processes. Markers older than `stale_after` are treated
//!   as left behind by a crashed holder and reclaimed.
//! - [`InProcessLock`] - tokio mutex for single-process deployments

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use uuid::Uuid;

/// Lock timing configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSettings {
    /// Give up acquiring after this long
    pub timeout: Duration,

    /// Wait between attempts while contended
    pub retry_interval: Duration,

    /// Reclaim markers older than this (`None` disables reclaiming).
    ///
    /// Markers carry no heartbeat, so this must be longer than any holder
    /// can keep the lock; a shorter window hands the lock to a second
    /// holder while the first is still working.
    pub stale_after: Option<Duration>,
}

impl Default for LockSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            retry_interval: Duration::from_millis(100),
            stale_after: Some(Duration::from_secs(300)),
        }
    }
}

/// Held lock. Releases on drop.
pub struct LockGuard {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
    acquired_at: Instant,
    waited: Duration,
}

impl LockGuard {
    /// Guard running `release` when dropped
    pub fn new(waited: Duration, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            release: Some(Box::new(release)),
            acquired_at: Instant::now(),
            waited,
        }
    }

    /// Time spent waiting for the lock
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Time the lock has been held
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            tracing::debug!(held_ms = self.held_for().as_millis() as u64, "Ledger lock released");
        }
    }
}

impl fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockGuard")
            .field("waited", &self.waited)
            .field("held_for", &self.held_for())
            .finish()
    }
}

/// Mutual exclusion for ledger mutations
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Acquire the lock, waiting up to the configured timeout.
    ///
    /// Fails with [`Error::LockTimeout`] when contention outlasts the bound.
    async fn acquire(&self) -> Result<LockGuard>;
}

/// Contents of a lock marker file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockMarker {
    owner: Uuid,
    pid: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    acquired_at: DateTime<Utc>,
}

/// Marker-file lock shared between processes on one host
#[derive(Debug, Clone)]
pub struct FileLock {
    path: PathBuf,
    settings: LockSettings,
}

impl FileLock {
    /// Lock using the marker at `path`
    pub fn new(path: impl Into<PathBuf>, settings: LockSettings) -> Self {
        Self {
            path: path.into(),
            settings,
        }
    }

    /// Marker path
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn try_create(&self, owner: Uuid) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;

        let marker = LockMarker {
            owner,
            pid: std::process::id(),
            acquired_at: Utc::now(),
        };
        let body = serde_json::to_vec(&marker).map_err(std::io::Error::from)?;
        file.write_all(&body)?;
        file.sync_all()
    }

    fn read_marker(path: &Path) -> Option<LockMarker> {
        fs::read(path)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    }

    /// Age of the current marker, from its contents or else its mtime
    fn marker_age(&self) -> Option<Duration> {
        if let Some(marker) = Self::read_marker(&self.path) {
            return (Utc::now() - marker.acquired_at).to_std().ok();
        }

        let modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok()?;
        SystemTime::now().duration_since(modified).ok()
    }

    /// Remove the marker if it is older than `stale_after`. Returns true
    /// when a marker was removed.
    fn reclaim_if_stale(&self) -> Result<bool> {
        let stale_after = match self.settings.stale_after {
            Some(stale_after) => stale_after,
            None => return Ok(false),
        };

        let age = match self.marker_age() {
            Some(age) => age,
            None => return Ok(false),
        };

        if age < stale_after {
            return Ok(false);
        }

        let holder = Self::read_marker(&self.path);
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::warn!(
                    path = %self.path.display(),
                    age_secs = age.as_secs(),
                    holder_pid = holder.as_ref().map(|m| m.pid),
                    "Reclaimed stale ledger lock left by a crashed holder"
                );
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    fn release(path: &Path, owner: Uuid) {
        match Self::read_marker(path) {
            Some(marker) if marker.owner != owner => {
                tracing::warn!(
                    path = %path.display(),
                    "Lock marker owned by another holder, leaving it in place"
                );
            }
            _ => {
                if let Err(e) = fs::remove_file(path) {
                    if e.kind() != ErrorKind::NotFound {
                        tracing::error!(path = %path.display(), error = %e, "Failed to remove lock marker");
                    }
                }
            }
        }
    }
}

#[async_trait]
impl LockCoordinator for FileLock {
    async fn acquire(&self) -> Result<LockGuard> {
        let started = Instant::now();
        let owner = Uuid::new_v4();

        loop {
            match self.try_create(owner) {
                Ok(()) => {
                    let waited = started.elapsed();
                    tracing::debug!(waited_ms = waited.as_millis() as u64, "Ledger lock acquired");
                    let path = self.path.clone();
                    return Ok(LockGuard::new(waited, move || Self::release(&path, owner)));
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    if self.reclaim_if_stale()? {
                        continue;
                    }
                    if started.elapsed() >= self.settings.timeout {
                        tracing::warn!(
                            path = %self.path.display(),
                            timeout_ms = self.settings.timeout.as_millis() as u64,
                            "Ledger lock timeout"
                        );
                        return Err(Error::LockTimeout(self.settings.timeout));
                    }
                    tokio::time::sleep(self.settings.retry_interval).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// In-process lock for single-process deployments
#[derive(Debug, Clone)]
pub struct InProcessLock {
    inner: Arc<tokio::sync::Mutex<()>>,
    timeout: Duration,
}

impl InProcessLock {
    /// Lock with the given acquisition timeout
    pub fn new(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(tokio::sync::Mutex::new(())),
            timeout,
        }
    }
}

impl Default for InProcessLock {
    fn default() -> Self {
        Self::new(LockSettings::default().timeout)
    }
}

#[async_trait]
impl LockCoordinator for InProcessLock {
    async fn acquire(&self) -> Result<LockGuard> {
        let started = Instant::now();
        let guard = tokio::time::timeout(self.timeout, self.inner.clone().lock_owned())
            .await
            .map_err(|_| Error::LockTimeout(self.timeout))?;

        Ok(LockGuard::new(started.elapsed(), move || drop(guard)))
    }
}
