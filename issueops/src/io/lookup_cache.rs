//! Cached workflow-state lookup table shared across processes.
//!
//! The cache is one JSON file plus a sibling `.lock` file:
//!
//! ```json
//! { "nameToId": { "Done": "st_1" }, "_metadata": { "fetchedAt": "...", "sourceGroups": ["ENG"] } }
//! ```
//!
//! Refresh protocol:
//! 1. Skip unless forced or stale (mtime age >= staleness threshold).
//! 2. Take an exclusive advisory lock on the lock file, retrying until the
//!    lock timeout. A holder stamped more than twice the timeout ago is
//!    considered abandoned; its lock file is replaced.
//! 3. Under the lock, skip if the cache changed while we waited.
//! 4. Fetch, write to a temp file in the same directory, rename over the cache.
//!
//! Readers never see a partial file. Every failure is logged and reported as
//! `false`; the previous cache file is left untouched.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::config::LookupCacheConfig;
use crate::io::fs_atomic::write_atomic;
use crate::io::operation_log::now_rfc3339;
use crate::io::tracker::{LookupSource, LookupTable, WorkflowState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupCacheSettings {
    pub staleness: Duration,
    pub lock_timeout: Duration,
    pub lock_retry: Duration,
}

impl From<&LookupCacheConfig> for LookupCacheSettings {
    fn from(cfg: &LookupCacheConfig) -> Self {
        Self {
            staleness: cfg.staleness(),
            lock_timeout: cfg.lock_timeout(),
            lock_retry: cfg.lock_retry(),
        }
    }
}

/// Contents of the cache file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    pub name_to_id: BTreeMap<String, String>,
    #[serde(rename = "_metadata")]
    pub metadata: CacheMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMetadata {
    pub fetched_at: String,
    #[serde(default)]
    pub source_groups: Vec<String>,
}

/// Injectable handle on one cache file.
#[derive(Debug, Clone)]
pub struct LookupCache {
    path: PathBuf,
    lock_path: PathBuf,
    settings: LookupCacheSettings,
}

/// Holds the advisory lock; the holder stamp is cleared and the lock released on drop.
struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // The stamp must not outlive the lock.
        if let Err(err) = self.file.set_len(0) {
            warn!(err = %err, "failed to clear lookup cache lock stamp");
        }
        if let Err(err) = FileExt::unlock(&self.file) {
            warn!(err = %err, "failed to release lookup cache lock");
        }
    }
}

impl LookupCache {
    pub fn new(path: impl Into<PathBuf>, settings: LookupCacheSettings) -> Self {
        let path = path.into();
        let mut lock_name = path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_default();
        lock_name.push(".lock");
        let lock_path = path.with_file_name(lock_name);
        Self {
            path,
            lock_path,
            settings,
        }
    }

    pub fn from_config(cfg: &LookupCacheConfig) -> Self {
        Self::new(&cfg.path, LookupCacheSettings::from(cfg))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// True when the cache file is missing or at least `staleness` old.
    pub fn needs_refresh(&self) -> bool {
        let Some(modified) = self.modified() else {
            return true;
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        age >= self.settings.staleness
    }

    /// Refresh from `source`. Returns `true` only if this call wrote a new snapshot.
    #[instrument(skip_all, fields(path = %self.path.display(), force = force))]
    pub fn refresh<S: LookupSource + ?Sized>(&self, source: &S, force: bool) -> bool {
        match self.try_refresh(source, force) {
            Ok(refreshed) => refreshed,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "lookup cache refresh failed, keeping existing cache");
                false
            }
        }
    }

    /// Current snapshot, or `None` if the cache file does not exist.
    pub fn load(&self) -> Result<Option<CacheSnapshot>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err).with_context(|| format!("read {}", self.path.display())),
        };
        let snapshot = serde_json::from_str(&contents)
            .with_context(|| format!("parse {}", self.path.display()))?;
        Ok(Some(snapshot))
    }

    /// Resolve a workflow-state name (case-insensitive), refreshing first if stale.
    ///
    /// Never fails: an unresolvable name yields `id: None`.
    pub fn resolve<S: LookupSource + ?Sized>(&self, source: &S, name: &str) -> WorkflowState {
        if self.needs_refresh() {
            self.refresh(source, false);
        }
        let id = match self.load() {
            Ok(Some(snapshot)) => snapshot
                .name_to_id
                .iter()
                .find(|(candidate, _)| candidate.eq_ignore_ascii_case(name))
                .map(|(_, id)| id.clone()),
            Ok(None) => None,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "lookup cache unreadable");
                None
            }
        };
        if id.is_none() {
            debug!(name, "workflow state not found in lookup cache");
        }
        WorkflowState {
            name: name.to_string(),
            id,
        }
    }

    fn try_refresh<S: LookupSource + ?Sized>(&self, source: &S, force: bool) -> Result<bool> {
        if !force && !self.needs_refresh() {
            debug!("lookup cache is fresh");
            return Ok(false);
        }
        let observed = self.modified();

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create cache dir {}", parent.display()))?;
        }

        let _guard = self.acquire_lock()?;

        if self.modified() != observed {
            info!("lookup cache was refreshed by another process");
            return Ok(false);
        }
        if !force && !self.needs_refresh() {
            return Ok(false);
        }

        let table = source.fetch_lookup().context("fetch lookup table")?;
        self.write_snapshot(&table)?;
        info!(entries = table.name_to_id.len(), "lookup cache refreshed");
        Ok(true)
    }

    fn write_snapshot(&self, table: &LookupTable) -> Result<()> {
        let snapshot = CacheSnapshot {
            name_to_id: table.name_to_id.clone(),
            metadata: CacheMetadata {
                fetched_at: now_rfc3339(),
                source_groups: table.source_groups.clone(),
            },
        };
        let mut buf = serde_json::to_string_pretty(&snapshot).context("serialize lookup cache")?;
        buf.push('\n');
        write_atomic(&self.path, buf.as_bytes())
    }

    #[instrument(skip_all, fields(lock = %self.lock_path.display()))]
    fn acquire_lock(&self) -> Result<LockGuard> {
        let deadline = Instant::now() + self.settings.lock_timeout;
        loop {
            let mut file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.lock_path)
                .with_context(|| format!("open lock {}", self.lock_path.display()))?;

            match file.try_lock_exclusive() {
                Ok(()) => {
                    stamp_holder(&mut file)
                        .with_context(|| format!("stamp lock {}", self.lock_path.display()))?;
                    debug!("lookup cache lock acquired");
                    return Ok(LockGuard { file });
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    if self.holder_is_stale() {
                        warn!("lookup cache lock held past the stale threshold, overriding");
                        match fs::remove_file(&self.lock_path) {
                            Ok(()) => continue,
                            Err(err) if err.kind() == ErrorKind::NotFound => continue,
                            Err(err) => {
                                return Err(err).with_context(|| {
                                    format!("remove stale lock {}", self.lock_path.display())
                                });
                            }
                        }
                    }
                    if Instant::now() >= deadline {
                        return Err(anyhow!(
                            "timed out after {:?} waiting for lock {}",
                            self.settings.lock_timeout,
                            self.lock_path.display()
                        ));
                    }
                    thread::sleep(self.settings.lock_retry);
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("lock {}", self.lock_path.display()));
                }
            }
        }
    }

    /// The lock file records when its holder acquired it; an unreadable stamp is never stale.
    fn holder_is_stale(&self) -> bool {
        let Ok(contents) = fs::read_to_string(&self.lock_path) else {
            return false;
        };
        let Some(acquired_ms) = contents
            .split_whitespace()
            .nth(1)
            .and_then(|ms| ms.parse::<u128>().ok())
        else {
            return false;
        };
        let held_ms = unix_millis().saturating_sub(acquired_ms);
        held_ms > self.settings.lock_timeout.as_millis() * 2
    }

    fn modified(&self) -> Option<SystemTime> {
        fs::metadata(&self.path)
            .and_then(|meta| meta.modified())
            .ok()
    }
}

fn stamp_holder(file: &mut File) -> std::io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{} {}", std::process::id(), unix_millis())?;
    file.flush()
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
