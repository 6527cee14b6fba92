//! The signal cache file.
//!
//! A single publisher owns the signal inputs and writes the latest snapshot
//! to a JSON file; the controller and the vacuum sampler only read it. Writes
//! go to a sibling temp file that is then renamed over the cache, so readers
//! see either the old or the new snapshot and never a partial one.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Duration;
use sb_controls::{AuxValue, ControlResult, SignalSnapshot, SignalSource, SourceReading};
use sb_core::{Clock, Timestamp, seconds_between};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedSnapshot {
    /// Increases by one with every write.
    pub version: u64,
    pub written_at: Timestamp,
    pub tank_full: bool,
    pub manual_start: bool,
    pub tank_empty: bool,
    #[serde(default)]
    pub aux: BTreeMap<String, AuxValue>,
}

impl CachedSnapshot {
    pub fn snapshot(&self) -> SignalSnapshot {
        SignalSnapshot {
            timestamp: self.written_at,
            tank_full: self.tank_full,
            manual_start: self.manual_start,
            tank_empty: self.tank_empty,
            aux: self.aux.clone(),
        }
    }

    pub fn age_s(&self, now: Timestamp) -> f64 {
        seconds_between(self.written_at, now)
    }
}

pub fn read_cache(path: &Path) -> AppResult<CachedSnapshot> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Read the cache, or explain why it cannot be trusted.
pub fn read_fresh(path: &Path, now: Timestamp, stale_after: Duration) -> Result<CachedSnapshot, String> {
    let cached = read_cache(path).map_err(|e| format!("signal cache unreadable: {e}"))?;
    if now - cached.written_at > stale_after {
        return Err(format!(
            "signal cache is {:.1}s old (limit {:.1}s)",
            cached.age_s(now),
            stale_after.num_milliseconds() as f64 / 1000.0
        ));
    }
    Ok(cached)
}

/// The single writer of the signal cache.
pub struct CachePublisher<C: Clock> {
    path: PathBuf,
    clock: C,
    version: u64,
}

impl<C: Clock> CachePublisher<C> {
    /// Continues numbering from any cache already on disk.
    pub fn new(path: impl Into<PathBuf>, clock: C) -> Self {
        let path = path.into();
        let version = read_cache(&path).map(|c| c.version).unwrap_or(0);
        Self {
            path,
            clock,
            version,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn publish(&mut self, signals: &SignalSnapshot) -> AppResult<CachedSnapshot> {
        let cached = CachedSnapshot {
            version: self.version + 1,
            written_at: self.clock.now(),
            tank_full: signals.tank_full,
            manual_start: signals.manual_start,
            tank_empty: signals.tank_empty,
            aux: signals.aux.clone(),
        };
        let bytes = serde_json::to_vec(&cached)?;
        write_atomic(&self.path, &bytes).map_err(|source| AppError::CacheWrite {
            path: self.path.clone(),
            source,
        })?;
        self.version = cached.version;
        tracing::debug!(version = cached.version, path = %self.path.display(), "published signals");
        Ok(cached)
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = PathBuf::from(tmp_name);
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

/// Live [`SignalSource`] backed by the cache file.
///
/// Missing, unparseable and aged caches all read as stale.
pub struct CacheSignalSource<C: Clock> {
    path: PathBuf,
    clock: C,
    stale_after: Duration,
    last_version: Option<u64>,
}

impl<C: Clock> CacheSignalSource<C> {
    pub fn new(path: impl Into<PathBuf>, clock: C, stale_after: Duration) -> Self {
        Self {
            path: path.into(),
            clock,
            stale_after,
            last_version: None,
        }
    }

    /// Version of the last fresh snapshot handed out.
    pub fn last_version(&self) -> Option<u64> {
        self.last_version
    }
}

impl<C: Clock> SignalSource for CacheSignalSource<C> {
    fn read(&mut self) -> ControlResult<SourceReading> {
        match read_fresh(&self.path, self.clock.now(), self.stale_after) {
            Ok(cached) => {
                self.last_version = Some(cached.version);
                Ok(SourceReading::Fresh(cached.snapshot()))
            }
            Err(reason) => Ok(SourceReading::Stale { reason }),
        }
    }
}
