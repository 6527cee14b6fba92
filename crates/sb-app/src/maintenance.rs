//! Operator-facing queue maintenance.

use sb_config::DeviceConfig;
use sb_queue::{QueueStore, StreamStatus};
use sb_sync::IngestTransport;

use crate::error::AppResult;

pub fn open_store(config: &DeviceConfig) -> AppResult<QueueStore> {
    Ok(QueueStore::open(&config.queue.path)?)
}

/// Per-stream pending, in-flight and acknowledged counts.
pub fn queue_status(store: &QueueStore) -> AppResult<Vec<StreamStatus>> {
    Ok(store.status()?)
}

pub fn prune_once(store: &QueueStore, retention_days: f64) -> AppResult<usize> {
    Ok(store.prune_acknowledged(retention_days)?)
}

/// Clear every local record, then ask the remote side to do the same.
///
/// The local reset stands even if the remote request fails.
pub fn reset_all<T: IngestTransport>(store: &QueueStore, remote: Option<&mut T>) -> AppResult<usize> {
    let removed = store.reset()?;
    if let Some(transport) = remote {
        transport.request_reset()?;
        tracing::warn!("remote reset requested");
    }
    Ok(removed)
}
