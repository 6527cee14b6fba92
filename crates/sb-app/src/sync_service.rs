//! Sync process wiring: config to worker, plus periodic retention pruning.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::Duration;
use sb_config::{DeviceConfig, EndpointsDef, SyncDef, resolve_api_key};
use sb_core::{Clock, Timestamp, sleep_unless_stopped};
use sb_queue::{QueueStore, Stream};
use sb_sync::{
    Endpoints, HttpConfig, HttpTransport, IngestTransport, PassReport, StreamSchedule, SyncWorker,
    SyncWorkerConfig, retry_unless_exhausted,
};

use crate::error::AppResult;
use crate::maintenance::prune_once;

pub fn build_worker_config(def: &SyncDef) -> SyncWorkerConfig {
    let s = &def.streams;
    let mut streams = Vec::new();
    if s.tank.enabled {
        streams.push(StreamSchedule::periodic(Stream::Tank, s.tank.batch_size, s.tank.interval_s));
    }
    if s.pump.enabled {
        streams.push(StreamSchedule::pump_events(s.pump.interval_s));
    }
    if s.vacuum.enabled {
        streams.push(StreamSchedule::periodic(
            Stream::Vacuum,
            s.vacuum.batch_size,
            s.vacuum.interval_s,
        ));
    }
    if s.error_log.enabled {
        streams.push(StreamSchedule::periodic(
            Stream::ErrorLog,
            s.error_log.batch_size,
            s.error_log.interval_s,
        ));
    }
    let heartbeat_interval = (def.heartbeat_interval_s > 0.0)
        .then(|| Duration::milliseconds((def.heartbeat_interval_s * 1000.0).round() as i64));
    SyncWorkerConfig {
        streams,
        heartbeat_interval,
        poll_interval: StdDuration::from_secs_f64(def.poll_interval_s),
    }
}

fn endpoints(def: &EndpointsDef) -> Endpoints {
    let mut e = Endpoints::default();
    let overrides = [
        (&mut e.tank, &def.tank),
        (&mut e.pump, &def.pump),
        (&mut e.vacuum, &def.vacuum),
        (&mut e.error_log, &def.error_log),
        (&mut e.heartbeat, &def.heartbeat),
        (&mut e.reset, &def.reset),
    ];
    for (slot, value) in overrides {
        if let Some(v) = value {
            *slot = v.clone();
        }
    }
    e
}

pub fn build_transport(config: &DeviceConfig) -> AppResult<HttpTransport> {
    let sync = &config.sync;
    let transport = HttpTransport::new(HttpConfig {
        base_url: sync.base_url.clone(),
        api_key: resolve_api_key(sync)?,
        device_id: config.device_id.clone(),
        timeout: StdDuration::from_secs_f64(sync.timeout_s),
        endpoints: endpoints(&sync.endpoints),
    })?;
    Ok(transport)
}

/// Run the sync worker until `stop` is set, or a single full pass when `once`.
///
/// Acknowledged rows past retention are pruned every `queue.prune_interval_s`.
/// In the long-running mode only storage exhaustion is returned; busy or
/// locked queue errors are logged and retried on the next poll.
pub fn run_sync<T: IngestTransport, C: Clock + Clone>(
    config: &DeviceConfig,
    store: &QueueStore,
    transport: T,
    clock: C,
    stop: &AtomicBool,
    once: bool,
) -> AppResult<()> {
    let worker_config = build_worker_config(&config.sync);
    let poll = worker_config.poll_interval;
    let mut worker = SyncWorker::new(store, transport, clock.clone(), worker_config)?;

    if once {
        log_flush(&worker.flush_all("once")?);
        return Ok(());
    }
    if let Some(reports) = retry_unless_exhausted(worker.flush_all("startup"))? {
        log_flush(&reports);
    }

    let prune_every =
        Duration::milliseconds((config.queue.prune_interval_s * 1000.0).round() as i64);
    let mut next_prune: Timestamp = clock.now();
    while !stop.load(Ordering::Relaxed) {
        retry_unless_exhausted(worker.run_pending())?;
        let now = clock.now();
        if now >= next_prune {
            match prune_once(store, config.queue.retention_days) {
                Ok(_) => next_prune = now + prune_every,
                Err(err) if err.is_storage_exhausted() => return Err(err),
                Err(err) => tracing::warn!(%err, "prune failed, will retry"),
            }
        }
        sleep_unless_stopped(poll, stop);
    }
    tracing::info!("sync service stopped");
    Ok(())
}

fn log_flush(reports: &BTreeMap<Stream, PassReport>) {
    for (stream, report) in reports {
        tracing::info!(
            %stream,
            sent = report.sent,
            acked = report.acked,
            failure = ?report.failure,
            "flush result"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_config::UploadDef;

    #[test]
    fn pump_stream_is_immediate_single_row() {
        let mut def = SyncDef::default();
        def.streams.vacuum.enabled = false;
        let cfg = build_worker_config(&def);
        assert_eq!(cfg.streams.len(), 3);
        let pump = cfg.streams.iter().find(|s| s.stream == Stream::Pump).unwrap();
        assert_eq!(pump.batch_size, 1);
        assert!(pump.immediate);
        assert_eq!(cfg.heartbeat_interval, Some(Duration::seconds(300)));
        cfg.validate().unwrap();
    }

    #[test]
    fn zero_heartbeat_disables_it() {
        let def = SyncDef {
            heartbeat_interval_s: 0.0,
            streams: sb_config::UploadStreamsDef {
                tank: UploadDef::new(10, 2.0),
                ..Default::default()
            },
            ..SyncDef::default()
        };
        let cfg = build_worker_config(&def);
        assert_eq!(cfg.heartbeat_interval, None);
        assert_eq!(cfg.streams[0].batch_size, 10);
    }

    #[test]
    fn endpoint_overrides_keep_defaults() {
        let def = EndpointsDef {
            pump: Some("v2/pump".to_string()),
            ..Default::default()
        };
        let e = endpoints(&def);
        assert_eq!(e.pump, "v2/pump");
        assert_eq!(e.tank, Endpoints::default().tank);
    }
}
