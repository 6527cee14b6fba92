//! Vacuum sampler: averages cached vacuum readings into one queued row.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use chrono::Duration;
use sb_config::VacuumDef;
use sb_controls::aux;
use sb_core::{Clock, sleep_unless_stopped};
use sb_queue::QueueStore;

use crate::cache::read_fresh;
use crate::error::AppResult;
use crate::records;

pub struct VacuumSampler<'a, C: Clock> {
    store: &'a QueueStore,
    cache_path: PathBuf,
    clock: C,
    stale_after: Duration,
    samples: u32,
    sample_delay: StdDuration,
    refresh: StdDuration,
}

impl<'a, C: Clock> VacuumSampler<'a, C> {
    pub fn new(
        store: &'a QueueStore,
        cache_path: impl Into<PathBuf>,
        clock: C,
        stale_after: Duration,
        def: &VacuumDef,
    ) -> Self {
        Self {
            store,
            cache_path: cache_path.into(),
            clock,
            stale_after,
            samples: def.samples.max(1),
            sample_delay: StdDuration::from_secs_f64(def.sample_delay_s),
            refresh: StdDuration::from_secs_f64(def.refresh_s),
        }
    }

    /// Take up to `samples` readings and queue their mean.
    ///
    /// Returns the queued average, or `None` when the cache had no usable
    /// vacuum reading.
    pub fn sample_once(&self, stop: &AtomicBool) -> AppResult<Option<f64>> {
        let mut readings = Vec::with_capacity(self.samples as usize);
        for i in 0..self.samples {
            match read_fresh(&self.cache_path, self.clock.now(), self.stale_after) {
                Ok(cached) => match cached.aux.get(aux::VACUUM_INHG).and_then(|v| v.as_scalar()) {
                    Some(inhg) => readings.push(inhg),
                    None => tracing::warn!("signal cache has no vacuum reading"),
                },
                Err(reason) => tracing::warn!(%reason, "vacuum sampler waiting for signal cache"),
            }
            if i + 1 < self.samples {
                sleep_unless_stopped(self.sample_delay, stop);
            }
            if stop.load(Ordering::Relaxed) {
                break;
            }
        }
        if readings.is_empty() {
            return Ok(None);
        }
        let mean = readings.iter().sum::<f64>() / readings.len() as f64;
        self.store
            .enqueue(&records::vacuum_record(mean, self.clock.now()))?;
        tracing::debug!(inhg = mean, samples = readings.len(), "queued vacuum reading");
        Ok(Some(mean))
    }

    pub fn run(&self, stop: &AtomicBool) -> AppResult<()> {
        while !stop.load(Ordering::Relaxed) {
            self.sample_once(stop)?;
            sleep_unless_stopped(self.refresh, stop);
        }
        tracing::info!("vacuum sampler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CachePublisher;
    use chrono::{TimeZone, Utc};
    use sb_controls::SignalSnapshot;
    use sb_core::ManualClock;
    use sb_queue::Stream;
    use std::sync::Arc;

    fn def() -> VacuumDef {
        VacuumDef {
            enabled: true,
            samples: 3,
            sample_delay_s: 0.0,
            refresh_s: 1.0,
        }
    }

    #[test]
    fn queues_mean_of_cached_readings() {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let path = std::env::temp_dir().join(format!("sb_vacuum_{nanos}/signals.json"));
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(t0));
        let store = QueueStore::in_memory().unwrap();
        let sampler = VacuumSampler::new(&store, &path, clock.clone(), Duration::seconds(5), &def());
        let stop = AtomicBool::new(false);

        assert_eq!(sampler.sample_once(&stop).unwrap(), None);

        CachePublisher::new(&path, clock.clone())
            .publish(&SignalSnapshot::idle(t0).with_aux(aux::VACUUM_INHG, 22.0))
            .unwrap();
        assert_eq!(sampler.sample_once(&stop).unwrap(), Some(22.0));

        let rows = store.take_unacked_batch(Stream::Vacuum, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record_key, "vacuum");
        assert_eq!(rows[0].payload["reading_inhg"], serde_json::json!(22.0));
    }
}
