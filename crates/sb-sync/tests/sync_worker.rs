use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use sb_core::{ManualClock, Timestamp};
use sb_queue::{NewRecord, QueueStore, Stream};
use sb_sync::*;
use serde_json::{Value, json};

fn t(secs: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Reply {
    Count,
    Ids,
    LastTimestamps,
    ShortCount,
}

/// In-process stand-in for the ingest service. Stores readings keyed like the
/// remote tables so re-sent rows overwrite instead of duplicating.
#[derive(Debug)]
struct FakeRemote {
    stored: BTreeMap<(Stream, String, String), Value>,
    posts: Vec<(Stream, usize)>,
    fail_next: usize,
    drop_reply_next: usize,
    heartbeats: usize,
    resets: usize,
    reply: Reply,
}

impl FakeRemote {
    fn new(reply: Reply) -> Self {
        Self {
            stored: BTreeMap::new(),
            posts: Vec::new(),
            fail_next: 0,
            drop_reply_next: 0,
            heartbeats: 0,
            resets: 0,
            reply,
        }
    }
}

impl IngestTransport for FakeRemote {
    fn send_batch(&mut self, stream: Stream, body: &IngestBody) -> sb_sync::SyncResult<IngestResponse> {
        self.posts.push((stream, body.readings.len()));
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(SyncError::Transport {
                message: "connection refused".into(),
            });
        }
        for r in &body.readings {
            self.stored.insert(
                (stream, r.stream_key.clone(), r.source_timestamp.clone()),
                Value::Object(r.fields.clone()),
            );
        }
        if self.drop_reply_next > 0 {
            self.drop_reply_next -= 1;
            return Err(SyncError::Transport {
                message: "connection reset by peer".into(),
            });
        }
        let n = body.readings.len() as u64;
        Ok(match self.reply {
            Reply::Count => IngestResponse::ok(n),
            Reply::ShortCount => IngestResponse::ok(n.saturating_sub(1)),
            Reply::Ids => IngestResponse {
                accepted_ids: Some(body.readings.iter().map(|r| r.local_id).collect()),
                ..IngestResponse::ok(n)
            },
            Reply::LastTimestamps => {
                let mut last = BTreeMap::new();
                for r in &body.readings {
                    last.insert(r.stream_key.clone(), r.source_timestamp.clone());
                }
                IngestResponse {
                    last_timestamps: Some(last),
                    ..IngestResponse::ok(n)
                }
            }
        })
    }

    fn send_heartbeat(&mut self, _stream: Stream) -> sb_sync::SyncResult<()> {
        self.heartbeats += 1;
        Ok(())
    }

    fn request_reset(&mut self) -> sb_sync::SyncResult<()> {
        self.resets += 1;
        self.stored.clear();
        Ok(())
    }
}

fn config() -> SyncWorkerConfig {
    SyncWorkerConfig {
        streams: vec![
            StreamSchedule::periodic(Stream::Tank, 5, 60.0),
            StreamSchedule::pump_events(30.0),
            StreamSchedule::periodic(Stream::ErrorLog, 8, 30.0),
        ],
        heartbeat_interval: Some(Duration::seconds(300)),
        poll_interval: std::time::Duration::from_millis(10),
    }
}

fn tank(store: &QueueStore, key: &str, secs: i64) {
    store
        .enqueue(&NewRecord::new(Stream::Tank, key, t(secs), json!({ "tank_id": key, "gal": secs })))
        .unwrap();
}

fn pump(store: &QueueStore, kind: &str, secs: i64) {
    store
        .enqueue(&NewRecord::new(Stream::Pump, kind, t(secs), json!({ "event_type": kind })))
        .unwrap();
}

#[test]
fn flush_delivers_and_acks_everything() {
    for reply in [Reply::Count, Reply::Ids, Reply::LastTimestamps] {
        let store = QueueStore::in_memory().unwrap();
        for secs in 0..12 {
            tank(&store, if secs % 2 == 0 { "brookside" } else { "roadside" }, secs);
        }
        let clock = Arc::new(ManualClock::new(t(100)));
        let mut worker = SyncWorker::new(&store, FakeRemote::new(reply), clock, config()).unwrap();
        let reports = worker.flush_all("test").unwrap();
        assert_eq!(reports[&Stream::Tank].acked, 12, "{reply:?}");
        assert_eq!(store.count_unacked(Stream::Tank).unwrap(), 0);
        assert_eq!(worker.transport().stored.len(), 12);
    }
}

#[test]
fn failed_post_acks_nothing_and_retries() {
    let store = QueueStore::in_memory().unwrap();
    tank(&store, "brookside", 1);
    tank(&store, "brookside", 2);
    let mut remote = FakeRemote::new(Reply::Count);
    remote.fail_next = 1;
    let clock = Arc::new(ManualClock::new(t(100)));
    let mut worker = SyncWorker::new(&store, remote, clock.clone(), config()).unwrap();

    let reports = worker.flush_all("startup").unwrap();
    assert!(reports[&Stream::Tank].failure.is_some());
    assert_eq!(store.count_unacked(Stream::Tank).unwrap(), 2);

    clock.advance(Duration::seconds(61));
    let reports = worker.run_pending().unwrap();
    assert_eq!(reports[&Stream::Tank].acked, 2);
    assert_eq!(store.count_unacked(Stream::Tank).unwrap(), 0);
}

#[test]
fn malformed_ack_leaves_batch_pending() {
    let store = QueueStore::in_memory().unwrap();
    tank(&store, "brookside", 1);
    tank(&store, "brookside", 2);
    let clock = Arc::new(ManualClock::new(t(0)));
    let mut worker =
        SyncWorker::new(&store, FakeRemote::new(Reply::ShortCount), clock, config()).unwrap();
    let reports = worker.flush_all("test").unwrap();
    assert_eq!(reports[&Stream::Tank].acked, 0);
    assert_eq!(store.count_unacked(Stream::Tank).unwrap(), 2);
}

#[test]
fn pump_events_go_one_per_post_without_waiting() {
    let store = QueueStore::in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(t(0)));
    let mut worker =
        SyncWorker::new(&store, FakeRemote::new(Reply::Count), clock.clone(), config()).unwrap();
    worker.flush_all("startup").unwrap();

    pump(&store, "Auto Pump Start", 1);
    pump(&store, "Pump Stop", 2);
    tank(&store, "brookside", 2);
    clock.advance(Duration::seconds(1));
    let reports = worker.run_pending().unwrap();

    assert_eq!(reports[&Stream::Pump].acked, 2);
    assert!(!reports.contains_key(&Stream::Tank));
    let pump_posts: Vec<_> = worker
        .transport()
        .posts
        .iter()
        .filter(|(s, _)| *s == Stream::Pump)
        .collect();
    assert_eq!(pump_posts, vec![&(Stream::Pump, 1), &(Stream::Pump, 1)]);
    assert_eq!(store.count_unacked(Stream::Tank).unwrap(), 1);
}

#[test]
fn idle_pump_stream_sends_heartbeat() {
    let store = QueueStore::in_memory().unwrap();
    let clock = Arc::new(ManualClock::new(t(0)));
    let mut worker =
        SyncWorker::new(&store, FakeRemote::new(Reply::Count), clock.clone(), config()).unwrap();
    worker.run_pending().unwrap();
    assert_eq!(worker.transport().heartbeats, 0);

    clock.advance(Duration::seconds(301));
    worker.run_pending().unwrap();
    assert_eq!(worker.transport().heartbeats, 1);

    clock.advance(Duration::seconds(10));
    worker.run_pending().unwrap();
    assert_eq!(worker.transport().heartbeats, 1);
}

#[test]
fn pump_batch_size_must_be_one() {
    let store = QueueStore::in_memory().unwrap();
    let mut cfg = config();
    cfg.streams[1].batch_size = 4;
    let clock = Arc::new(ManualClock::new(t(0)));
    assert!(SyncWorker::new(&store, FakeRemote::new(Reply::Count), clock, cfg).is_err());
}

static CASE: AtomicUsize = AtomicUsize::new(0);

fn temp_db() -> std::path::PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let n = CASE.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir()
        .join(format!("sb_sync_crash_{nanos}_{n}"))
        .join("queue.sqlite3")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn crash_mid_send_still_delivers_everything_once(n in 1usize..25, dropped in 0usize..4, failed in 0usize..3) {
        let path = temp_db();
        let clock = Arc::new(ManualClock::new(t(1000)));

        let remote = {
            let store = QueueStore::open(&path).unwrap();
            for i in 0..n {
                tank(&store, "brookside", i as i64);
            }
            let mut remote = FakeRemote::new(Reply::Ids);
            remote.fail_next = failed;
            remote.drop_reply_next = dropped;
            let mut worker = SyncWorker::new(&store, remote, clock.clone(), config()).unwrap();
            // the process dies after the first pass, whatever it achieved
            worker.flush_all("startup").unwrap();
            worker.into_transport()
        };

        let store = QueueStore::open(&path).unwrap();
        let mut worker = SyncWorker::new(&store, remote, clock.clone(), config()).unwrap();
        for _ in 0..(n + 8) {
            if store.count_unacked(Stream::Tank).unwrap() == 0 {
                break;
            }
            worker.flush_all("restart").unwrap();
        }

        prop_assert_eq!(store.count_unacked(Stream::Tank).unwrap(), 0);
        prop_assert_eq!(worker.transport().stored.len(), n);
        let _ = std::fs::remove_dir_all(path.parent().unwrap());
    }
}
