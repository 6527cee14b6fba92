use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use sb_core::{ManualClock, Timestamp};
use sb_queue::*;
use serde_json::json;

fn t(secs: i64) -> Timestamp {
    Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap() + Duration::seconds(secs)
}

fn temp_db(name: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("sb_queue_{name}_{nanos}"));
    let _ = std::fs::remove_dir_all(&dir);
    dir.join("queue.sqlite3")
}

fn tank(key: &str, secs: i64, gal: f64) -> NewRecord {
    NewRecord::new(Stream::Tank, key, t(secs), json!({ "tank_id": key, "gal": gal }))
}

#[test]
fn batches_come_out_in_timestamp_order() {
    let store = QueueStore::in_memory().unwrap();
    store.enqueue(&tank("brookside", 30, 3.0)).unwrap();
    store.enqueue(&tank("roadside", 10, 1.0)).unwrap();
    store.enqueue(&tank("brookside", 20, 2.0)).unwrap();

    let batch = store.take_unacked_batch(Stream::Tank, 10).unwrap();
    let times: Vec<_> = batch.iter().map(|r| r.source_timestamp).collect();
    assert_eq!(times, vec![t(10), t(20), t(30)]);

    let first_two = store.take_unacked_batch(Stream::Tank, 2).unwrap();
    assert_eq!(first_two.len(), 2);
    assert!(store.take_unacked_batch(Stream::Pump, 10).unwrap().is_empty());
}

#[test]
fn duplicate_key_and_timestamp_upserts() {
    let store = QueueStore::in_memory().unwrap();
    let a = store.enqueue(&tank("brookside", 10, 1.0)).unwrap();
    let b = store.enqueue(&tank("brookside", 10, 1.5)).unwrap();
    assert_eq!(a, b);
    assert_eq!(store.count_unacked(Stream::Tank).unwrap(), 1);

    let rec = store.get(Stream::Tank, a).unwrap().unwrap();
    assert_eq!(rec.payload["gal"], 1.5);
}

#[test]
fn unchanged_upsert_keeps_ack_changed_upsert_clears_it() {
    let store = QueueStore::in_memory().unwrap();
    let id = store.enqueue(&tank("brookside", 10, 1.0)).unwrap();
    store.mark_acked(Stream::Tank, &AckScope::Ids(vec![id])).unwrap();

    store.enqueue(&tank("brookside", 10, 1.0)).unwrap();
    let rec = store.get(Stream::Tank, id).unwrap().unwrap();
    assert!(rec.acked && rec.sent);

    store.enqueue(&tank("brookside", 10, 2.0)).unwrap();
    let rec = store.get(Stream::Tank, id).unwrap().unwrap();
    assert!(!rec.acked && !rec.sent);
    assert_eq!(store.count_unacked(Stream::Tank).unwrap(), 1);
}

#[test]
fn ack_up_to_timestamp_is_per_key() {
    let store = QueueStore::in_memory().unwrap();
    for secs in [10, 20, 30] {
        store.enqueue(&tank("brookside", secs, 1.0)).unwrap();
        store.enqueue(&tank("roadside", secs, 1.0)).unwrap();
    }
    let n = store
        .mark_acked(
            Stream::Tank,
            &AckScope::UpTo {
                record_key: "brookside".into(),
                timestamp: t(20),
            },
        )
        .unwrap();
    assert_eq!(n, 2);

    let left = store.take_unacked_batch(Stream::Tank, 10).unwrap();
    assert_eq!(left.len(), 4);
    assert!(
        left.iter()
            .all(|r| r.record_key == "roadside" || r.source_timestamp == t(30))
    );
}

#[test]
fn status_counts_each_stage() {
    let store = QueueStore::in_memory().unwrap();
    let a = store.enqueue(&tank("brookside", 1, 1.0)).unwrap();
    let b = store.enqueue(&tank("brookside", 2, 1.0)).unwrap();
    store.enqueue(&tank("brookside", 3, 1.0)).unwrap();
    store.mark_sent(Stream::Tank, &[a, b]).unwrap();
    store.mark_acked(Stream::Tank, &AckScope::Ids(vec![a])).unwrap();

    let status = store.status().unwrap();
    let tank = status.iter().find(|s| s.stream == Stream::Tank).unwrap();
    assert_eq!((tank.pending, tank.in_flight, tank.acked), (1, 1, 1));
    assert_eq!(tank.total(), 3);
    let pump = status.iter().find(|s| s.stream == Stream::Pump).unwrap();
    assert_eq!(pump.total(), 0);
}

#[test]
fn records_survive_reopen() {
    let path = temp_db("reopen");
    {
        let store = QueueStore::open(&path).unwrap();
        store
            .enqueue(&NewRecord::new(
                Stream::Pump,
                "Pump Stop",
                t(5),
                json!({ "event_type": "Pump Stop" }),
            ))
            .unwrap();
    }
    let store = QueueStore::open(&path).unwrap();
    let batch = store.take_unacked_batch(Stream::Pump, 1).unwrap();
    assert_eq!(batch.len(), 1);
    assert_eq!(batch[0].payload["event_type"], "Pump Stop");
    let _ = std::fs::remove_dir_all(path.parent().unwrap());
}

#[test]
fn prune_only_removes_old_acknowledged_rows() {
    let clock = Arc::new(ManualClock::new(t(0)));
    let store = QueueStore::in_memory().unwrap().with_clock(clock.clone());
    let old_acked = store.enqueue(&tank("brookside", 1, 1.0)).unwrap();
    store.enqueue(&tank("brookside", 2, 1.0)).unwrap();
    store
        .mark_acked(Stream::Tank, &AckScope::Ids(vec![old_acked]))
        .unwrap();

    clock.advance(Duration::days(3));
    let fresh_acked = store.enqueue(&tank("brookside", 3, 1.0)).unwrap();
    store
        .mark_acked(Stream::Tank, &AckScope::Ids(vec![fresh_acked]))
        .unwrap();

    assert_eq!(store.prune_acknowledged(0.0).unwrap(), 0);
    assert_eq!(store.prune_acknowledged(2.0).unwrap(), 1);
    assert!(store.get(Stream::Tank, old_acked).unwrap().is_none());
    assert!(store.get(Stream::Tank, fresh_acked).unwrap().is_some());
    assert_eq!(store.count_unacked(Stream::Tank).unwrap(), 1);
}

#[test]
fn reset_clears_every_stream() {
    let store = QueueStore::in_memory().unwrap();
    store.enqueue(&tank("brookside", 1, 1.0)).unwrap();
    store
        .enqueue(&NewRecord::new(
            Stream::ErrorLog,
            "pump_pi",
            t(1),
            json!({ "message": "x" }),
        ))
        .unwrap();
    assert_eq!(store.reset().unwrap(), 2);
    assert!(store.status().unwrap().iter().all(|s| s.total() == 0));
}
