use std::collections::BTreeMap;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;
use sb_queue::*;
use serde_json::json;

const KEYS: [&str; 3] = ["brookside", "roadside", "sugarhouse"];

proptest! {
    #[test]
    fn one_row_per_key_and_timestamp(ops in prop::collection::vec((0usize..3, 0i64..20, 0u32..5), 1..60)) {
        let store = QueueStore::in_memory().unwrap();
        let base = Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap();
        let mut latest = BTreeMap::new();

        for (key, secs, value) in ops {
            let ts = base + Duration::seconds(secs);
            store
                .enqueue(&NewRecord::new(Stream::Tank, KEYS[key], ts, json!({ "gal": value })))
                .unwrap();
            latest.insert((KEYS[key].to_string(), ts), value);
        }

        let rows = store.take_unacked_batch(Stream::Tank, 1000).unwrap();
        prop_assert_eq!(rows.len(), latest.len());
        for row in rows {
            let want = latest[&(row.record_key.clone(), row.source_timestamp)];
            prop_assert_eq!(row.payload["gal"].as_u64(), Some(want as u64));
        }
    }
}
