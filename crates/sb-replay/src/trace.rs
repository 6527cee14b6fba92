//! Recorded traces.
//!
//! Tank traces: `timestamp, yr, mo, day, hr, m, s, surf_dist, depth, gal`, one
//! row per sample. Pump traces: `Time, Pump_Event, Pump_Run_Time,
//! Pump_Interval, Gallons_Per_Hour`, one row per discrete event.

use std::path::Path;

use sb_controls::PumpEventKind;
use sb_core::{Timestamp, parse_timestamp};
use serde::{Deserialize, Serialize};

use crate::csv::{self, CsvRow};
use crate::{ReplayError, ReplayResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Tank,
    Pump,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TankSample {
    pub tank_id: String,
    pub surf_dist: Option<f64>,
    pub depth: Option<f64>,
    pub gal: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PumpSample {
    pub label: String,
    /// `None` when the label is not a known event kind.
    pub kind: Option<PumpEventKind>,
    pub run_time_s: Option<f64>,
    pub interval_s: Option<f64>,
    pub gallons_per_hour: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceRecord {
    Tank(TankSample),
    Pump(PumpSample),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceRow {
    pub timestamp: Timestamp,
    pub record: TraceRecord,
}

/// All rows of one stream, sorted by timestamp (stable for equal stamps).
#[derive(Debug, Clone, PartialEq)]
pub struct StreamTrace {
    pub id: String,
    pub kind: StreamKind,
    pub rows: Vec<TraceRow>,
}

impl StreamTrace {
    pub fn new(id: impl Into<String>, kind: StreamKind, mut rows: Vec<TraceRow>) -> Self {
        rows.sort_by_key(|r| r.timestamp);
        Self {
            id: id.into(),
            kind,
            rows,
        }
    }

    pub fn load(id: &str, kind: StreamKind, path: &Path) -> ReplayResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ReplayError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let trace = Self::parse(id, kind, &text, &path.display().to_string())?;
        tracing::info!(
            stream = id,
            ?kind,
            rows = trace.rows.len(),
            path = %path.display(),
            "loaded replay trace"
        );
        Ok(trace)
    }

    /// Parse trace text. `origin` names the source in error messages.
    ///
    /// Rows without a timestamp are skipped; an unparseable timestamp is an
    /// error.
    pub fn parse(id: &str, kind: StreamKind, text: &str, origin: &str) -> ReplayResult<Self> {
        let mut rows = Vec::new();
        for row in csv::parse(text) {
            let Some(ts_raw) = row.get_any(&["timestamp", "time"]) else {
                continue;
            };
            let timestamp = parse_timestamp(ts_raw).map_err(|e| ReplayError::Parse {
                path: origin.to_string(),
                line: row.line,
                message: e.to_string(),
            })?;
            let record = match kind {
                StreamKind::Tank => TraceRecord::Tank(tank_sample(id, &row)),
                StreamKind::Pump => TraceRecord::Pump(pump_sample(&row)),
            };
            rows.push(TraceRow { timestamp, record });
        }
        Ok(Self::new(id, kind, rows))
    }

    pub fn first_timestamp(&self) -> Option<Timestamp> {
        self.rows.first().map(|r| r.timestamp)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

fn tank_sample(id: &str, row: &CsvRow) -> TankSample {
    TankSample {
        tank_id: id.to_string(),
        surf_dist: row.number(&["surf_dist"]),
        depth: row.number(&["depth"]),
        gal: row.number(&["gal", "volume_gal"]),
    }
}

fn pump_sample(row: &CsvRow) -> PumpSample {
    let label = row
        .get_any(&["pump_event", "event_type"])
        .unwrap_or_default()
        .to_string();
    PumpSample {
        kind: PumpEventKind::parse(&label),
        label,
        run_time_s: row.number(&["pump_run_time", "pump_run_time_s"]),
        interval_s: row.number(&["pump_interval", "pump_interval_s"]),
        gallons_per_hour: row.number(&["gallons_per_hour"]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const TANK: &str = "timestamp,yr,mo,day,hr,m,s,surf_dist,depth,gal
2025-03-01 08:00:10,2025,3,1,8,0,10,30.1,12.0,40.5
2025-03-01 08:00:00,2025,3,1,8,0,0,30.0,12.1,41.0
";

    const PUMP: &str = "Time,Pump_Event,Pump_Run_Time,Pump_Interval,Gallons_Per_Hour
2025-03-01-08:00:05,Auto Pump Start,,,
2025-03-01-08:01:05,Pump Stop,60,600,73.1
2025-03-01-08:02:00,Pump Restart,,,
";

    #[test]
    fn tank_rows_are_sorted() {
        let trace = StreamTrace::parse("brookside", StreamKind::Tank, TANK, "tank.csv").unwrap();
        assert_eq!(trace.len(), 2);
        assert_eq!(
            trace.first_timestamp(),
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap())
        );
        match &trace.rows[0].record {
            TraceRecord::Tank(s) => {
                assert_eq!(s.tank_id, "brookside");
                assert_eq!(s.gal, Some(41.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn pump_rows_keep_unknown_labels() {
        let trace = StreamTrace::parse("pump", StreamKind::Pump, PUMP, "pump.csv").unwrap();
        let kinds: Vec<_> = trace
            .rows
            .iter()
            .map(|r| match &r.record {
                TraceRecord::Pump(p) => p.kind,
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![
                Some(PumpEventKind::AutoPumpStart),
                Some(PumpEventKind::PumpStop),
                None
            ]
        );
        match &trace.rows[1].record {
            TraceRecord::Pump(p) => assert_eq!(p.run_time_s, Some(60.0)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn bad_timestamp_reports_line() {
        let err = StreamTrace::parse("t", StreamKind::Tank, "timestamp,gal\nyesterday,1\n", "x.csv")
            .unwrap_err();
        assert!(err.to_string().starts_with("x.csv:2:"));
    }
}
