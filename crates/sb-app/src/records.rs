//! Queue payloads for each stream.

use sb_controls::{PumpEvent, PumpEventKind, Severity};
use sb_core::Timestamp;
use sb_queue::{NewRecord, Stream};
use sb_replay::TankSample;
use serde_json::json;

/// Error log source name for notices raised by the pump controller.
pub const CONTROLLER_SOURCE: &str = "pump_controller";
pub const VACUUM_KEY: &str = "vacuum";
pub const FATAL_PREFIX: &str = "[FATAL ERROR]";

/// Pump events are keyed by event type.
///
/// An auto start reports the preceding fill time as its interval.
pub fn pump_record(event: &PumpEvent) -> NewRecord {
    let interval = match event.kind {
        PumpEventKind::AutoPumpStart => event.interval_s.or(event.fill_time_s),
        _ => event.interval_s,
    };
    NewRecord::new(
        Stream::Pump,
        event.kind.as_str(),
        event.at,
        json!({
            "event_type": event.kind.as_str(),
            "pump_run_time_s": event.run_time_s,
            "pump_interval_s": interval,
            "gallons_per_hour": event.gallons_per_hour,
        }),
    )
}

pub fn error_record(source: &str, severity: Severity, message: &str, at: Timestamp) -> NewRecord {
    NewRecord::new(
        Stream::ErrorLog,
        source,
        at,
        json!({
            "source": source,
            "level": severity_label(severity),
            "message": message,
        }),
    )
}

pub fn tank_record(sample: &TankSample, at: Timestamp) -> NewRecord {
    NewRecord::new(
        Stream::Tank,
        sample.tank_id.as_str(),
        at,
        json!({
            "tank_id": sample.tank_id,
            "surf_dist": sample.surf_dist,
            "depth": sample.depth,
            "volume_gal": sample.gal,
        }),
    )
}

pub fn vacuum_record(reading_inhg: f64, at: Timestamp) -> NewRecord {
    NewRecord::new(
        Stream::Vacuum,
        VACUUM_KEY,
        at,
        json!({ "reading_inhg": reading_inhg }),
    )
}

/// Prefix a message logged while the fatal latch is set.
pub fn with_fatal_prefix(message: &str) -> String {
    if message.starts_with(FATAL_PREFIX) {
        message.to_string()
    } else {
        format!("{FATAL_PREFIX} {message}")
    }
}

fn severity_label(severity: Severity) -> &'static str {
    match severity {
        Severity::Warning => "warning",
        Severity::Error => "error",
        Severity::Fatal => "fatal",
    }
}
