//! Configuration validation.

use crate::schema::{DeviceConfig, RelayDef, UploadDef};
use std::collections::HashSet;

pub const LATEST_VERSION: u32 = 1;

/// Fastest replay speed accepted.
pub const MAX_REPLAY_MULTIPLIER: f64 = 1e6;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Duplicate ID: {id} in {context}")]
    DuplicateId { id: String, context: String },

    #[error("Missing value: {field}")]
    MissingValue { field: String },

    #[error("Invalid value: {field} = {value} ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Unsupported version: {version}")]
    UnsupportedVersion { version: u32 },
}

pub fn validate_config(config: &DeviceConfig) -> Result<(), ValidationError> {
    if config.version == 0 || config.version > LATEST_VERSION {
        return Err(ValidationError::UnsupportedVersion {
            version: config.version,
        });
    }
    if config.device_id.trim().is_empty() {
        return Err(missing("device_id"));
    }

    let c = &config.controller;
    positive("controller.tick_interval_s", c.tick_interval_s)?;
    positive("controller.reserve_volume_gal", c.reserve_volume_gal)?;
    positive("controller.stale_after_s", c.stale_after_s)?;
    positive("controller.control_hold_s", c.control_hold_s)?;
    non_negative("controller.notice_suppress_s", c.notice_suppress_s)?;
    if c.error_threshold == 0 {
        return Err(invalid(
            "controller.error_threshold",
            "0",
            "threshold must be at least 1",
        ));
    }
    if let RelayDef::File { path, .. } = &c.relay {
        if path.as_os_str().is_empty() {
            return Err(missing("controller.relay.path"));
        }
    }

    positive(
        "signal_cache.publish_interval_s",
        config.signal_cache.publish_interval_s,
    )?;
    if config.signal_cache.path.as_os_str().is_empty() {
        return Err(missing("signal_cache.path"));
    }
    if config.queue.path.as_os_str().is_empty() {
        return Err(missing("queue.path"));
    }
    non_negative("queue.retention_days", config.queue.retention_days)?;
    positive("queue.prune_interval_s", config.queue.prune_interval_s)?;

    validate_sync(config)?;
    validate_replay(config)?;

    let v = &config.vacuum;
    if v.samples == 0 {
        return Err(invalid("vacuum.samples", "0", "need at least one sample"));
    }
    non_negative("vacuum.sample_delay_s", v.sample_delay_s)?;
    positive("vacuum.refresh_s", v.refresh_s)?;

    Ok(())
}

fn validate_sync(config: &DeviceConfig) -> Result<(), ValidationError> {
    let s = &config.sync;
    if !s.enabled {
        return Ok(());
    }
    if s.base_url.trim().is_empty() {
        return Err(missing("sync.base_url"));
    }
    positive("sync.timeout_s", s.timeout_s)?;
    positive("sync.poll_interval_s", s.poll_interval_s)?;
    non_negative("sync.heartbeat_interval_s", s.heartbeat_interval_s)?;

    let streams = [
        ("sync.streams.tank", &s.streams.tank),
        ("sync.streams.pump", &s.streams.pump),
        ("sync.streams.vacuum", &s.streams.vacuum),
        ("sync.streams.error_log", &s.streams.error_log),
    ];
    for (field, upload) in streams {
        validate_upload(field, upload)?;
    }
    if s.streams.pump.batch_size != 1 {
        return Err(invalid(
            "sync.streams.pump.batch_size",
            &s.streams.pump.batch_size.to_string(),
            "pump events are uploaded one per request",
        ));
    }
    Ok(())
}

fn validate_upload(field: &str, upload: &UploadDef) -> Result<(), ValidationError> {
    if upload.batch_size == 0 {
        return Err(invalid(
            &format!("{field}.batch_size"),
            "0",
            "batch size must be at least 1",
        ));
    }
    positive(&format!("{field}.interval_s"), upload.interval_s)
}

fn validate_replay(config: &DeviceConfig) -> Result<(), ValidationError> {
    let r = &config.replay;
    positive("replay.multiplier", r.multiplier)?;
    if r.multiplier > MAX_REPLAY_MULTIPLIER {
        return Err(invalid(
            "replay.multiplier",
            &r.multiplier.to_string(),
            "must not exceed 1000000",
        ));
    }
    non_negative("replay.loop_gap_s", r.loop_gap_s)?;
    positive("replay.tick_interval_s", r.tick_interval_s)?;

    let mut ids = HashSet::new();
    for stream in &r.streams {
        if stream.id.trim().is_empty() {
            return Err(missing("replay.streams[].id"));
        }
        if !ids.insert(stream.id.as_str()) {
            return Err(ValidationError::DuplicateId {
                id: stream.id.clone(),
                context: "replay.streams".to_string(),
            });
        }
        if stream.path.as_os_str().is_empty() {
            return Err(missing(&format!("replay.streams[{}].path", stream.id)));
        }
    }
    Ok(())
}

fn positive(field: &str, v: f64) -> Result<(), ValidationError> {
    if v.is_finite() && v > 0.0 {
        Ok(())
    } else {
        Err(invalid(field, &v.to_string(), "must be a positive finite number"))
    }
}

fn non_negative(field: &str, v: f64) -> Result<(), ValidationError> {
    if v.is_finite() && v >= 0.0 {
        Ok(())
    } else {
        Err(invalid(field, &v.to_string(), "must be a non-negative finite number"))
    }
}

fn missing(field: &str) -> ValidationError {
    ValidationError::MissingValue {
        field: field.to_string(),
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ValidationError {
    ValidationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
