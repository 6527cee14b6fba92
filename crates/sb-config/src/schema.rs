//! Device configuration schema.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceConfig {
    pub version: u32,
    pub device_id: String,
    #[serde(default)]
    pub controller: ControllerDef,
    #[serde(default)]
    pub signal_cache: SignalCacheDef,
    #[serde(default)]
    pub queue: QueueDef,
    #[serde(default)]
    pub sync: SyncDef,
    #[serde(default)]
    pub replay: ReplayDef,
    #[serde(default)]
    pub vacuum: VacuumDef,
}

impl DeviceConfig {
    /// Make every relative path absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        resolve(&mut self.signal_cache.path, base);
        resolve(&mut self.queue.path, base);
        if let RelayDef::File { path, .. } = &mut self.controller.relay {
            resolve(path, base);
        }
        for stream in &mut self.replay.streams {
            resolve(&mut stream.path, base);
        }
    }
}

fn resolve(path: &mut PathBuf, base: &Path) {
    if path.is_relative() {
        *path = base.join(&*path);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ControllerDef {
    pub tick_interval_s: f64,
    pub error_threshold: u32,
    pub reserve_volume_gal: f64,
    /// Signal cache older than this is treated as missing data.
    pub stale_after_s: f64,
    /// How long `clear_fatal` must be held before it fires.
    pub control_hold_s: f64,
    /// Identical notices are queued at most once per this window.
    pub notice_suppress_s: f64,
    pub relay: RelayDef,
}

impl Default for ControllerDef {
    fn default() -> Self {
        Self {
            tick_interval_s: 0.5,
            error_threshold: 30,
            reserve_volume_gal: 12.18,
            stale_after_s: 5.0,
            control_hold_s: 5.0,
            notice_suppress_s: 1.0,
            relay: RelayDef::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayDef {
    /// Log commands only.
    #[default]
    Logging,
    /// Write `1`/`0` to a file, e.g. a sysfs GPIO value.
    File {
        path: PathBuf,
        #[serde(default = "default_true")]
        active_high: bool,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SignalCacheDef {
    pub path: PathBuf,
    pub publish_interval_s: f64,
}

impl Default for SignalCacheDef {
    fn default() -> Self {
        Self {
            path: PathBuf::from("state/signals.json"),
            publish_interval_s: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueueDef {
    pub path: PathBuf,
    /// Acknowledged rows older than this are pruned; 0 disables pruning.
    pub retention_days: f64,
    pub prune_interval_s: f64,
}

impl Default for QueueDef {
    fn default() -> Self {
        Self {
            path: PathBuf::from("state/queue.db"),
            retention_days: 30.0,
            prune_interval_s: 3600.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncDef {
    pub enabled: bool,
    pub base_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Environment variable holding the API key, used when `api_key` is unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
    pub timeout_s: f64,
    pub poll_interval_s: f64,
    /// 0 disables the no-data heartbeat.
    pub heartbeat_interval_s: f64,
    pub endpoints: EndpointsDef,
    pub streams: UploadStreamsDef,
}

impl Default for SyncDef {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: String::new(),
            api_key: None,
            api_key_env: Some("SUGARBUSH_API_KEY".to_string()),
            timeout_s: 10.0,
            poll_interval_s: 1.0,
            heartbeat_interval_s: 300.0,
            endpoints: EndpointsDef::default(),
            streams: UploadStreamsDef::default(),
        }
    }
}

/// Endpoint path overrides; unset entries keep the built-in paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct EndpointsDef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tank: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pump: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vacuum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct UploadStreamsDef {
    pub tank: UploadDef,
    pub pump: UploadDef,
    pub vacuum: UploadDef,
    pub error_log: UploadDef,
}

impl Default for UploadStreamsDef {
    fn default() -> Self {
        Self {
            tank: UploadDef::new(50, 30.0),
            pump: UploadDef::new(1, 5.0),
            vacuum: UploadDef::new(50, 60.0),
            error_log: UploadDef::new(25, 30.0),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UploadDef {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub batch_size: usize,
    pub interval_s: f64,
}

impl UploadDef {
    pub fn new(batch_size: usize, interval_s: f64) -> Self {
        Self {
            enabled: true,
            batch_size,
            interval_s,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReplayDef {
    pub multiplier: f64,
    #[serde(rename = "loop")]
    pub loop_enabled: bool,
    /// Wall seconds between loops.
    pub loop_gap_s: f64,
    /// Wall seconds between replay ticks.
    pub tick_interval_s: f64,
    pub streams: Vec<ReplayStreamDef>,
}

impl Default for ReplayDef {
    fn default() -> Self {
        Self {
            multiplier: 4.0,
            loop_enabled: true,
            loop_gap_s: 10.0,
            tick_interval_s: 0.05,
            streams: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplayStreamDef {
    pub id: String,
    pub kind: ReplayStreamKind,
    pub path: PathBuf,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStreamKind {
    Tank,
    Pump,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VacuumDef {
    pub enabled: bool,
    pub samples: u32,
    pub sample_delay_s: f64,
    pub refresh_s: f64,
}

impl Default for VacuumDef {
    fn default() -> Self {
        Self {
            enabled: true,
            samples: 5,
            sample_delay_s: 1.0,
            refresh_s: 60.0,
        }
    }
}

fn default_true() -> bool {
    true
}
