//! Shared application service layer for sugarbush.
//!
//! Wires configuration, signal sources, the pump authority, the durable
//! queue and the sync worker into the long-lived processes the CLI starts.

pub mod cache;
pub mod controller;
pub mod error;
pub mod maintenance;
pub mod notices;
pub mod records;
pub mod replay;
pub mod sync_service;
pub mod vacuum;

pub use cache::{CachePublisher, CacheSignalSource, CachedSnapshot, read_cache};
pub use controller::{ControllerService, ControllerSettings, StepOutcome, build_relay};
pub use error::{AppError, AppResult};
pub use maintenance::{open_store, prune_once, queue_status, reset_all};
pub use notices::NoticeSuppressor;
pub use replay::{ReplayOverrides, ReplayPipeline, ReplaySummary, load_traces, run_replay};
pub use sync_service::{build_transport, build_worker_config, run_sync};
pub use vacuum::VacuumSampler;
