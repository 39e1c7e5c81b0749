//! Production monitor.
//!
//! Production runs for hours to days. While it runs, the monitor:
//!
//! - wakes every poll interval (30 s by default) and reads throughput and
//!   time remaining from the engine's status file,
//! - runs an incremental trajectory dump every `snapshot_every` ticks,
//! - runs one final dump once the engine has exited, was cancelled, or was lost.
//!
//! # Architecture
//!
//! ```text
//! Poller task ──MonitorEvent──▶ ProductionMonitor::supervise ◀── cancel (watch)
//!                                   │ owns the engine Child
//!                                   └──▶ Snapshotter (post-processing)
//! ```
//!
//! Status-file problems are never fatal. A warning is logged every
//! `stale_warn_ticks` consecutive ticks without progress figures.

pub mod poller;
pub mod status;
pub mod supervisor;

pub use poller::{MonitorEvent, Poller};
pub use status::{read_sample, ProgressSample};
pub use supervisor::{
    FrameCounter, MonitorOutcome, MonitorSettings, ProductionExit, ProductionMonitor,
};

use async_trait::async_trait;

use crate::error::PostProcessError;
use crate::postprocess::SnapshotReport;

/// Something that can dump the current trajectory to frame files.
#[async_trait]
pub trait Snapshotter: Send + Sync {
    async fn snapshot(&self) -> Result<SnapshotReport, PostProcessError>;
}
