//! Supervision of the production engine process.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::error::PostProcessError;
use crate::pipeline::PipelineConfig;
use crate::postprocess::SnapshotReport;

use super::poller::{MonitorEvent, Poller};
use super::status::ProgressSample;
use super::Snapshotter;

/// Cadence of one supervised run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    pub interval: Duration,
    pub snapshot_every: u64,
    pub stale_warn_ticks: u64,
    /// Steps between trajectory frames, used to turn steps into frames.
    pub write_frequency: u64,
}

impl MonitorSettings {
    pub fn from_config(config: &PipelineConfig, write_frequency: u64) -> Self {
        Self {
            interval: config.poll_interval,
            snapshot_every: config.snapshot_every,
            stale_warn_ticks: config.stale_warn_ticks,
            write_frequency,
        }
    }
}

/// How the engine process ended.
#[derive(Debug)]
pub enum ProductionExit {
    /// The process exited on its own.
    Exited(ExitStatus),
    /// Cancellation was requested and the process was killed.
    Cancelled,
    /// Waiting on the process failed.
    Lost(String),
}

impl ProductionExit {
    pub fn success(&self) -> bool {
        matches!(self, ProductionExit::Exited(status) if status.success())
    }
}

impl std::fmt::Display for ProductionExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProductionExit::Exited(status) => write!(f, "{}", status),
            ProductionExit::Cancelled => write!(f, "cancelled"),
            ProductionExit::Lost(reason) => write!(f, "lost track of process: {}", reason),
        }
    }
}

/// Everything observed while supervising production.
#[derive(Debug)]
pub struct MonitorOutcome {
    pub exit: ProductionExit,
    pub ticks: u64,
    pub snapshots_taken: u64,
    pub snapshots_failed: u64,
    /// Highest frame count derived from the status file.
    pub frames_seen: Option<u64>,
    pub last_sample: Option<ProgressSample>,
    /// Highest frame count reported by any snapshot, final one included.
    pub snapshot_frames: Option<u64>,
    /// The unconditional final pass. Its failure is the caller's to judge.
    pub final_snapshot: Result<SnapshotReport, PostProcessError>,
}

/// Frame count that never goes backwards.
#[derive(Debug, Default, Clone, Copy)]
pub struct FrameCounter {
    highest: Option<u64>,
}

impl FrameCounter {
    /// Records an observation and returns the running maximum.
    pub fn observe(&mut self, frames: u64) -> u64 {
        let highest = match self.highest {
            Some(prev) if frames < prev => {
                warn!(
                    previous = prev,
                    observed = frames,
                    "Frame count went backwards, keeping previous value"
                );
                prev
            }
            _ => frames,
        };
        self.highest = Some(highest);
        highest
    }

    pub fn get(&self) -> Option<u64> {
        self.highest
    }
}

/// Supervises one production run: polls progress, takes periodic snapshots
/// and always finishes with a final snapshot.
pub struct ProductionMonitor<'a> {
    settings: MonitorSettings,
    snapshotter: &'a dyn Snapshotter,
}

impl<'a> ProductionMonitor<'a> {
    pub fn new(settings: MonitorSettings, snapshotter: &'a dyn Snapshotter) -> Self {
        Self {
            settings,
            snapshotter,
        }
    }

    /// Supervises `child` until it exits or `cancel` becomes `true`.
    ///
    /// Snapshot failures during the run are logged and counted. The final
    /// snapshot runs whatever way the process ended.
    pub async fn supervise(
        &self,
        mut child: Child,
        status_file: PathBuf,
        mut cancel: watch::Receiver<bool>,
    ) -> MonitorOutcome {
        let (tx, mut rx) = mpsc::channel(16);
        let poller = Poller::spawn(
            status_file,
            self.settings.interval,
            self.settings.snapshot_every,
            tx,
        );

        let mut state = TickState::default();
        let mut cancel_open = true;

        let exit = if *cancel.borrow() {
            kill(&mut child).await
        } else {
            loop {
                tokio::select! {
                    biased;
                    status = child.wait() => {
                        break match status {
                            Ok(status) => ProductionExit::Exited(status),
                            Err(e) => ProductionExit::Lost(e.to_string()),
                        };
                    }
                    changed = cancel.changed(), if cancel_open => {
                        if changed.is_err() {
                            cancel_open = false;
                        } else if *cancel.borrow() {
                            info!("Cancellation requested, stopping production");
                            break kill(&mut child).await;
                        }
                    }
                    Some(event) = rx.recv() => self.handle_event(event, &mut state).await,
                }
            }
        };
        // A pending send fails once the receiver is gone.
        drop(rx);
        poller.stop().await;

        info!(exit = %exit, ticks = state.ticks, "Production finished, running final dump");
        let final_snapshot = self.snapshotter.snapshot().await;
        if let Ok(ref report) = final_snapshot {
            state.check_snapshot(report);
        }

        MonitorOutcome {
            exit,
            ticks: state.ticks,
            snapshots_taken: state.snapshots_taken,
            snapshots_failed: state.snapshots_failed,
            frames_seen: state.frames.get(),
            last_sample: state.last_sample,
            snapshot_frames: state.snapshot_frames.get(),
            final_snapshot,
        }
    }

    async fn handle_event(&self, event: MonitorEvent, state: &mut TickState) {
        match event {
            MonitorEvent::Tick { tick, sample } => {
                state.ticks = tick;
                match sample {
                    Some(sample) => {
                        state.misses = 0;
                        let frames = sample
                            .frames_written(self.settings.write_frequency)
                            .map(|f| state.frames.observe(f));
                        debug!(tick, frames = ?frames, "{}", sample);
                        state.last_sample = Some(sample);
                    }
                    None => {
                        state.misses += 1;
                        debug!(tick, "No progress figures in status file yet");
                        if state.misses % self.settings.stale_warn_ticks.max(1) == 0 {
                            warn!(
                                ticks = state.misses,
                                "Status file has reported no progress for {} consecutive ticks",
                                state.misses
                            );
                        }
                    }
                }
            }
            MonitorEvent::SnapshotDue { tick } => {
                info!(tick, "Dumping partial trajectory");
                match self.snapshotter.snapshot().await {
                    Ok(report) => {
                        state.snapshots_taken += 1;
                        state.check_snapshot(&report);
                    }
                    Err(e) => {
                        state.snapshots_failed += 1;
                        warn!(tick, "Partial dump failed, continuing: {}", e);
                    }
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct TickState {
    ticks: u64,
    misses: u64,
    snapshots_taken: u64,
    snapshots_failed: u64,
    frames: FrameCounter,
    snapshot_frames: FrameCounter,
    last_sample: Option<ProgressSample>,
}

impl TickState {
    fn check_snapshot(&mut self, report: &SnapshotReport) {
        self.snapshot_frames.observe(report.frames() as u64);
    }
}

async fn kill(child: &mut Child) -> ProductionExit {
    if let Err(e) = child.start_kill() {
        debug!("Engine already gone: {}", e);
    }
    let _ = child.wait().await;
    ProductionExit::Cancelled
}
