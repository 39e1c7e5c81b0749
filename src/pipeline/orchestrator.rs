//! Pipeline orchestrator for the staged engine run.
//!
//! This module provides the `PipelineOrchestrator` that coordinates:
//! - Structure building and the starting structure (setup)
//! - Optional hydrogen mass repartitioning
//! - The strictly sequential stage chain with checkpoint hand-off
//! - Delegation of the production stage to the production monitor

use std::path::PathBuf;
use std::time::Instant;

use tokio::fs;
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::PipelineError;
use crate::monitor::{MonitorSettings, ProductionExit, ProductionMonitor};
use crate::params::ParameterSet;
use crate::postprocess::{PostProcessor, SnapshotReport};
use crate::runner::{ProcessRunner, ProcessSpec};
use crate::template::{self, scripts, StepPlan};

use super::config::PipelineConfig;
use super::layout::RunLayout;
use super::stage::{Stage, StageKind, StageStatus};

/// Result of a completed chain.
#[derive(Debug)]
pub struct RunReport {
    /// Every stage that was attempted, in order.
    pub stages: Vec<Stage>,
    /// Final post-processing pass of production, if production ran.
    pub final_snapshot: Option<SnapshotReport>,
}

/// Drives setup and the stage chain inside one run directory.
pub struct PipelineOrchestrator {
    params: ParameterSet,
    layout: RunLayout,
    config: PipelineConfig,
    runner: ProcessRunner,
}

impl PipelineOrchestrator {
    /// Creates an orchestrator after validating parameters and configuration.
    pub fn new(
        params: ParameterSet,
        layout: RunLayout,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        params.validate()?;
        config.validate()?;
        Ok(Self {
            params,
            layout,
            config,
            runner: ProcessRunner::new(),
        })
    }

    pub fn params(&self) -> &ParameterSet {
        &self.params
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Post-processor bound to this run.
    pub fn post_processor(&self) -> PostProcessor {
        PostProcessor::new(
            self.layout.clone(),
            &self.config.toolchain,
            self.params.num_residues(),
        )
    }

    /// Full setup: build the solvated system, write every control file and
    /// the reimaging input.
    pub async fn prepare(&self) -> Result<(), PipelineError> {
        self.build_structure().await?;
        self.write_control_files().await?;
        self.post_processor()
            .write_reimage_input()
            .await
            .map_err(|e| setup_failed("reimage input", e))?;
        Ok(())
    }

    /// Builds `prmtop`/`inpcrd`, the starting structure and the pristine backups.
    ///
    /// Nothing else is written if the builder fails.
    pub async fn build_structure(&self) -> Result<(), PipelineError> {
        let leap_input = self.layout.leap_input();
        let text = scripts::leap_input(
            self.params.pdb(),
            self.params.box_size(),
            self.layout.relative(&self.layout.topology()),
            self.layout.relative(&self.layout.coordinates()),
        )?;
        fs::write(&leap_input, text).await?;

        info!(pdb = %self.params.pdb().display(), "Building solvated system");
        let spec = self
            .config
            .toolchain
            .tleap
            .spec(self.layout.root())
            .arg("-f")
            .path_arg(&leap_input);
        self.runner
            .run_checked(&spec)
            .await
            .map_err(|e| setup_failed("tleap", e))?;

        for built in [self.layout.topology(), self.layout.coordinates()] {
            if !built.is_file() {
                return Err(PipelineError::SetupFailed {
                    step: "tleap".to_string(),
                    reason: format!("{} was not written", built.display()),
                });
            }
        }

        let spec = self
            .config
            .toolchain
            .ambpdb
            .spec(self.layout.root())
            .arg("-p")
            .path_arg(&self.layout.topology())
            .stdin_from(self.layout.coordinates())
            .stdout_to(self.layout.starting_structure());
        self.runner
            .run_checked(&spec)
            .await
            .map_err(|e| setup_failed("ambpdb", e))?;

        fs::copy(self.layout.topology(), self.layout.topology_backup()).await?;
        fs::copy(self.layout.coordinates(), self.layout.coordinates_backup()).await?;
        info!("System built, starting structure written");
        Ok(())
    }

    /// Renders every stage deck to its control file.
    pub async fn write_control_files(&self) -> Result<Vec<PathBuf>, PipelineError> {
        let mut written = Vec::with_capacity(StageKind::ALL.len());
        for stage in StageKind::ALL {
            let path = self.layout.control_file(stage);
            fs::write(&path, template::render_stage(&self.params, stage)?).await?;
            written.push(path);
        }
        Ok(written)
    }

    /// Repartitions hydrogen masses in place, always starting from the
    /// pristine backups so repeated calls give the same topology.
    pub async fn repartition_hydrogens(&self) -> Result<(), PipelineError> {
        let pairs = [
            (self.layout.topology(), self.layout.topology_backup()),
            (self.layout.coordinates(), self.layout.coordinates_backup()),
        ];
        for (live, backup) in &pairs {
            if backup.is_file() {
                fs::copy(backup, live).await?;
            } else {
                fs::copy(live, backup).await?;
            }
        }

        let input = self.layout.repartition_input();
        let text = scripts::repartition_input(
            self.layout.relative(&self.layout.topology()),
            self.layout.relative(&self.layout.coordinates()),
        )?;
        fs::write(&input, text).await?;

        info!("Re-weighting hydrogens");
        let spec = self
            .config
            .toolchain
            .parmed
            .spec(self.layout.root())
            .arg("-p")
            .path_arg(&self.layout.topology())
            .arg("-c")
            .path_arg(&self.layout.coordinates())
            .arg("-O")
            .arg("-i")
            .path_arg(&input);
        self.runner
            .run_checked(&spec)
            .await
            .map_err(|e| setup_failed("parmed", e))?;
        fs::remove_file(&input).await?;
        Ok(())
    }

    /// Engine invocation for one stage, bound to the configured device.
    pub fn engine_spec(&self, stage: &Stage) -> ProcessSpec {
        let kind = stage.kind;
        let mut spec = self
            .config
            .toolchain
            .engine
            .spec(self.layout.root())
            .arg("-O")
            .arg("-i")
            .path_arg(&stage.control_file)
            .arg("-o")
            .path_arg(&self.layout.engine_log(kind))
            .arg("-p")
            .path_arg(&self.layout.topology())
            .arg("-c")
            .path_arg(stage.input.path())
            .arg("-r")
            .path_arg(stage.output.path());
        if kind.writes_trajectory() {
            spec = spec.arg("-x").path_arg(&self.layout.trajectory(kind));
        }
        spec.arg("-inf")
            .path_arg(&self.layout.status_file(kind))
            .env(self.config.device_env.clone(), self.params.device())
    }

    /// Runs the chain from `from` to production.
    ///
    /// Starting from the first stage builds the system if it is missing and
    /// applies hydrogen repartitioning when requested. Later starting points
    /// require the predecessor's checkpoint to exist already.
    pub async fn run(
        &self,
        from: StageKind,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunReport, PipelineError> {
        if from == StageKind::Minimize {
            if !(self.layout.topology().is_file() && self.layout.coordinates().is_file()) {
                self.build_structure().await?;
            }
            if self.params.reweighting() {
                self.repartition_hydrogens().await?;
            }
        }
        self.post_processor()
            .write_reimage_input()
            .await
            .map_err(PipelineError::PostProcess)?;

        let mut report = RunReport {
            stages: Vec::new(),
            final_snapshot: None,
        };
        for &kind in from.remaining() {
            if *cancel.borrow() {
                return Err(PipelineError::Cancelled {
                    stage: kind.to_string(),
                });
            }

            let mut stage = self.layout.stage(kind);
            let result = self.run_stage(&mut stage, cancel.clone()).await;
            info!(stage = %kind, status = %stage.status, "Stage finished");
            report.stages.push(stage);
            if let Some(snapshot) = result? {
                report.final_snapshot = Some(snapshot);
            }
        }
        Ok(report)
    }

    async fn run_stage(
        &self,
        stage: &mut Stage,
        cancel: watch::Receiver<bool>,
    ) -> Result<Option<SnapshotReport>, PipelineError> {
        let kind = stage.kind;
        let name = kind.to_string();
        let started = Instant::now();

        fs::write(&stage.control_file, template::render_stage(&self.params, kind)?).await?;
        if stage.output.exists() {
            fs::remove_file(stage.output.path()).await?;
        }

        stage.start().map_err(|_| PipelineError::MissingCheckpoint {
            stage: name.clone(),
            path: stage.input.path().to_path_buf(),
        })?;
        info!(stage = %kind, input = %stage.input.path().display(), "Stage running");

        let spec = self.engine_spec(stage);
        let mut snapshot = None;
        let outcome: Result<(), String> = if kind.is_long() {
            let plan = StepPlan::production(&self.params)?;
            match self.runner.spawn(&spec) {
                Ok(child) => {
                    let processor = self.post_processor();
                    let settings = MonitorSettings::from_config(&self.config, plan.write_frequency);
                    let monitor = ProductionMonitor::new(settings, &processor);
                    let result = monitor
                        .supervise(child, self.layout.status_file(kind), cancel)
                        .await;
                    info!(
                        stage = %kind,
                        ticks = result.ticks,
                        snapshots = result.snapshots_taken,
                        failed_snapshots = result.snapshots_failed,
                        frames = ?result.snapshot_frames,
                        "Production monitor finished"
                    );

                    match (result.exit, result.final_snapshot) {
                        (ProductionExit::Cancelled, final_snapshot) => {
                            if let Err(e) = final_snapshot {
                                error!("Final dump after cancellation failed: {}", e);
                            }
                            stage.fail("cancelled", started.elapsed());
                            return Err(PipelineError::Cancelled { stage: name });
                        }
                        (exit, final_snapshot) if !exit.success() => {
                            if let Err(e) = final_snapshot {
                                error!("Final dump after failed production also failed: {}", e);
                            }
                            Err(exit.to_string())
                        }
                        (_, Err(e)) => {
                            stage.fail(e.to_string(), started.elapsed());
                            return Err(PipelineError::PostProcess(e));
                        }
                        (_, Ok(report)) => {
                            snapshot = Some(report);
                            Ok(())
                        }
                    }
                }
                Err(e) => Err(e.to_string()),
            }
        } else {
            match self.runner.run(&spec).await {
                Ok(status) if status.success() => Ok(()),
                Ok(status) => Err(status.to_string()),
                Err(e) => Err(e.to_string()),
            }
        };

        let outcome = outcome.and_then(|()| {
            if stage.output.exists() {
                Ok(())
            } else {
                Err(format!(
                    "output checkpoint {} was not written",
                    stage.output.path().display()
                ))
            }
        });

        match outcome {
            Ok(()) => {
                stage.succeed(started.elapsed());
                Ok(snapshot)
            }
            Err(reason) => {
                error!(stage = %kind, "Stage failed: {}", reason);
                stage.fail(reason.clone(), started.elapsed());
                Err(PipelineError::StageFailed { stage: name, reason })
            }
        }
    }
}

fn setup_failed(step: &str, err: impl std::fmt::Display) -> PipelineError {
    PipelineError::SetupFailed {
        step: step.to_string(),
        reason: err.to_string(),
    }
}

/// Count of stages per status, for summaries.
pub fn status_counts(stages: &[Stage]) -> [(StageStatus, usize); 4] {
    let count = |status| stages.iter().filter(|s| s.status == status).count();
    [
        (StageStatus::Pending, count(StageStatus::Pending)),
        (StageStatus::Running, count(StageStatus::Running)),
        (StageStatus::Succeeded, count(StageStatus::Succeeded)),
        (StageStatus::Failed, count(StageStatus::Failed)),
    ]
}
