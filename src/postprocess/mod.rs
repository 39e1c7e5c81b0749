//! Trajectory post-processing.
//!
//! A pass has two steps:
//!
//! 1. **Reimage** the raw production trajectory into `03_Prod_reimage.mdcrd`,
//!    centring the solute and wrapping solvent back into the box.
//! 2. **Extract** every frame of the reimaged trajectory as a PDB file, once
//!    for all atoms (`pdbs/`) and once for alpha carbons (`pdbsCA/`), and
//!    concatenate each set in frame order into `all.pdb` / `allCA.pdb`.
//!
//! Passes only read engine-owned files, so they may run while production is
//! still writing the raw trajectory.

pub mod frames;

pub use frames::{FrameSet, FrameSetReport, ALL_ATOMS, BACKBONE, FRAME_SETS};

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Serialize;
use tokio::fs;
use tracing::{debug, info};

use crate::error::PostProcessError;
use crate::monitor::Snapshotter;
use crate::pipeline::{RunLayout, Toolchain};
use crate::runner::{ProcessRunner, ToolCommand};
use crate::template::scripts;

/// Result of one full pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotReport {
    pub sets: Vec<FrameSetReport>,
}

impl SnapshotReport {
    /// Frames in the all-atom set.
    pub fn frames(&self) -> usize {
        self.sets.first().map(|s| s.frames).unwrap_or(0)
    }
}

/// Runs reimaging and frame extraction inside one run directory.
#[derive(Debug, Clone)]
pub struct PostProcessor {
    layout: RunLayout,
    cpptraj: ToolCommand,
    vmd: ToolCommand,
    last_residue: u32,
    runner: ProcessRunner,
}

impl PostProcessor {
    /// `last_residue` anchors the centring mask `:1-last_residue`.
    pub fn new(layout: RunLayout, toolchain: &Toolchain, last_residue: u32) -> Self {
        Self {
            layout,
            cpptraj: toolchain.cpptraj.clone(),
            vmd: toolchain.vmd.clone(),
            last_residue,
            runner: ProcessRunner::new(),
        }
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Topology for analysis: the pristine build if kept, the live one otherwise.
    fn analysis_topology(&self) -> PathBuf {
        let backup = self.layout.topology_backup();
        if backup.is_file() {
            backup
        } else {
            self.layout.topology()
        }
    }

    /// Writes the reimaging input without running anything.
    pub async fn write_reimage_input(&self) -> Result<PathBuf, PostProcessError> {
        let text = scripts::reimage_input(
            self.layout.relative(&self.layout.raw_trajectory()),
            self.layout.relative(&self.layout.reimaged_trajectory()),
            self.last_residue,
        )?;
        let path = self.layout.reimage_input();
        fs::write(&path, text).await?;
        Ok(path)
    }

    /// Reimages the raw trajectory into a fresh output file.
    ///
    /// The previous reimaged output is removed first; it is never used as input.
    pub async fn reimage(&self) -> Result<(), PostProcessError> {
        let raw = self.layout.raw_trajectory();
        if !raw.is_file() {
            return Err(PostProcessError::MissingTrajectory(raw));
        }

        let input = self.write_reimage_input().await?;
        let reimaged = self.layout.reimaged_trajectory();
        if reimaged.exists() {
            fs::remove_file(&reimaged).await?;
        }

        info!("Reimaging {}", raw.display());
        let spec = self
            .cpptraj
            .spec(self.layout.root())
            .arg("-p")
            .path_arg(&self.analysis_topology())
            .arg("-i")
            .path_arg(&input);
        self.runner
            .run_checked(&spec)
            .await
            .map_err(PostProcessError::Reimage)?;

        if !reimaged.is_file() {
            return Err(PostProcessError::MissingTrajectory(reimaged));
        }
        debug!("Reimaging finished");
        Ok(())
    }

    /// Dumps one frame set from the reimaged trajectory and rebuilds its aggregate.
    pub async fn extract(&self, set: &FrameSet) -> Result<FrameSetReport, PostProcessError> {
        let reimaged = self.layout.reimaged_trajectory();
        if !reimaged.is_file() {
            return Err(PostProcessError::MissingTrajectory(reimaged));
        }

        let out_dir = self.layout.file(set.dir_name);
        frames::reset_dir(&out_dir).await?;

        let topology = self.analysis_topology();
        let script = scripts::frame_dump_script(
            self.layout.relative(&topology),
            self.layout.relative(&reimaged),
            set.selection,
            self.layout.relative(&out_dir),
        )?;
        let script_path = self.layout.file(set.script_name);
        fs::write(&script_path, script).await?;

        let spec = self
            .vmd
            .spec(self.layout.root())
            .args(["-dispdev", "text", "-e"])
            .path_arg(&script_path);
        self.runner
            .run_checked(&spec)
            .await
            .map_err(|source| PostProcessError::Extract {
                dir: set.dir_name.to_string(),
                source,
            })?;

        let frame_files = frames::numbered_frames(&out_dir).await?;
        let aggregate = self.layout.file(set.aggregate_name);
        let digest = frames::concatenate(&frame_files, &aggregate).await?;

        info!(
            set = set.label,
            frames = frame_files.len(),
            digest = %digest,
            "Dumped frames to {}/",
            set.dir_name
        );
        Ok(FrameSetReport {
            label: set.label.to_string(),
            frames: frame_files.len(),
            aggregate,
            digest,
        })
    }

    /// Extracts every frame set from the current reimaged trajectory.
    pub async fn extract_all(&self) -> Result<SnapshotReport, PostProcessError> {
        let mut sets = Vec::with_capacity(FRAME_SETS.len());
        for set in &FRAME_SETS {
            sets.push(self.extract(set).await?);
        }
        Ok(SnapshotReport { sets })
    }

    /// One full pass: reimage, then extract every frame set.
    pub async fn run(&self) -> Result<SnapshotReport, PostProcessError> {
        self.reimage().await?;
        self.extract_all().await
    }
}

#[async_trait]
impl Snapshotter for PostProcessor {
    async fn snapshot(&self) -> Result<SnapshotReport, PostProcessError> {
        self.run().await
    }
}
