//! File layout of a run directory.

use std::path::{Path, PathBuf};

use crate::params::PARAMS_FILE;

use super::stage::{Checkpoint, Stage, StageKind};

/// Reimaged production trajectory.
pub const REIMAGED_TRAJECTORY: &str = "03_Prod_reimage.mdcrd";

/// Paths of every file the pipeline reads or writes, relative to one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    root: PathBuf,
}

impl RunLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `path` relative to the run directory, for scripts of tools that run inside it.
    pub fn relative<'p>(&self, path: &'p Path) -> &'p Path {
        path.strip_prefix(&self.root).unwrap_or(path)
    }

    /// Any file directly under the run directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn params_file(&self) -> PathBuf {
        self.file(PARAMS_FILE)
    }

    pub fn topology(&self) -> PathBuf {
        self.file("prmtop")
    }

    pub fn coordinates(&self) -> PathBuf {
        self.file("inpcrd")
    }

    /// Pristine topology as built, before any mass repartitioning.
    pub fn topology_backup(&self) -> PathBuf {
        self.file("prmtop.backup")
    }

    pub fn coordinates_backup(&self) -> PathBuf {
        self.file("inpcrd.backup")
    }

    pub fn starting_structure(&self) -> PathBuf {
        self.file("startingConfiguration.pdb")
    }

    pub fn leap_input(&self) -> PathBuf {
        self.file("tleap.conf")
    }

    pub fn repartition_input(&self) -> PathBuf {
        self.file("parmed.foo")
    }

    pub fn reimage_input(&self) -> PathBuf {
        self.file("reimage.in")
    }

    pub fn control_file(&self, stage: StageKind) -> PathBuf {
        self.file(&format!("{}.in", stage.name()))
    }

    pub fn engine_log(&self, stage: StageKind) -> PathBuf {
        self.file(&format!("{}.out", stage.name()))
    }

    pub fn checkpoint(&self, stage: StageKind) -> Checkpoint {
        Checkpoint::new(self.file(&format!("{}.rst", stage.name())))
    }

    pub fn trajectory(&self, stage: StageKind) -> PathBuf {
        self.file(&format!("{}.mdcrd", stage.name()))
    }

    pub fn status_file(&self, stage: StageKind) -> PathBuf {
        self.file(&format!("{}.mdinfo", stage.name()))
    }

    pub fn raw_trajectory(&self) -> PathBuf {
        self.trajectory(StageKind::Production)
    }

    pub fn reimaged_trajectory(&self) -> PathBuf {
        self.file(REIMAGED_TRAJECTORY)
    }

    /// Checkpoint consumed by `stage`: the built coordinates for the first
    /// stage, the predecessor's restart file otherwise.
    pub fn input_checkpoint(&self, stage: StageKind) -> Checkpoint {
        match stage.previous() {
            Some(previous) => self.checkpoint(previous),
            None => Checkpoint::new(self.coordinates()),
        }
    }

    /// Pending stage with its files resolved.
    pub fn stage(&self, kind: StageKind) -> Stage {
        Stage::pending(
            kind,
            self.input_checkpoint(kind),
            self.checkpoint(kind),
            self.control_file(kind),
        )
    }
}
