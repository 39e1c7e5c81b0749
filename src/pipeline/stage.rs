//! Stage model: the four engine stages, their status machine and the
//! checkpoints that link them.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One engine stage of the chain, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StageKind {
    Minimize,
    Heat,
    PreProduction,
    Production,
}

impl StageKind {
    /// Every stage in chain order.
    pub const ALL: [StageKind; 4] = [
        StageKind::Minimize,
        StageKind::Heat,
        StageKind::PreProduction,
        StageKind::Production,
    ];

    /// File stem shared by the stage's control file, log, checkpoint and trajectory.
    pub fn name(&self) -> &'static str {
        match self {
            StageKind::Minimize => "01_Min",
            StageKind::Heat => "02_Heat",
            StageKind::PreProduction => "025_PreProd",
            StageKind::Production => "03_Prod",
        }
    }

    /// Position in the chain, starting at 0.
    pub fn index(&self) -> usize {
        match self {
            StageKind::Minimize => 0,
            StageKind::Heat => 1,
            StageKind::PreProduction => 2,
            StageKind::Production => 3,
        }
    }

    /// The stage whose checkpoint this one consumes.
    pub fn previous(&self) -> Option<StageKind> {
        self.index().checked_sub(1).map(|i| Self::ALL[i])
    }

    /// Minimisation writes no trajectory.
    pub fn writes_trajectory(&self) -> bool {
        !matches!(self, StageKind::Minimize)
    }

    /// Only production runs long enough to need supervision.
    pub fn is_long(&self) -> bool {
        matches!(self, StageKind::Production)
    }

    /// Stages from `self` to the end of the chain.
    pub fn remaining(&self) -> &'static [StageKind] {
        &Self::ALL[self.index()..]
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "01_min" | "min" | "minimize" | "minimise" => Ok(StageKind::Minimize),
            "02_heat" | "heat" => Ok(StageKind::Heat),
            "025_preprod" | "preprod" | "pre-production" | "preproduction" => {
                Ok(StageKind::PreProduction)
            }
            "03_prod" | "prod" | "production" => Ok(StageKind::Production),
            other => Err(format!(
                "unknown stage '{}' (expected one of 01_Min, 02_Heat, 025_PreProd, 03_Prod)",
                other
            )),
        }
    }
}

/// Lifecycle of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    /// Not started yet.
    Pending,
    /// Engine process is running.
    Running,
    /// Exited with status zero and wrote its checkpoint.
    Succeeded,
    /// Anything else. Terminal.
    Failed,
}

impl StageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StageStatus::Succeeded | StageStatus::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageStatus::Pending => write!(f, "pending"),
            StageStatus::Running => write!(f, "running"),
            StageStatus::Succeeded => write!(f, "succeeded"),
            StageStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Durable restart file written by the engine at the end of a stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    path: PathBuf,
}

impl Checkpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the file is on disk and non-empty.
    pub fn exists(&self) -> bool {
        std::fs::metadata(&self.path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false)
    }
}

/// One stage of a run together with its resolved files and status.
#[derive(Debug, Clone)]
pub struct Stage {
    pub kind: StageKind,
    pub input: Checkpoint,
    pub output: Checkpoint,
    pub control_file: PathBuf,
    pub status: StageStatus,
    pub duration: Duration,
    pub error: Option<String>,
}

impl Stage {
    /// Creates a pending stage.
    pub fn pending(
        kind: StageKind,
        input: Checkpoint,
        output: Checkpoint,
        control_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind,
            input,
            output,
            control_file: control_file.into(),
            status: StageStatus::Pending,
            duration: Duration::ZERO,
            error: None,
        }
    }

    /// Moves `pending → running`. Refuses if the input checkpoint is missing.
    pub fn start(&mut self) -> Result<(), String> {
        if self.status != StageStatus::Pending {
            return Err(format!(
                "stage {} cannot start from status {}",
                self.kind, self.status
            ));
        }
        if !self.input.exists() {
            return Err(format!(
                "input checkpoint {} does not exist",
                self.input.path().display()
            ));
        }
        self.status = StageStatus::Running;
        Ok(())
    }

    /// Moves `running → succeeded`.
    pub fn succeed(&mut self, duration: Duration) {
        debug_assert_eq!(self.status, StageStatus::Running);
        self.status = StageStatus::Succeeded;
        self.duration = duration;
    }

    /// Marks the stage failed. Failed is terminal.
    pub fn fail(&mut self, error: impl Into<String>, duration: Duration) {
        self.status = StageStatus::Failed;
        self.error = Some(error.into());
        self.duration = duration;
    }
}
