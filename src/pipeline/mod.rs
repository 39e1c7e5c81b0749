//! Staged engine pipeline.
//!
//! # Architecture
//!
//! - **Stage**: the four engine stages and their `pending → running →
//!   succeeded | failed` lifecycle
//! - **Layout**: every file of a run directory, including the checkpoint chain
//! - **Config**: tool locations and monitor cadence
//! - **Orchestrator**: setup, the sequential chain, production supervision
//!
//! # Pipeline Flow
//!
//! 1. **Build**: the structure builder solvates the input PDB into `prmtop`/`inpcrd`
//! 2. **Repartition** (optional): hydrogen masses are repartitioned in place
//! 3. **Minimize → Heat → Pre-production**: each stage consumes its
//!    predecessor's `.rst` checkpoint
//! 4. **Production**: run under the production monitor, with periodic and
//!    final trajectory dumps
//!
//! # Example
//!
//! ```rust,ignore
//! use md_forge::params::ParameterStore;
//! use md_forge::pipeline::{PipelineConfig, PipelineOrchestrator, RunLayout, StageKind};
//!
//! let params = ParameterStore::in_dir(".").load()?;
//! let config = PipelineConfig::from_env()?;
//! let orchestrator = PipelineOrchestrator::new(params, RunLayout::new("."), config)?;
//!
//! let (_cancel, cancel_rx) = tokio::sync::watch::channel(false);
//! let report = orchestrator.run(StageKind::Minimize, cancel_rx).await?;
//! ```

pub mod config;
pub mod layout;
pub mod orchestrator;
pub mod stage;

pub use config::{ConfigError, PipelineConfig, Toolchain};
pub use layout::RunLayout;
pub use orchestrator::{status_counts, PipelineOrchestrator, RunReport};
pub use stage::{Checkpoint, Stage, StageKind, StageStatus};
