//! md-forge: staged AMBER molecular dynamics driver.
//!
//! This library sets up a solvated system, runs the minimisation, heating,
//! pre-production and production stages with checkpoint hand-off, monitors
//! production progress and dumps trajectory frames to PDB files.

// Core modules
pub mod cli;
pub mod error;
pub mod monitor;
pub mod params;
pub mod pipeline;
pub mod postprocess;
pub mod runner;
pub mod template;

// Re-export commonly used error types
pub use error::{ParameterError, PipelineError, PostProcessError, ProcessError, TemplateError};
