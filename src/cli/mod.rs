//! Command-line interface for mdforge.
//!
//! Provides commands for run setup, the stage chain, deck inspection,
//! frame dumps and progress checks.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli, Commands};
