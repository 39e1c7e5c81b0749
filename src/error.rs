//! Error types for md-forge operations.
//!
//! Defines error types for the major subsystems:
//! - Parameter record validation and persistence
//! - Control deck rendering
//! - External process execution
//! - Trajectory post-processing
//! - Stage orchestration

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while validating, loading, or persisting a parameter record.
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Unsupported option '{0}'")]
    Unsupported(String),

    #[error("Parameter record already exists at {0} (a changed record must be written with force)")]
    AlreadyExists(PathBuf),

    #[error("Parameter record not found at {0}")]
    NotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors raised while deriving or rendering control text.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Invalid parameter for rendering: {0}")]
    InvalidParameter(#[from] ParameterError),

    #[error("Derived field '{field}' must be positive, got {value}")]
    NonPositive { field: &'static str, value: i64 },

    #[error("Value {value} of '{field}' cannot be written exactly in the control file")]
    Unrepresentable { field: &'static str, value: f64 },

    #[error("Path cannot be quoted in a tool script: {0}")]
    UnquotablePath(std::path::PathBuf),

    #[error("Rendered text still contains placeholder near '{0}'")]
    Unresolved(String),

    #[error("Tera template rendering error: {0}")]
    Tera(#[from] tera::Error),
}

/// Errors raised while launching or waiting on an external process.
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to wait on '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}")]
    NonZeroExit { program: String, status: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by reimaging and frame extraction.
#[derive(Debug, Error)]
pub enum PostProcessError {
    #[error("Raw trajectory not found: {0}")]
    MissingTrajectory(PathBuf),

    #[error("Reimaging failed: {0}")]
    Reimage(#[source] ProcessError),

    #[error("Frame extraction into '{dir}' failed: {source}")]
    Extract {
        dir: String,
        #[source]
        source: ProcessError,
    },

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that stop the stage chain.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::pipeline::config::ConfigError),

    #[error("Parameter error: {0}")]
    Parameters(#[from] ParameterError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Setup step '{step}' failed: {reason}")]
    SetupFailed { step: String, reason: String },

    #[error("Stage '{stage}' failed: {reason}")]
    StageFailed { stage: String, reason: String },

    #[error("Stage '{stage}' cannot start: input checkpoint {path} does not exist")]
    MissingCheckpoint { stage: String, path: PathBuf },

    #[error("Stage '{stage}' cancelled")]
    Cancelled { stage: String },

    #[error("Final post-processing failed: {0}")]
    PostProcess(#[from] PostProcessError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_failure_names_stage() {
        let err = PipelineError::StageFailed {
            stage: "02_Heat".to_string(),
            reason: "exit status 1".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("02_Heat"));
        assert!(message.contains("exit status 1"));
    }

    #[test]
    fn test_missing_checkpoint_display() {
        let err = PipelineError::MissingCheckpoint {
            stage: "03_Prod".to_string(),
            path: PathBuf::from("/tmp/run/025_PreProd.rst"),
        };
        assert!(err.to_string().contains("025_PreProd.rst"));
    }

    #[test]
    fn test_parameter_error_converts_into_template_error() {
        let err: TemplateError = ParameterError::InvalidValue {
            field: "numFrames".to_string(),
            reason: "must be positive".to_string(),
        }
        .into();
        assert!(err.to_string().contains("numFrames"));
    }
}
