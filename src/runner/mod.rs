//! External process execution.
//!
//! Every external program the pipeline drives (structure builder, engine,
//! reimaging tool, frame dumper) goes through a [`ProcessSpec`] and the
//! [`ProcessRunner`].
//!
//! # Architecture
//!
//! ```text
//! ToolCommand (configured program + fixed args)
//!     → ProcessSpec (per-call args, working dir, env override, redirects)
//!     → ProcessRunner::run / spawn
//! ```
//!
//! Environment overrides are applied to the child only, so binding one stage
//! to a compute device never leaks into the parent or later siblings.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tracing::{debug, info};

use crate::error::ProcessError;

/// A configured external program and the arguments it always receives.
///
/// `ToolCommand::new("sh").with_args(["-c", "..."])` is as valid as a bare
/// engine binary, which is how wrappers and test doubles are plugged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Sets the leading arguments.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Starts a spec for running this tool inside `working_dir`.
    pub fn spec(&self, working_dir: impl Into<PathBuf>) -> ProcessSpec {
        ProcessSpec::new(&self.program, working_dir).args(self.args.iter().cloned())
    }
}

/// Everything needed to launch one external process.
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    program: PathBuf,
    args: Vec<String>,
    working_dir: PathBuf,
    env: BTreeMap<String, String>,
    stdin: Option<PathBuf>,
    stdout: Option<PathBuf>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            stdin: None,
            stdout: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Adds a path argument.
    pub fn path_arg(self, path: &Path) -> Self {
        self.arg(path.display().to_string())
    }

    /// Overrides an environment variable for the child only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Feeds the child's stdin from a file.
    pub fn stdin_from(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    /// Sends the child's stdout to a file (truncated).
    pub fn stdout_to(mut self, path: impl Into<PathBuf>) -> Self {
        self.stdout = Some(path.into());
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn program_name(&self) -> String {
        self.program
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    pub fn args_list(&self) -> &[String] {
        &self.args
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn env_overrides(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Human-readable command line for logs.
    pub fn display_command(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        if let Some(ref stdin) = self.stdin {
            line.push_str(&format!(" < {}", stdin.display()));
        }
        if let Some(ref stdout) = self.stdout {
            line.push_str(&format!(" > {}", stdout.display()));
        }
        line
    }

    fn command(&self) -> Result<Command, ProcessError> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd.current_dir(&self.working_dir);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        match self.stdin {
            Some(ref path) => cmd.stdin(Stdio::from(File::open(path)?)),
            None => cmd.stdin(Stdio::null()),
        };
        if let Some(ref path) = self.stdout {
            cmd.stdout(Stdio::from(File::create(path)?));
        }
        Ok(cmd)
    }
}

/// Launches external processes described by [`ProcessSpec`]s.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    /// Runs the process to completion and returns its exit status.
    ///
    /// The caller decides whether a non-zero status is fatal; see
    /// [`ProcessRunner::run_checked`].
    pub async fn run(&self, spec: &ProcessSpec) -> Result<ExitStatus, ProcessError> {
        let program = spec.program_name();
        info!(
            program = %program,
            cwd = %spec.working_dir.display(),
            "Starting external process"
        );
        debug!("Running command '{}'", spec.display_command());

        let start = Instant::now();
        let mut child = self.spawn(spec)?;
        let status = child.wait().await.map_err(|source| ProcessError::Wait {
            program: program.clone(),
            source,
        })?;

        debug!(
            program = %program,
            status = %status,
            elapsed_secs = start.elapsed().as_secs(),
            "External process exited"
        );
        Ok(status)
    }

    /// Runs the process and turns a non-zero exit into an error.
    pub async fn run_checked(&self, spec: &ProcessSpec) -> Result<(), ProcessError> {
        let status = self.run(spec).await?;
        if status.success() {
            Ok(())
        } else {
            Err(ProcessError::NonZeroExit {
                program: spec.program_name(),
                status: status.to_string(),
            })
        }
    }

    /// Starts the process without waiting for it.
    ///
    /// The child is killed if the handle is dropped, so a supervisor that
    /// unwinds never leaves an orphaned engine behind.
    pub fn spawn(&self, spec: &ProcessSpec) -> Result<Child, ProcessError> {
        let mut cmd = spec.command()?;
        cmd.kill_on_drop(true);
        cmd.spawn().map_err(|source| ProcessError::Spawn {
            program: spec.program.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sh(script: &str) -> ToolCommand {
        ToolCommand::new("sh").with_args(["-c", script])
    }

    #[test]
    fn test_spec_builder_and_display() {
        let spec = ToolCommand::new("/opt/amber/bin/pmemd.cuda")
            .spec("/runs/a")
            .args(["-O", "-i"])
            .path_arg(Path::new("01_Min.in"))
            .env("CUDA_VISIBLE_DEVICES", "1")
            .stdout_to("/runs/a/out.txt");

        assert_eq!(spec.program_name(), "pmemd.cuda");
        assert_eq!(spec.args_list(), &["-O", "-i", "01_Min.in"]);
        assert_eq!(
            spec.env_overrides().get("CUDA_VISIBLE_DEVICES"),
            Some(&"1".to_string())
        );
        assert_eq!(
            spec.display_command(),
            "/opt/amber/bin/pmemd.cuda -O -i 01_Min.in > /runs/a/out.txt"
        );
    }

    #[tokio::test]
    async fn test_run_returns_exit_status() {
        let temp = TempDir::new().unwrap();
        let runner = ProcessRunner::new();

        let ok = runner.run(&sh("exit 0").spec(temp.path())).await.unwrap();
        assert!(ok.success());

        let failed = runner.run(&sh("exit 3").spec(temp.path())).await.unwrap();
        assert_eq!(failed.code(), Some(3));
    }

    #[tokio::test]
    async fn test_run_checked_reports_non_zero_exit() {
        let temp = TempDir::new().unwrap();
        let result = ProcessRunner::new()
            .run_checked(&sh("exit 2").spec(temp.path()))
            .await;
        assert!(matches!(result, Err(ProcessError::NonZeroExit { .. })));
    }

    #[tokio::test]
    async fn test_env_override_is_scoped_to_child() {
        let temp = TempDir::new().unwrap();
        let spec = sh("printf '%s' \"$MDFORGE_TEST_DEVICE\" > device.txt")
            .spec(temp.path())
            .env("MDFORGE_TEST_DEVICE", "1");

        ProcessRunner::new().run_checked(&spec).await.unwrap();

        let written = fs::read_to_string(temp.path().join("device.txt")).unwrap();
        assert_eq!(written, "1");
        assert!(std::env::var("MDFORGE_TEST_DEVICE").is_err());
    }

    #[tokio::test]
    async fn test_stdin_and_stdout_redirects() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("in.txt"), "coordinates\n").unwrap();
        let spec = sh("cat")
            .spec(temp.path())
            .stdin_from(temp.path().join("in.txt"))
            .stdout_to(temp.path().join("out.txt"));

        ProcessRunner::new().run_checked(&spec).await.unwrap();
        assert_eq!(
            fs::read_to_string(temp.path().join("out.txt")).unwrap(),
            "coordinates\n"
        );
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let temp = TempDir::new().unwrap();
        let spec = ProcessSpec::new("/nonexistent/md-forge-tool", temp.path());
        let result = ProcessRunner::new().run(&spec).await;
        assert!(matches!(result, Err(ProcessError::Spawn { .. })));
    }
}
