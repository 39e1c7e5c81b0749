//! CLI command definitions for mdforge.
//!
//! One subcommand per operator action: set up a run directory, run the
//! stage chain, inspect a control deck, dump frames, and check progress.

use crate::monitor::read_sample;
use crate::params::{ParameterSet, ParameterStore};
use crate::pipeline::{
    status_counts, PipelineConfig, PipelineOrchestrator, RunLayout, StageKind,
};
use crate::template::{render_stage, StepPlan};
use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::watch;
use tracing::{info, warn};

/// Default run directory.
const DEFAULT_RUN_DIR: &str = ".";

/// Staged AMBER molecular dynamics driver.
#[derive(Parser)]
#[command(name = "mdforge")]
#[command(about = "Run staged AMBER molecular dynamics with progress monitoring and frame dumps")]
#[command(version)]
#[command(
    long_about = "mdforge sets up a solvated system, runs minimisation, heating, pre-production and production with checkpoint hand-off, monitors production progress and dumps trajectory frames to PDB files.\n\nExample usage:\n  mdforge setup --pdb protein.pdb --residues 56 --nanoseconds 10 --frames 400\n  mdforge run"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Build the solvated system, write control files and persist the parameter record.
    Setup(SetupArgs),

    /// Run the stage chain, supervising production until it finishes.
    Run(RunArgs),

    /// Print the control deck of one stage.
    Render(RenderArgs),

    /// Reimage the production trajectory and dump frames once.
    Dump(DumpArgs),

    /// Show the latest production progress.
    Status(StatusArgs),
}

/// Arguments for `mdforge setup`.
#[derive(Parser, Debug)]
pub struct SetupArgs {
    /// Input structure (hydrogens removed).
    #[arg(long)]
    pub pdb: PathBuf,

    /// Number of solute residues; the reimaging centre mask is `:1-N`.
    #[arg(long)]
    pub residues: u32,

    /// Simulation temperature in Kelvin.
    #[arg(short, long, default_value = "360.0")]
    pub temperature: f64,

    /// Integration time step in femtoseconds.
    #[arg(long, default_value = "2.5")]
    pub timestep: f64,

    /// Production length in nanoseconds.
    #[arg(short, long, default_value = "10.0")]
    pub nanoseconds: f64,

    /// Total production frames to write.
    #[arg(short, long, default_value = "400")]
    pub frames: u32,

    /// Compute device identifier (e.g. 0 or 1).
    #[arg(long, default_value = "0")]
    pub device: String,

    /// Repartition hydrogen masses before the first stage.
    #[arg(long)]
    pub reweighting: bool,

    /// Solvent box padding in angstroms.
    #[arg(long, default_value = "15.0")]
    pub box_size: f64,

    /// Remove the C-terminal OXT charge (not supported; rejected).
    #[arg(long)]
    pub remove_oxt: bool,

    /// Overwrite an existing parameter record.
    #[arg(long)]
    pub force: bool,

    /// Run directory.
    #[arg(short = 'd', long, env = "MDFORGE_RUN_DIR", default_value = DEFAULT_RUN_DIR)]
    pub dir: PathBuf,
}

/// Arguments for `mdforge run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Stage to start from; its input checkpoint must already exist.
    #[arg(long, default_value = "01_Min")]
    pub from: StageKind,

    /// Run directory.
    #[arg(short = 'd', long, env = "MDFORGE_RUN_DIR", default_value = DEFAULT_RUN_DIR)]
    pub dir: PathBuf,
}

/// Arguments for `mdforge render`.
#[derive(Parser, Debug)]
pub struct RenderArgs {
    /// Stage to render (01_Min, 02_Heat, 025_PreProd, 03_Prod).
    pub stage: StageKind,

    /// Run directory.
    #[arg(short = 'd', long, env = "MDFORGE_RUN_DIR", default_value = DEFAULT_RUN_DIR)]
    pub dir: PathBuf,
}

/// Arguments for `mdforge dump`.
#[derive(Parser, Debug)]
pub struct DumpArgs {
    /// Print the report as JSON.
    #[arg(short, long)]
    pub json: bool,

    /// Run directory.
    #[arg(short = 'd', long, env = "MDFORGE_RUN_DIR", default_value = DEFAULT_RUN_DIR)]
    pub dir: PathBuf,
}

/// Arguments for `mdforge status`.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Stage whose status file to read.
    #[arg(long, default_value = "03_Prod")]
    pub stage: StageKind,

    /// Print the sample as JSON.
    #[arg(short, long)]
    pub json: bool,

    /// Run directory.
    #[arg(short = 'd', long, env = "MDFORGE_RUN_DIR", default_value = DEFAULT_RUN_DIR)]
    pub dir: PathBuf,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Setup(args) => {
            run_setup_command(args).await?;
        }
        Commands::Run(args) => {
            run_run_command(args).await?;
        }
        Commands::Render(args) => {
            run_render_command(args)?;
        }
        Commands::Dump(args) => {
            run_dump_command(args).await?;
        }
        Commands::Status(args) => {
            run_status_command(args).await?;
        }
    }
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

fn params_from_args(args: &SetupArgs, pdb: PathBuf) -> ParameterSet {
    ParameterSet::new(pdb, args.residues)
        .with_temperature(args.temperature)
        .with_timestep(args.timestep)
        .with_nanoseconds(args.nanoseconds)
        .with_num_frames(args.frames)
        .with_device(args.device.trim())
        .with_reweighting(args.reweighting)
        .with_box_size(args.box_size)
        .with_remove_oxt(args.remove_oxt)
}

fn load_orchestrator(dir: &Path) -> anyhow::Result<PipelineOrchestrator> {
    let store = ParameterStore::in_dir(dir);
    let params = store
        .load()
        .with_context(|| format!("Failed to load parameters from {}", store.path().display()))?;
    let config = PipelineConfig::from_env().context("Invalid environment configuration")?;
    Ok(PipelineOrchestrator::new(
        params,
        RunLayout::new(dir),
        config,
    )?)
}

async fn run_setup_command(args: SetupArgs) -> anyhow::Result<()> {
    std::fs::create_dir_all(&args.dir)
        .with_context(|| format!("Failed to create run directory {}", args.dir.display()))?;
    let dir = args.dir.canonicalize()?;
    let pdb = args
        .pdb
        .canonicalize()
        .with_context(|| format!("PDB file not found: {}", args.pdb.display()))?;

    let params = params_from_args(&args, pdb);
    params.validate()?;

    let store = ParameterStore::in_dir(&dir);
    if store.exists() && !args.force {
        anyhow::bail!(
            "A parameter record already exists at {}.\n\
             Use --force to replace it.",
            store.path().display()
        );
    }

    let config = PipelineConfig::from_env().context("Invalid environment configuration")?;
    let orchestrator = PipelineOrchestrator::new(params.clone(), RunLayout::new(&dir), config)?;
    orchestrator.prepare().await?;
    store.create(&params, args.force)?;

    let plan = StepPlan::production(&params)?;
    info!(
        steps = plan.total_steps,
        write_frequency = plan.write_frequency,
        "Setup complete"
    );
    println!("Setup complete in {}", dir.display());
    println!(
        "Production: {} steps, one frame every {} steps ({} frames)",
        plan.total_steps,
        plan.write_frequency,
        plan.frames_written()
    );
    println!("\nNow run:\n\n    mdforge run -d {}\n", dir.display());
    Ok(())
}

async fn run_run_command(args: RunArgs) -> anyhow::Result<()> {
    let orchestrator = load_orchestrator(&args.dir)?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the final dump");
            let _ = cancel_tx.send(true);
        }
    });

    info!(from = %args.from, dir = %args.dir.display(), "Starting stage chain");
    let report = orchestrator.run(args.from, cancel_rx).await?;

    for stage in &report.stages {
        println!(
            "{:<12} {:<10} {:>8.1}s",
            stage.kind.name(),
            stage.status.to_string(),
            stage.duration.as_secs_f64()
        );
    }
    let counts = status_counts(&report.stages);
    info!(?counts, "Stage chain finished");
    if let Some(snapshot) = report.final_snapshot {
        println!("Dumped {} frames", snapshot.frames());
    }
    Ok(())
}

fn run_render_command(args: RenderArgs) -> anyhow::Result<()> {
    let store = ParameterStore::in_dir(&args.dir);
    let params = store
        .load()
        .with_context(|| format!("Failed to load parameters from {}", store.path().display()))?;
    print!("{}", render_stage(&params, args.stage)?);
    Ok(())
}

async fn run_dump_command(args: DumpArgs) -> anyhow::Result<()> {
    let orchestrator = load_orchestrator(&args.dir)?;
    let report = orchestrator
        .post_processor()
        .run()
        .await
        .context("Frame dump failed")?;

    if args.json {
        let json_output = serde_json::to_string_pretty(&report)
            .map_err(|e| anyhow::anyhow!("Failed to serialize dump report: {}", e))?;
        println!("{}", json_output);
    } else {
        for set in &report.sets {
            println!(
                "{:<9} {:>6} frames  {}  sha256:{}",
                set.label,
                set.frames,
                set.aggregate.display(),
                set.digest
            );
        }
    }
    Ok(())
}

/// Output of `mdforge status --json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusOutput {
    stage: String,
    sample: Option<crate::monitor::ProgressSample>,
    frames_written: Option<u64>,
    frames_planned: Option<u64>,
}

async fn run_status_command(args: StatusArgs) -> anyhow::Result<()> {
    let layout = RunLayout::new(&args.dir);
    let sample = read_sample(&layout.status_file(args.stage)).await;

    let plan = ParameterStore::in_dir(&args.dir)
        .load()
        .ok()
        .and_then(|params| StepPlan::production(&params).ok())
        .filter(|_| args.stage == StageKind::Production);
    let output = StatusOutput {
        stage: args.stage.to_string(),
        frames_written: sample
            .as_ref()
            .zip(plan)
            .and_then(|(s, p)| s.frames_written(p.write_frequency)),
        frames_planned: plan.map(|p| p.frames_written()),
        sample,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    match output.sample {
        Some(ref sample) => println!("{}: {}", output.stage, sample),
        None => println!("{}: no progress reported yet", output.stage),
    }
    if let (Some(written), Some(planned)) = (output.frames_written, output.frames_planned) {
        println!("frames: {}/{}", written, planned);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parses() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_setup_command_defaults() {
        let cli =
            Cli::try_parse_from(["mdforge", "setup", "--pdb", "p.pdb", "--residues", "56"])
                .expect("should parse");

        match cli.command {
            Commands::Setup(args) => {
                assert_eq!(args.temperature, 360.0);
                assert_eq!(args.timestep, 2.5);
                assert_eq!(args.nanoseconds, 10.0);
                assert_eq!(args.frames, 400);
                assert_eq!(args.device, "0");
                assert_eq!(args.box_size, 15.0);
                assert!(!args.reweighting);
                assert!(!args.force);
                assert_eq!(args.dir, PathBuf::from("."));

                let params = params_from_args(&args, PathBuf::from("/abs/p.pdb"));
                assert_eq!(params.num_residues(), 56);
                assert!(params.validate().is_ok());
            }
            _ => panic!("Expected Setup command"),
        }
    }

    #[test]
    fn test_run_from_stage() {
        let cli = Cli::try_parse_from(["mdforge", "run", "--from", "prod", "-d", "/runs/a"])
            .expect("should parse");
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.from, StageKind::Production);
                assert_eq!(args.dir, PathBuf::from("/runs/a"));
            }
            _ => panic!("Expected Run command"),
        }

        let cli = Cli::try_parse_from(["mdforge", "run"]).expect("should parse");
        match cli.command {
            Commands::Run(args) => assert_eq!(args.from, StageKind::Minimize),
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_render_rejects_unknown_stage() {
        assert!(Cli::try_parse_from(["mdforge", "render", "equilibrate"]).is_err());
        let cli = Cli::try_parse_from(["mdforge", "render", "02_Heat"]).expect("should parse");
        assert!(matches!(
            cli.command,
            Commands::Render(RenderArgs { stage: StageKind::Heat, .. })
        ));
    }

    #[test]
    fn test_global_log_level() {
        let cli = Cli::try_parse_from(["mdforge", "status", "--log-level", "debug"])
            .expect("should parse");
        assert_eq!(cli.log_level, "debug");
    }

    #[test]
    fn test_render_reads_persisted_record() {
        let temp = tempfile::TempDir::new().unwrap();
        let params = ParameterSet::new("/abs/p.pdb", 20);
        ParameterStore::in_dir(temp.path()).create(&params, false).unwrap();

        let args = RenderArgs {
            stage: StageKind::Minimize,
            dir: temp.path().to_path_buf(),
        };
        assert!(run_render_command(args).is_ok());
    }
}
