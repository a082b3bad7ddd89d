//! submill CLI
//!
//! Entry point for the `submill` command-line tool.

use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use submill::config::{ConfigLayer, Phase, RunSettings};
use submill::interrupt::{InterruptFlag, EXIT_CODE_INTERRUPTED};
use submill::pipeline::Pipeline;
use submill::report::AssignmentReport;
use submill::stage;
use submill::toolchain::Toolchain;

#[derive(Parser)]
#[command(name = "submill")]
#[command(about = "Batch build and run student submissions", version)]
struct Cli {
    /// Assignment directory holding one submission per entry
    assignment_dir: PathBuf,

    /// Per-trial timeout in seconds; 0 disables the timeout
    #[arg(long)]
    timeout: Option<f64>,

    /// Stdin for one trial; repeat for multiple trials
    #[arg(long = "input")]
    inputs: Vec<String>,

    /// Argument line for one trial; repeat for multiple trials
    #[arg(long = "arg")]
    args: Vec<String>,

    /// Glob pattern for files to omit from member listings; repeatable
    #[arg(long = "exclude")]
    excludes: Vec<String>,

    /// Interpreter command overriding the per-language default
    #[arg(long)]
    interpreter: Option<String>,

    /// Worker count for the parallel phases
    #[arg(long, short = 'j')]
    jobs: Option<usize>,

    /// Build one project at a time
    #[arg(long)]
    build_serial: bool,

    /// Run one project at a time
    #[arg(long)]
    run_serial: bool,

    /// Build every project but run nothing
    #[arg(long, conflicts_with = "run_only")]
    build_only: bool,

    /// Skip builds and rerun trials against an existing staged copy
    #[arg(long)]
    run_only: bool,

    /// Directory receiving the staged copy and the report
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Name the staged copy and report are filed under
    /// (default: the assignment directory name)
    #[arg(long)]
    alias: Option<String>,
}

impl Cli {
    fn phase(&self) -> Phase {
        if self.build_only {
            Phase::BuildOnly
        } else if self.run_only {
            Phase::RunOnly
        } else {
            Phase::Full
        }
    }

    fn as_layer(&self) -> ConfigLayer {
        ConfigLayer {
            timeout: self.timeout,
            inputs: non_empty(&self.inputs),
            args: non_empty(&self.args),
            exclude: non_empty(&self.excludes),
            inputs_for: None,
            interpreter: self.interpreter.clone(),
            jobs: self.jobs,
            build_serial: self.build_serial.then_some(true),
            run_serial: self.run_serial.then_some(true),
            output_dir: self.output_dir.clone(),
        }
    }
}

fn non_empty(values: &[String]) -> Option<Vec<String>> {
    if values.is_empty() {
        None
    } else {
        Some(values.to_vec())
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if !cli.assignment_dir.is_dir() {
        eprintln!(
            "Assignment directory not found: {}",
            cli.assignment_dir.display()
        );
        process::exit(1);
    }

    let settings = resolve_settings(&cli);
    let alias = cli
        .alias
        .clone()
        .unwrap_or_else(|| default_alias(&cli.assignment_dir));

    let staged = prepare_stage(&cli, &settings, &alias);

    let interrupt = InterruptFlag::new();
    if let Err(err) = interrupt.install() {
        eprintln!("Warning: interrupt handler unavailable: {}", err);
    }

    let toolchain = Toolchain::for_host().with_interpreter(settings.interpreter.clone());
    let tool_versions = toolchain.probe_versions();

    let pipeline = Pipeline::new(settings.clone(), toolchain).with_interrupt(interrupt);
    let records = match pipeline.execute(&staged) {
        Ok(records) => records,
        Err(err) => {
            eprintln!("Pass failed: {}", err);
            process::exit(1);
        }
    };
    let interrupted = pipeline.interrupted();

    let report =
        AssignmentReport::new(&alias, &staged, &settings, tool_versions, records, interrupted);
    let report_path = settings.output_dir.join(AssignmentReport::file_name(&alias));
    if let Err(err) = report.write_to_file(&report_path) {
        eprintln!("Cannot write report {}: {}", report_path.display(), err);
        process::exit(1);
    }

    print_summary(&report, &report_path);
    if interrupted {
        process::exit(EXIT_CODE_INTERRUPTED);
    }
}

fn resolve_settings(cli: &Cli) -> RunSettings {
    let mut layers = Vec::new();
    match ConfigLayer::from_dir(&cli.assignment_dir) {
        Ok(Some(layer)) => layers.push(layer),
        Ok(None) => {}
        Err(err) => {
            eprintln!("Configuration error: {}", err);
            process::exit(1);
        }
    }
    layers.push(cli.as_layer());

    match RunSettings::resolve(&layers) {
        Ok(settings) => settings.with_phase(cli.phase()),
        Err(err) => {
            eprintln!("Configuration error: {}", err);
            process::exit(1);
        }
    }
}

fn default_alias(assignment_dir: &Path) -> String {
    let canonical = fs::canonicalize(assignment_dir)
        .unwrap_or_else(|_| assignment_dir.to_path_buf());
    canonical
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "assignment".to_string())
}

fn prepare_stage(cli: &Cli, settings: &RunSettings, alias: &str) -> PathBuf {
    let staged = if cli.phase() == Phase::RunOnly {
        stage::reuse(&settings.output_dir, alias)
    } else {
        stage::stage(&cli.assignment_dir, &settings.output_dir, alias)
    };
    match staged {
        Ok(staged) => staged,
        Err(err) => {
            eprintln!("Staging failed: {}", err);
            process::exit(1);
        }
    }
}

fn print_summary(report: &AssignmentReport, report_path: &Path) {
    println!();
    println!(
        "Assignment '{}': {} project(s)",
        report.alias, report.project_count
    );
    println!("  Builds failed:    {}", report.builds_failed);
    println!("  Trials timed out: {}", report.trials_timed_out);
    println!("  Trials errored:   {}", report.trials_errored);
    if report.interrupted {
        println!("  Interrupted; remaining projects recorded as errors.");
    }
    println!("Report: {}", report_path.display());
}
