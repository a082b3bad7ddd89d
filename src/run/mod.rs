//! Run strategies per project type
//!
//! After the build phase each project resolves to a launch plan: the
//! program to execute plus any arguments that precede the trial's own.
//! Trials then run sequentially through the process supervisor with the
//! submission root as the working directory, so relative file I/O in
//! student code resolves against the student's own files.

pub mod process;

pub use process::{ExitKind, RunOutcome, RunRequest};

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::build;
use crate::classifier::ProjectType;
use crate::config::RunSettings;
use crate::project::Project;
use crate::toolchain::Toolchain;

/// Outcome of one trial, paired with the stdin and argument line that
/// produced it
#[derive(Debug, Clone, Serialize)]
pub struct TrialReport {
    pub stdin: String,
    pub args: Vec<String>,
    pub status: ExitKind,
    pub stdout: String,
}

/// A resolved invocation: the program plus arguments preceding the
/// trial's own
#[derive(Debug, Clone, PartialEq, Eq)]
struct LaunchPlan {
    program: PathBuf,
    base_args: Vec<String>,
}

/// Execute every trial of a built project, in order.
///
/// A project that cannot be launched at all (unsupported extension,
/// missing descriptor) still yields one report per trial so the grader
/// sees the same trial count for every student.
pub fn run_trials(
    project: &Project,
    settings: &RunSettings,
    toolchain: &Toolchain,
) -> Vec<TrialReport> {
    let plan = match resolve_launch(project, toolchain) {
        Ok(plan) => plan,
        Err(message) => return error_trials(project, &message),
    };

    let timeout = settings.run_timeout();
    project
        .trials
        .iter()
        .map(|trial| {
            let mut args = plan.base_args.clone();
            args.extend(trial.args.iter().cloned());
            let outcome = process::run(&RunRequest {
                program: plan.program.clone(),
                args,
                cwd: project.root.clone(),
                stdin: trial.stdin.clone(),
                timeout,
            });
            TrialReport {
                stdin: trial.stdin.clone(),
                args: trial.args.clone(),
                status: outcome.kind,
                stdout: outcome.stdout,
            }
        })
        .collect()
}

/// One runtime-error report per trial, carrying the same message. Used
/// for unlaunchable projects and for projects whose build failed.
pub fn error_trials(project: &Project, message: &str) -> Vec<TrialReport> {
    project
        .trials
        .iter()
        .map(|trial| TrialReport {
            stdin: trial.stdin.clone(),
            args: trial.args.clone(),
            status: ExitKind::RuntimeError,
            stdout: message.to_string(),
        })
        .collect()
}

fn resolve_launch(project: &Project, toolchain: &Toolchain) -> Result<LaunchPlan, String> {
    match project.kind {
        ProjectType::SingleSourceFile | ProjectType::SourceFiles => {
            resolve_loose_source(project, toolchain)
        }
        ProjectType::CmakeProject => {
            let target = declared_target(&project.root.join("CMakeLists.txt"))
                .unwrap_or_else(|| project.artifact_name());
            Ok(compiled(project, &target))
        }
        ProjectType::MakeProject => Ok(compiled(project, &project.artifact_name())),
        ProjectType::VisualCppProject => {
            let descriptor = build::vcxproj_in(&project.root)
                .ok_or_else(|| "Cannot find a .vcxproj or .vcproj file.".to_string())?;
            let stem = descriptor
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned())
                .unwrap_or_else(|| project.artifact_name());
            Ok(compiled(project, &format!("{}.exe", stem)))
        }
    }
}

/// Loose sources: compiled extensions resolve to the built artifact,
/// anything else runs through an interpreter.
fn resolve_loose_source(project: &Project, toolchain: &Toolchain) -> Result<LaunchPlan, String> {
    let source = match project.source.as_deref() {
        Some(source) => source,
        None => return Err("No source file recorded for this project.".to_string()),
    };
    let extension = source
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if build::COMPILED_EXTENSIONS.contains(&extension.as_str()) {
        return Ok(compiled(project, &project.artifact_name()));
    }

    match toolchain.interpreter_for(&extension) {
        Some(command) => Ok(LaunchPlan {
            program: PathBuf::from(command),
            base_args: vec![source.to_string_lossy().into_owned()],
        }),
        None => Err(format!("Running '{}' is not supported.", source.display())),
    }
}

fn compiled(project: &Project, artifact: &str) -> LaunchPlan {
    LaunchPlan {
        program: absolutize(project.build_dir().join(artifact)),
        base_args: Vec::new(),
    }
}

/// The executable target declared in a CMake descriptor. Submissions may
/// name the target anything, so the descriptor is scanned rather than
/// trusting the project name; when several targets are declared, the last
/// declaration names the program to run.
fn declared_target(descriptor: &Path) -> Option<String> {
    let code = fs::read_to_string(descriptor).ok()?;
    let mut tokens = code
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .filter(|token| !token.is_empty());
    let mut target = None;
    while let Some(token) = tokens.next() {
        if token.eq_ignore_ascii_case("add_executable") {
            if let Some(name) = tokens.next() {
                target = Some(name.to_string());
            }
        }
    }
    target
}

/// A relative program path would resolve against the child's working
/// directory, not ours.
fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}
