//! Batch pipeline over an assignment's projects
//!
//! Two phases with a full barrier between them: every build finishes
//! before any trial starts, so no trial races a neighbor's compiler for
//! cores. Within a phase, projects fan out across a worker pool and each
//! result lands in the slot matching its project index, which keeps
//! report order equal to discovery order regardless of completion order
//! and makes serial and parallel passes produce identical records.

use log::{debug, info};
use std::path::Path;

use crate::build::{self, BuildReport, ToolchainTag};
use crate::classifier::{Classifier, ClassifyError};
use crate::config::{Phase, RunSettings};
use crate::interrupt::InterruptFlag;
use crate::pool;
use crate::project::{self, Project, ProjectError};
use crate::report::ProjectRecord;
use crate::run;
use crate::toolchain::Toolchain;

/// Message carried by synthesized trials of a project whose build failed
pub const BUILD_ERROR_MESSAGE: &str = "Not run due to build error.";

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("classifier error: {0}")]
    Classifier(#[from] ClassifyError),

    #[error("project discovery error: {0}")]
    Discovery(#[from] ProjectError),
}

/// One pass over a staged assignment directory
pub struct Pipeline {
    settings: RunSettings,
    toolchain: Toolchain,
    interrupt: InterruptFlag,
}

impl Pipeline {
    pub fn new(settings: RunSettings, toolchain: Toolchain) -> Self {
        // The configured interpreter governs both phases, so it is folded
        // into the toolchain once here.
        let toolchain = toolchain.with_interpreter(settings.interpreter.clone());
        Self {
            settings,
            toolchain,
            interrupt: InterruptFlag::new(),
        }
    }

    /// Share an interrupt flag so a signal handler can cut the pass short.
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn interrupted(&self) -> bool {
        self.interrupt.is_raised()
    }

    /// Discover, build, and run everything under the staged assignment
    /// directory. Records come back in discovery order, one per project,
    /// regardless of which phases ran or failed.
    pub fn execute(&self, assignment_dir: &Path) -> Result<Vec<ProjectRecord>, PipelineError> {
        let classifier = Classifier::new()?;
        let submissions = project::discover_submissions(assignment_dir, &classifier)?;
        let projects = project::collect_projects(&submissions, &self.settings)?;
        info!(
            "{}: {} submission(s), {} project(s)",
            assignment_dir.display(),
            submissions.len(),
            projects.len()
        );

        let builds = self.build_phase(&projects);
        Ok(self.run_phase(&projects, builds))
    }

    fn build_phase(&self, projects: &[Project]) -> Vec<BuildReport> {
        if self.settings.phase == Phase::RunOnly {
            return projects.iter().map(|_| BuildReport::skipped()).collect();
        }

        let total = projects.len();
        let workers = if self.settings.build_serial {
            1
        } else {
            self.settings.jobs
        };

        let slots = pool::map_indexed(total, workers, |index| {
            let project = &projects[index];
            if self.interrupt.is_raised() {
                info!(
                    "[{}/{}] {} build skipped (interrupted)",
                    index + 1,
                    total,
                    project.name
                );
                return BuildReport {
                    code: -1,
                    log: "Interrupted before build.".to_string(),
                    toolchain: ToolchainTag::None,
                };
            }
            debug!("building {} as {}", project.name, project.kind);
            let report = build::build_project(project, &self.toolchain);
            info!(
                "[{}/{}] {} ({}) build {}",
                index + 1,
                total,
                project.name,
                project.kind,
                if report.succeeded() { "ok" } else { "failed" }
            );
            report
        });

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| BuildReport {
                    code: -1,
                    log: format!("Build worker failed for '{}'.", projects[index].name),
                    toolchain: ToolchainTag::None,
                })
            })
            .collect()
    }

    fn run_phase(&self, projects: &[Project], builds: Vec<BuildReport>) -> Vec<ProjectRecord> {
        if self.settings.phase == Phase::BuildOnly {
            return projects
                .iter()
                .zip(builds)
                .map(|(project, build)| ProjectRecord::new(project, build, Vec::new()))
                .collect();
        }

        let total = projects.len();
        let workers = if self.settings.run_serial {
            1
        } else {
            self.settings.jobs
        };

        let slots = pool::map_indexed(total, workers, |index| {
            let project = &projects[index];
            if self.interrupt.is_raised() {
                info!(
                    "[{}/{}] {} run skipped (interrupted)",
                    index + 1,
                    total,
                    project.name
                );
                return run::error_trials(project, "Interrupted before run.");
            }
            if !builds[index].succeeded() {
                info!(
                    "[{}/{}] {} run skipped (build failed)",
                    index + 1,
                    total,
                    project.name
                );
                return run::error_trials(project, BUILD_ERROR_MESSAGE);
            }
            let trials = run::run_trials(project, &self.settings, &self.toolchain);
            info!(
                "[{}/{}] {} ran {} trial(s)",
                index + 1,
                total,
                project.name,
                trials.len()
            );
            trials
        });

        projects
            .iter()
            .zip(builds)
            .zip(slots)
            .map(|((project, build), slot)| {
                let trials =
                    slot.unwrap_or_else(|| run::error_trials(project, "Run worker failed."));
                ProjectRecord::new(project, build, trials)
            })
            .collect()
    }
}
