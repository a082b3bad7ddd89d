//! Assignment report artifact
//!
//! One JSON document per pass covering every project in discovery order,
//! with the resolved settings and probed tool versions echoed so a grade
//! can be traced back to the exact configuration that produced it.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::build::BuildReport;
use crate::classifier::ProjectType;
use crate::config::RunSettings;
use crate::project::Project;
use crate::run::{ExitKind, TrialReport};
use crate::toolchain::ToolVersion;

/// Schema version for the report artifact
pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Schema identifier for the report artifact
pub const REPORT_SCHEMA_ID: &str = "submill/assignment_report@1";

/// Build and run outcomes for one project
#[derive(Debug, Clone, Serialize)]
pub struct ProjectRecord {
    /// Project name, unique within the assignment
    pub name: String,

    /// Title of the submission the project came from
    pub submission: String,

    pub kind: ProjectType,

    /// Member files relative to the submission root
    pub members: Vec<PathBuf>,

    pub build: BuildReport,

    /// One entry per trial, in trial order; empty for build-only passes
    pub trials: Vec<TrialReport>,
}

impl ProjectRecord {
    pub fn new(project: &Project, build: BuildReport, trials: Vec<TrialReport>) -> Self {
        Self {
            name: project.name.clone(),
            submission: project.submission.clone(),
            kind: project.kind,
            members: project.members.clone(),
            build,
            trials,
        }
    }

    pub fn build_failed(&self) -> bool {
        !self.build.succeeded()
    }

    pub fn trials_with(&self, kind: ExitKind) -> usize {
        self.trials
            .iter()
            .filter(|trial| trial.status == kind)
            .count()
    }
}

/// The report artifact for one pass over an assignment
#[derive(Debug, Clone, Serialize)]
pub struct AssignmentReport {
    /// Schema version
    pub schema_version: u32,

    /// Schema identifier
    pub schema_id: String,

    /// When the report was created
    pub created_at: DateTime<Utc>,

    /// Alias the staged copy and artifacts are filed under
    pub alias: String,

    /// Staged assignment directory the pass operated on
    pub assignment_dir: PathBuf,

    /// Whether an interrupt cut the pass short
    pub interrupted: bool,

    /// Versions of the tools the pass invoked
    pub tool_versions: Vec<ToolVersion>,

    /// Resolved settings the pass ran with
    pub settings: RunSettings,

    pub project_count: usize,
    pub builds_failed: usize,
    pub trials_timed_out: usize,
    pub trials_errored: usize,

    /// Per-project outcomes in discovery order
    pub records: Vec<ProjectRecord>,
}

impl AssignmentReport {
    pub fn new(
        alias: impl Into<String>,
        assignment_dir: impl Into<PathBuf>,
        settings: &RunSettings,
        tool_versions: Vec<ToolVersion>,
        records: Vec<ProjectRecord>,
        interrupted: bool,
    ) -> Self {
        let builds_failed = records.iter().filter(|record| record.build_failed()).count();
        let trials_timed_out = records
            .iter()
            .map(|record| record.trials_with(ExitKind::TimedOut))
            .sum();
        let trials_errored = records
            .iter()
            .map(|record| record.trials_with(ExitKind::RuntimeError))
            .sum();

        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            schema_id: REPORT_SCHEMA_ID.to_string(),
            created_at: Utc::now(),
            alias: alias.into(),
            assignment_dir: assignment_dir.into(),
            interrupted,
            tool_versions,
            settings: settings.clone(),
            project_count: records.len(),
            builds_failed,
            trials_timed_out,
            trials_errored,
            records,
        }
    }

    /// Report file name for an alias, placed in the output directory.
    pub fn file_name(alias: &str) -> String {
        format!("{}-report.json", alias)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Write to file
    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let json = self.to_json().map_err(|err| {
            io::Error::new(io::ErrorKind::InvalidData, format!("JSON error: {}", err))
        })?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::ToolchainTag;

    fn make_record(name: &str, code: i32, trials: Vec<TrialReport>) -> ProjectRecord {
        ProjectRecord {
            name: name.to_string(),
            submission: name.to_string(),
            kind: ProjectType::SingleSourceFile,
            members: vec![PathBuf::from(format!("{}.c", name))],
            build: BuildReport {
                code,
                log: String::new(),
                toolchain: ToolchainTag::CMake,
            },
            trials,
        }
    }

    fn make_trial(status: ExitKind) -> TrialReport {
        TrialReport {
            stdin: "1".to_string(),
            args: Vec::new(),
            status,
            stdout: "out".to_string(),
        }
    }

    #[test]
    fn test_report_counts_outcomes() {
        let records = vec![
            make_record(
                "student1",
                0,
                vec![make_trial(ExitKind::Success), make_trial(ExitKind::TimedOut)],
            ),
            make_record("student2", 2, vec![make_trial(ExitKind::RuntimeError)]),
        ];

        let report = AssignmentReport::new(
            "hw1",
            "out/hw1",
            &RunSettings::default(),
            Vec::new(),
            records,
            false,
        );

        assert_eq!(report.project_count, 2);
        assert_eq!(report.builds_failed, 1);
        assert_eq!(report.trials_timed_out, 1);
        assert_eq!(report.trials_errored, 1);
    }

    #[test]
    fn test_report_serializes_schema_header() {
        let report = AssignmentReport::new(
            "hw1",
            "out/hw1",
            &RunSettings::default(),
            Vec::new(),
            Vec::new(),
            false,
        );

        let json = report.to_json().unwrap();
        assert!(json.contains(r#""schema_version": 1"#));
        assert!(json.contains(r#""schema_id": "submill/assignment_report@1""#));
        assert!(json.contains(r#""alias": "hw1""#));
    }

    #[test]
    fn test_trial_status_uses_wire_names() {
        let record = make_record("student1", 0, vec![make_trial(ExitKind::TimedOut)]);
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(r#""status":"timed_out""#));
    }

    #[test]
    fn test_report_file_name_carries_alias() {
        assert_eq!(AssignmentReport::file_name("hw1"), "hw1-report.json");
    }

    #[test]
    fn test_write_to_file_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join(AssignmentReport::file_name("hw1"));

        let report = AssignmentReport::new(
            "hw1",
            "out/hw1",
            &RunSettings::default(),
            Vec::new(),
            vec![make_record("student1", 0, Vec::new())],
            false,
        );
        report.write_to_file(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["records"][0]["name"], "student1");
        assert_eq!(value["project_count"], 1);
    }
}
