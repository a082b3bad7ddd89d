//! Submission discovery and project collection
//!
//! An assignment directory holds one entry per submission. Discovery turns
//! those entries into [`Submission`]s; collection expands each submission
//! into the [`Project`]s actually built and run, applies the exclude
//! patterns, and attaches the per-project run trials.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use walkdir::WalkDir;

use crate::classifier::{Classifier, ProjectType};
use crate::config::{RunSettings, CONFIG_FILE_NAME};

/// Name prefix of per-project build directories inside submission roots
pub const BUILD_DIR_PREFIX: &str = "submill-build-";

/// Generated CMake noise purged from member listings of CMake submissions
const CMAKE_NOISE: &[&str] = &[
    "Makefile",
    "CMakeCache.txt",
    "cmake_install.cmake",
    "CMakeFiles/*",
];

/// Discovery and collection errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("Failed to read assignment directory {}: {source}", dir.display())]
    ReadDir { dir: PathBuf, source: io::Error },

    #[error("Failed to scan submission {}: {source}", dir.display())]
    Scan { dir: PathBuf, source: walkdir::Error },

    #[error("Invalid exclude pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: globset::Error,
    },
}

/// One student's delivery, as found in the assignment directory
#[derive(Debug, Clone)]
pub struct Submission {
    /// Display name: the directory entry's name, extension included
    pub title: String,

    /// The entry itself, a file or a directory
    pub path: PathBuf,

    /// Detected layout
    pub kind: ProjectType,
}

/// One (stdin, argv) run configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trial {
    /// Text written to the program's stdin, newline-terminated by the runner
    pub stdin: String,

    /// Argument vector, already whitespace-split
    pub args: Vec<String>,
}

/// The unit of build and run
///
/// A submission normally yields one project; `SOURCE_FILES` submissions
/// yield one project per loose file.
#[derive(Debug, Clone)]
pub struct Project {
    /// File path sans extension for loose sources, submission title otherwise
    pub name: String,

    /// Layout of the owning submission
    pub kind: ProjectType,

    /// Title of the owning submission
    pub submission: String,

    /// Directory builds and runs happen under
    pub root: PathBuf,

    /// Primary source file relative to `root`, for loose-source projects
    pub source: Option<PathBuf>,

    /// Member files relative to `root`, excludes applied, sorted
    pub members: Vec<PathBuf>,

    /// Run configurations, in trial order
    pub trials: Vec<Trial>,
}

impl Project {
    /// Project name with path separators flattened, usable as a directory
    /// name component and as a build target name.
    pub fn artifact_name(&self) -> String {
        self.name.replace('/', "_")
    }

    /// The project's isolated build directory under its root.
    ///
    /// The name embeds the project name so concurrent builds of sibling
    /// projects never share a directory.
    pub fn build_dir(&self) -> PathBuf {
        self.root
            .join(format!("{}{}", BUILD_DIR_PREFIX, self.artifact_name()))
    }
}

/// Enumerate the submissions in an assignment directory.
///
/// Every entry is one submission except leftovers that are not student
/// work: `.zip` archives already expanded into sibling directories, build
/// directories from a previous pass, and the config file. Titles are
/// sorted so discovery order is stable across platforms. Failing to list
/// the directory is the one error that aborts the whole batch.
pub fn discover_submissions(
    assignment_dir: &Path,
    classifier: &Classifier,
) -> Result<Vec<Submission>, ProjectError> {
    let read_dir_err = |source| ProjectError::ReadDir {
        dir: assignment_dir.to_path_buf(),
        source,
    };

    let mut submissions = Vec::new();
    for entry in fs::read_dir(assignment_dir).map_err(read_dir_err)? {
        let entry = entry.map_err(read_dir_err)?;
        let path = entry.path();
        let title = entry.file_name().to_string_lossy().into_owned();

        if title.starts_with(BUILD_DIR_PREFIX) || title == CONFIG_FILE_NAME {
            continue;
        }
        if !path.is_dir() && has_zip_extension(&path) {
            continue;
        }

        let kind = classifier.classify(&path);
        submissions.push(Submission { title, path, kind });
    }

    submissions.sort_by(|a, b| a.title.cmp(&b.title));
    Ok(submissions)
}

/// Expand submissions into projects with members and trials attached.
///
/// `SOURCE_FILES` submissions produce one project per non-excluded file;
/// descriptor-based submissions produce a single project named after the
/// submission. A bare-file submission is rooted at the assignment
/// directory itself so its build directory lands next to the file.
pub fn collect_projects(
    submissions: &[Submission],
    settings: &RunSettings,
) -> Result<Vec<Project>, ProjectError> {
    let filter = MemberFilter::new(&settings.exclude)?;
    let mut projects = Vec::new();

    for submission in submissions {
        match submission.kind {
            ProjectType::SingleSourceFile => {
                let file = PathBuf::from(&submission.title);
                let name = relative_stem(&file);
                let root = match submission.path.parent() {
                    Some(parent) => parent.to_path_buf(),
                    None => PathBuf::from("."),
                };
                projects.push(Project {
                    trials: expand_trials(&name, settings),
                    name,
                    kind: submission.kind,
                    submission: submission.title.clone(),
                    root,
                    source: Some(file.clone()),
                    members: vec![file],
                });
            }
            ProjectType::SourceFiles => {
                for file in member_files(&submission.path, submission.kind, &filter)? {
                    let name = relative_stem(&file);
                    projects.push(Project {
                        trials: expand_trials(&name, settings),
                        name,
                        kind: submission.kind,
                        submission: submission.title.clone(),
                        root: submission.path.clone(),
                        source: Some(file.clone()),
                        members: vec![file],
                    });
                }
            }
            ProjectType::CmakeProject | ProjectType::MakeProject | ProjectType::VisualCppProject => {
                let members = member_files(&submission.path, submission.kind, &filter)?;
                projects.push(Project {
                    name: submission.title.clone(),
                    kind: submission.kind,
                    submission: submission.title.clone(),
                    root: submission.path.clone(),
                    source: None,
                    members,
                    trials: expand_trials(&submission.title, settings),
                });
            }
        }
    }

    Ok(projects)
}

/// Pair the stdin and argv lists positionally; the shorter list's last
/// element repeats to align with the longer.
fn expand_trials(project_name: &str, settings: &RunSettings) -> Vec<Trial> {
    let mut inputs = settings.inputs_for_project(project_name);
    if inputs.is_empty() {
        inputs.push(String::new());
    }
    let fallback = [String::new()];
    let args: &[String] = if settings.cmd_args.is_empty() {
        &fallback
    } else {
        &settings.cmd_args
    };

    let count = inputs.len().max(args.len());
    let mut trials = Vec::with_capacity(count);
    for i in 0..count {
        let stdin = inputs[i.min(inputs.len() - 1)].clone();
        let arg_line = &args[i.min(args.len() - 1)];
        trials.push(Trial {
            stdin,
            args: arg_line.split_whitespace().map(str::to_string).collect(),
        });
    }
    trials
}

/// Member-file exclusion: user patterns for every kind, plus generated
/// CMake noise for CMake submissions
#[derive(Debug)]
struct MemberFilter {
    user: GlobSet,
    cmake_noise: GlobSet,
}

impl MemberFilter {
    fn new(user_patterns: &[String]) -> Result<Self, ProjectError> {
        Ok(Self {
            user: build_glob_set(user_patterns.iter().map(String::as_str))?,
            cmake_noise: build_glob_set(CMAKE_NOISE.iter().copied())?,
        })
    }

    fn is_excluded(&self, kind: ProjectType, relative: &Path) -> bool {
        if self.user.is_match(relative) {
            return true;
        }
        kind == ProjectType::CmakeProject && self.cmake_noise.is_match(relative)
    }
}

fn build_glob_set<'a>(patterns: impl Iterator<Item = &'a str>) -> Result<GlobSet, ProjectError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| ProjectError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| ProjectError::InvalidPattern {
        pattern: String::new(),
        source,
    })
}

/// Walk a submission for member files, relative to its root, skipping
/// build directories and excluded paths.
fn member_files(
    root: &Path,
    kind: ProjectType,
    filter: &MemberFilter,
) -> Result<Vec<PathBuf>, ProjectError> {
    let mut members = Vec::new();
    let walker = WalkDir::new(root)
        .into_iter()
        .filter_entry(|entry| !is_build_dir_entry(entry));

    for entry in walker {
        let entry = entry.map_err(|source| ProjectError::Scan {
            dir: root.to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => continue,
        };
        if filter.is_excluded(kind, &relative) {
            continue;
        }
        members.push(relative);
    }

    members.sort();
    Ok(members)
}

fn is_build_dir_entry(entry: &walkdir::DirEntry) -> bool {
    entry.file_type().is_dir()
        && entry
            .file_name()
            .to_string_lossy()
            .starts_with(BUILD_DIR_PREFIX)
}

pub(crate) fn has_zip_extension(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Relative path with the extension stripped, separators normalized to `/`.
/// `sub/prob1.c` becomes `sub/prob1` so same-named files in different
/// subdirectories stay distinct projects.
fn relative_stem(relative: &Path) -> String {
    let stem = relative.with_extension("");
    stem.components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
