//! Submission classification - assigns a project type to each delivery
//!
//! A submission is either a bare source file or a directory. Directories are
//! typed by marker files in the submission root, checked in a fixed priority
//! order (CMake descriptor first, then Visual C++ project files, then
//! Makefiles); a directory without any marker is a loose collection of
//! source files where every file is its own program.

use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Project layout detected for a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectType {
    /// A bare source file submitted on its own
    SingleSourceFile,
    /// A directory of loose source files, one program per file
    SourceFiles,
    /// A directory with a `CMakeLists.txt` in its root
    CmakeProject,
    /// A directory with a `*.vcxproj` / `*.vcproj` in its root
    VisualCppProject,
    /// A directory with a `Makefile` in its root
    MakeProject,
}

impl ProjectType {
    /// Stable name used in reports and log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::SingleSourceFile => "SINGLE_SOURCE_FILE",
            ProjectType::SourceFiles => "SOURCE_FILES",
            ProjectType::CmakeProject => "CMAKE_PROJECT",
            ProjectType::VisualCppProject => "VISUAL_CPP_PROJECT",
            ProjectType::MakeProject => "MAKE_PROJECT",
        }
    }

    /// True for types whose build phase invokes a toolchain subprocess
    pub fn is_descriptor_based(&self) -> bool {
        matches!(
            self,
            ProjectType::CmakeProject | ProjectType::VisualCppProject | ProjectType::MakeProject
        )
    }
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Marker patterns per directory type, highest priority first.
///
/// The order is significant: a submission carrying both a `CMakeLists.txt`
/// and a `Makefile` (a previously generated one, typically) must classify
/// as a CMake project.
const MARKERS: &[(ProjectType, &[&str])] = &[
    (ProjectType::CmakeProject, &["CMakeLists.txt"]),
    (ProjectType::VisualCppProject, &["*.vcxproj", "*.vcproj"]),
    (ProjectType::MakeProject, &["Makefile", "makefile"]),
];

/// Classifier construction errors
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("Invalid marker pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        source: globset::Error,
    },
}

/// Detects the project layout of a submission path
pub struct Classifier {
    rules: Vec<(ProjectType, GlobSet)>,
}

impl Classifier {
    /// Compile the marker patterns into match sets
    pub fn new() -> Result<Self, ClassifyError> {
        let mut rules = Vec::with_capacity(MARKERS.len());
        for (kind, patterns) in MARKERS {
            let mut builder = GlobSetBuilder::new();
            for pattern in *patterns {
                let glob = Glob::new(pattern).map_err(|e| ClassifyError::InvalidPattern {
                    pattern: (*pattern).to_string(),
                    source: e,
                })?;
                builder.add(glob);
            }
            let set = builder.build().map_err(|e| ClassifyError::InvalidPattern {
                pattern: patterns.join(", "),
                source: e,
            })?;
            rules.push((*kind, set));
        }
        Ok(Self { rules })
    }

    /// Classify one submission path.
    ///
    /// A plain file is always `SingleSourceFile`. A directory gets the first
    /// marker match in priority order, or `SourceFiles` when nothing
    /// matches. Never fails: an unreadable directory resolves to
    /// `SourceFiles` and surfaces its real problem later, during member
    /// listing or build.
    pub fn classify(&self, path: &Path) -> ProjectType {
        if path.is_file() {
            return ProjectType::SingleSourceFile;
        }

        let names = root_entry_names(path);
        for (kind, set) in &self.rules {
            if names.iter().any(|name| set.is_match(name)) {
                return *kind;
            }
        }
        ProjectType::SourceFiles
    }
}

/// Entry names directly inside `dir`; markers are never searched recursively.
fn root_entry_names(dir: &Path) -> Vec<String> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect(),
        Err(_) => Vec::new(),
    }
}
