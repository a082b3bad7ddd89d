//! Build strategies per project type
//!
//! Each strategy turns one project into a [`BuildReport`]: success, a
//! toolchain failure carrying the exit code and captured output, or the
//! internal `-1` outcome for conditions the toolchain never saw
//! (unsupported file type, I/O failure, missing descriptor). Builds write
//! only into the project's isolated build directory; the submission root
//! is never modified except for purging stale CMake cache files a student
//! accidentally committed.

use log::debug;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;

use crate::classifier::ProjectType;
use crate::project::{Project, BUILD_DIR_PREFIX};
use crate::toolchain::{TemplateVars, Toolchain};

/// Extensions built through a synthesized CMake descriptor
pub(crate) const COMPILED_EXTENSIONS: &[&str] = &["c", "cpp", "cc", "cxx", "c++"];

/// Stale CMake outputs purged from a submission root before configuring
const STALE_CMAKE_FILES: &[&str] = &["CMakeCache.txt", "cmake_install.cmake", "Makefile"];

/// Which toolchain produced (or would have produced) the artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolchainTag {
    #[serde(rename = "cmake")]
    CMake,
    Make,
    VisualCpp,
    Interpreter,
    None,
}

/// Outcome of one project's build phase
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    /// 0 on success, -1 for internal/unsupported conditions, otherwise the
    /// toolchain's exit code
    pub code: i32,

    /// Combined stdout and stderr of the toolchain steps
    pub log: String,

    pub toolchain: ToolchainTag,
}

impl BuildReport {
    pub fn succeeded(&self) -> bool {
        self.code == 0
    }

    /// Placeholder for a skipped build phase (run-only passes).
    pub fn skipped() -> Self {
        Self {
            code: 0,
            log: String::new(),
            toolchain: ToolchainTag::None,
        }
    }
}

/// Build one project with the platform toolchain.
///
/// Builds have no time limit; a hung toolchain occupies its worker until
/// it exits. A nonzero toolchain exit is an ordinary build failure, not an
/// error: the report carries the exit code and the captured output so the
/// grader can tell a compile error from a tool the platform lacks.
pub fn build_project(project: &Project, toolchain: &Toolchain) -> BuildReport {
    match project.kind {
        ProjectType::SingleSourceFile | ProjectType::SourceFiles => {
            build_single_source(project, toolchain)
        }
        ProjectType::CmakeProject => build_cmake_submission(project, toolchain),
        ProjectType::MakeProject => build_make_submission(project, toolchain),
        ProjectType::VisualCppProject => build_vcxproj_submission(project, toolchain),
    }
}

/// Loose source files: dispatch on the extension. Compiled languages get a
/// synthesized one-target CMake descriptor materialized into the build
/// directory; interpreted languages have nothing to build.
fn build_single_source(project: &Project, toolchain: &Toolchain) -> BuildReport {
    let source = match project.source.as_deref() {
        Some(source) => source,
        None => {
            return internal(
                ToolchainTag::None,
                "No source file recorded for this project.".to_string(),
            )
        }
    };
    let extension = source
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    if !COMPILED_EXTENSIONS.contains(&extension.as_str()) {
        if toolchain.interpreter_for(&extension).is_some() {
            return BuildReport {
                code: 0,
                log: String::new(),
                toolchain: ToolchainTag::Interpreter,
            };
        }
        return internal(
            ToolchainTag::None,
            format!("Building '{}' is not supported.", source.display()),
        );
    }

    let template = match toolchain.cmake.as_ref() {
        Some(template) => template,
        None => return unsupported_platform(ToolchainTag::CMake, project.kind),
    };

    let build_dir = project.build_dir();
    if let Err(err) = fs::create_dir_all(&build_dir) {
        return internal(
            ToolchainTag::CMake,
            format!("Failed to create {}: {}", build_dir.display(), err),
        );
    }
    let target = project.artifact_name();
    let descriptor = synthesized_descriptor(&target, source);
    if let Err(err) = fs::write(build_dir.join("CMakeLists.txt"), descriptor) {
        return internal(
            ToolchainTag::CMake,
            format!("Failed to write build descriptor: {}", err),
        );
    }

    let steps = template.render(TemplateVars {
        src: "./",
        out: ".",
        project: &target,
    });
    run_steps(&steps, &build_dir, ToolchainTag::CMake)
}

/// The submission's own CMake descriptor, configured out-of-tree into the
/// build directory. Cache files from the student's machine are purged
/// first so they cannot poison the configure step.
fn build_cmake_submission(project: &Project, toolchain: &Toolchain) -> BuildReport {
    let template = match toolchain.cmake.as_ref() {
        Some(template) => template,
        None => return unsupported_platform(ToolchainTag::CMake, project.kind),
    };

    if let Err(err) = purge_stale_cmake_outputs(&project.root) {
        return internal(
            ToolchainTag::CMake,
            format!("Failed to remove stale CMake outputs: {}", err),
        );
    }
    let build_dir = project.build_dir();
    if let Err(err) = fs::create_dir_all(&build_dir) {
        return internal(
            ToolchainTag::CMake,
            format!("Failed to create {}: {}", build_dir.display(), err),
        );
    }

    let steps = template.render(TemplateVars {
        src: "../",
        out: ".",
        project: &project.artifact_name(),
    });
    run_steps(&steps, &build_dir, ToolchainTag::CMake)
}

/// Make offers no out-of-tree output, so the whole submission tree is
/// copied into the build directory and `make` runs there.
fn build_make_submission(project: &Project, toolchain: &Toolchain) -> BuildReport {
    let template = match toolchain.make.as_ref() {
        Some(template) => template,
        None => return unsupported_platform(ToolchainTag::Make, project.kind),
    };

    let build_dir = project.build_dir();
    let prepared = remove_stale_dir(&build_dir).and_then(|_| copy_tree(&project.root, &build_dir));
    if let Err(err) = prepared {
        return internal(
            ToolchainTag::Make,
            format!("Failed to populate {}: {}", build_dir.display(), err),
        );
    }

    let steps = template.render(TemplateVars {
        src: ".",
        out: ".",
        project: &project.artifact_name(),
    });
    run_steps(&steps, &build_dir, ToolchainTag::Make)
}

/// The platform project builder on the submission's sole `.vcxproj` or
/// `.vcproj`, with output and intermediate files redirected into the
/// build directory.
fn build_vcxproj_submission(project: &Project, toolchain: &Toolchain) -> BuildReport {
    let descriptor = match vcxproj_in(&project.root) {
        Some(descriptor) => descriptor,
        None => {
            return internal(
                ToolchainTag::VisualCpp,
                "Cannot find a .vcxproj or .vcproj file.".to_string(),
            )
        }
    };
    let template = match toolchain.msbuild.as_ref() {
        Some(template) => template,
        None => return unsupported_platform(ToolchainTag::VisualCpp, project.kind),
    };

    let out_dir = format!("{}{}/", BUILD_DIR_PREFIX, project.artifact_name());
    let steps = template.render(TemplateVars {
        src: &descriptor.to_string_lossy(),
        out: &out_dir,
        project: &project.artifact_name(),
    });
    run_steps(&steps, &project.root, ToolchainTag::VisualCpp)
}

/// The sole project descriptor file name in a Visual C++ submission root,
/// `.vcxproj` entries before `.vcproj`, sorted within each kind.
pub(crate) fn vcxproj_in(root: &Path) -> Option<PathBuf> {
    let mut vcxproj = Vec::new();
    let mut vcproj = Vec::new();
    let entries = fs::read_dir(root).ok()?;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        match path.extension() {
            Some(ext) if ext.eq_ignore_ascii_case("vcxproj") => {
                vcxproj.push(PathBuf::from(entry.file_name()))
            }
            Some(ext) if ext.eq_ignore_ascii_case("vcproj") => {
                vcproj.push(PathBuf::from(entry.file_name()))
            }
            _ => {}
        }
    }
    vcxproj.sort();
    vcproj.sort();
    vcxproj.into_iter().chain(vcproj).next()
}

/// Minimal descriptor declaring one executable target from one source
/// file. It lives in the build directory, so the source is referenced one
/// level up.
fn synthesized_descriptor(target: &str, source: &Path) -> String {
    let source = source.to_string_lossy().replace('\\', "/");
    format!(
        "cmake_minimum_required(VERSION 3.5)\nproject({})\nadd_executable({} \"../{}\")\n",
        target, target, source
    )
}

/// Remove CMake outputs a student committed from a previous local build.
fn purge_stale_cmake_outputs(root: &Path) -> io::Result<()> {
    for name in STALE_CMAKE_FILES {
        let path = root.join(name);
        if path.is_file() {
            fs::remove_file(&path)?;
        }
    }
    let cmake_files = root.join("CMakeFiles");
    if cmake_files.is_dir() {
        fs::remove_dir_all(&cmake_files)?;
    }
    Ok(())
}

fn remove_stale_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    Ok(())
}

/// Copy a submission tree, skipping build directories from earlier passes.
fn copy_tree(src: &Path, dst: &Path) -> io::Result<()> {
    fs::create_dir_all(dst)?;
    let walker = WalkDir::new(src).into_iter().filter_entry(|entry| {
        !(entry.file_type().is_dir()
            && entry
                .file_name()
                .to_string_lossy()
                .starts_with(BUILD_DIR_PREFIX))
    });
    for entry in walker {
        let entry = entry.map_err(io::Error::from)?;
        let relative = match entry.path().strip_prefix(src) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dst.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Execute rendered toolchain steps in order, concatenating their output.
/// The first nonzero exit stops the sequence and becomes the build's code.
fn run_steps(steps: &[Vec<String>], cwd: &Path, tag: ToolchainTag) -> BuildReport {
    let mut log = String::new();
    for argv in steps {
        let (program, args) = match argv.split_first() {
            Some(split) => split,
            None => continue,
        };
        debug!("build step in {}: {:?}", cwd.display(), argv);
        let output = match Command::new(program).args(args).current_dir(cwd).output() {
            Ok(output) => output,
            Err(err) => {
                log.push_str(&format!("Failed to start '{}': {}", program, err));
                return internal(tag, log);
            }
        };
        log.push_str(&String::from_utf8_lossy(&output.stdout));
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return BuildReport {
                code: output.status.code().unwrap_or(-1),
                log,
                toolchain: tag,
            };
        }
    }
    BuildReport {
        code: 0,
        log,
        toolchain: tag,
    }
}

fn internal(toolchain: ToolchainTag, log: String) -> BuildReport {
    BuildReport {
        code: -1,
        log,
        toolchain,
    }
}

fn unsupported_platform(tag: ToolchainTag, kind: ProjectType) -> BuildReport {
    internal(tag, format!("{} is not supported on this platform.", kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::toolchain::CommandTemplate;
    use tempfile::TempDir;

    fn loose_project(root: &Path, name: &str, file: &str) -> Project {
        Project {
            name: name.to_string(),
            kind: ProjectType::SingleSourceFile,
            submission: file.to_string(),
            root: root.to_path_buf(),
            source: Some(PathBuf::from(file)),
            members: vec![PathBuf::from(file)],
            trials: Vec::new(),
        }
    }

    fn dir_project(root: &Path, kind: ProjectType, name: &str) -> Project {
        Project {
            name: name.to_string(),
            kind,
            submission: name.to_string(),
            root: root.to_path_buf(),
            source: None,
            members: Vec::new(),
            trials: Vec::new(),
        }
    }

    #[cfg(unix)]
    fn sh_toolchain(script: &str) -> Toolchain {
        let step = || CommandTemplate::new(vec![vec!["/bin/sh", "-c", script]]);
        let mut toolchain = Toolchain::for_host();
        toolchain.cmake = Some(step());
        toolchain.make = Some(step());
        toolchain.msbuild = Some(step());
        toolchain
    }

    #[test]
    fn test_descriptor_declares_one_target() {
        let descriptor = synthesized_descriptor("student1", Path::new("student1.c"));
        assert_eq!(
            descriptor,
            "cmake_minimum_required(VERSION 3.5)\n\
             project(student1)\n\
             add_executable(student1 \"../student1.c\")\n"
        );
    }

    #[test]
    fn test_unsupported_extension_is_internal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();

        let project = loose_project(dir.path(), "notes", "notes.txt");
        let report = build_project(&project, &Toolchain::for_host());

        assert_eq!(report.code, -1);
        assert_eq!(report.toolchain, ToolchainTag::None);
        assert!(report.log.contains("not supported"));
    }

    #[test]
    fn test_script_build_is_noop() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("script.py"), "print(1)").unwrap();

        let project = loose_project(dir.path(), "script", "script.py");
        let report = build_project(&project, &Toolchain::for_host());

        assert!(report.succeeded());
        assert_eq!(report.toolchain, ToolchainTag::Interpreter);
        assert!(!project.build_dir().exists());
    }

    #[test]
    fn test_vcxproj_missing_descriptor() {
        let dir = TempDir::new().unwrap();
        let project = dir_project(dir.path(), ProjectType::VisualCppProject, "student5");
        let report = build_project(&project, &Toolchain::for_host());

        assert_eq!(report.code, -1);
        assert!(report.log.contains("Cannot find"));
    }

    #[test]
    fn test_missing_msbuild_is_unsupported_platform() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("app.vcxproj"), "<Project/>").unwrap();

        let toolchain = Toolchain::empty();
        let project = dir_project(dir.path(), ProjectType::VisualCppProject, "app");
        let report = build_project(&project, &toolchain);

        assert_eq!(report.code, -1);
        assert!(report.log.contains("not supported on this platform"));
    }

    #[test]
    fn test_vcxproj_preferred_over_vcproj() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("old.vcproj"), "").unwrap();
        fs::write(dir.path().join("new.vcxproj"), "").unwrap();

        assert_eq!(vcxproj_in(dir.path()), Some(PathBuf::from("new.vcxproj")));
    }

    #[test]
    fn test_skipped_build_report() {
        let report = BuildReport::skipped();
        assert!(report.succeeded());
        assert_eq!(report.toolchain, ToolchainTag::None);
        assert!(report.log.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_single_source_materializes_descriptor() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("student1.c"), "int main(){}").unwrap();

        let project = loose_project(dir.path(), "student1", "student1.c");
        let report = build_project(&project, &sh_toolchain("cat CMakeLists.txt"));

        assert!(report.succeeded());
        assert!(report.log.contains("add_executable(student1"));
        assert!(project.build_dir().join("CMakeLists.txt").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_build_failure_carries_exit_code() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("student1.c"), "int main(){}").unwrap();

        let project = loose_project(dir.path(), "student1", "student1.c");
        let report = build_project(&project, &sh_toolchain("echo boom 1>&2; exit 7"));

        assert_eq!(report.code, 7);
        assert!(report.log.contains("boom"));
        assert_eq!(report.toolchain, ToolchainTag::CMake);
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_failure_is_internal() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("student1.c"), "int main(){}").unwrap();

        let mut toolchain = Toolchain::empty();
        toolchain.cmake = Some(CommandTemplate::new(vec![vec!["/no/such/tool"]]));
        let project = loose_project(dir.path(), "student1", "student1.c");
        let report = build_project(&project, &toolchain);

        assert_eq!(report.code, -1);
        assert!(report.log.contains("Failed to start"));
    }

    #[cfg(unix)]
    #[test]
    fn test_cmake_submission_purges_stale_outputs() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("student3");
        fs::create_dir_all(root.join("CMakeFiles/3.22")).unwrap();
        fs::write(root.join("CMakeLists.txt"), "project(x)").unwrap();
        fs::write(root.join("CMakeCache.txt"), "stale").unwrap();
        fs::write(root.join("cmake_install.cmake"), "stale").unwrap();
        fs::write(root.join("Makefile"), "stale").unwrap();

        let project = dir_project(&root, ProjectType::CmakeProject, "student3");
        let report = build_project(&project, &sh_toolchain("true"));

        assert!(report.succeeded());
        assert!(root.join("CMakeLists.txt").is_file());
        assert!(!root.join("CMakeCache.txt").exists());
        assert!(!root.join("cmake_install.cmake").exists());
        assert!(!root.join("Makefile").exists());
        assert!(!root.join("CMakeFiles").exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_make_build_copies_tree() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("student4");
        fs::create_dir_all(root.join("src")).unwrap();
        fs::write(root.join("Makefile"), "all:").unwrap();
        fs::write(root.join("src/main.c"), "int main(){}").unwrap();
        // Leftover from an earlier pass; must not survive into the copy.
        fs::create_dir_all(root.join("submill-build-student4")).unwrap();
        fs::write(root.join("submill-build-student4/junk"), "old").unwrap();

        let project = dir_project(&root, ProjectType::MakeProject, "student4");
        let report = build_project(
            &project,
            &sh_toolchain("test -f Makefile && test -f src/main.c && test ! -e junk"),
        );

        assert!(report.succeeded(), "log: {}", report.log);
        assert!(project.build_dir().join("Makefile").is_file());
    }

    #[cfg(unix)]
    #[test]
    fn test_vcxproj_out_dir_rendered() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("student5");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("app.vcxproj"), "<Project/>").unwrap();

        let project = dir_project(&root, ProjectType::VisualCppProject, "app");
        let report = build_project(&project, &sh_toolchain("printf %s {out}"));

        assert!(report.succeeded());
        assert_eq!(report.log, "submill-build-app/");
    }

    #[cfg(unix)]
    #[test]
    fn test_steps_short_circuit_on_failure() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("student1.c"), "int main(){}").unwrap();

        let mut toolchain = Toolchain::empty();
        toolchain.cmake = Some(CommandTemplate::new(vec![
            vec!["/bin/sh", "-c", "echo first; exit 2"],
            vec!["/bin/sh", "-c", "echo second"],
        ]));
        let project = loose_project(dir.path(), "student1", "student1.c");
        let report = build_project(&project, &toolchain);

        assert_eq!(report.code, 2);
        assert!(report.log.contains("first"));
        assert!(!report.log.contains("second"));
    }
}
