//! Build toolchain command templates and version probing
//!
//! The per-OS build commands live in one injected [`Toolchain`] value
//! resolved at startup and passed explicitly to the build strategies.
//! Each flavor is an ordered list of argv steps executed inside the build
//! subdirectory; a flavor that is `None` is unsupported on the current
//! platform and builds against it report the internal-error outcome.
//!
//! Template tokens may contain `{src}` (descriptor location relative to the
//! build subdirectory, or the project file for msbuild), `{out}` (absolute
//! build subdirectory path) and `{project}` (project name), substituted at
//! build time.

use serde::{Deserialize, Serialize};
use std::process::Command;

/// Argv steps for one build flavor, run in order inside the build
/// subdirectory; the first nonzero step stops the sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    steps: Vec<Vec<String>>,
}

/// Values substituted into template tokens
#[derive(Debug, Clone, Copy)]
pub struct TemplateVars<'a> {
    /// Descriptor location for cmake (`./` or `../`), or the project file
    pub src: &'a str,
    /// Absolute build subdirectory path
    pub out: &'a str,
    /// Project name
    pub project: &'a str,
}

impl CommandTemplate {
    pub fn new<S: Into<String>>(steps: Vec<Vec<S>>) -> Self {
        Self {
            steps: steps
                .into_iter()
                .map(|step| step.into_iter().map(Into::into).collect())
                .collect(),
        }
    }

    /// Substitute the placeholder tokens, producing runnable argv steps.
    pub fn render(&self, vars: TemplateVars<'_>) -> Vec<Vec<String>> {
        self.steps
            .iter()
            .map(|step| {
                step.iter()
                    .map(|token| {
                        token
                            .replace("{src}", vars.src)
                            .replace("{out}", vars.out)
                            .replace("{project}", vars.project)
                    })
                    .collect()
            })
            .collect()
    }

    /// The program invoked by the first step; used for version probing.
    pub fn program(&self) -> Option<&str> {
        self.steps.first().and_then(|step| step.first()).map(String::as_str)
    }
}

/// Resolved build commands for the current platform
#[derive(Debug, Clone)]
pub struct Toolchain {
    /// CMake configure + native build (also used for synthesized
    /// single-source descriptors)
    pub cmake: Option<CommandTemplate>,

    /// Plain `make` inside a copied tree
    pub make: Option<CommandTemplate>,

    /// Visual C++ project builder with redirected output directories
    pub msbuild: Option<CommandTemplate>,

    /// Per-extension default interpreter commands for script sources
    interpreters: Vec<(String, String)>,

    /// User-supplied interpreter command; replaces every per-extension
    /// default and admits extensions that have none
    interpreter_override: Option<String>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self::for_host()
    }
}

impl Toolchain {
    /// A toolchain with no build tools and no interpreters. Callers
    /// install the command templates they want.
    pub fn empty() -> Self {
        Self {
            cmake: None,
            make: None,
            msbuild: None,
            interpreters: Vec::new(),
            interpreter_override: None,
        }
    }

    /// The build commands for the platform this binary runs on.
    #[cfg(unix)]
    pub fn for_host() -> Self {
        Self {
            cmake: Some(CommandTemplate::new(vec![
                vec!["cmake", "{src}"],
                vec!["make"],
            ])),
            make: Some(CommandTemplate::new(vec![vec!["make"]])),
            msbuild: None,
            interpreters: default_interpreters(),
            interpreter_override: None,
        }
    }

    #[cfg(windows)]
    pub fn for_host() -> Self {
        Self {
            cmake: Some(CommandTemplate::new(vec![
                vec!["cmake", "{src}", "-G", "NMake Makefiles"],
                vec!["nmake"],
            ])),
            make: None,
            msbuild: Some(CommandTemplate::new(vec![vec![
                "msbuild",
                "{src}",
                "/property:OutDir={out}",
                "/property:IntDir={out}",
            ]])),
            interpreters: default_interpreters(),
            interpreter_override: None,
        }
    }

    #[cfg(not(any(unix, windows)))]
    pub fn for_host() -> Self {
        Self {
            interpreters: default_interpreters(),
            ..Self::empty()
        }
    }

    /// Replaces every default interpreter with `command`. `None` keeps the
    /// per-extension defaults.
    pub fn with_interpreter(mut self, command: Option<String>) -> Self {
        self.interpreter_override = command;
        self
    }

    /// Interpreter command for a source extension.
    ///
    /// An override applies to any extension, including ones with no default;
    /// compiled extensions are never looked up here.
    pub fn interpreter_for(&self, extension: &str) -> Option<&str> {
        if let Some(command) = &self.interpreter_override {
            return Some(command);
        }
        self.interpreters
            .iter()
            .find(|(ext, _)| ext == extension)
            .map(|(_, cmd)| cmd.as_str())
    }

    /// Probe the version of every tool this batch may invoke.
    ///
    /// Collects the first stdout line of `<tool> --version` for each
    /// available flavor's program plus the C compiler and the active
    /// interpreters. A tool that cannot be probed reports no version;
    /// probing never fails the batch.
    pub fn probe_versions(&self) -> Vec<ToolVersion> {
        let mut programs: Vec<&str> = Vec::new();
        for template in [&self.cmake, &self.make, &self.msbuild].into_iter().flatten() {
            if let Some(program) = template.program() {
                if !programs.contains(&program) {
                    programs.push(program);
                }
            }
        }
        programs.push("cc");
        if let Some(cmd) = &self.interpreter_override {
            if !programs.contains(&cmd.as_str()) {
                programs.push(cmd);
            }
        } else {
            for (_, cmd) in &self.interpreters {
                if !programs.contains(&cmd.as_str()) {
                    programs.push(cmd);
                }
            }
        }

        programs
            .into_iter()
            .map(|program| ToolVersion {
                tool: program.to_string(),
                version: probe_version_line(program),
            })
            .collect()
    }
}

/// One probed tool version for the report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolVersion {
    /// Program name as invoked
    pub tool: String,

    /// First line of `--version` output, absent when the probe failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// First stdout line of `<program> --version`, if the tool runs.
fn probe_version_line(program: &str) -> Option<String> {
    let output = Command::new(program).arg("--version").output().ok()?;
    if !output.status.success() {
        return None;
    }
    let stdout = String::from_utf8_lossy(&output.stdout);
    stdout
        .lines()
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

fn default_interpreters() -> Vec<(String, String)> {
    vec![("py".to_string(), "python3".to_string())]
}
