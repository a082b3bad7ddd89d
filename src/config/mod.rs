//! Runtime settings with layered resolution
//!
//! Settings come from three layers, lowest precedence first:
//! 1. Built-in defaults
//! 2. Optional `submill.toml` in the assignment directory
//! 3. CLI flags
//!
//! Each layer is a [`ConfigLayer`] of optional fields; [`RunSettings::resolve`]
//! folds them left to right, later layers winning per field, then validates
//! the product. The resolved struct is passed explicitly to the pipeline;
//! nothing reads configuration from globals.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name looked up in the assignment directory for layer 2
pub const CONFIG_FILE_NAME: &str = "submill.toml";

/// Default per-trial wall-clock timeout in seconds
pub const DEFAULT_TIMEOUT_SECONDS: f64 = 2.0;

/// Default output directory, relative to the working directory
pub const DEFAULT_OUTPUT_DIR: &str = "submill-out";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Which phases of the batch to execute
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Build everything, then run everything
    #[default]
    Full,
    /// Build only; projects are recorded with empty trial lists
    BuildOnly,
    /// Skip building and run against previously staged artifacts
    RunOnly,
}

/// One layer of optional settings (file or CLI)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    /// Per-trial timeout in seconds; 0 disables the timeout
    pub timeout: Option<f64>,

    /// Stdin strings, one per trial
    pub inputs: Option<Vec<String>>,

    /// Argument strings, one per trial (whitespace-split at run time)
    pub args: Option<Vec<String>>,

    /// Glob patterns for files to omit from member listings
    pub exclude: Option<Vec<String>>,

    /// Stdin strings keyed by project-name suffix, overriding `inputs` for
    /// matching projects
    pub inputs_for: Option<BTreeMap<String, Vec<String>>>,

    /// Interpreter command overriding the per-language default
    pub interpreter: Option<String>,

    /// Worker count for the parallel phases
    pub jobs: Option<usize>,

    /// Run the build phase one project at a time
    pub build_serial: Option<bool>,

    /// Run the run phase one project at a time
    pub run_serial: Option<bool>,

    /// Directory receiving the staged copy and the report
    pub output_dir: Option<PathBuf>,
}

impl ConfigLayer {
    /// Parse a layer from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load the layer file from `dir`, if one exists
    pub fn from_dir(dir: &Path) -> Result<Option<Self>, ConfigError> {
        let path = dir.join(CONFIG_FILE_NAME);
        if !path.is_file() {
            return Ok(None);
        }
        let contents = fs::read_to_string(&path)?;
        Ok(Some(Self::from_toml_str(&contents)?))
    }
}

/// Fully resolved settings for one batch
#[derive(Debug, Clone, Serialize)]
pub struct RunSettings {
    /// Per-trial timeout in seconds; 0 means wait forever
    pub timeout_seconds: f64,

    /// Stdin strings, one per trial (never empty; defaults to one empty string)
    pub user_inputs: Vec<String>,

    /// Argument strings, one per trial (never empty; defaults to one empty string)
    pub cmd_args: Vec<String>,

    /// Per-project stdin overrides, keyed by project-name suffix
    pub inputs_for: BTreeMap<String, Vec<String>>,

    /// Exclude glob patterns applied to member-file listings
    pub exclude: Vec<String>,

    /// Interpreter override for script submissions
    pub interpreter: Option<String>,

    /// Worker count for the parallel phases
    pub jobs: usize,

    /// Serial build phase
    pub build_serial: bool,

    /// Serial run phase
    pub run_serial: bool,

    /// Phase selection
    pub phase: Phase,

    /// Directory receiving the staged assignment copy and the report
    pub output_dir: PathBuf,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            user_inputs: vec![String::new()],
            cmd_args: vec![String::new()],
            inputs_for: BTreeMap::new(),
            exclude: Vec::new(),
            interpreter: None,
            jobs: default_jobs(),
            build_serial: false,
            run_serial: false,
            phase: Phase::Full,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
        }
    }
}

impl RunSettings {
    /// Fold layers over the defaults, later layers winning, then validate.
    pub fn resolve(layers: &[ConfigLayer]) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        for layer in layers {
            if let Some(timeout) = layer.timeout {
                settings.timeout_seconds = timeout;
            }
            if let Some(ref inputs) = layer.inputs {
                settings.user_inputs = inputs.clone();
            }
            if let Some(ref args) = layer.args {
                settings.cmd_args = args.clone();
            }
            if let Some(ref inputs_for) = layer.inputs_for {
                settings.inputs_for = inputs_for.clone();
            }
            if let Some(ref exclude) = layer.exclude {
                settings.exclude = exclude.clone();
            }
            if let Some(ref interpreter) = layer.interpreter {
                settings.interpreter = Some(interpreter.clone());
            }
            if let Some(jobs) = layer.jobs {
                settings.jobs = jobs;
            }
            if let Some(build_serial) = layer.build_serial {
                settings.build_serial = build_serial;
            }
            if let Some(run_serial) = layer.run_serial {
                settings.run_serial = run_serial;
            }
            if let Some(ref output_dir) = layer.output_dir {
                settings.output_dir = output_dir.clone();
            }
        }
        settings.normalize();
        settings.validate()?;
        Ok(settings)
    }

    /// Select the phases to execute
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = phase;
        self
    }

    /// The per-trial timeout as a duration; `None` means wait forever.
    pub fn run_timeout(&self) -> Option<Duration> {
        if self.timeout_seconds == 0.0 {
            None
        } else {
            Some(Duration::from_secs_f64(self.timeout_seconds))
        }
    }

    /// Number of trials from the global lists: the longer of the two.
    /// Projects matched by an `inputs_for` override may run more or fewer.
    pub fn trial_count(&self) -> usize {
        self.user_inputs.len().max(self.cmd_args.len())
    }

    /// Stdin list for one project. The first suffix-matching `inputs_for`
    /// entry wins; with overrides present but none matching, all override
    /// lists apply in key order; without overrides, the global list.
    pub fn inputs_for_project(&self, project_name: &str) -> Vec<String> {
        if self.inputs_for.is_empty() {
            return self.user_inputs.clone();
        }
        for (suffix, inputs) in &self.inputs_for {
            if project_name.ends_with(suffix) {
                return inputs.clone();
            }
        }
        let all: Vec<String> = self.inputs_for.values().flatten().cloned().collect();
        if all.is_empty() {
            self.user_inputs.clone()
        } else {
            all
        }
    }

    /// Empty trial lists collapse to a single empty trial so every project
    /// runs at least once.
    fn normalize(&mut self) {
        if self.user_inputs.is_empty() {
            self.user_inputs.push(String::new());
        }
        if self.cmd_args.is_empty() {
            self.cmd_args.push(String::new());
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.timeout_seconds.is_finite() || self.timeout_seconds < 0.0 {
            return Err(ConfigError::Validation(format!(
                "timeout must be a non-negative number of seconds, got {}",
                self.timeout_seconds
            )));
        }
        if self.jobs == 0 {
            return Err(ConfigError::Validation(
                "jobs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Worker count when none is configured: the machine's CPU count.
fn default_jobs() -> usize {
    std::thread::available_parallelism()
        .map(NonZeroUsize::get)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = RunSettings::default();
        assert_eq!(settings.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(settings.user_inputs, vec![String::new()]);
        assert_eq!(settings.cmd_args, vec![String::new()]);
        assert!(settings.jobs >= 1);
        assert_eq!(settings.phase, Phase::Full);
        assert!(!settings.build_serial);
        assert!(!settings.run_serial);
    }

    #[test]
    fn test_resolve_empty_layers_is_default() {
        let settings = RunSettings::resolve(&[]).unwrap();
        assert_eq!(settings.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
        assert_eq!(settings.trial_count(), 1);
    }

    #[test]
    fn test_later_layer_wins() {
        let file = ConfigLayer {
            timeout: Some(5.0),
            inputs: Some(vec!["1".to_string(), "2".to_string()]),
            ..Default::default()
        };
        let cli = ConfigLayer {
            timeout: Some(0.5),
            ..Default::default()
        };

        let settings = RunSettings::resolve(&[file, cli]).unwrap();
        assert_eq!(settings.timeout_seconds, 0.5);
        // Untouched by the CLI layer, preserved from the file layer
        assert_eq!(settings.user_inputs.len(), 2);
    }

    #[test]
    fn test_parse_toml_layer() {
        let toml = r#"
            timeout = 3.5
            inputs = ["3 4", "5 6"]
            exclude = ["*.txt", "data/*"]
            interpreter = "python3"
            jobs = 4
        "#;

        let layer = ConfigLayer::from_toml_str(toml).unwrap();
        assert_eq!(layer.timeout, Some(3.5));
        assert_eq!(layer.inputs.as_ref().unwrap().len(), 2);
        assert_eq!(layer.exclude.as_ref().unwrap().len(), 2);
        assert_eq!(layer.interpreter.as_deref(), Some("python3"));
        assert_eq!(layer.jobs, Some(4));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let result = ConfigLayer::from_toml_str("timeouts = 3.0");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_dir_missing_file() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(ConfigLayer::from_dir(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_from_dir_with_file() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "timeout = 1.5\n").unwrap();

        let layer = ConfigLayer::from_dir(dir.path()).unwrap().unwrap();
        assert_eq!(layer.timeout, Some(1.5));
    }

    #[test]
    fn test_zero_timeout_means_unlimited() {
        let layer = ConfigLayer {
            timeout: Some(0.0),
            ..Default::default()
        };
        let settings = RunSettings::resolve(&[layer]).unwrap();
        assert!(settings.run_timeout().is_none());
    }

    #[test]
    fn test_fractional_timeout() {
        let layer = ConfigLayer {
            timeout: Some(0.1),
            ..Default::default()
        };
        let settings = RunSettings::resolve(&[layer]).unwrap();
        assert_eq!(settings.run_timeout(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let layer = ConfigLayer {
            timeout: Some(-1.0),
            ..Default::default()
        };
        assert!(RunSettings::resolve(&[layer]).is_err());
    }

    #[test]
    fn test_zero_jobs_rejected() {
        let layer = ConfigLayer {
            jobs: Some(0),
            ..Default::default()
        };
        assert!(RunSettings::resolve(&[layer]).is_err());
    }

    #[test]
    fn test_empty_trial_lists_normalized() {
        let layer = ConfigLayer {
            inputs: Some(Vec::new()),
            args: Some(Vec::new()),
            ..Default::default()
        };
        let settings = RunSettings::resolve(&[layer]).unwrap();
        assert_eq!(settings.user_inputs, vec![String::new()]);
        assert_eq!(settings.cmd_args, vec![String::new()]);
        assert_eq!(settings.trial_count(), 1);
    }

    #[test]
    fn test_trial_count_is_longer_list() {
        let layer = ConfigLayer {
            inputs: Some(vec!["a".into(), "b".into(), "c".into()]),
            args: Some(vec!["-x".into()]),
            ..Default::default()
        };
        let settings = RunSettings::resolve(&[layer]).unwrap();
        assert_eq!(settings.trial_count(), 3);
    }

    #[test]
    fn test_with_phase() {
        let settings = RunSettings::default().with_phase(Phase::RunOnly);
        assert_eq!(settings.phase, Phase::RunOnly);
    }

    #[test]
    fn test_inputs_for_suffix_match() {
        let toml = r#"
            inputs = ["global"]

            [inputs_for]
            task1 = ["1 2", "3 4"]
            task2 = ["9"]
        "#;
        let layer = ConfigLayer::from_toml_str(toml).unwrap();
        let settings = RunSettings::resolve(&[layer]).unwrap();

        assert_eq!(
            settings.inputs_for_project("week3-task1"),
            vec!["1 2".to_string(), "3 4".to_string()]
        );
        assert_eq!(
            settings.inputs_for_project("week3-task2"),
            vec!["9".to_string()]
        );
    }

    #[test]
    fn test_inputs_for_no_match_tries_all_overrides() {
        let mut overrides = BTreeMap::new();
        overrides.insert("a".to_string(), vec!["1".to_string()]);
        overrides.insert("b".to_string(), vec!["2".to_string()]);
        let layer = ConfigLayer {
            inputs_for: Some(overrides),
            ..Default::default()
        };
        let settings = RunSettings::resolve(&[layer]).unwrap();

        assert_eq!(
            settings.inputs_for_project("unrelated"),
            vec!["1".to_string(), "2".to_string()]
        );
    }

    #[test]
    fn test_inputs_for_absent_uses_global_inputs() {
        let layer = ConfigLayer {
            inputs: Some(vec!["x".to_string()]),
            ..Default::default()
        };
        let settings = RunSettings::resolve(&[layer]).unwrap();
        assert_eq!(settings.inputs_for_project("anything"), vec!["x".to_string()]);
    }
}
