use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt,
    fs::File,
    io::{self, BufReader},
    path::{Path, PathBuf},
    time::Duration,
};
use thiserror::Error;
use tracing::{debug, error, warn};

/// placeholder values handed to the submission script template
pub type TemplateOptions = BTreeMap<String, serde_yaml::Value>;

#[derive(Error, Debug)]
pub enum ConfigErrors {
    #[error("Failed to read config file {path}: {source}")]
    Unreadable { path: PathBuf, source: io::Error },
    #[error("Failed to parse config file {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("Config file {0} failed the preflight checks")]
    Invalid(PathBuf),
}

/// Which cluster scheduler the sweep is submitted to
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerKind {
    #[serde(alias = "PBS")]
    Pbs,
    #[serde(alias = "SLURM", alias = "Slurm")]
    Slurm,
}

/// Resource dimension varied over `range`
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunAxis {
    Threads,
    Ranks,
}

impl RunAxis {
    /// directory name below `output_path` that holds this axis' jobs
    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Threads => "threads",
            Self::Ranks => "ranks",
        }
    }
}

impl fmt::Display for RunAxis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Program plus leading arguments for each scheduler command.
/// Missing entries fall back to the backend's defaults.
#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct CommandOverrides {
    pub submit: Option<Vec<String>>,
    pub status: Option<Vec<String>>,
    pub delete: Option<Vec<String>>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
#[serde(deny_unknown_fields)]
pub struct SweepConfig {
    // backend selection, resolved once in `Schedulers::load`
    pub scheduler: SchedulerKind,
    #[serde(alias = "run_axis")]
    pub run_type: RunAxis,
    pub range: Vec<u32>,
    pub fixed_value: u32,
    pub output_path: PathBuf,
    pub script_template_file: PathBuf,
    #[serde(default)]
    pub script_template_opts: TemplateOptions,

    /// seconds between two status queries in single queue mode
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    /// upper bound in seconds for waiting on a single job, unbounded if unset
    #[serde(default)]
    pub max_wait: Option<u64>,
    /// upper bound in seconds for every scheduler command
    #[serde(default = "default_command_timeout")]
    pub command_timeout: u64,
    #[serde(default)]
    pub commands: CommandOverrides,
}

impl SweepConfig {
    /// read a JSON or YAML config file
    pub fn load(path: &Path) -> Result<Self, ConfigErrors> {
        let file = File::open(path).map_err(|source| ConfigErrors::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_yaml::from_reader(BufReader::new(file)).map_err(|source| {
            ConfigErrors::Malformed {
                path: path.to_path_buf(),
                source,
            }
        })?;
        debug!(config = ?config, "Loaded sweep config from {}", path.display());

        Ok(config)
    }

    /// `load` followed by `preflight_checks`
    pub fn load_checked(path: &Path) -> Result<Self, ConfigErrors> {
        let config = Self::load(path)?;

        if config.preflight_checks() {
            Err(ConfigErrors::Invalid(path.to_path_buf()))
        } else {
            Ok(config)
        }
    }

    /// Log every invariant violation instead of stopping at the first one.
    /// Returns true if any error was found.
    pub fn preflight_checks(&self) -> bool {
        let mut contains_error = false;

        if self.range.is_empty() {
            error!("range is empty, a sweep needs at least one value");
            contains_error = true;
        }

        for (index, value) in self.range.iter().enumerate() {
            if *value == 0 {
                error!("range[{index}] is 0, every swept value must be positive");
                contains_error = true;
            }
        }

        let duplicates = self.range.iter().duplicates().collect_vec();
        if !duplicates.is_empty() {
            warn!(
                "range contains {:?} more than once, these jobs share a working directory",
                duplicates
            );
        }

        if self.fixed_value == 0 {
            error!("fixed_value must be positive");
            contains_error = true;
        }

        if let Some(value) = self.script_template_opts.get(RANKS_PER_NODE) {
            if !value.as_u64().is_some_and(|number| number > 0) {
                error!("script_template_opts.{RANKS_PER_NODE} must be a positive integer, found {value:?}");
                contains_error = true;
            }
        }

        if self.poll_interval == 0 {
            error!("poll_interval must be at least one second");
            contains_error = true;
        }

        if self.command_timeout == 0 {
            error!("command_timeout must be at least one second");
            contains_error = true;
        }

        contains_error
    }

    /// `ranks_per_node` from the template options, if set to a usable value
    pub fn ranks_per_node(&self) -> Option<u32> {
        self.script_template_opts
            .get(RANKS_PER_NODE)
            .and_then(serde_yaml::Value::as_u64)
            .and_then(|value| u32::try_from(value).ok())
            .filter(|value| *value > 0)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait.map(Duration::from_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout)
    }
}

pub const RANKS_PER_NODE: &str = "ranks_per_node";

fn default_poll_interval() -> u64 {
    30
}

fn default_command_timeout() -> u64 {
    120
}
