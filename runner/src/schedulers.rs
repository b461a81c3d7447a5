mod batch;
mod pbs;
mod slurm;

pub use batch::{BatchScheduler, Dialect};
pub use pbs::Pbs;
pub use slurm::Slurm;

use crate::{
    command::CommandError,
    config::{SchedulerKind, SweepConfig},
    request::JobRequest,
    template::TemplateError,
};
use std::{fmt, io, path::PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("Failed to read script template {path}: {source}")]
    TemplateUnreadable { path: PathBuf, source: io::Error },
    #[error("Invalid scheduler configuration: {0}")]
    Configuration(String),
    #[error("Failed to render script template: {0}")]
    Template(#[from] TemplateError),
    #[error("Submitting {script} exited with status {status:?}, output was captured next to the script")]
    Submission {
        script: PathBuf,
        status: Option<i32>,
    },
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error("Failed to write {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

impl SchedulerError {
    /// errors that would hit every job of a sweep the same way
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::TemplateUnreadable { .. } | Self::Configuration(_)
        )
    }
}

/// Identifier of a submitted job. The empty handle stands for "no job",
/// e.g. for dry runs or if the scheduler output could not be parsed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct JobHandle(String);

impl JobHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn none() -> Self {
        Self(String::new())
    }

    pub fn is_none(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("<no job>")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// A cluster scheduler the sweep can hand jobs to
pub trait Scheduler {
    /// submit one job, in dry-run mode only the job artifacts are written
    fn submit(&mut self, request: &JobRequest, dry_run: bool) -> Result<JobHandle, SchedulerError>;

    /// true while the job is still known to the queue
    fn status(&self, handle: &JobHandle) -> Result<bool, SchedulerError>;

    /// true if the scheduler accepted the cancellation
    fn delete(&self, handle: &JobHandle) -> Result<bool, SchedulerError>;
}

#[derive(Debug)]
pub enum Schedulers {
    Pbs(BatchScheduler<Pbs>),
    Slurm(BatchScheduler<Slurm>),
}

impl Schedulers {
    pub fn load(config: &SweepConfig) -> Result<Self, SchedulerError> {
        match config.scheduler {
            SchedulerKind::Pbs => BatchScheduler::load(config).map(Self::Pbs),
            SchedulerKind::Slurm => BatchScheduler::load(config).map(Self::Slurm),
        }
    }
}

impl Scheduler for Schedulers {
    fn submit(&mut self, request: &JobRequest, dry_run: bool) -> Result<JobHandle, SchedulerError> {
        match self {
            Self::Pbs(scheduler) => scheduler.submit(request, dry_run),
            Self::Slurm(scheduler) => scheduler.submit(request, dry_run),
        }
    }

    fn status(&self, handle: &JobHandle) -> Result<bool, SchedulerError> {
        match self {
            Self::Pbs(scheduler) => scheduler.status(handle),
            Self::Slurm(scheduler) => scheduler.status(handle),
        }
    }

    fn delete(&self, handle: &JobHandle) -> Result<bool, SchedulerError> {
        match self {
            Self::Pbs(scheduler) => scheduler.delete(handle),
            Self::Slurm(scheduler) => scheduler.delete(handle),
        }
    }
}
