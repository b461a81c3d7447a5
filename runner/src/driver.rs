use crate::{
    config::SweepConfig,
    request::JobRequest,
    schedulers::{JobHandle, Scheduler, SchedulerError},
};
use std::{
    io,
    path::PathBuf,
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Failed to create job directory {path}: {source}")]
    JobDirectory { path: PathBuf, source: io::Error },
    #[error("Aborting sweep: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("Job {handle} was still queued after waiting {waited:?}")]
    WaitTimeout { handle: JobHandle, waited: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepOptions {
    /// write job artifacts without calling the scheduler
    pub dry_run: bool,
    /// keep at most one job of the sweep in the queue
    pub single_queue: bool,
    pub poll_interval: Duration,
    /// `None` waits for as long as the job stays queued
    pub max_wait: Option<Duration>,
}

impl SweepOptions {
    pub fn from_config(config: &SweepConfig, dry_run: bool, single_queue: bool) -> Self {
        Self {
            dry_run,
            single_queue,
            poll_interval: config.poll_interval(),
            max_wait: config.max_wait(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub threads: u32,
    pub ranks: u32,
    pub working_path: PathBuf,
    pub handle: JobHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedJob {
    pub threads: u32,
    pub ranks: u32,
    pub working_path: PathBuf,
    pub error: String,
}

/// Outcome of every value of a sweep, in sweep order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub submitted: Vec<SubmittedJob>,
    pub failed: Vec<FailedJob>,
}

impl SweepReport {
    pub fn attempted(&self) -> usize {
        self.submitted.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Submits one job per value of `config.range` through `scheduler`
#[derive(Debug)]
pub struct Sweep<'a, S: Scheduler> {
    config: &'a SweepConfig,
    scheduler: &'a mut S,
    options: SweepOptions,
}

impl<'a, S: Scheduler> Sweep<'a, S> {
    pub fn new(config: &'a SweepConfig, scheduler: &'a mut S, options: SweepOptions) -> Self {
        Self {
            config,
            scheduler,
            options,
        }
    }

    /// A failed submission is recorded and the sweep moves on to the next value.
    /// Errors that would repeat for every job abort the sweep.
    #[instrument(skip(self), fields(axis = %self.config.run_type, jobs = self.config.range.len()))]
    pub fn run(&mut self) -> Result<SweepReport, SweepError> {
        let config = self.config;
        let mut report = SweepReport::default();
        let total = config.range.len();

        for (index, value) in config.range.iter().copied().enumerate() {
            let request = JobRequest::build(config, value).map_err(|source| {
                SweepError::JobDirectory {
                    path: JobRequest::resolve(config, value).working_path,
                    source,
                }
            })?;

            let handle = match self.scheduler.submit(&request, self.options.dry_run) {
                Ok(handle) => handle,
                Err(error) if error.is_fatal() => {
                    error!("Failed to submit {}: {error}", request.file_stem());
                    return Err(error.into());
                }
                Err(error) => {
                    error!(
                        path = ?request.working_path,
                        "Failed to submit {}, continuing with the next value: {error}",
                        request.file_stem()
                    );
                    report.failed.push(FailedJob {
                        threads: request.threads,
                        ranks: request.ranks,
                        working_path: request.working_path,
                        error: error.to_string(),
                    });
                    continue;
                }
            };

            info!(
                "Submitted {}/{total}: job {handle} with {} threads {} ranks",
                index + 1,
                request.threads,
                request.ranks
            );

            if self.options.single_queue && !self.options.dry_run {
                if handle.is_none() {
                    warn!(
                        "No job id known for {}, unable to wait for it before the next submission",
                        request.file_stem()
                    );
                } else {
                    info!(
                        "Waiting for job {handle} with {} threads {} ranks",
                        request.threads, request.ranks
                    );
                    self.wait_for(&handle)?;
                }
            }

            report.submitted.push(SubmittedJob {
                threads: request.threads,
                ranks: request.ranks,
                working_path: request.working_path,
                handle,
            });
        }

        info!(
            "Sweep done: {} submitted, {} failed",
            report.submitted.len(),
            report.failed.len()
        );

        Ok(report)
    }

    /// poll until the scheduler no longer reports `handle`
    fn wait_for(&self, handle: &JobHandle) -> Result<(), SweepError> {
        let start = Instant::now();

        loop {
            match self.scheduler.status(handle) {
                Ok(false) => {
                    debug!("Job {handle} left the queue after {:?}", start.elapsed());
                    return Ok(());
                }
                Ok(true) => debug!("Waiting for job {handle}"),
                Err(error) => {
                    warn!("Status query for job {handle} failed, assuming it is still queued: {error}")
                }
            }

            if let Some(max_wait) = self.options.max_wait {
                let waited = start.elapsed();
                if waited >= max_wait {
                    return Err(SweepError::WaitTimeout {
                        handle: handle.clone(),
                        waited,
                    });
                }
            }

            thread::sleep(self.options.poll_interval);
        }
    }
}

/// sweep `config` with the timing taken from the config file
pub fn run<S: Scheduler>(
    config: &SweepConfig,
    scheduler: &mut S,
    dry_run: bool,
    single_queue: bool,
) -> Result<SweepReport, SweepError> {
    let options = SweepOptions::from_config(config, dry_run, single_queue);

    Sweep::new(config, scheduler, options).run()
}
