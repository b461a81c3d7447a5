use super::{JobHandle, Scheduler, SchedulerError};
use crate::{
    command::{self, RunOutput},
    config::{SweepConfig, TemplateOptions, RANKS_PER_NODE},
    request::JobRequest,
    template,
};
use once_cell::unsync::OnceCell;
use std::{
    fmt::Debug,
    fs,
    marker::PhantomData,
    path::{Path, PathBuf},
    time::Duration,
};
use tracing::{debug, error, info, instrument, warn};

/// Command line conventions of one batch system
pub trait Dialect: Debug {
    const NAME: &'static str;
    const SUBMIT: &'static [&'static str];
    const STATUS: &'static [&'static str];
    const DELETE: &'static [&'static str];
    /// appended to the job's file stem to name the rendered script
    const SCRIPT_SUFFIX: &'static str;
    const REQUIRES_RANKS_PER_NODE: bool;

    /// extract the job id from the submit command's stdout
    fn parse_job_id(stdout: &str) -> Option<String>;
}

/// Scheduler that renders a script template per job and hands it to the
/// batch system's command line tools
#[derive(Debug)]
pub struct BatchScheduler<D: Dialect> {
    template_file: PathBuf,
    // loaded on first submit, reused for the rest of the sweep
    template: OnceCell<String>,
    options: TemplateOptions,
    submit: Vec<String>,
    status: Vec<String>,
    delete: Vec<String>,
    timeout: Duration,
    dialect: PhantomData<D>,
}

fn resolve_command(
    name: &str,
    configured: &Option<Vec<String>>,
    default: &[&str],
) -> Result<Vec<String>, SchedulerError> {
    match configured {
        Some(command) if command.is_empty() => Err(SchedulerError::Configuration(format!(
            "commands.{name} must not be empty"
        ))),
        Some(command) => Ok(command.clone()),
        None => Ok(default.iter().map(|part| part.to_string()).collect()),
    }
}

impl<D: Dialect> BatchScheduler<D> {
    pub fn load(config: &SweepConfig) -> Result<Self, SchedulerError> {
        if D::REQUIRES_RANKS_PER_NODE && config.ranks_per_node().is_none() {
            return Err(SchedulerError::Configuration(format!(
                "{} needs a positive script_template_opts.{RANKS_PER_NODE} to derive the node count",
                D::NAME
            )));
        }

        Ok(Self {
            template_file: config.script_template_file.clone(),
            template: OnceCell::new(),
            options: config.script_template_opts.clone(),
            submit: resolve_command("submit", &config.commands.submit, D::SUBMIT)?,
            status: resolve_command("status", &config.commands.status, D::STATUS)?,
            delete: resolve_command("delete", &config.commands.delete, D::DELETE)?,
            timeout: config.command_timeout(),
            dialect: PhantomData,
        })
    }

    fn template(&self) -> Result<&str, SchedulerError> {
        self.template
            .get_or_try_init(|| {
                let template = fs::read_to_string(&self.template_file).map_err(|source| {
                    SchedulerError::TemplateUnreadable {
                        path: self.template_file.clone(),
                        source,
                    }
                })?;
                debug!("Script template:\n{template}");

                Ok(template)
            })
            .map(String::as_str)
    }

    /// render the job script for `request` and write it into the job's directory
    pub fn write_script(&self, request: &JobRequest) -> Result<PathBuf, SchedulerError> {
        let mut values = self.options.clone();
        values.insert("threads".into(), request.threads.into());
        values.insert("ranks".into(), request.ranks.into());
        if let Some(node_count) = request.node_count {
            values.insert("num_nodes".into(), node_count.into());
            values.insert("node_count".into(), node_count.into());
        }

        let script = template::render(self.template()?, &values)?;
        debug!("Script file:\n{script}");

        let script_path = request
            .working_path
            .join(format!("{}.{}", request.file_stem(), D::SCRIPT_SUFFIX));
        fs::write(&script_path, script).map_err(|source| SchedulerError::Io {
            path: script_path.clone(),
            source,
        })?;

        Ok(script_path)
    }
}

/// keep stdout/stderr of a failed submission next to its script
fn capture_failure(script_path: &Path, output: &RunOutput) {
    for (extension, content) in [("output.txt", &output.stdout), ("error.txt", &output.stderr)] {
        let mut capture = script_path.as_os_str().to_owned();
        capture.push(".");
        capture.push(extension);
        let capture = PathBuf::from(capture);

        if let Err(error) = fs::write(&capture, content) {
            error!(error = ?error, path = ?capture, "Failed to save submission output");
        }
    }
}

impl<D: Dialect> Scheduler for BatchScheduler<D> {
    #[instrument(skip(self, request), fields(threads = request.threads, ranks = request.ranks))]
    fn submit(&mut self, request: &JobRequest, dry_run: bool) -> Result<JobHandle, SchedulerError> {
        let script_path = self.write_script(request)?;
        let script_name = script_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        debug!("Submit command: {} {script_name}", self.submit.join(" "));
        if dry_run {
            info!(script = ?script_path, "Dry run, not submitting");
            return Ok(JobHandle::none());
        }

        let output = command::run(
            &self.submit,
            &[script_name.as_str()],
            Some(&request.working_path),
            self.timeout,
        )?;

        if !output.success() {
            capture_failure(&script_path, &output);

            return Err(SchedulerError::Submission {
                script: script_path,
                status: output.status,
            });
        }

        match D::parse_job_id(&output.stdout) {
            Some(id) => {
                info!(job = %id, "Submitted {script_name} to {}", D::NAME);
                Ok(JobHandle::new(id))
            }
            None => {
                warn!(
                    stdout = %output.stdout,
                    "Could not find a job id in the {} submit output", D::NAME
                );
                Ok(JobHandle::none())
            }
        }
    }

    fn status(&self, handle: &JobHandle) -> Result<bool, SchedulerError> {
        if handle.is_none() {
            return Ok(false);
        }

        let output = command::run(&self.status, &[handle.as_str()], None, self.timeout)?;

        // plain substring test, matching what existing queue fixtures expect
        Ok(output.stdout.contains(handle.as_str()))
    }

    fn delete(&self, handle: &JobHandle) -> Result<bool, SchedulerError> {
        if handle.is_none() {
            warn!("Refusing to delete an empty job handle");
            return Ok(false);
        }

        let output = command::run(&self.delete, &[handle.as_str()], None, self.timeout)?;
        if !output.success() {
            warn!(job = %handle, stderr = %output.stderr, "{} rejected the deletion", D::NAME);
        }

        Ok(output.success())
    }
}
