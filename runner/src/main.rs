mod collector;
mod command;
mod config;
mod driver;
mod logging;
mod request;
mod schedulers;
mod template;

#[cfg(test)]
mod test_util;

use crate::{
    collector::CollectError,
    config::{ConfigErrors, SweepConfig},
    driver::SweepError,
    logging::LogConfig,
    schedulers::{JobHandle, Scheduler, SchedulerError, Schedulers},
};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, process::ExitCode};
use thiserror::Error;
use tracing::{debug, error, info, warn, Level};

/// Submit thread and rank scaling sweeps to a cluster scheduler
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Sweep config file in JSON or YAML format
    #[arg(short, long)]
    config: PathBuf,

    /// Write job directories and scripts without submitting anything
    #[arg(long)]
    no_sub: bool,

    /// Ensure only one job of the sweep is in the queue at a time
    #[arg(long)]
    single_queue: bool,

    /// Give up waiting on a queued job after this many seconds (single queue mode)
    #[arg(long, value_name = "SECONDS")]
    max_wait: Option<u64>,

    /// Set log level to DEBUG
    #[arg(long)]
    debug: bool,

    /// Set log level to WARN
    #[arg(long)]
    warning: bool,

    /// Set log level to ERROR
    #[arg(long)]
    error: bool,

    /// Write log output to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    logfilename: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
enum Commands {
    /// List the job directories of the configured sweep axis
    List,
    /// Remove jobs from the scheduler's queue
    Cancel {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

impl Cli {
    /// exactly one level flag picks that level, anything else stays at INFO
    fn log_config(&self) -> LogConfig {
        let level = match (self.debug, self.warning, self.error) {
            (true, false, false) => Level::DEBUG,
            (false, true, false) => Level::WARN,
            (false, false, true) => Level::ERROR,
            _ => Level::INFO,
        };

        LogConfig {
            level,
            file: self.logfilename.clone(),
        }
    }
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigErrors),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Sweep(#[from] SweepError),
    #[error(transparent)]
    Collect(#[from] CollectError),
}

fn sweep(config: &SweepConfig, dry_run: bool, single_queue: bool) -> Result<bool, AppError> {
    let mut scheduler = Schedulers::load(config)?;
    let report = driver::run(config, &mut scheduler, dry_run, single_queue)?;

    for job in report.submitted.iter() {
        debug!(
            path = ?job.working_path,
            "{} threads {} ranks submitted as job {}",
            job.threads, job.ranks, job.handle
        );
    }
    for failure in report.failed.iter() {
        warn!(
            path = ?failure.working_path,
            "{} threads {} ranks was not submitted: {}",
            failure.threads, failure.ranks, failure.error
        );
    }
    info!(
        "{}/{} jobs of the {} sweep submitted",
        report.submitted.len(),
        report.attempted(),
        config.run_type
    );

    Ok(report.is_success())
}

fn list(config: &SweepConfig) -> Result<bool, AppError> {
    let jobs = collector::collect(&config.output_path, config.run_type)?;

    println!("{:>8} {:>8} {:<10} path", "threads", "ranks", "state");
    for job in jobs.iter() {
        let state = match (&job.script, job.failed) {
            (_, true) => "failed",
            (Some(_), false) => "written",
            (None, false) => "empty",
        };
        println!(
            "{:>8} {:>8} {:<10} {}",
            job.threads,
            job.ranks,
            state,
            job.path.display()
        );
    }
    info!("Found {} job directories for {}", jobs.len(), config.run_type);

    Ok(true)
}

fn cancel(config: &SweepConfig, ids: &[String]) -> Result<bool, AppError> {
    let scheduler = Schedulers::load(config)?;
    let mut all_deleted = true;

    for id in ids {
        let handle = JobHandle::new(id.as_str());
        match scheduler.delete(&handle) {
            Ok(true) => info!("Deleted job {handle}"),
            Ok(false) => {
                error!("Scheduler refused to delete job {handle}");
                all_deleted = false;
            }
            Err(error) => {
                error!("Failed to delete job {handle}: {error}");
                all_deleted = false;
            }
        }
    }

    Ok(all_deleted)
}

fn execute(cli: Cli) -> Result<bool, AppError> {
    let mut config = SweepConfig::load_checked(&cli.config)?;
    if cli.max_wait.is_some() {
        config.max_wait = cli.max_wait;
    }

    match cli.command {
        None => sweep(&config, cli.no_sub, cli.single_queue),
        Some(Commands::List) => list(&config),
        Some(Commands::Cancel { ids }) => cancel(&config, &ids),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(error) = logging::init(&cli.log_config()) {
        eprintln!("{error}");
        return ExitCode::FAILURE;
    }

    match execute(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(error) => {
            error!("{error}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::ffi::OsStr;

    #[test]
    fn cli_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_sweep_flags() {
        let cli = Cli::parse_from([
            "scaler",
            "-c",
            "sweep.json",
            "--no-sub",
            "--single-queue",
            "--logfilename",
            "scaler.log",
        ]);

        assert_eq!(cli.config, PathBuf::from("sweep.json"));
        assert!(cli.no_sub && cli.single_queue);
        assert_eq!(cli.command, None);
        assert_eq!(
            cli.log_config(),
            LogConfig {
                level: Level::INFO,
                file: Some(PathBuf::from("scaler.log"))
            }
        );
    }

    #[test]
    fn level_flags() {
        let level = |flags: &[&str]| {
            let mut args = vec!["scaler", "--config", "c.json"];
            args.extend_from_slice(flags);
            Cli::parse_from(args).log_config().level
        };

        assert_eq!(level(&[]), Level::INFO);
        assert_eq!(level(&["--debug"]), Level::DEBUG);
        assert_eq!(level(&["--warning"]), Level::WARN);
        assert_eq!(level(&["--error"]), Level::ERROR);
        assert_eq!(level(&["--debug", "--error"]), Level::INFO);
    }

    #[test]
    fn parses_cancel() {
        let cli = Cli::parse_from(["scaler", "-c", "c.json", "cancel", "123", "456"]);

        assert_eq!(
            cli.command,
            Some(Commands::Cancel {
                ids: vec!["123".into(), "456".into()]
            })
        );
        assert!(Cli::try_parse_from(["scaler", "-c", "c.json", "cancel"]).is_err());
        assert!(Cli::try_parse_from(["scaler", "--no-sub"]).is_err());
    }

    #[test]
    fn dry_run_sweep_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join("template.pbs");
        std::fs::write(&template, "#PBS -l select={num_nodes}\nmpiexec -n {ranks} app\n").unwrap();
        let config_path = dir.path().join("sweep.json");
        std::fs::write(
            &config_path,
            format!(
                r#"{{"scheduler": "PBS", "run_type": "ranks", "range": [4, 8], "fixed_value": 2,
                    "output_path": "{}", "script_template_file": "{}",
                    "script_template_opts": {{"ranks_per_node": 4}}}}"#,
                dir.path().join("out").display(),
                template.display()
            ),
        )
        .unwrap();

        let cli = Cli::parse_from([
            OsStr::new("scaler"),
            OsStr::new("-c"),
            config_path.as_os_str(),
            OsStr::new("--no-sub"),
        ]);
        assert!(execute(cli).unwrap());

        let script = dir
            .path()
            .join("out/ranks/000002-threads_00008-ranks/000002-threads_00008-ranks.pbs.sh");
        assert_eq!(
            std::fs::read_to_string(script).unwrap(),
            "#PBS -l select=2\nmpiexec -n 8 app\n"
        );

        let jobs = collector::collect(&dir.path().join("out"), config::RunAxis::Ranks).unwrap();
        assert_eq!(jobs.len(), 2);
    }
}
