use super::Dialect;
use once_cell::sync::Lazy;
use regex::Regex;

// "1234.server", also accepts array jobs ("1234[].server")
static JOB_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d+(?:\[\d*\])?)(?:\.\S*)?$").expect("valid PBS job id regex"));

/// PBS/Torque style batch systems (`qsub`, `qstat`, `qdel`)
#[derive(Debug, Clone, Copy)]
pub struct Pbs;

impl Dialect for Pbs {
    const NAME: &'static str = "PBS";
    const SUBMIT: &'static [&'static str] = &["qsub"];
    const STATUS: &'static [&'static str] = &["qstat"];
    const DELETE: &'static [&'static str] = &["qdel"];
    const SCRIPT_SUFFIX: &'static str = "pbs.sh";
    const REQUIRES_RANKS_PER_NODE: bool = true;

    fn parse_job_id(stdout: &str) -> Option<String> {
        let line = stdout.lines().next()?.trim();

        JOB_ID
            .captures(line)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::RunAxis,
        request::JobRequest,
        schedulers::{BatchScheduler, JobHandle, Scheduler, SchedulerError},
        template::TemplateError,
        test_util::{shell, sweep_config},
    };
    use std::{fs, path::Path};

    const TEMPLATE: &str = "#!/bin/bash\n#PBS -N {job_name}\n#PBS -l select={num_nodes}\n\
                            export OMP_NUM_THREADS={threads}\nmpiexec -n {ranks} app\n";

    /// PBS scheduler below `dir`, with the template written and `qsub` replaced by `submit`
    fn scheduler(dir: &Path, submit: &str) -> (BatchScheduler<Pbs>, JobRequest) {
        let mut config = sweep_config(RunAxis::Threads, vec![2], 8, dir);
        fs::write(&config.script_template_file, TEMPLATE).unwrap();
        config.commands.submit = Some(shell(submit));

        let request = JobRequest::build(&config, 2).unwrap();
        (BatchScheduler::load(&config).unwrap(), request)
    }

    #[test]
    fn parses_job_ids() {
        assert_eq!(Pbs::parse_job_id("12345.headnode\n"), Some("12345".into()));
        assert_eq!(Pbs::parse_job_id("12345\n"), Some("12345".into()));
        assert_eq!(Pbs::parse_job_id("678[].pbs01.cluster\n"), Some("678[]".into()));
        assert_eq!(Pbs::parse_job_id(""), None);
        assert_eq!(Pbs::parse_job_id("qsub: Job rejected by all queues\n"), None);
    }

    #[test]
    fn submit_renders_and_parses_id() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, request) =
            scheduler(dir.path(), "test -f \"$1\" && echo 12345.headnode");

        let handle = scheduler.submit(&request, false).unwrap();
        assert_eq!(handle, JobHandle::new("12345"));

        let script = request
            .working_path
            .join("000002-threads_00008-ranks.pbs.sh");
        assert_eq!(
            fs::read_to_string(script).unwrap(),
            "#!/bin/bash\n#PBS -N scaling\n#PBS -l select=2\nexport OMP_NUM_THREADS=2\nmpiexec -n 8 app\n"
        );
    }

    #[test]
    fn node_count_and_format_specs_render() {
        let dir = tempfile::tempdir().unwrap();
        let (scheduler, request) = scheduler(dir.path(), "true");
        fs::write(
            dir.path().join("template.sh"),
            "#PBS -l nodes={node_count}\n#PBS -N scale_{threads:03d}_{ranks:04d}\n",
        )
        .unwrap();

        let script = scheduler.write_script(&request).unwrap();

        assert_eq!(
            fs::read_to_string(script).unwrap(),
            "#PBS -l nodes=2\n#PBS -N scale_002_0008\n"
        );
    }

    #[test]
    fn unparseable_output_yields_empty_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, request) = scheduler(dir.path(), "true");

        assert!(scheduler.submit(&request, false).unwrap().is_none());
    }

    #[test]
    fn dry_run_spawns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, request) = scheduler(dir.path(), "touch submitted");

        let handle = scheduler.submit(&request, true).unwrap();

        assert!(handle.is_none());
        assert!(request.working_path.is_dir());
        assert!(request
            .working_path
            .join("000002-threads_00008-ranks.pbs.sh")
            .is_file());
        assert!(!request.working_path.join("submitted").exists());
    }

    #[test]
    fn failed_submission_is_captured() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, request) =
            scheduler(dir.path(), "echo partial; echo 'qsub: Unknown queue' >&2; exit 2");

        match scheduler.submit(&request, false) {
            Err(SchedulerError::Submission { status, .. }) => assert_eq!(status, Some(2)),
            other => panic!("expected a submission error, got {other:?}"),
        }

        let stem = request.working_path.join("000002-threads_00008-ranks.pbs.sh");
        let read = |suffix: &str| {
            fs::read_to_string(format!("{}.{suffix}", stem.display())).unwrap()
        };
        assert_eq!(read("output.txt"), "partial\n");
        assert_eq!(read("error.txt"), "qsub: Unknown queue\n");
    }

    #[test]
    fn unreadable_template_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, request) = scheduler(dir.path(), "true");
        fs::remove_file(dir.path().join("template.sh")).unwrap();

        let error = scheduler.submit(&request, true).unwrap_err();
        assert!(matches!(error, SchedulerError::TemplateUnreadable { .. }));
        assert!(error.is_fatal());
    }

    #[test]
    fn template_is_cached_per_instance() {
        let dir = tempfile::tempdir().unwrap();
        let (mut first, request) = scheduler(dir.path(), "true");
        first.submit(&request, true).unwrap();

        fs::remove_file(dir.path().join("template.sh")).unwrap();

        // the cached copy keeps working, a fresh instance has to read the file again
        assert!(first.submit(&request, true).is_ok());
        let config = sweep_config(RunAxis::Threads, vec![2], 8, dir.path());
        let mut second = BatchScheduler::<Pbs>::load(&config).unwrap();
        assert!(second.submit(&request, true).is_err());
    }

    #[test]
    fn missing_placeholder_is_not_submitted() {
        let dir = tempfile::tempdir().unwrap();
        let (mut scheduler, request) = scheduler(dir.path(), "touch submitted");
        fs::write(dir.path().join("template.sh"), "#PBS -q {queue}\n").unwrap();

        match scheduler.submit(&request, false) {
            Err(SchedulerError::Template(TemplateError::MissingPlaceholder(name))) => {
                assert_eq!(name, "queue")
            }
            other => panic!("expected a template error, got {other:?}"),
        }
        assert!(!request.working_path.join("submitted").exists());
    }

    #[test]
    fn requires_ranks_per_node() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sweep_config(RunAxis::Threads, vec![2], 8, dir.path());
        config.script_template_opts.remove("ranks_per_node");

        assert!(matches!(
            BatchScheduler::<Pbs>::load(&config),
            Err(SchedulerError::Configuration(_))
        ));
    }

    #[test]
    fn status_uses_substring_match() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sweep_config(RunAxis::Threads, vec![2], 8, dir.path());

        config.commands.status = Some(shell("echo '12345.headnode R queue1'"));
        let scheduler = BatchScheduler::<Pbs>::load(&config).unwrap();
        assert!(scheduler.status(&JobHandle::new("12345")).unwrap());

        config.commands.status = Some(shell("echo '67890.headnode R queue1'"));
        let scheduler = BatchScheduler::<Pbs>::load(&config).unwrap();
        assert!(!scheduler.status(&JobHandle::new("12345")).unwrap());
        assert!(!scheduler.status(&JobHandle::none()).unwrap());
    }

    #[test]
    fn delete_reports_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = sweep_config(RunAxis::Threads, vec![2], 8, dir.path());

        config.commands.delete = Some(shell("test \"$1\" = 12345"));
        let scheduler = BatchScheduler::<Pbs>::load(&config).unwrap();

        assert!(scheduler.delete(&JobHandle::new("12345")).unwrap());
        assert!(!scheduler.delete(&JobHandle::new("999")).unwrap());
        assert!(!scheduler.delete(&JobHandle::none()).unwrap());
    }
}
