use crate::config::{CommandOverrides, RunAxis, SchedulerKind, SweepConfig, TemplateOptions};
use std::path::Path;

/// PBS sweep below `output` with `ranks_per_node = 4`
pub fn sweep_config(
    run_type: RunAxis,
    range: Vec<u32>,
    fixed_value: u32,
    output: &Path,
) -> SweepConfig {
    let mut options = TemplateOptions::new();
    options.insert("ranks_per_node".into(), 4.into());
    options.insert("job_name".into(), "scaling".into());

    SweepConfig {
        scheduler: SchedulerKind::Pbs,
        run_type,
        range,
        fixed_value,
        output_path: output.to_path_buf(),
        script_template_file: output.join("template.sh"),
        script_template_opts: options,
        poll_interval: 30,
        max_wait: None,
        command_timeout: 10,
        commands: CommandOverrides::default(),
    }
}

/// `sh -c <script> sh`, the scheduler appends its own argument as `$1`
pub fn shell(script: &str) -> Vec<String> {
    vec!["sh".into(), "-c".into(), script.into(), "sh".into()]
}
