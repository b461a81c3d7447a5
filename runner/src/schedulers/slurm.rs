use super::Dialect;
use once_cell::sync::Lazy;
use regex::Regex;

// `sbatch --parsable` prints "<id>" or "<id>;<cluster>", plain sbatch "Submitted batch job <id>"
static JOB_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:Submitted batch job )?(\d+)(?:;\S*)?$").expect("valid Slurm job id regex")
});

/// Slurm (`sbatch`, `squeue`, `scancel`)
#[derive(Debug, Clone, Copy)]
pub struct Slurm;

impl Dialect for Slurm {
    const NAME: &'static str = "Slurm";
    const SUBMIT: &'static [&'static str] = &["sbatch", "--parsable"];
    const STATUS: &'static [&'static str] = &["squeue", "-h", "-j"];
    const DELETE: &'static [&'static str] = &["scancel"];
    const SCRIPT_SUFFIX: &'static str = "slurm.sh";
    const REQUIRES_RANKS_PER_NODE: bool = false;

    fn parse_job_id(stdout: &str) -> Option<String> {
        let line = stdout.lines().next()?.trim();

        JOB_ID
            .captures(line)
            .and_then(|captures| captures.get(1))
            .map(|id| id.as_str().to_owned())
    }
}
