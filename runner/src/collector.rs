use crate::config::RunAxis;
use globset::{Glob, GlobMatcher};
use ignore::WalkBuilder;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use std::{
    fs,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::{debug, warn};

static JOB_DIRECTORY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d+)-threads_(\d+)-ranks$").expect("valid job directory regex")
});

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("Invalid job directory glob: {0}")]
    Glob(#[from] globset::Error),
}

/// A job directory found below `<output_path>/<axis>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDirectory {
    pub threads: u32,
    pub ranks: u32,
    pub path: PathBuf,
    /// rendered submission script, if one was written
    pub script: Option<PathBuf>,
    /// true if stdout/stderr of a failed submission were captured
    pub failed: bool,
}

fn matcher() -> Result<GlobMatcher, CollectError> {
    Ok(Glob::new("*-threads_*-ranks")?.compile_matcher())
}

fn parse_name(name: &str) -> Option<(u32, u32)> {
    let captures = JOB_DIRECTORY.captures(name)?;

    Some((captures[1].parse().ok()?, captures[2].parse().ok()?))
}

/// look for the rendered script and failure captures inside a job directory
fn inspect(path: &Path) -> (Option<PathBuf>, bool) {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(error) => {
            warn!(path = ?path, error = ?error, "Failed to read job directory");
            return (None, false);
        }
    };

    let names = entries
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .sorted()
        .collect_vec();

    let script = names
        .iter()
        .find(|name| name.ends_with(".sh"))
        .map(|name| path.join(name));
    let failed = names
        .iter()
        .any(|name| name.ends_with(".output.txt") || name.ends_with(".error.txt"));

    (script, failed)
}

/// All job directories of one axis, sorted by (threads, ranks).
/// A missing axis directory is an empty sweep.
pub fn collect(output_path: &Path, axis: RunAxis) -> Result<Vec<JobDirectory>, CollectError> {
    let root = output_path.join(axis.dir_name());
    if !root.is_dir() {
        debug!(path = ?root, "No job directories for this axis");
        return Ok(Vec::new());
    }

    let glob = matcher()?;
    let mut builder = WalkBuilder::new(&root);
    builder.standard_filters(false).max_depth(Some(1));

    let directories = builder
        .build()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(error) => {
                warn!("Failed to walk {}: {error}", root.display());
                None
            }
        })
        .filter(|entry| entry.depth() == 1)
        .filter(|entry| entry.file_type().is_some_and(|kind| kind.is_dir()))
        .filter(|entry| glob.is_match(entry.file_name()))
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy();
            match parse_name(&name) {
                Some((threads, ranks)) => {
                    let (script, failed) = inspect(entry.path());
                    Some(JobDirectory {
                        threads,
                        ranks,
                        path: entry.path().to_path_buf(),
                        script,
                        failed,
                    })
                }
                None => {
                    debug!("Skipping {name}, not a job directory");
                    None
                }
            }
        })
        .sorted_by_key(|directory| (directory.threads, directory.ranks))
        .collect_vec();

    Ok(directories)
}
