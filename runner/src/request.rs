use crate::config::{RunAxis, SweepConfig};
use std::{fs, io, path::PathBuf};
use tracing::{debug, warn};

/// Concrete resources and location of one job of a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    pub threads: u32,
    pub ranks: u32,
    /// only known if `ranks_per_node` is configured
    pub node_count: Option<u32>,
    pub working_path: PathBuf,
}

/// `<threads>-threads_<ranks>-ranks`, zero padded so listings sort numerically
pub fn file_stem(threads: u32, ranks: u32) -> String {
    format!("{threads:06}-threads_{ranks:05}-ranks")
}

impl JobRequest {
    /// resolve threads/ranks for `value` and create the working directory
    pub fn build(config: &SweepConfig, value: u32) -> Result<Self, io::Error> {
        let request = Self::resolve(config, value);

        fs::create_dir_all(&request.working_path)?;
        debug!(path = ?request.working_path, "Prepared job directory");

        Ok(request)
    }

    /// same as `build` without touching the filesystem
    pub fn resolve(config: &SweepConfig, value: u32) -> Self {
        let (threads, ranks) = match config.run_type {
            RunAxis::Threads => (value, config.fixed_value),
            RunAxis::Ranks => (config.fixed_value, value),
        };

        let node_count = config.ranks_per_node().map(|per_node| ranks / per_node);
        if node_count == Some(0) {
            warn!(
                ranks = ranks,
                "Fewer ranks than ranks_per_node, the job script will ask for 0 nodes"
            );
        }

        let working_path = config
            .output_path
            .join(config.run_type.dir_name())
            .join(file_stem(threads, ranks));

        Self {
            threads,
            ranks,
            node_count,
            working_path,
        }
    }

    pub fn file_stem(&self) -> String {
        file_stem(self.threads, self.ranks)
    }
}
