use std::{
    io::{self, Read},
    path::Path,
    process::{Command, Stdio},
    sync::mpsc::{self, Receiver, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};
use thiserror::Error;
use tracing::{debug, trace, warn};
use wait_timeout::ChildExt;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("Command is empty")]
    Empty,
    #[error("Failed to spawn {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("Failed to wait for {program}: {source}")]
    Wait { program: String, source: io::Error },
    #[error("{program} did not finish within {timeout:?}")]
    Timeout { program: String, timeout: Duration },
}

#[derive(Debug, Clone)]
/// everything a scheduler command reports back
pub struct RunOutput {
    pub runtime: Duration,
    pub stdout: String,
    pub stderr: String,
    /// `None` if the process was terminated by a signal
    pub status: Option<i32>,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Run `command` (program plus leading arguments) followed by `args`.
/// Both pipes are drained while waiting so chatty commands can't block on a full pipe.
/// The whole call, reading the output included, takes at most `timeout`.
pub fn run(
    command: &[String],
    args: &[&str],
    cwd: Option<&Path>,
    timeout: Duration,
) -> Result<RunOutput, CommandError> {
    let (program, leading) = command.split_first().ok_or(CommandError::Empty)?;

    let mut builder = Command::new(program);
    builder
        .args(leading)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = cwd {
        builder.current_dir(cwd);
    }

    debug!(program = %program, args = ?args, cwd = ?cwd, "Running scheduler command");
    let start = Instant::now();
    let deadline = start + timeout;
    let timed_out = || CommandError::Timeout {
        program: program.clone(),
        timeout,
    };
    let mut child = builder.spawn().map_err(|source| CommandError::Spawn {
        program: program.clone(),
        source,
    })?;

    let stdout = child.stdout.take().map(drain);
    let stderr = child.stderr.take().map(drain);

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            if let Err(error) = child.kill() {
                warn!(error = ?error, "Failed to kill {program} after timeout");
            }
            let _ = child.wait();

            return Err(timed_out());
        }
        Err(source) => {
            return Err(CommandError::Wait {
                program: program.clone(),
                source,
            })
        }
    };

    // a background process started by the command can keep the pipes open
    let (stdout, stderr) = match (collect(stdout, deadline), collect(stderr, deadline)) {
        (Ok(stdout), Ok(stderr)) => (stdout, stderr),
        _ => {
            warn!("{program} exited but its output was still open after {timeout:?}");
            return Err(timed_out());
        }
    };

    let output = RunOutput {
        runtime: start.elapsed(),
        stdout,
        stderr,
        status: status.code(),
    };
    trace!(runtime = ?output.runtime, stdout = %output.stdout, "{program} finished");

    Ok(output)
}

fn drain<R: Read + Send + 'static>(mut pipe: R) -> Receiver<String> {
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let mut buffer = Vec::new();
        if let Err(error) = pipe.read_to_end(&mut buffer) {
            warn!(error = ?error, "Failed to read command output");
        }

        // the receiver is gone if the command already timed out
        let _ = sender.send(String::from_utf8_lossy(&buffer).into_owned());
    });

    receiver
}

fn collect(
    pipe: Option<Receiver<String>>,
    deadline: Instant,
) -> Result<String, RecvTimeoutError> {
    let Some(pipe) = pipe else {
        return Ok(String::new());
    };

    match pipe.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Err(RecvTimeoutError::Disconnected) => Ok(String::new()),
        result => result,
    }
}
