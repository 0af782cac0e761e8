//! Bounded-time execution of external tools.

use std::ffi::OsString;
use std::io::Read;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub status: Option<i32>,
    pub success: bool,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("failed to spawn: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed while waiting for exit: {0}")]
    Wait(#[source] std::io::Error),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// Runs `binary args..` in `cwd`, capturing both streams.
///
/// With a timeout the child is killed and reaped once the deadline passes; its reader
/// threads are detached because grandchildren may still hold the pipes open.
pub fn run_captured(
    binary: &Path,
    cwd: &Path,
    args: &[OsString],
    envs: &[(&str, &str)],
    timeout: Option<Duration>,
) -> Result<ProcessOutput, ProcessError> {
    let mut command = Command::new(binary);
    command
        .current_dir(cwd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for (key, value) in envs {
        command.env(key, value);
    }

    let mut child = command.spawn().map_err(ProcessError::Spawn)?;
    let stdout_reader = child.stdout.take().map(spawn_reader);
    let stderr_reader = child.stderr.take().map(spawn_reader);

    let started = Instant::now();
    let status: ExitStatus = loop {
        match child.try_wait().map_err(ProcessError::Wait)? {
            Some(status) => break status,
            None => {
                if let Some(limit) = timeout {
                    if started.elapsed() >= limit {
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(ProcessError::Timeout(limit));
                    }
                }
                thread::sleep(POLL_INTERVAL);
            }
        }
    };

    let stdout = stdout_reader
        .map(|handle| handle.join().unwrap_or_default())
        .unwrap_or_default();
    let stderr = stderr_reader
        .map(|handle| handle.join().unwrap_or_default())
        .unwrap_or_default();

    Ok(ProcessOutput {
        status: status.code(),
        success: status.success(),
        stdout,
        stderr,
    })
}

fn spawn_reader<R>(mut stream: R) -> thread::JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = stream.read_to_end(&mut buf);
        buf
    })
}

pub fn render_command(binary: &Path, args: &[OsString]) -> String {
    let mut rendered = binary.to_string_lossy().into_owned();
    for arg in args {
        rendered.push(' ');
        rendered.push_str(&arg.to_string_lossy());
    }
    rendered
}
