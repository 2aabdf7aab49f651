//! Command runner abstraction over local processes.

use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::ShellError;

/// Result of running an external command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Exit status formatted for messages.
    #[must_use]
    pub fn status_text(&self) -> String {
        self.code
            .map_or_else(|| String::from("unknown"), |code| code.to_string())
    }
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Spawn`] if the command cannot be started, or
    /// [`ShellError::Cancelled`] if the runner was cancelled before the
    /// command finished.
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ShellError>;

    /// Runs `program`, forwarding stdout and stderr line by line to the local
    /// terminal while also capturing them.
    ///
    /// # Errors
    ///
    /// As [`CommandRunner::run`], plus [`ShellError::Spawn`] when the output
    /// cannot be read.
    fn run_streaming(&self, program: &str, args: &[OsString])
    -> Result<CommandOutput, ShellError>;

    /// Runs a teardown command that must complete even after cancellation.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Spawn`] if the command cannot be started.
    fn run_to_completion(
        &self,
        program: &str,
        args: &[OsString],
    ) -> Result<CommandOutput, ShellError> {
        self.run(program, args)
    }
}

/// Delay between checks for child exit and cancellation.
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Real command runner that shells out to the host operating system.
///
/// When its token fires, the running child is killed and the call returns
/// [`ShellError::Cancelled`]; commands are not started after cancellation.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner {
    cancel: CancellationToken,
}

impl ProcessCommandRunner {
    /// Creates a runner whose children are killed when `cancel` fires.
    #[must_use]
    pub const fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    fn execute(
        &self,
        program: &str,
        args: &[OsString],
        forward: bool,
        cancellable: bool,
    ) -> Result<CommandOutput, ShellError> {
        if cancellable && self.cancel.is_cancelled() {
            return Err(cancelled(program));
        }
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|err| spawn_error(program, &err))?;

        let (Some(child_stdout), Some(child_stderr)) = (child.stdout.take(), child.stderr.take())
        else {
            return Err(ShellError::Spawn {
                program: program.to_owned(),
                message: String::from("child output pipes were not captured"),
            });
        };

        thread::scope(|scope| {
            let out = scope.spawn(move || {
                if forward {
                    forward_lines(child_stdout, io::stdout())
                } else {
                    forward_lines(child_stdout, io::sink())
                }
            });
            let err = scope.spawn(move || {
                if forward {
                    forward_lines(child_stderr, io::stderr())
                } else {
                    forward_lines(child_stderr, io::sink())
                }
            });
            let status = if cancellable {
                self.wait_or_kill(program, &mut child)
            } else {
                child.wait().map_err(|wait_err| spawn_error(program, &wait_err))
            };
            let stdout = join_forwarder(program, out);
            let stderr = join_forwarder(program, err);
            Ok(CommandOutput {
                code: status?.code(),
                stdout: stdout?,
                stderr: stderr?,
            })
        })
    }

    fn wait_or_kill(&self, program: &str, child: &mut Child) -> Result<ExitStatus, ShellError> {
        loop {
            if let Some(status) = child.try_wait().map_err(|err| spawn_error(program, &err))? {
                return Ok(status);
            }
            if self.cancel.is_cancelled() {
                warn!(program, "cancelled, killing child process");
                child.kill().ok();
                child.wait().ok();
                return Err(cancelled(program));
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }
}

impl CommandRunner for ProcessCommandRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ShellError> {
        self.execute(program, args, false, true)
    }

    fn run_streaming(
        &self,
        program: &str,
        args: &[OsString],
    ) -> Result<CommandOutput, ShellError> {
        self.execute(program, args, true, true)
    }

    fn run_to_completion(
        &self,
        program: &str,
        args: &[OsString],
    ) -> Result<CommandOutput, ShellError> {
        self.execute(program, args, false, false)
    }
}

fn cancelled(program: &str) -> ShellError {
    ShellError::Cancelled {
        program: program.to_owned(),
    }
}

fn spawn_error(program: &str, err: &io::Error) -> ShellError {
    ShellError::Spawn {
        program: program.to_owned(),
        message: err.to_string(),
    }
}

fn join_forwarder(
    program: &str,
    handle: thread::ScopedJoinHandle<'_, io::Result<String>>,
) -> Result<String, ShellError> {
    handle
        .join()
        .map_err(|_| ShellError::Spawn {
            program: program.to_owned(),
            message: String::from("output forwarder panicked"),
        })?
        .map_err(|err| spawn_error(program, &err))
}

/// Copies `source` to `sink` one line at a time, returning everything read.
fn forward_lines<R: Read, W: Write>(source: R, mut sink: W) -> io::Result<String> {
    let mut reader = BufReader::new(source);
    let mut captured = String::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        sink.write_all(&line)?;
        sink.flush()?;
        captured.push_str(&String::from_utf8_lossy(&line));
    }
    Ok(captured)
}
