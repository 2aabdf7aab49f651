//! Errors raised by the remote shell.

use std::net::IpAddr;

use thiserror::Error;

use crate::config::ConfigError;
use crate::wait::WaitError;

/// Errors surfaced while connecting, executing, or transferring files.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Raised when the shell configuration is unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Raised when a local command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when a local command is interrupted by cancellation.
    #[error("{program} was cancelled")]
    Cancelled {
        /// Command that was killed or never started.
        program: String,
    },
    /// Raised by a single failed attempt to open the session.
    #[error("ssh to {address} exited with status {status_text}: {stderr}")]
    ConnectAttempt {
        /// Address of the remote machine.
        address: IpAddr,
        /// Human readable exit status.
        status_text: String,
        /// Stderr captured from `ssh`.
        stderr: String,
    },
    /// Raised when the session could not be opened within the retry budget.
    #[error("could not open a session to {address}: {source}")]
    Connection {
        /// Address of the remote machine.
        address: IpAddr,
        /// Retry failure, including the last attempt's error.
        #[source]
        source: Box<WaitError<ShellError>>,
    },
    /// Raised when an operation is attempted on a closed session.
    #[error("remote session is closed")]
    SessionClosed,
    /// Raised when a checked command exits non-zero or without a status.
    #[error("remote command `{command}` exited with status {status_text}: {stderr}")]
    CommandFailed {
        /// Command line with secrets masked.
        command: String,
        /// Exit status as reported by the remote shell.
        status: Option<i32>,
        /// Human readable exit status.
        status_text: String,
        /// Stderr captured from the command.
        stderr: String,
    },
    /// Raised when a path probe returns neither "present" nor "absent".
    #[error("could not determine whether {path} exists (status {status_text}): {stderr}")]
    Probe {
        /// Remote path probed.
        path: String,
        /// Human readable exit status.
        status_text: String,
        /// Stderr captured from the probe.
        stderr: String,
    },
    /// Raised when a file transfer fails.
    #[error("{operation} {source_path} -> {destination} failed with status {status_text}: {stderr}")]
    Transfer {
        /// `upload` or `download`.
        operation: &'static str,
        /// Path read from.
        source_path: String,
        /// Path written to.
        destination: String,
        /// Human readable exit status.
        status_text: String,
        /// Stderr captured from `scp`.
        stderr: String,
    },
}

impl ShellError {
    /// Returns `true` when a command or session establishment was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Connection { source, .. } => match source.as_ref() {
                WaitError::Cancelled { .. } => true,
                WaitError::Exhausted { last, .. } => last.is_cancelled(),
                _ => false,
            },
            _ => false,
        }
    }
}
