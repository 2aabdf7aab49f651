//! Persistent remote shell over the system OpenSSH client.
//!
//! [`RemoteShell`] opens one OpenSSH control master per build and multiplexes
//! every command and `scp` transfer over it, so authentication happens once.
//! Remote commands target the Windows `cmd.exe` shell and are built with
//! [`RemoteCommand`] so quoting and secret redaction stay consistent.

use std::ffi::OsString;
use std::net::IpAddr;

use camino::{Utf8Path, Utf8PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::wait::retry_with_backoff;

mod command;
mod config;
mod error;
mod transfer;
mod types;

pub use command::{Arg, Invocation, RemoteCommand};
pub use config::{DEFAULT_IDENTITY_FILE, DEFAULT_SSH_USER, ShellConfig, expand_tilde};
pub use error::ShellError;
pub use transfer::TransferSession;
pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner};

/// One authenticated session to the build machine.
///
/// The session is closed exactly once, either through [`RemoteShell::close`]
/// or on drop.
#[derive(Debug)]
pub struct RemoteShell<R: CommandRunner> {
    config: ShellConfig,
    runner: R,
    address: IpAddr,
    control_path: Utf8PathBuf,
    open: bool,
}

impl RemoteShell<ProcessCommandRunner> {
    /// Connects using the real process runner.
    ///
    /// # Errors
    ///
    /// See [`RemoteShell::connect`].
    pub async fn connect_with_process_runner(
        config: ShellConfig,
        address: IpAddr,
        cancel: &CancellationToken,
    ) -> Result<Self, ShellError> {
        Self::connect(
            config,
            ProcessCommandRunner::new(cancel.clone()),
            address,
            cancel,
        )
        .await
    }
}

impl<R: CommandRunner> RemoteShell<R> {
    /// Opens a session to `address`, retrying with exponential backoff until
    /// the configured connection budget is spent or `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Config`] for invalid settings and
    /// [`ShellError::Connection`] when every attempt fails or the wait is
    /// cancelled.
    pub async fn connect(
        config: ShellConfig,
        runner: R,
        address: IpAddr,
        cancel: &CancellationToken,
    ) -> Result<Self, ShellError> {
        config.validate()?;
        let control_path = config
            .control_dir()
            .join(format!("lazybuild-{}.sock", Uuid::new_v4().simple()));
        let mut shell = Self {
            config,
            runner,
            address,
            control_path,
            open: false,
        };
        shell.establish(cancel).await?;
        Ok(shell)
    }

    /// Replaces the underlying session while keeping this handle. A failure
    /// to close the old session is logged, not returned.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Connection`] when the new session cannot be
    /// opened.
    pub async fn reconnect(&mut self, cancel: &CancellationToken) -> Result<(), ShellError> {
        if self.open
            && let Err(err) = self.close()
        {
            warn!(address = %self.address, error = %err, "failed to close stale session");
        }
        self.establish(cancel).await
    }

    /// Address of the remote machine.
    #[must_use]
    pub const fn address(&self) -> IpAddr {
        self.address
    }

    /// Control socket backing the session.
    #[must_use]
    pub fn control_path(&self) -> &Utf8Path {
        &self.control_path
    }

    /// Whether the session is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// Runs `command` and returns its output regardless of exit status. When
    /// `stream_output` is set, output is forwarded line by line as it arrives.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::SessionClosed`] after [`RemoteShell::close`], or
    /// [`ShellError::Spawn`] when `ssh` cannot be started.
    pub fn execute(
        &self,
        command: &RemoteCommand,
        stream_output: bool,
    ) -> Result<CommandOutput, ShellError> {
        self.ensure_open()?;
        debug!(command = %command.redacted(), stream_output, "running remote command");
        let args = self.exec_args(&command.render());
        if stream_output {
            self.runner.run_streaming(&self.config.ssh_bin, &args)
        } else {
            self.runner.run(&self.config.ssh_bin, &args)
        }
    }

    /// Runs `command` and fails unless it exits with status zero.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::CommandFailed`] carrying the redacted command
    /// line and stderr when the exit status is non-zero or missing.
    pub fn execute_checked(
        &self,
        command: &RemoteCommand,
        stream_output: bool,
    ) -> Result<CommandOutput, ShellError> {
        let output = self.execute(command, stream_output)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(ShellError::CommandFailed {
            command: command.redacted(),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }

    /// Reports whether `path` exists on the remote machine.
    ///
    /// Absence is `Ok(false)`; a transport failure or any unexpected status
    /// is an error rather than a guess.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Probe`] when the probe neither confirms nor
    /// denies the path.
    pub fn path_exists(&self, path: &str) -> Result<bool, ShellError> {
        let probe = RemoteCommand::ProbeExists {
            path: path.to_owned(),
        };
        let output = self.execute(&probe, false)?;
        match output.code {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            _ => Err(ShellError::Probe {
                path: path.to_owned(),
                status_text: output.status_text(),
                stderr: output.stderr,
            }),
        }
    }

    /// Opens a file transfer session over the same connection.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::SessionClosed`] after [`RemoteShell::close`].
    pub fn open_transfer(&self) -> Result<TransferSession<'_, R>, ShellError> {
        self.ensure_open()?;
        Ok(TransferSession::new(self))
    }

    /// Closes the session. Closing an already closed session is logged and
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::CommandFailed`] when the control master refuses
    /// to exit. The session is considered closed either way.
    pub fn close(&mut self) -> Result<(), ShellError> {
        if !self.open {
            warn!(control_path = %self.control_path, "remote session already closed");
            return Ok(());
        }
        self.open = false;

        let output = self
            .runner
            .run_to_completion(&self.config.ssh_bin, &self.exit_args())?;
        if output.is_success() {
            info!(address = %self.address, "remote session closed");
            return Ok(());
        }
        Err(ShellError::CommandFailed {
            command: String::from("ssh -O exit"),
            status: output.code,
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }

    pub(crate) const fn runner(&self) -> &R {
        &self.runner
    }

    pub(crate) fn scp_bin(&self) -> &str {
        &self.config.scp_bin
    }

    pub(crate) fn ensure_open(&self) -> Result<(), ShellError> {
        if self.open {
            Ok(())
        } else {
            Err(ShellError::SessionClosed)
        }
    }

    async fn establish(&mut self, cancel: &CancellationToken) -> Result<(), ShellError> {
        let args = self.master_args();
        let args = args.as_slice();
        let program = self.config.ssh_bin.as_str();
        let runner = &self.runner;
        let address = self.address;

        retry_with_backoff(
            self.config.backoff_policy(),
            cancel,
            "remote session",
            |attempt| async move {
                debug!(%address, attempt, "opening remote session");
                let output = runner.run(program, args)?;
                if output.is_success() {
                    return Ok(());
                }
                Err(ShellError::ConnectAttempt {
                    address,
                    status_text: output.status_text(),
                    stderr: output.stderr,
                })
            },
        )
        .await
        .map_err(|source| ShellError::Connection {
            address,
            source: Box::new(source),
        })?;

        self.open = true;
        info!(%address, control_path = %self.control_path, "remote session open");
        Ok(())
    }

    fn target(&self) -> String {
        format!("{}@{}", self.config.ssh_user, self.address)
    }

    /// Remote endpoint in `scp` syntax. Windows drive paths are rewritten
    /// to the `/C:/dir/file` form the Windows SFTP server expects.
    pub(crate) fn scp_target(&self, remote: &str) -> String {
        let host = match self.address {
            IpAddr::V4(v4) => v4.to_string(),
            IpAddr::V6(v6) => format!("[{v6}]"),
        };
        let mut path = remote.replace('\\', "/");
        if path.as_bytes().get(1) == Some(&b':') {
            path.insert(0, '/');
        }
        format!("{}@{host}:{path}", self.config.ssh_user)
    }

    fn session_options(&self) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-i"),
            OsString::from(expand_tilde(&self.config.ssh_identity_file)),
            OsString::from("-o"),
            OsString::from("BatchMode=yes"),
            OsString::from("-o"),
            OsString::from(format!(
                "ConnectTimeout={}",
                self.config.connect_attempt_timeout_secs
            )),
            OsString::from("-o"),
            OsString::from(format!("ControlPath={}", self.control_path)),
        ];

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        args
    }

    fn ssh_args(&self, leading: &[&str], trailing: &[&str]) -> Vec<OsString> {
        let mut args: Vec<OsString> = leading.iter().map(OsString::from).collect();
        args.push(OsString::from("-p"));
        args.push(OsString::from(self.config.ssh_port.to_string()));
        args.extend(self.session_options());
        args.push(OsString::from(self.target()));
        args.extend(trailing.iter().map(OsString::from));
        args
    }

    pub(crate) fn master_args(&self) -> Vec<OsString> {
        self.ssh_args(&["-M", "-N", "-f"], &[])
    }

    pub(crate) fn exec_args(&self, command: &str) -> Vec<OsString> {
        self.ssh_args(&[], &[command])
    }

    pub(crate) fn exit_args(&self) -> Vec<OsString> {
        self.ssh_args(&["-O", "exit"], &[])
    }

    pub(crate) fn scp_args(&self, from: &str, to: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-q"),
            OsString::from("-P"),
            OsString::from(self.config.ssh_port.to_string()),
        ];
        args.extend(self.session_options());
        args.push(OsString::from(from));
        args.push(OsString::from(to));
        args
    }
}

impl<R: CommandRunner> Drop for RemoteShell<R> {
    fn drop(&mut self) {
        if self.open
            && let Err(err) = self.close()
        {
            warn!(address = %self.address, error = %err, "failed to close remote session");
        }
    }
}

#[cfg(test)]
mod tests;
