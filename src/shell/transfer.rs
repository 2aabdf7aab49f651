//! File transfer over the persistent session.

use camino::Utf8Path;
use tracing::debug;

use super::{CommandRunner, RemoteShell, ShellError};

/// Copies files to and from the remote machine over the shell's session.
///
/// Obtained from [`RemoteShell::open_transfer`]; borrowing the shell keeps
/// the session alive for as long as the transfer session exists.
#[derive(Debug)]
pub struct TransferSession<'a, R: CommandRunner> {
    shell: &'a RemoteShell<R>,
}

impl<'a, R: CommandRunner> TransferSession<'a, R> {
    pub(super) const fn new(shell: &'a RemoteShell<R>) -> Self {
        Self { shell }
    }

    /// Uploads `local` to the remote path `remote`, replacing any existing
    /// file.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Transfer`] when `scp` fails, or
    /// [`ShellError::SessionClosed`] when the session has been closed.
    pub fn put(&self, local: &Utf8Path, remote: &str) -> Result<(), ShellError> {
        let destination = self.shell.scp_target(remote);
        self.copy("upload", local.as_str(), &destination, remote)
    }

    /// Downloads the remote path `remote` to `local`.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Transfer`] when `scp` fails, or
    /// [`ShellError::SessionClosed`] when the session has been closed.
    pub fn get(&self, remote: &str, local: &Utf8Path) -> Result<(), ShellError> {
        let source = self.shell.scp_target(remote);
        self.copy("download", &source, local.as_str(), remote)
    }

    /// Reports whether `remote` exists.
    ///
    /// # Errors
    ///
    /// Returns [`ShellError::Probe`] when existence cannot be determined.
    pub fn stat(&self, remote: &str) -> Result<bool, ShellError> {
        self.shell.path_exists(remote)
    }

    fn copy(
        &self,
        operation: &'static str,
        from: &str,
        to: &str,
        remote: &str,
    ) -> Result<(), ShellError> {
        self.shell.ensure_open()?;
        debug!(operation, from, to, "copying file");
        let output = self
            .shell
            .runner()
            .run(self.shell.scp_bin(), &self.shell.scp_args(from, to))?;
        if output.is_success() {
            return Ok(());
        }

        let (source_path, destination) = if operation == "upload" {
            (from.to_owned(), remote.to_owned())
        } else {
            (remote.to_owned(), to.to_owned())
        };
        Err(ShellError::Transfer {
            operation,
            source_path,
            destination,
            status_text: output.status_text(),
            stderr: output.stderr,
        })
    }
}
