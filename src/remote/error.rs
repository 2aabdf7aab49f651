//! Errors raised by [`super::RemoteHandle`].

use camino::Utf8PathBuf;
use thiserror::Error;

use crate::wait::WaitError;

/// Errors raised by status and address lookups.
#[derive(Debug, Error)]
pub enum HandleError<E>
where
    E: std::error::Error + 'static,
{
    /// The provider request failed in transport or was refused.
    #[error("provider lookup for {instance} failed: {source}")]
    Provider {
        /// Instance being queried.
        instance: String,
        /// Error returned by the provider.
        #[source]
        source: E,
    },
    /// The instance has no public address assigned.
    #[error("instance {instance} has no public address")]
    AddressUnavailable {
        /// Instance being queried.
        instance: String,
    },
}

/// Errors raised while bringing the instance to `running`.
#[derive(Debug, Error)]
pub enum StartError<E>
where
    E: std::error::Error + 'static,
{
    /// A status or address lookup failed.
    #[error(transparent)]
    Lookup(#[from] HandleError<E>),
    /// The provider rejected the start request; power state is now unknown.
    #[error("start request for {instance} failed: {source}")]
    Request {
        /// Instance being started.
        instance: String,
        /// Error returned by the provider.
        #[source]
        source: E,
    },
    /// The instance never reported `running`.
    #[error("instance {instance} did not reach running: {source}")]
    Wait {
        /// Instance being started.
        instance: String,
        /// Underlying wait failure.
        #[source]
        source: WaitError<E>,
    },
}

impl<E> StartError<E>
where
    E: std::error::Error + 'static,
{
    /// Returns `true` when the start was abandoned because of cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Wait { source, .. } if source.is_cancelled())
    }
}

/// Errors raised while bringing the instance to `stopped`.
#[derive(Debug, Error)]
pub enum StopError<E>
where
    E: std::error::Error + 'static,
{
    /// A status lookup failed.
    #[error(transparent)]
    Lookup(#[from] HandleError<E>),
    /// The provider rejected the stop request.
    #[error("stop request for {instance} failed: {source}")]
    Request {
        /// Instance being stopped.
        instance: String,
        /// Error returned by the provider.
        #[source]
        source: E,
    },
    /// The instance never reported `stopped`.
    #[error("instance {instance} did not reach stopped: {source}")]
    Wait {
        /// Instance being stopped.
        instance: String,
        /// Underlying wait failure.
        #[source]
        source: WaitError<E>,
    },
}

/// Errors raised by out-of-band script execution.
#[derive(Debug, Error)]
pub enum ScriptError<E>
where
    E: std::error::Error + 'static,
{
    /// The provider has no out-of-band command channel.
    #[error("remote scripts are not supported for instance {instance}")]
    Unsupported {
        /// Instance the script was meant for.
        instance: String,
    },
    /// The local script file does not exist.
    #[error("script not found: {path}")]
    ScriptNotFound {
        /// Path that was requested.
        path: Utf8PathBuf,
    },
    /// The local script exists but could not be read.
    #[error("failed to read script {path}: {message}")]
    Read {
        /// Path that was requested.
        path: Utf8PathBuf,
        /// Operating system error string.
        message: String,
    },
    /// The provider command channel refused the script.
    #[error("script submission rejected: {source}")]
    Rejected {
        /// Error returned by the provider.
        #[source]
        source: E,
    },
    /// The script ran and reported failure.
    #[error("script failed with status {}: {stderr}", exit_code.map_or_else(|| String::from("unknown"), |code| code.to_string()))]
    Failed {
        /// Exit status reported by the provider, when known.
        exit_code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// Polling for the script result failed, timed out, or was cancelled.
    #[error("script did not complete: {0}")]
    Wait(#[source] WaitError<E>),
}
