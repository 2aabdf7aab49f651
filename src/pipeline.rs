//! End-to-end build against the single build machine.
//!
//! The pipeline boots the instance, opens one remote session, runs every
//! build stage, closes the session, and finally applies the shutdown policy.
//! Shutdown is attempted even when the build fails; a shutdown failure after
//! a failed build is logged and the build error is returned, while one
//! after a successful build names the artifact already saved locally.

use camino::Utf8PathBuf;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::build::{BuildArtifact, BuildError, BuildJob, BuildOrchestrator, Templates};
use crate::provider::ComputeProvider;
use crate::remote::{RemoteHandle, StartError, StopError};
use crate::shell::{CommandRunner, RemoteShell, ShellConfig, ShellError};

/// Per-invocation build switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildRequest {
    /// Empty the compiler cache before building.
    pub clear_cache: bool,
    /// Stream compiler output as it arrives.
    pub verbose: bool,
    /// Power the instance off once the build has finished.
    pub shutdown: bool,
}

/// Errors surfaced by [`BuildPipeline::run`].
#[derive(Debug, Error)]
pub enum PipelineError<E>
where
    E: std::error::Error + 'static,
{
    /// The instance did not reach `running` or has no address.
    #[error("failed to provision build machine: {0}")]
    Provision(#[source] StartError<E>),
    /// No session could be opened to the instance.
    #[error("failed to connect to build machine: {0}")]
    Connection(#[source] ShellError),
    /// A build stage failed.
    #[error("{} stage failed: {source}", source.stage())]
    Build {
        /// Stage failure.
        #[source]
        source: BuildError,
    },
    /// The instance could not be stopped after the build.
    #[error("failed to stop build machine: {0}")]
    Shutdown(#[source] StopError<E>),
    /// The build succeeded but the instance could not be stopped afterwards.
    #[error("artifact saved to {artifact} but failed to stop build machine: {source}")]
    ShutdownAfterBuild {
        /// Local copy of the retrieved artifact.
        artifact: Utf8PathBuf,
        /// Stop failure.
        #[source]
        source: StopError<E>,
    },
    /// The pipeline was cancelled before the session was opened.
    #[error("build cancelled")]
    Cancelled,
}

impl<E> From<BuildError> for PipelineError<E>
where
    E: std::error::Error + 'static,
{
    fn from(source: BuildError) -> Self {
        Self::Build { source }
    }
}

impl<E> PipelineError<E>
where
    E: std::error::Error + 'static,
{
    /// Returns `true` when the pipeline stopped because of cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Provision(err) => err.is_cancelled(),
            Self::Connection(err) => err.is_cancelled(),
            Self::Build { source } => source.is_cancelled(),
            Self::Shutdown(_) | Self::ShutdownAfterBuild { .. } => false,
        }
    }
}

/// Runs one build over a fresh remote session.
#[derive(Debug)]
pub struct BuildPipeline<R: CommandRunner> {
    shell_config: ShellConfig,
    runner: R,
    request: BuildRequest,
}

impl<R: CommandRunner> BuildPipeline<R> {
    /// Creates a pipeline that opens sessions through `runner`.
    #[must_use]
    pub const fn new(shell_config: ShellConfig, runner: R, request: BuildRequest) -> Self {
        Self {
            shell_config,
            runner,
            request,
        }
    }

    /// Builds `job` on the instance behind `handle` and returns the
    /// retrieved artifact.
    ///
    /// Templates are loaded before the instance is touched so a broken
    /// local setup never boots the machine.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError`] naming the phase that failed.
    pub async fn run<P: ComputeProvider>(
        self,
        handle: &mut RemoteHandle<P>,
        job: BuildJob,
        cancel: &CancellationToken,
    ) -> Result<BuildArtifact, PipelineError<P::Error>> {
        let templates = Templates::load(&job.options_dir)?;
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }

        handle.start().await.map_err(PipelineError::Provision)?;
        let address = handle
            .get_address()
            .await
            .map_err(|err| PipelineError::Provision(StartError::from(err)))?;
        info!(instance = %handle.instance(), %address, "build machine running");

        let outcome = if cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            match RemoteShell::connect(self.shell_config, self.runner, address, cancel).await {
                Ok(mut shell) => {
                    let result = BuildOrchestrator::new(job, templates, &shell)
                        .with_verbose(self.request.verbose)
                        .run(self.request.clear_cache, cancel);
                    if let Err(err) = shell.close() {
                        warn!(error = %err, "failed to close remote session");
                    }
                    result.map_err(PipelineError::from)
                }
                Err(err) => Err(PipelineError::Connection(err)),
            }
        };

        let shutdown = shut_down(handle, self.request.shutdown).await;
        match (outcome, shutdown) {
            (Ok(artifact), Ok(())) => Ok(artifact),
            (Ok(artifact), Err(source)) => {
                info!(artifact = %artifact.local_path, "artifact retrieved before shutdown failed");
                Err(PipelineError::ShutdownAfterBuild {
                    artifact: artifact.local_path,
                    source,
                })
            }
            (Err(err), Ok(())) => Err(err),
            (Err(err), Err(shutdown_err)) => {
                warn!(error = %shutdown_err, "shutdown after failed build also failed");
                Err(err)
            }
        }
    }
}

/// Stops the instance when `stop` is set, otherwise applies the handle's
/// release policy.
async fn shut_down<P: ComputeProvider>(
    handle: &mut RemoteHandle<P>,
    stop: bool,
) -> Result<(), StopError<P::Error>> {
    if stop {
        info!(instance = %handle.instance(), "stopping build machine");
        handle.stop().await
    } else {
        handle.release().await
    }
}
