//! Shared fixtures for build BDD scenarios.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use lazybuild::config::ConfigError;
use lazybuild::test_support::{FakeProvider, ScriptedRunner, build_job, write_option_files};
use lazybuild::{
    BuildJob, BuildRequest, InstanceRef, PipelineError, PowerState, RemoteHandle, WaitPolicy,
};
use rstest::fixture;
use tempfile::TempDir;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub const ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(51, 15, 0, 9));
pub const PACKAGE: &[u8] = b"PK\x03\x04packaged game";

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuildOutcome {
    Packaged(Utf8PathBuf),
    Failed {
        stage: Option<String>,
        message: String,
    },
}

impl BuildOutcome {
    pub fn from_result<E>(result: Result<lazybuild::BuildArtifact, PipelineError<E>>) -> Self
    where
        E: std::error::Error + 'static,
    {
        match result {
            Ok(artifact) => Self::Packaged(artifact.local_path),
            Err(err) => Self::Failed {
                stage: match &err {
                    PipelineError::Build { source } => Some(source.stage().to_string()),
                    _ => None,
                },
                message: err.to_string(),
            },
        }
    }
}

#[derive(Clone, Debug)]
pub struct BuildContext {
    pub provider: FakeProvider,
    pub runner: ScriptedRunner,
    pub job: BuildJob,
    pub request: BuildRequest,
    pub compiled: bool,
    pub package_present: bool,
    pub outcome: Option<BuildOutcome>,
    _workspace: Arc<TempDir>,
}

impl BuildContext {
    pub fn handle(&self) -> Result<RemoteHandle<FakeProvider>, BuildTestError> {
        let instance = InstanceRef::new("srv-build", "fr-par-1")
            .map_err(|err| BuildTestError::Fixture(err.to_string()))?;
        Ok(RemoteHandle::new(
            self.provider.clone(),
            instance,
            WaitPolicy::new(Duration::from_millis(1), Duration::from_millis(500)),
            CancellationToken::new(),
        ))
    }

    /// Queues the session handshake, folder preparation, and option uploads.
    pub fn script_session_setup(&self) {
        self.runner.push_success(); // control master
        self.runner.push_successes(7);
        self.runner.push_successes(5);
    }

    /// Queues whatever follows the compiler: artifact retrieval and session
    /// close.
    pub fn script_tail(&self) {
        if self.compiled {
            if self.package_present {
                self.runner.push_success();
                self.runner.push_download(PACKAGE.to_vec());
            } else {
                self.runner.push_exit_code(1);
            }
        }
        self.runner.push_success();
    }

    pub fn local_package(&self) -> Utf8PathBuf {
        self.job.artifact_dir.join("Game.zip")
    }
}

#[derive(Debug, Error)]
pub enum BuildTestError {
    #[error("invalid build fixture: {0}")]
    Fixture(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[fixture]
pub fn build_context() -> BuildContext {
    build_build_context().unwrap_or_else(|err| panic!("build context fixture should initialise: {err}"))
}

fn build_build_context() -> Result<BuildContext, BuildTestError> {
    let workspace = TempDir::new()?;
    let root = Utf8PathBuf::from_path_buf(workspace.path().to_path_buf())
        .map_err(|path| BuildTestError::Fixture(format!("non UTF-8 temp dir {}", path.display())))?;
    let options = root.join("options");
    write_option_files(&options)?;
    let job = build_job(&options, &root.join("dist"))?;

    Ok(BuildContext {
        provider: FakeProvider::new(PowerState::Running).with_address(ADDRESS),
        runner: ScriptedRunner::new(),
        job,
        request: BuildRequest::default(),
        compiled: false,
        package_present: true,
        outcome: None,
        _workspace: Arc::new(workspace),
    })
}
