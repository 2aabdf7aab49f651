//! Core library for the lazybuild remote build tool.
//!
//! The crate drives a single cloud build machine through its lifecycle
//! (power on, wait for running, resolve its address), opens one persistent
//! SSH session to it, and runs a GameMaker build there: folder preparation,
//! option staging, source synchronisation, compilation, and artifact
//! retrieval.

pub mod build;
pub mod config;
pub(crate) mod fs;
pub mod pipeline;
pub mod provider;
pub mod remote;
pub mod scaleway;
pub mod shell;
pub mod test_support;
pub mod wait;

pub use build::{
    BuildArtifact, BuildConfig, BuildError, BuildJob, BuildOrchestrator, ConfigRenderer, Stage,
    SyncOutcome, TemplateDocument, Templates,
};
pub use config::{ConfigError, ScalewayConfig};
pub use pipeline::{BuildPipeline, BuildRequest, PipelineError};
pub use provider::{ComputeProvider, InstanceRef, PowerState, ScriptStatus};
pub use remote::{HandleError, RemoteHandle, ScriptError, StartError, StopError};
pub use scaleway::{ScalewayProvider, ScalewayProviderError};
pub use shell::{
    CommandOutput, CommandRunner, Invocation, ProcessCommandRunner, RemoteCommand, RemoteShell,
    ShellConfig, ShellError,
};
pub use wait::{BackoffPolicy, WaitError, WaitPolicy};
