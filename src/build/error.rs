//! Errors raised by the build stages.

use std::fmt;

use thiserror::Error;

use crate::shell::ShellError;

/// Ordered stages of one build.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    /// Create and purge the remote folder layout.
    PrepareFolders,
    /// Upload the option files.
    StageOptions,
    /// Clone or update the checkout.
    SynchronizeSource,
    /// Run the compiler.
    Compile,
    /// Download the packaged artifact.
    RetrieveArtifact,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Self; 5] = [
        Self::PrepareFolders,
        Self::StageOptions,
        Self::SynchronizeSource,
        Self::Compile,
        Self::RetrieveArtifact,
    ];
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PrepareFolders => "prepare folders",
            Self::StageOptions => "stage options",
            Self::SynchronizeSource => "synchronize source",
            Self::Compile => "compile",
            Self::RetrieveArtifact => "retrieve artifact",
        };
        f.write_str(name)
    }
}

/// Errors surfaced by [`super::BuildOrchestrator`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// Raised when a folder command fails.
    #[error("failed to prepare remote folders: {source}")]
    Prepare {
        /// Underlying shell failure.
        #[source]
        source: ShellError,
    },
    /// Raised when an option template cannot be read, parsed, or written.
    #[error("template {name} is unusable: {message}")]
    Template {
        /// Template file name.
        name: String,
        /// Reason the template was rejected.
        message: String,
    },
    /// Raised when a local option file cannot be prepared for upload.
    #[error("failed to stage {file}: {message}")]
    Stage {
        /// Option file name.
        file: String,
        /// Underlying I/O failure.
        message: String,
    },
    /// Raised when an option file upload fails.
    #[error("failed to upload {file}: {source}")]
    Upload {
        /// Option file name.
        file: String,
        /// Underlying transfer failure.
        #[source]
        source: ShellError,
    },
    /// Raised when the repository URL cannot carry credentials.
    #[error("invalid repository URL {url}: {message}")]
    InvalidRepositoryUrl {
        /// URL as configured.
        url: String,
        /// Parse failure.
        message: String,
    },
    /// Raised when cloning or updating the checkout fails.
    #[error("failed to synchronise source: {source}")]
    Sync {
        /// Underlying shell failure.
        #[source]
        source: ShellError,
    },
    /// Raised when the compiler exits unsuccessfully.
    #[error("compilation failed: {source}")]
    Compile {
        /// Underlying shell failure.
        #[source]
        source: ShellError,
    },
    /// Raised when the compiler left no artifact behind.
    #[error("no artifact found at {remote_path}")]
    ArtifactMissing {
        /// Expected remote location.
        remote_path: String,
    },
    /// Raised when the artifact cannot be downloaded or stored.
    #[error("failed to retrieve {remote_path}: {message}")]
    Retrieval {
        /// Remote artifact location.
        remote_path: String,
        /// Underlying failure.
        message: String,
    },
    /// Raised when the build is cancelled between stages.
    #[error("build cancelled before {before}")]
    Cancelled {
        /// Stage that did not start.
        before: Stage,
    },
}

impl BuildError {
    /// Stage that raised the error.
    #[must_use]
    pub const fn stage(&self) -> Stage {
        match self {
            Self::Prepare { .. } => Stage::PrepareFolders,
            Self::Template { .. } | Self::Stage { .. } | Self::Upload { .. } => {
                Stage::StageOptions
            }
            Self::InvalidRepositoryUrl { .. } | Self::Sync { .. } => Stage::SynchronizeSource,
            Self::Compile { .. } => Stage::Compile,
            Self::ArtifactMissing { .. } | Self::Retrieval { .. } => Stage::RetrieveArtifact,
            Self::Cancelled { before } => *before,
        }
    }

    /// Returns `true` when the build stopped because of cancellation,
    /// including a remote command killed mid-stage.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::Prepare { source }
            | Self::Upload { source, .. }
            | Self::Sync { source }
            | Self::Compile { source } => source.is_cancelled(),
            _ => false,
        }
    }
}
