//! Build stages run against the remote machine.
//!
//! [`BuildOrchestrator`] owns one [`BuildJob`] and its templates, borrows an
//! open [`RemoteShell`], and drives the stages in a fixed order: prepare the
//! folder tree, stage option files, synchronise the checkout, compile, and
//! retrieve the packaged artifact. Every remote command result is checked and
//! the first failure aborts the build.

use std::io::Write;

use camino::{Utf8Path, Utf8PathBuf};
use serde_json::json;
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::shell::{
    CommandOutput, CommandRunner, Invocation, RemoteCommand, RemoteShell, TransferSession,
};

pub mod config;
mod error;
pub mod git;
pub mod layout;
pub mod render;

pub use config::{BuildConfig, BuildJob, GitSource};
pub use error::{BuildError, Stage};
pub use render::{ConfigRenderer, TemplateDocument, Templates};

/// Option files uploaded unchanged from the local options folder.
pub const VERBATIM_OPTIONS: [&str; 2] = ["targetoptions.json", "preferences.json"];

/// Option file synthesised from the Steamworks SDK path.
pub const STEAM_OPTIONS: &str = "steam_options.yy";

/// Compiler arguments following the options file.
const COMPILER_TRAILING_ARGS: [&str; 4] = ["-v", "--", "Windows", "PackageZip"];

/// Result of synchronising the checkout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// An existing checkout was reset to the branch tip.
    Updated,
    /// The repository was cloned fresh.
    Cloned,
}

/// Packaged build output.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildArtifact {
    /// Location on the build machine.
    pub remote_path: String,
    /// Location of the downloaded copy.
    pub local_path: Utf8PathBuf,
}

/// Drives one build over an open session.
#[derive(Debug)]
pub struct BuildOrchestrator<'a, R: CommandRunner> {
    job: BuildJob,
    templates: Templates,
    renderer: ConfigRenderer,
    shell: &'a RemoteShell<R>,
    verbose: bool,
}

impl<'a, R: CommandRunner> BuildOrchestrator<'a, R> {
    /// Creates an orchestrator for `job` over `shell`.
    #[must_use]
    pub fn new(job: BuildJob, templates: Templates, shell: &'a RemoteShell<R>) -> Self {
        let renderer = ConfigRenderer::for_job(&job);
        Self {
            job,
            templates,
            renderer,
            shell,
            verbose: false,
        }
    }

    /// Streams compiler output as it arrives instead of capturing it.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Job being built.
    #[must_use]
    pub const fn job(&self) -> &BuildJob {
        &self.job
    }

    /// Runs every stage in order, checking `cancel` before each one.
    ///
    /// # Errors
    ///
    /// Returns the first stage failure, or [`BuildError::Cancelled`] naming
    /// the stage that did not start.
    pub fn run(
        &self,
        clear_cache: bool,
        cancel: &CancellationToken,
    ) -> Result<BuildArtifact, BuildError> {
        let proceed = |stage: Stage| {
            if cancel.is_cancelled() {
                return Err(BuildError::Cancelled { before: stage });
            }
            info!(project = %self.job.project_name, %stage, "starting build stage");
            Ok(())
        };

        proceed(Stage::PrepareFolders)?;
        self.prepare_folders(clear_cache)?;
        proceed(Stage::StageOptions)?;
        self.stage_options()?;
        proceed(Stage::SynchronizeSource)?;
        self.synchronize_source()?;
        proceed(Stage::Compile)?;
        self.compile()?;
        proceed(Stage::RetrieveArtifact)?;
        let artifact = self.retrieve_artifact()?;
        info!(path = %artifact.local_path, "build finished");
        Ok(artifact)
    }

    /// Commands that create the output tree and purge the per-build folders.
    #[must_use]
    pub fn prepare_commands(&self, clear_cache: bool) -> Vec<RemoteCommand> {
        let output = self.job.output_folder.as_str();
        let mut commands = vec![RemoteCommand::IfMissing {
            path: output.to_owned(),
            then: Invocation::new("mkdir").arg(output),
        }];
        let purged = layout::PURGED_FOLDERS
            .iter()
            .map(|parts| layout::join(output, parts));
        let cache = clear_cache.then(|| self.job.cache_folder.clone());
        for folder in purged.chain(cache) {
            commands.push(RemoteCommand::IfExists {
                path: folder.clone(),
                then: Invocation::new("rmdir").args(["/S", "/Q", folder.as_str()]),
            });
            commands.push(RemoteCommand::Run(Invocation::new("mkdir").arg(folder)));
        }
        commands
    }

    /// Ensures the output tree exists and empties the per-build folders.
    /// The compiler cache is emptied only when `clear_cache` is set.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Prepare`] when a folder command fails.
    pub fn prepare_folders(&self, clear_cache: bool) -> Result<(), BuildError> {
        if clear_cache {
            info!(cache = %self.job.cache_folder, "clearing compiler cache");
        }
        for command in self.prepare_commands(clear_cache) {
            self.shell
                .execute_checked(&command, false)
                .map_err(|source| BuildError::Prepare { source })?;
        }
        Ok(())
    }

    /// Uploads the option files into the remote options folder.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Stage`] when a local file is missing or the
    /// scratch file cannot be written, [`BuildError::Template`] when a
    /// rendered document cannot be serialised, and [`BuildError::Upload`]
    /// when a transfer fails.
    pub fn stage_options(&self) -> Result<(), BuildError> {
        let transfer = self
            .shell
            .open_transfer()
            .map_err(|source| BuildError::Upload {
                file: String::from("options"),
                source,
            })?;

        let options_dir = crate::fs::open_dir(&self.job.options_dir)
            .map_err(|err| stage_error(self.job.options_dir.as_str(), &err))?;
        for name in VERBATIM_OPTIONS {
            if !options_dir.is_file(name) {
                return Err(BuildError::Stage {
                    file: name.to_owned(),
                    message: format!("not found in {}", self.job.options_dir),
                });
            }
            self.upload(&transfer, &self.job.options_dir.join(name), name)?;
        }

        let steam = json!({ "steamsdk_path": self.job.steam_sdk_path }).to_string();
        self.upload_document(&transfer, STEAM_OPTIONS, &steam)?;

        for (name, template) in [
            (render::BUILD_TEMPLATE, &self.templates.build),
            (render::MACROS_TEMPLATE, &self.templates.macros),
        ] {
            let rendered = self.renderer.render(template).to_pretty_json(name)?;
            self.upload_document(&transfer, name, &rendered)?;
        }
        Ok(())
    }

    /// Clones the repository or force-converges an existing checkout to the
    /// branch tip, depending on whether the checkout exists.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Sync`] when the probe or any git command fails.
    pub fn synchronize_source(&self) -> Result<SyncOutcome, BuildError> {
        let checkout = self.job.remote_project_path.as_str();
        let present = self
            .shell
            .path_exists(&self.job.repository_marker())
            .map_err(|source| BuildError::Sync { source })?;

        let (outcome, commands) = if present {
            info!(checkout, branch = %self.job.git.branch, "updating existing checkout");
            (
                SyncOutcome::Updated,
                git::update_commands(checkout, &self.job.git.branch),
            )
        } else {
            info!(checkout, branch = %self.job.git.branch, "cloning repository");
            (
                SyncOutcome::Cloned,
                vec![git::clone_command(&self.job.git, checkout)?],
            )
        };

        for command in &commands {
            self.shell
                .execute_checked(command, false)
                .map_err(|source| BuildError::Sync { source })?;
        }
        Ok(outcome)
    }

    /// Compiler invocation for the configured runtime.
    #[must_use]
    pub fn compile_command(&self) -> RemoteCommand {
        let options = format!(
            "-options={}",
            self.job.option_file(render::BUILD_TEMPLATE)
        );
        RemoteCommand::Run(
            Invocation::new(self.job.compiler_path())
                .args(["-j=8", options.as_str()])
                .args(COMPILER_TRAILING_ARGS),
        )
    }

    /// Runs the compiler. Its exit status decides success.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Compile`] when the compiler exits unsuccessfully.
    pub fn compile(&self) -> Result<CommandOutput, BuildError> {
        let output = self
            .shell
            .execute_checked(&self.compile_command(), self.verbose)
            .map_err(|source| BuildError::Compile { source })?;
        info!(project = %self.job.project_name, "compiler finished");
        Ok(output)
    }

    /// Downloads the packaged artifact into the local artifact folder.
    ///
    /// The download lands in a temporary file that is renamed into place
    /// only once complete, so a failed transfer leaves no local artifact.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::ArtifactMissing`] when the compiler produced
    /// nothing, and [`BuildError::Retrieval`] when the probe, download, or
    /// local write fails.
    pub fn retrieve_artifact(&self) -> Result<BuildArtifact, BuildError> {
        let remote_path = self.job.remote_artifact_path();
        let retrieval = |message: String| BuildError::Retrieval {
            remote_path: remote_path.clone(),
            message,
        };

        let transfer = self
            .shell
            .open_transfer()
            .map_err(|err| retrieval(err.to_string()))?;
        if !transfer
            .stat(&remote_path)
            .map_err(|err| retrieval(err.to_string()))?
        {
            return Err(BuildError::ArtifactMissing {
                remote_path: remote_path.clone(),
            });
        }

        crate::fs::create_dir_all(&self.job.artifact_dir)
            .map_err(|err| retrieval(err.to_string()))?;
        let partial = NamedTempFile::new_in(&self.job.artifact_dir)
            .map_err(|err| retrieval(err.to_string()))?;
        let partial_path =
            utf8_path(partial.path()).map_err(|err| retrieval(err.to_string()))?;
        transfer
            .get(&remote_path, partial_path)
            .map_err(|err| retrieval(err.to_string()))?;

        let local_path = self.job.artifact_dir.join(self.job.artifact_file_name());
        partial
            .persist(&local_path)
            .map_err(|err| retrieval(err.error.to_string()))?;
        info!(remote = %remote_path, local = %local_path, "artifact retrieved");
        Ok(BuildArtifact {
            remote_path,
            local_path,
        })
    }

    fn upload(
        &self,
        transfer: &TransferSession<'_, R>,
        local: &Utf8Path,
        name: &str,
    ) -> Result<(), BuildError> {
        transfer
            .put(local, &self.job.option_file(name))
            .map_err(|source| BuildError::Upload {
                file: name.to_owned(),
                source,
            })
    }

    /// Writes `contents` to a scratch file, uploads it as `name`, and
    /// removes the scratch file.
    fn upload_document(
        &self,
        transfer: &TransferSession<'_, R>,
        name: &str,
        contents: &str,
    ) -> Result<(), BuildError> {
        let mut scratch = NamedTempFile::new().map_err(|err| stage_error(name, &err))?;
        scratch
            .write_all(contents.as_bytes())
            .and_then(|()| scratch.flush())
            .map_err(|err| stage_error(name, &err))?;
        let local = utf8_path(scratch.path()).map_err(|err| stage_error(name, &err))?;
        self.upload(transfer, local, name)?;
        scratch.close().map_err(|err| stage_error(name, &err))
    }
}

fn utf8_path(path: &std::path::Path) -> Result<&Utf8Path, std::io::Error> {
    Utf8Path::from_path(path).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("path is not UTF-8: {}", path.display()),
        )
    })
}

fn stage_error(file: &str, err: &std::io::Error) -> BuildError {
    BuildError::Stage {
        file: file.to_owned(),
        message: err.to_string(),
    }
}
