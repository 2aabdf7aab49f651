//! Build job configuration.
//!
//! [`BuildConfig`] is the layered, user-facing configuration loaded through
//! `ortho-config`. It is validated and frozen into a [`BuildJob`] once per
//! invocation; the job's derived fields (project name, checkout location) are
//! computed at that point and never change afterwards.

use std::fmt;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;

use super::layout;
use crate::config::{ConfigError, FieldMetadata, require_field};

/// Default output folder on the build machine.
pub const DEFAULT_OUTPUT_FOLDER: &str = r"C:\users\buildManager\AppData\Local\lazybuild";

/// Default GameMaker compiler cache folder on the build machine.
pub const DEFAULT_CACHE_FOLDER: &str =
    r"C:\Users\buildManager\AppData\Roaming\GameMakerStudio2\Cache\GMS2CACHE";

/// Default folder holding installed GameMaker runtimes.
pub const DEFAULT_RUNTIME_ROOT: &str = r"C:\ProgramData\GameMakerStudio2\Cache\runtimes";

/// Default local folder holding the option templates.
pub const DEFAULT_OPTIONS_DIR: &str = "resources/options";

/// Build settings loaded via `ortho-config`.
#[derive(Clone, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "LAZYBUILD",
    discovery(
        app_name = "lazybuild",
        env_var = "LAZYBUILD_CONFIG_PATH",
        config_file_name = "lazybuild.toml",
        dotfile_name = ".lazybuild.toml",
        project_file_name = "lazybuild.toml"
    )
)]
pub struct BuildConfig {
    /// GameMaker account identifier substituted for `{YOYO_ID}`.
    pub yoyo_id: String,
    /// Runtime version used to locate the compiler.
    pub runtime_version: String,
    /// Steamworks SDK folder on the build machine.
    pub steam_sdk_path: String,
    /// Path to the project's `.yyp` file; its stem names the project.
    pub yyp_path: String,
    /// Build configuration name substituted for `{CONFIG}`.
    #[ortho_config(default = "Default".to_owned())]
    pub configuration: String,
    /// Source-control user, also substituted for `{USERNAME}`.
    pub git_username: String,
    /// Source-control password or access token.
    pub git_password: String,
    /// Branch to build.
    #[ortho_config(default = "main".to_owned())]
    pub git_branch: String,
    /// HTTPS clone URL of the project repository.
    pub git_url: String,
    /// Root of the build tree on the build machine.
    #[ortho_config(default = DEFAULT_OUTPUT_FOLDER.to_owned())]
    pub output_folder: String,
    /// Compiler cache purged by `--clear-cache`.
    #[ortho_config(default = DEFAULT_CACHE_FOLDER.to_owned())]
    pub cache_folder: String,
    /// Checkout location; defaults to `Input\Project` under the output
    /// folder.
    pub remote_project_path: Option<String>,
    /// Folder holding installed runtimes.
    #[ortho_config(default = DEFAULT_RUNTIME_ROOT.to_owned())]
    pub runtime_root: String,
    /// Local folder holding the option templates.
    #[ortho_config(default = DEFAULT_OPTIONS_DIR.to_owned())]
    pub options_dir: String,
    /// Local folder receiving the retrieved artifact.
    #[ortho_config(default = ".".to_owned())]
    pub artifact_dir: String,
}

impl fmt::Debug for BuildConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuildConfig")
            .field("yoyo_id", &self.yoyo_id)
            .field("runtime_version", &self.runtime_version)
            .field("yyp_path", &self.yyp_path)
            .field("configuration", &self.configuration)
            .field("git_username", &self.git_username)
            .field("git_password", &"<redacted>")
            .field("git_branch", &self.git_branch)
            .field("git_url", &self.git_url)
            .field("output_folder", &self.output_folder)
            .finish_non_exhaustive()
    }
}

impl BuildConfig {
    /// Loads configuration using defaults, configuration files, and
    /// environment variables without parsing CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("lazybuild")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Ensures required values are present.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the env var and TOML key
    /// for the first blank required value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (&self.yoyo_id, "GameMaker account ID", "LAZYBUILD_YOYO_ID", "yoyo_id"),
            (
                &self.runtime_version,
                "runtime version",
                "LAZYBUILD_RUNTIME_VERSION",
                "runtime_version",
            ),
            (
                &self.steam_sdk_path,
                "Steamworks SDK path",
                "LAZYBUILD_STEAM_SDK_PATH",
                "steam_sdk_path",
            ),
            (&self.yyp_path, "project file path", "LAZYBUILD_YYP_PATH", "yyp_path"),
            (
                &self.configuration,
                "build configuration",
                "LAZYBUILD_CONFIGURATION",
                "configuration",
            ),
            (&self.git_username, "git username", "LAZYBUILD_GIT_USERNAME", "git_username"),
            (&self.git_password, "git password", "LAZYBUILD_GIT_PASSWORD", "git_password"),
            (&self.git_branch, "git branch", "LAZYBUILD_GIT_BRANCH", "git_branch"),
            (&self.git_url, "git URL", "LAZYBUILD_GIT_URL", "git_url"),
            (
                &self.output_folder,
                "remote output folder",
                "LAZYBUILD_OUTPUT_FOLDER",
                "output_folder",
            ),
            (
                &self.cache_folder,
                "remote cache folder",
                "LAZYBUILD_CACHE_FOLDER",
                "cache_folder",
            ),
            (&self.runtime_root, "runtime root", "LAZYBUILD_RUNTIME_ROOT", "runtime_root"),
            (&self.options_dir, "options directory", "LAZYBUILD_OPTIONS_DIR", "options_dir"),
            (&self.artifact_dir, "artifact directory", "LAZYBUILD_ARTIFACT_DIR", "artifact_dir"),
        ];
        for (value, description, env_var, toml_key) in required {
            require_field(
                value,
                &FieldMetadata::new(description, env_var, toml_key, "build"),
            )?;
        }
        if let Some(path) = &self.remote_project_path {
            require_field(
                path,
                &FieldMetadata::new(
                    "remote project path",
                    "LAZYBUILD_REMOTE_PROJECT_PATH",
                    "remote_project_path",
                    "build",
                ),
            )?;
        }
        Ok(())
    }

    /// Validates the configuration and freezes it into a [`BuildJob`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails or the project name
    /// cannot be derived from `yyp_path`.
    pub fn into_job(self) -> Result<BuildJob, ConfigError> {
        self.validate()?;
        let project_name = project_name_from_yyp(&self.yyp_path).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "cannot derive a project name from yyp_path '{}'",
                self.yyp_path
            ))
        })?;
        let remote_project_path = self
            .remote_project_path
            .unwrap_or_else(|| layout::join(&self.output_folder, layout::PROJECT_FOLDER));

        Ok(BuildJob {
            yoyo_id: self.yoyo_id,
            runtime_version: self.runtime_version,
            steam_sdk_path: self.steam_sdk_path,
            project_name,
            configuration: self.configuration,
            git: GitSource {
                url: self.git_url,
                branch: self.git_branch,
                username: self.git_username,
                password: self.git_password,
            },
            output_folder: self.output_folder,
            cache_folder: self.cache_folder,
            remote_project_path,
            runtime_root: self.runtime_root,
            options_dir: Utf8PathBuf::from(self.options_dir),
            artifact_dir: Utf8PathBuf::from(self.artifact_dir),
        })
    }
}

/// Returns the file stem of a `.yyp` path written with either separator.
#[must_use]
pub fn project_name_from_yyp(yyp_path: &str) -> Option<String> {
    let file_name = yyp_path.rsplit(['/', '\\']).next()?.trim();
    let stem = file_name.strip_suffix(".yyp").unwrap_or(file_name);
    (!stem.is_empty()).then(|| stem.to_owned())
}

/// Repository the build checks out.
#[derive(Clone, PartialEq, Eq)]
pub struct GitSource {
    /// HTTPS clone URL without credentials.
    pub url: String,
    /// Branch to build.
    pub branch: String,
    /// Source-control user.
    pub username: String,
    /// Source-control password or token.
    pub password: String,
}

impl fmt::Debug for GitSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitSource")
            .field("url", &self.url)
            .field("branch", &self.branch)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Immutable parameters for one build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildJob {
    /// GameMaker account identifier.
    pub yoyo_id: String,
    /// Runtime version used to locate the compiler.
    pub runtime_version: String,
    /// Steamworks SDK folder on the build machine.
    pub steam_sdk_path: String,
    /// Project name derived from the `.yyp` file.
    pub project_name: String,
    /// Build configuration name.
    pub configuration: String,
    /// Repository to build.
    pub git: GitSource,
    /// Root of the build tree on the build machine.
    pub output_folder: String,
    /// Compiler cache folder on the build machine.
    pub cache_folder: String,
    /// Checkout location on the build machine.
    pub remote_project_path: String,
    /// Folder holding installed runtimes.
    pub runtime_root: String,
    /// Local folder holding the option templates.
    pub options_dir: Utf8PathBuf,
    /// Local folder receiving the artifact.
    pub artifact_dir: Utf8PathBuf,
}

impl BuildJob {
    /// Remote folder receiving the staged option files.
    #[must_use]
    pub fn options_folder(&self) -> String {
        layout::join(&self.output_folder, layout::OPTIONS_FOLDER)
    }

    /// Remote path of one staged option file.
    #[must_use]
    pub fn option_file(&self, name: &str) -> String {
        layout::join(&self.options_folder(), &[name])
    }

    /// Remote path of the repository marker.
    #[must_use]
    pub fn repository_marker(&self) -> String {
        layout::join(&self.remote_project_path, &[".git"])
    }

    /// Remote path of the compiler executable for the configured runtime.
    #[must_use]
    pub fn compiler_path(&self) -> String {
        let runtime = format!("runtime-{}", self.runtime_version);
        layout::join(&self.runtime_root, &[runtime.as_str(), "bin", "Igor.exe"])
    }

    /// File name of the packaged artifact.
    #[must_use]
    pub fn artifact_file_name(&self) -> String {
        format!("{}.zip", self.project_name)
    }

    /// Remote path where the compiler leaves the packaged artifact.
    #[must_use]
    pub fn remote_artifact_path(&self) -> String {
        let folder = layout::join(&self.output_folder, layout::ARTIFACT_FOLDER);
        layout::join(&folder, &[self.artifact_file_name().as_str()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::build_config;
    use rstest::rstest;

    #[rstest]
    #[case(r"C:\dev\Game\Game.yyp", Some("Game"))]
    #[case("projects/Space Race/Space Race.yyp", Some("Space Race"))]
    #[case("Plain", Some("Plain"))]
    #[case(r"C:\dev\.yyp", None)]
    #[case("dir/", None)]
    fn derives_project_name(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(project_name_from_yyp(path).as_deref(), expected);
    }

    #[rstest]
    fn into_job_derives_remote_paths() {
        let job = build_config().into_job().expect("config should convert");

        assert_eq!(job.project_name, "Game");
        assert_eq!(job.remote_project_path, r"C:\out\Input\Project");
        assert_eq!(job.repository_marker(), r"C:\out\Input\Project\.git");
        assert_eq!(job.option_file("build.bff"), r"C:\out\Input\Options\build.bff");
        assert_eq!(job.remote_artifact_path(), r"C:\out\Output\GameZip\Game.zip");
        assert_eq!(
            job.compiler_path(),
            r"C:\runtimes\runtime-2024.2.0.163\bin\Igor.exe"
        );
    }

    #[rstest]
    fn explicit_remote_project_path_wins() {
        let config = BuildConfig {
            remote_project_path: Some(String::from(r"D:\src\game")),
            ..build_config()
        };
        let job = config.into_job().expect("config should convert");
        assert_eq!(job.remote_project_path, r"D:\src\game");
    }

    #[rstest]
    fn validate_names_env_var_for_missing_url() {
        let config = BuildConfig {
            git_url: String::new(),
            ..build_config()
        };
        let err = config.validate().expect_err("blank URL should fail");
        assert!(err.to_string().contains("LAZYBUILD_GIT_URL"), "message: {err}");
    }

    #[rstest]
    fn debug_output_hides_password() {
        let job = build_config().into_job().expect("config should convert");
        let rendered = format!("{job:?}");
        assert!(!rendered.contains("s3cret"), "rendered: {rendered}");
        assert!(!format!("{:?}", build_config()).contains("s3cret"));
    }
}
