//! SSH session configuration structures and validation.
//!
//! [`ShellConfig`] carries the OpenSSH client settings used for the
//! persistent build session along with the retry budget for establishing it.
//! Configuration is loaded via `ortho-config`, which merges defaults,
//! configuration files, and environment variables.

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;

use crate::config::{ConfigError, FieldMetadata, require_field};
use crate::wait::BackoffPolicy;

/// Default account on the Windows build machine.
pub const DEFAULT_SSH_USER: &str = "buildManager";

/// Default location of the private key used to authenticate.
pub const DEFAULT_IDENTITY_FILE: &str = "resources/misc/rsa.pem";

/// SSH and session retry settings loaded via `ortho-config`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "LAZYBUILD_SSH",
    discovery(
        app_name = "lazybuild",
        env_var = "LAZYBUILD_CONFIG_PATH",
        config_file_name = "lazybuild.toml",
        dotfile_name = ".lazybuild.toml",
        project_file_name = "lazybuild.toml"
    )
)]
pub struct ShellConfig {
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Path to the `scp` executable.
    #[ortho_config(default = "scp".to_owned())]
    pub scp_bin: String,
    /// Remote user to connect as.
    #[ortho_config(default = DEFAULT_SSH_USER.to_owned())]
    pub ssh_user: String,
    /// Remote SSH port.
    #[ortho_config(default = 22)]
    pub ssh_port: u16,
    /// Private key used for authentication. Supports tilde expansion.
    #[ortho_config(default = DEFAULT_IDENTITY_FILE.to_owned())]
    pub ssh_identity_file: String,
    /// Whether to enforce host key checking; the build machine's address
    /// changes across power cycles, so this defaults to off.
    #[ortho_config(default = false)]
    pub ssh_strict_host_key_checking: bool,
    /// Known hosts file override; defaults to `/dev/null`.
    #[ortho_config(default = "/dev/null".to_owned())]
    pub ssh_known_hosts_file: String,
    /// Directory holding the session control socket. Defaults to the system
    /// temporary directory.
    pub ssh_control_dir: Option<String>,
    /// Seconds a single connection attempt may take.
    #[ortho_config(default = 10)]
    pub connect_attempt_timeout_secs: u64,
    /// Overall budget, in seconds, for establishing the session.
    #[ortho_config(default = 300)]
    pub connect_timeout_secs: u64,
    /// Delay after the first failed connection attempt.
    #[ortho_config(default = 500)]
    pub connect_initial_backoff_ms: u64,
    /// Ceiling for the doubled delay between attempts.
    #[ortho_config(default = 10_000)]
    pub connect_max_backoff_ms: u64,
}

impl ShellConfig {
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

    /// Ensures required values are present and the retry budget is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the env var and TOML key
    /// to set, or [`ConfigError::Invalid`] for inconsistent timings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            (&self.ssh_bin, "ssh executable", "LAZYBUILD_SSH_SSH_BIN", "ssh_bin"),
            (&self.scp_bin, "scp executable", "LAZYBUILD_SSH_SCP_BIN", "scp_bin"),
            (&self.ssh_user, "SSH user", "LAZYBUILD_SSH_SSH_USER", "ssh_user"),
            (
                &self.ssh_identity_file,
                "SSH private key",
                "LAZYBUILD_SSH_SSH_IDENTITY_FILE",
                "ssh_identity_file",
            ),
        ];
        for (value, description, env_var, toml_key) in required {
            require_field(
                value,
                &FieldMetadata::new(description, env_var, toml_key, "ssh"),
            )?;
        }
        if let Some(dir) = &self.ssh_control_dir {
            require_field(
                dir,
                &FieldMetadata::new(
                    "control socket directory",
                    "LAZYBUILD_SSH_SSH_CONTROL_DIR",
                    "ssh_control_dir",
                    "ssh",
                ),
            )?;
        }
        if self.connect_initial_backoff_ms == 0 {
            return Err(ConfigError::Invalid(String::from(
                "connect_initial_backoff_ms must be at least 1",
            )));
        }
        if self.connect_max_backoff_ms < self.connect_initial_backoff_ms {
            return Err(ConfigError::Invalid(String::from(
                "connect_max_backoff_ms must not be lower than connect_initial_backoff_ms",
            )));
        }
        Ok(())
    }

    /// Retry policy for establishing the session.
    #[must_use]
    pub const fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.connect_initial_backoff_ms),
            Duration::from_millis(self.connect_max_backoff_ms),
            Duration::from_secs(self.connect_timeout_secs),
        )
    }

    /// Directory that receives the control socket.
    #[must_use]
    pub fn control_dir(&self) -> Utf8PathBuf {
        self.ssh_control_dir.as_deref().map_or_else(
            || {
                Utf8PathBuf::from_path_buf(std::env::temp_dir())
                    .unwrap_or_else(|_| Utf8PathBuf::from("/tmp"))
            },
            |dir| Utf8PathBuf::from(expand_tilde(dir)),
        )
    }
}

/// Expands a leading `~/` prefix to the user's home directory.
///
/// Returns the input unchanged when `HOME` is unset.
///
/// # Examples
///
/// ```
/// # use lazybuild::shell::expand_tilde;
/// assert_eq!(expand_tilde("/absolute/key.pem"), "/absolute/key.pem");
/// ```
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}
