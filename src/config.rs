//! Configuration loading via `ortho-config`.

use std::time::Duration;

use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::provider::InstanceRef;
use crate::wait::WaitPolicy;

/// Credentials and polling settings for the single Scaleway build instance.
#[derive(Clone, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SCW",
    discovery(
        app_name = "lazybuild",
        env_var = "LAZYBUILD_CONFIG_PATH",
        config_file_name = "lazybuild.toml",
        dotfile_name = ".lazybuild.toml",
        project_file_name = "lazybuild.toml"
    )
)]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not needed for API
    /// calls; kept so audit tooling can report which key drove the build.
    pub access_key: Option<String>,
    /// API secret key. Required.
    pub secret_key: String,
    /// Availability zone hosting the build instance. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Identifier of the pre-provisioned build instance.
    pub instance_id: String,
    /// Whether releasing the handle should power the instance off.
    #[ortho_config(default = false)]
    pub stop_on_release: bool,
    /// Seconds between power-state probes.
    #[ortho_config(default = 2)]
    pub poll_interval_secs: u64,
    /// Upper bound, in seconds, on any single power transition or script run.
    #[ortho_config(default = 600)]
    pub wait_timeout_secs: u64,
}

impl std::fmt::Debug for ScalewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalewayConfig")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("default_zone", &self.default_zone)
            .field("instance_id", &self.instance_id)
            .field("stop_on_release", &self.stop_on_release)
            .field("poll_interval_secs", &self.poll_interval_secs)
            .field("wait_timeout_secs", &self.wait_timeout_secs)
            .finish()
    }
}

/// Where an operator can set a required value.
pub(crate) struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    pub(crate) const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }
}

/// Rejects blank values with guidance on how to provide them.
pub(crate) fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to [{}] in lazybuild.toml",
            metadata.description, metadata.env_var, metadata.toml_key, metadata.section
        )));
    }
    Ok(())
}

impl ScalewayConfig {
    /// Reads the `[scaleway]` settings from defaults, `lazybuild.toml`, and
    /// `SCW_*` variables. Command-line arguments are not consulted.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([std::ffi::OsString::from("lazybuild")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds the reference to the configured build instance.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn instance(&self) -> Result<InstanceRef, ConfigError> {
        self.validate()?;
        InstanceRef::new(&self.instance_id, &self.default_zone)
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Polling policy applied to power transitions and script runs.
    #[must_use]
    pub const fn wait_policy(&self) -> WaitPolicy {
        WaitPolicy::new(
            Duration::from_secs(self.poll_interval_secs),
            Duration::from_secs(self.wait_timeout_secs),
        )
    }

    /// Checks that the credentials and instance are named and that the
    /// polling budget is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty,
    /// or [`ConfigError::Invalid`] when the polling settings are unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            &self.secret_key,
            &FieldMetadata::new(
                "Scaleway API secret key",
                "SCW_SECRET_KEY",
                "secret_key",
                "scaleway",
            ),
        )?;
        require_field(
            &self.instance_id,
            &FieldMetadata::new(
                "build instance ID",
                "SCW_INSTANCE_ID",
                "instance_id",
                "scaleway",
            ),
        )?;
        require_field(
            &self.default_zone,
            &FieldMetadata::new(
                "availability zone",
                "SCW_DEFAULT_ZONE",
                "default_zone",
                "scaleway",
            ),
        )?;
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(String::from(
                "poll_interval_secs must be at least 1",
            )));
        }
        if self.wait_timeout_secs < self.poll_interval_secs {
            return Err(ConfigError::Invalid(String::from(
                "wait_timeout_secs must not be shorter than poll_interval_secs",
            )));
        }
        Ok(())
    }
}

/// Failure to assemble a usable configuration.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// A required value is blank.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field is present but unusable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// The layered loader rejected a source.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
