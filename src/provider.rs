//! Provider abstraction for the single compute instance that hosts builds.
//!
//! The orchestration core never talks to a cloud SDK directly. It drives a
//! [`ComputeProvider`], which exposes exactly the status, power, address and
//! out-of-band script operations the build lifecycle needs.

use std::fmt;
use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use thiserror::Error;

/// Identifies an existing instance within a provider region.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRef {
    /// Provider specific identifier for the instance.
    pub id: String,
    /// Region or availability zone that hosts the instance.
    pub zone: String,
}

impl InstanceRef {
    /// Builds a reference, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderRequestError::MissingField`] when either value is
    /// blank.
    pub fn new(id: impl Into<String>, zone: impl Into<String>) -> Result<Self, ProviderRequestError> {
        let trimmed_id = id.into().trim().to_owned();
        let trimmed_zone = zone.into().trim().to_owned();
        if trimmed_id.is_empty() {
            return Err(ProviderRequestError::MissingField(String::from("instance_id")));
        }
        if trimmed_zone.is_empty() {
            return Err(ProviderRequestError::MissingField(String::from("zone")));
        }
        Ok(Self {
            id: trimmed_id,
            zone: trimmed_zone,
        })
    }
}

impl fmt::Display for InstanceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.zone)
    }
}

/// Power state of the build instance.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum PowerState {
    /// State has not been observed, or the last request left it unresolved.
    #[default]
    Unknown,
    /// Instance is powered off.
    Stopped,
    /// Instance is booting.
    Starting,
    /// Instance is up.
    Running,
    /// Instance is shutting down.
    Stopping,
}

impl PowerState {
    /// Returns the lower-case label used in logs and CLI output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
        }
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifier returned when a script is submitted out of band.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScriptInvocationId(pub String);

impl fmt::Display for ScriptInvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Progress of an out-of-band script.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ScriptStatus {
    /// The script is queued or still running.
    Pending,
    /// The script finished successfully.
    Succeeded {
        /// Captured standard output.
        stdout: String,
    },
    /// The script finished unsuccessfully.
    Failed {
        /// Exit status reported by the provider, when known.
        exit_code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
}

/// Errors raised while building provider requests.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProviderRequestError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    MissingField(String),
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Minimal interface implemented by cloud providers.
pub trait ComputeProvider {
    /// Provider specific error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reports the power state, or `None` when the provider does not know the
    /// instance.
    fn describe_status<'a>(
        &'a self,
        instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, Option<PowerState>, Self::Error>;

    /// Requests that the instance powers on.
    fn start<'a>(&'a self, instance: &'a InstanceRef) -> ProviderFuture<'a, (), Self::Error>;

    /// Requests that the instance powers off.
    fn stop<'a>(&'a self, instance: &'a InstanceRef) -> ProviderFuture<'a, (), Self::Error>;

    /// Looks up the public address, or `None` when none is assigned.
    fn describe_network_address<'a>(
        &'a self,
        instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, Option<IpAddr>, Self::Error>;

    /// Reports whether the provider has an out-of-band command channel for
    /// [`ComputeProvider::send_remote_script`].
    fn supports_remote_scripts(&self) -> bool {
        true
    }

    /// Submits a line-oriented script through the provider's command channel.
    fn send_remote_script<'a>(
        &'a self,
        instance: &'a InstanceRef,
        lines: &'a [String],
    ) -> ProviderFuture<'a, ScriptInvocationId, Self::Error>;

    /// Reports the progress of a previously submitted script.
    fn poll_script_result<'a>(
        &'a self,
        instance: &'a InstanceRef,
        invocation: &'a ScriptInvocationId,
    ) -> ProviderFuture<'a, ScriptStatus, Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("", "fr-par-1", "instance_id")]
    #[case("  ", "fr-par-1", "instance_id")]
    #[case("abc", "", "zone")]
    fn instance_ref_rejects_blank_fields(#[case] id: &str, #[case] zone: &str, #[case] field: &str) {
        let err = InstanceRef::new(id, zone).expect_err("blank field should fail");
        assert_eq!(err, ProviderRequestError::MissingField(field.to_owned()));
    }

    #[test]
    fn instance_ref_trims_values() {
        let instance = InstanceRef::new(" abc ", " fr-par-1 ").expect("valid instance");
        assert_eq!(instance.id, "abc");
        assert_eq!(instance.zone, "fr-par-1");
        assert_eq!(instance.to_string(), "abc (fr-par-1)");
    }

    #[test]
    fn power_state_defaults_to_unknown() {
        assert_eq!(PowerState::default(), PowerState::Unknown);
        assert_eq!(PowerState::Running.to_string(), "running");
    }
}
