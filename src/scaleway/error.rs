//! Error types for the Scaleway provider.

use crate::config::ConfigError;
use scaleway_rs::ScalewayError;
use thiserror::Error;

/// Errors raised by the Scaleway provider.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScalewayProviderError {
    /// Raised when the high-level configuration is incomplete.
    #[error("configuration error: {0}")]
    Config(String),
    /// Raised when the provider refuses a power action in the current state.
    #[error("instance {instance_id} in state {state} does not allow {action}")]
    ActionNotAllowed {
        /// Provider instance identifier.
        instance_id: String,
        /// Current state reported by the provider.
        state: String,
        /// Action that was requested.
        action: String,
    },
    /// Raised when an action targets an instance the API does not list.
    #[error("instance {instance_id} not found in zone {zone}")]
    InstanceNotFound {
        /// Provider instance identifier.
        instance_id: String,
        /// Zone used for the lookup.
        zone: String,
    },
    /// Raised when the reported public address cannot be parsed.
    #[error("instance {instance_id} reported an unparsable address '{address}'")]
    InvalidAddress {
        /// Provider instance identifier.
        instance_id: String,
        /// Raw address string.
        address: String,
    },
    /// Raised for operations the Instances API has no channel for.
    #[error("{operation} is not supported by the Scaleway Instances API")]
    Unsupported {
        /// Operation that was requested.
        operation: String,
    },
    /// Wrapper for provider level failures.
    #[error("provider error: {message}")]
    Provider {
        /// Message returned by the provider SDK.
        message: String,
    },
}

impl From<ScalewayError> for ScalewayProviderError {
    fn from(value: ScalewayError) -> Self {
        Self::Provider {
            message: value.to_string(),
        }
    }
}

impl From<ConfigError> for ScalewayProviderError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value.to_string())
    }
}
