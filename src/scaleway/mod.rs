//! Scaleway implementation of the compute provider.
//!
//! The build instance is long-lived: it is powered on before a build and
//! optionally powered off afterwards, never created or deleted here.

mod error;

use std::net::IpAddr;
use std::str::FromStr;

use scaleway_rs::ScalewayApi;

use crate::config::ScalewayConfig;
use crate::provider::{
    ComputeProvider, InstanceRef, PowerState, ProviderFuture, ScriptInvocationId, ScriptStatus,
};

pub use error::ScalewayProviderError;

const POWER_ON: &str = "poweron";
const POWER_OFF: &str = "poweroff";

#[derive(Clone, Debug, Eq, PartialEq)]
struct InstanceSnapshot {
    id: String,
    state: String,
    allowed_actions: Vec<String>,
    public_ip: Option<String>,
}

impl InstanceSnapshot {
    fn allows(&self, action: &str) -> bool {
        self.allowed_actions.iter().any(|allowed| allowed == action)
    }
}

/// Maps a Scaleway server state onto the provider-neutral [`PowerState`].
///
/// Scaleway reports `stopped in place` for instances that keep their local
/// volumes; both stopped flavours map to [`PowerState::Stopped`].
#[must_use]
pub fn power_state_from_scaleway(state: &str) -> PowerState {
    match state {
        "running" => PowerState::Running,
        "stopped" | "stopped in place" => PowerState::Stopped,
        "starting" => PowerState::Starting,
        "stopping" => PowerState::Stopping,
        _ => PowerState::Unknown,
    }
}

/// Provider that drives an existing instance through the Scaleway Instances
/// API.
#[derive(Clone)]
pub struct ScalewayProvider {
    api: ScalewayApi,
}

impl ScalewayProvider {
    /// Constructs a new provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayProviderError::Config`] when the provided
    /// configuration fails validation.
    pub fn new(config: &ScalewayConfig) -> Result<Self, ScalewayProviderError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
        })
    }

    async fn fetch_instance(
        &self,
        instance: &InstanceRef,
    ) -> Result<Option<InstanceSnapshot>, ScalewayProviderError> {
        let mut servers = self
            .api
            .list_instances(&instance.zone)
            .servers(&instance.id)
            .per_page(1)
            .run_async()
            .await?;

        Ok(servers.pop().map(|server| InstanceSnapshot {
            id: server.id,
            state: server.state,
            allowed_actions: server.allowed_actions,
            public_ip: server.public_ip.map(|ip| ip.address),
        }))
    }

    async fn perform(
        &self,
        instance: &InstanceRef,
        action: &str,
    ) -> Result<(), ScalewayProviderError> {
        let Some(snapshot) = self.fetch_instance(instance).await? else {
            return Err(ScalewayProviderError::InstanceNotFound {
                instance_id: instance.id.clone(),
                zone: instance.zone.clone(),
            });
        };

        if !snapshot.allows(action) {
            return Err(ScalewayProviderError::ActionNotAllowed {
                instance_id: snapshot.id,
                state: snapshot.state,
                action: action.to_owned(),
            });
        }

        self.api
            .perform_instance_action_async(&instance.zone, &instance.id, action)
            .await?;
        Ok(())
    }
}

fn parse_address(
    snapshot: InstanceSnapshot,
) -> Result<Option<IpAddr>, ScalewayProviderError> {
    let Some(raw) = snapshot.public_ip else {
        return Ok(None);
    };
    IpAddr::from_str(&raw)
        .map(Some)
        .map_err(|_| ScalewayProviderError::InvalidAddress {
            instance_id: snapshot.id,
            address: raw,
        })
}

impl ComputeProvider for ScalewayProvider {
    type Error = ScalewayProviderError;

    fn describe_status<'a>(
        &'a self,
        instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, Option<PowerState>, Self::Error> {
        Box::pin(async move {
            let snapshot = self.fetch_instance(instance).await?;
            Ok(snapshot.map(|server| power_state_from_scaleway(&server.state)))
        })
    }

    fn start<'a>(&'a self, instance: &'a InstanceRef) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.perform(instance, POWER_ON).await })
    }

    fn stop<'a>(&'a self, instance: &'a InstanceRef) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move { self.perform(instance, POWER_OFF).await })
    }

    fn describe_network_address<'a>(
        &'a self,
        instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, Option<IpAddr>, Self::Error> {
        Box::pin(async move {
            match self.fetch_instance(instance).await? {
                Some(snapshot) => parse_address(snapshot),
                None => Ok(None),
            }
        })
    }

    // Scaleway has no agent-based run-command API, so scripts can only reach
    // the instance through the SSH session.
    fn supports_remote_scripts(&self) -> bool {
        false
    }

    fn send_remote_script<'a>(
        &'a self,
        _instance: &'a InstanceRef,
        _lines: &'a [String],
    ) -> ProviderFuture<'a, ScriptInvocationId, Self::Error> {
        Box::pin(async move {
            Err(ScalewayProviderError::Unsupported {
                operation: String::from("out-of-band script execution"),
            })
        })
    }

    fn poll_script_result<'a>(
        &'a self,
        _instance: &'a InstanceRef,
        _invocation: &'a ScriptInvocationId,
    ) -> ProviderFuture<'a, ScriptStatus, Self::Error> {
        Box::pin(async move {
            Err(ScalewayProviderError::Unsupported {
                operation: String::from("out-of-band script polling"),
            })
        })
    }
}
