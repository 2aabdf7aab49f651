//! Lifecycle handle for the single compute instance that hosts builds.
//!
//! [`RemoteHandle`] tracks the last observed power state and caches the
//! public address once resolved. Every state-changing call re-derives the
//! state from the provider first, so a stale cached state never drives a
//! decision for longer than one operation.

mod error;

use std::net::IpAddr;

use camino::Utf8Path;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::provider::{ComputeProvider, InstanceRef, PowerState, ScriptStatus};
use crate::wait::{WaitError, WaitPolicy, poll_until};

pub use error::{HandleError, ScriptError, StartError, StopError};

/// Handle to one provisioned compute instance.
#[derive(Debug)]
pub struct RemoteHandle<P: ComputeProvider> {
    provider: P,
    instance: InstanceRef,
    state: PowerState,
    address: Option<IpAddr>,
    stop_on_release: bool,
    policy: WaitPolicy,
    cancel: CancellationToken,
}

impl<P: ComputeProvider> RemoteHandle<P> {
    /// Creates a handle in the `unknown` state. No provider call is made
    /// until the first operation.
    #[must_use]
    pub const fn new(
        provider: P,
        instance: InstanceRef,
        policy: WaitPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            instance,
            state: PowerState::Unknown,
            address: None,
            stop_on_release: false,
            policy,
            cancel,
        }
    }

    /// Sets whether [`RemoteHandle::release`] powers the instance off.
    #[must_use]
    pub const fn with_stop_on_release(mut self, stop_on_release: bool) -> Self {
        self.stop_on_release = stop_on_release;
        self
    }

    /// Last observed power state.
    #[must_use]
    pub const fn state(&self) -> PowerState {
        self.state
    }

    /// Instance this handle drives.
    #[must_use]
    pub const fn instance(&self) -> &InstanceRef {
        &self.instance
    }

    /// Cached public address, if one has been resolved.
    #[must_use]
    pub const fn cached_address(&self) -> Option<IpAddr> {
        self.address
    }

    /// Provider backing this handle.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Queries the provider for the current power state. An instance the
    /// provider does not know is reported as stopped.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::Provider`] when the lookup fails.
    pub async fn query_power_state(&mut self) -> Result<PowerState, HandleError<P::Error>> {
        let observed = fetch_state(&self.provider, &self.instance)
            .await
            .map_err(|source| HandleError::Provider {
                instance: self.instance.to_string(),
                source,
            })?;
        self.observe(observed);
        Ok(observed)
    }

    /// Powers the instance on and waits until it reports `running`, then
    /// resolves its address. Succeeds immediately when already running.
    ///
    /// A rejected start request leaves the state `unknown`.
    ///
    /// # Errors
    ///
    /// Returns [`StartError`] when a lookup fails, the provider rejects the
    /// request, or the wait times out or is cancelled.
    pub async fn start(&mut self) -> Result<(), StartError<P::Error>> {
        match self.query_power_state().await? {
            PowerState::Running => {
                debug!(instance = %self.instance, "instance already running");
                return Ok(());
            }
            PowerState::Starting => {
                debug!(instance = %self.instance, "instance already starting");
            }
            PowerState::Stopping => {
                self.await_state(PowerState::Stopped, "instance to stop")
                    .await
                    .map_err(|source| self.start_wait_error(source))?;
                self.request_start().await?;
            }
            PowerState::Stopped | PowerState::Unknown => self.request_start().await?,
        }

        self.await_state(PowerState::Running, "instance to start")
            .await
            .map_err(|source| self.start_wait_error(source))?;
        let address = self.get_address().await?;
        info!(instance = %self.instance, %address, "instance running");
        Ok(())
    }

    /// Powers the instance off and waits until it reports `stopped`. The
    /// cached address is discarded. Succeeds immediately when already
    /// stopped.
    ///
    /// # Errors
    ///
    /// Returns [`StopError`] when a lookup fails, the provider rejects the
    /// request, or the wait times out or is cancelled.
    pub async fn stop(&mut self) -> Result<(), StopError<P::Error>> {
        match self.query_power_state().await? {
            PowerState::Stopped => {
                debug!(instance = %self.instance, "instance already stopped");
                return Ok(());
            }
            PowerState::Stopping => {
                debug!(instance = %self.instance, "instance already stopping");
            }
            PowerState::Starting => {
                self.await_state(PowerState::Running, "instance to finish starting")
                    .await
                    .map_err(|source| self.stop_wait_error(source))?;
                self.request_stop().await?;
            }
            PowerState::Running | PowerState::Unknown => self.request_stop().await?,
        }

        self.address = None;
        self.await_state(PowerState::Stopped, "instance to stop")
            .await
            .map_err(|source| self.stop_wait_error(source))?;
        info!(instance = %self.instance, "instance stopped");
        Ok(())
    }

    /// Returns the public address, resolving it once and caching it until
    /// the instance stops.
    ///
    /// # Errors
    ///
    /// Returns [`HandleError::Provider`] when the lookup fails or
    /// [`HandleError::AddressUnavailable`] when no address is assigned.
    pub async fn get_address(&mut self) -> Result<IpAddr, HandleError<P::Error>> {
        if let Some(address) = self.address {
            return Ok(address);
        }

        let resolved = self
            .provider
            .describe_network_address(&self.instance)
            .await
            .map_err(|source| HandleError::Provider {
                instance: self.instance.to_string(),
                source,
            })?;
        let address = resolved.ok_or_else(|| HandleError::AddressUnavailable {
            instance: self.instance.to_string(),
        })?;
        self.address = Some(address);
        Ok(address)
    }

    /// Runs a local line-oriented script through the provider's out-of-band
    /// command channel and returns its captured standard output.
    ///
    /// # Errors
    ///
    /// Returns [`ScriptError::Unsupported`] before reading anything when the
    /// provider has no command channel,
    /// [`ScriptError::ScriptNotFound`] when `path` does not exist,
    /// [`ScriptError::Rejected`] or [`ScriptError::Failed`] when execution
    /// fails, and [`ScriptError::Wait`] when polling gives up.
    pub async fn run_remote_script(&self, path: &Utf8Path) -> Result<String, ScriptError<P::Error>> {
        if !self.provider.supports_remote_scripts() {
            return Err(ScriptError::Unsupported {
                instance: self.instance.to_string(),
            });
        }
        let content = crate::fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ScriptError::ScriptNotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ScriptError::Read {
                    path: path.to_path_buf(),
                    message: err.to_string(),
                }
            }
        })?;
        let lines: Vec<String> = content.lines().map(str::to_owned).collect();

        let provider = &self.provider;
        let instance = &self.instance;
        let invocation = provider
            .send_remote_script(instance, &lines)
            .await
            .map_err(|source| ScriptError::Rejected { source })?;
        info!(%instance, %invocation, lines = lines.len(), "remote script submitted");

        let invocation = &invocation;
        let outcome = poll_until(self.policy, &self.cancel, "remote script", || async move {
            let status = provider.poll_script_result(instance, invocation).await?;
            Ok::<_, P::Error>(match status {
                ScriptStatus::Pending => None,
                ScriptStatus::Succeeded { stdout } => Some(Ok(stdout)),
                ScriptStatus::Failed { exit_code, stderr } => Some(Err((exit_code, stderr))),
            })
        })
        .await
        .map_err(ScriptError::Wait)?;

        outcome.map_err(|(exit_code, stderr)| ScriptError::Failed { exit_code, stderr })
    }

    /// Applies the stop-on-release policy: stops the instance when the
    /// policy is set, otherwise leaves it running.
    ///
    /// # Errors
    ///
    /// Returns [`StopError`] when the policy requires a stop that fails.
    pub async fn release(&mut self) -> Result<(), StopError<P::Error>> {
        if !self.stop_on_release {
            debug!(instance = %self.instance, "leaving instance running on release");
            return Ok(());
        }
        self.stop().await
    }

    async fn request_start(&mut self) -> Result<(), StartError<P::Error>> {
        info!(instance = %self.instance, "requesting instance start");
        if let Err(source) = self.provider.start(&self.instance).await {
            self.state = PowerState::Unknown;
            return Err(StartError::Request {
                instance: self.instance.to_string(),
                source,
            });
        }
        self.state = PowerState::Starting;
        Ok(())
    }

    async fn request_stop(&mut self) -> Result<(), StopError<P::Error>> {
        info!(instance = %self.instance, "requesting instance stop");
        if let Err(source) = self.provider.stop(&self.instance).await {
            self.state = PowerState::Unknown;
            return Err(StopError::Request {
                instance: self.instance.to_string(),
                source,
            });
        }
        self.state = PowerState::Stopping;
        Ok(())
    }

    async fn await_state(
        &mut self,
        target: PowerState,
        action: &str,
    ) -> Result<(), WaitError<P::Error>> {
        let provider = &self.provider;
        let instance = &self.instance;
        let reached = poll_until(self.policy, &self.cancel, action, || async move {
            let state = fetch_state(provider, instance).await?;
            Ok::<_, P::Error>((state == target).then_some(state))
        })
        .await;

        match reached {
            Ok(state) => {
                self.observe(state);
                Ok(())
            }
            Err(err) => {
                self.state = PowerState::Unknown;
                Err(err)
            }
        }
    }

    fn observe(&mut self, state: PowerState) {
        self.state = state;
        if state == PowerState::Stopped {
            self.address = None;
        }
    }

    fn start_wait_error(&self, source: WaitError<P::Error>) -> StartError<P::Error> {
        StartError::Wait {
            instance: self.instance.to_string(),
            source,
        }
    }

    fn stop_wait_error(&self, source: WaitError<P::Error>) -> StopError<P::Error> {
        StopError::Wait {
            instance: self.instance.to_string(),
            source,
        }
    }
}

async fn fetch_state<P: ComputeProvider>(
    provider: &P,
    instance: &InstanceRef,
) -> Result<PowerState, P::Error> {
    let reported = provider.describe_status(instance).await?;
    Ok(reported.unwrap_or(PowerState::Stopped))
}
