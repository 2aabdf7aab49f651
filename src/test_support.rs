//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::ffi::OsString;
use std::net::IpAddr;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use camino::Utf8Path;
use thiserror::Error;

use crate::build::{BuildConfig, BuildJob};
use crate::config::ConfigError;
use crate::provider::{
    ComputeProvider, InstanceRef, PowerState, ProviderFuture, ScriptInvocationId, ScriptStatus,
};
use crate::shell::{CommandOutput, CommandRunner, ShellConfig, ShellError};

#[derive(Clone, Debug)]
enum Scripted {
    Output(CommandOutput),
    Download(Vec<u8>),
    Cancelled,
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<Scripted>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Whether output was requested as a stream.
    pub streamed: bool,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the final argument, which is the remote command line for
    /// `ssh` and the destination for `scp`.
    #[must_use]
    pub fn last_arg(&self) -> String {
        self.args
            .last()
            .map(|arg| arg.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Returns the remote command lines sent through `ssh`, skipping session
    /// management and transfers.
    #[must_use]
    pub fn remote_commands(&self) -> Vec<String> {
        self.invocations
            .borrow()
            .iter()
            .filter(|call| call.program == "ssh")
            .filter(|call| {
                !call
                    .args
                    .iter()
                    .any(|arg| arg == "-M" || arg == "-O")
            })
            .map(CommandInvocation::last_arg)
            .collect()
    }

    /// Number of responses not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.responses.borrow().len()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes `count` successful exit statuses.
    pub fn push_successes(&self, count: usize) {
        for _ in 0..count {
            self.push_success();
        }
    }

    /// Pushes a specific exit code.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .borrow_mut()
            .push_back(Scripted::Output(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            }));
    }

    /// Pushes a successful download: `bytes` are written to the invocation's
    /// final argument, emulating `scp` writing the local destination.
    pub fn push_download(&self, bytes: impl Into<Vec<u8>>) {
        self.responses
            .borrow_mut()
            .push_back(Scripted::Download(bytes.into()));
    }

    /// Pushes a response emulating a command killed by cancellation.
    pub fn push_cancelled(&self) {
        self.responses.borrow_mut().push_back(Scripted::Cancelled);
    }

    fn respond(
        &self,
        program: &str,
        args: &[OsString],
        streamed: bool,
    ) -> Result<CommandOutput, ShellError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            streamed,
        });
        let next = self
            .responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ShellError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })?;

        match next {
            Scripted::Output(output) => Ok(output),
            Scripted::Cancelled => Err(ShellError::Cancelled {
                program: program.to_owned(),
            }),
            Scripted::Download(bytes) => {
                let destination = args.last().ok_or_else(|| ShellError::Spawn {
                    program: program.to_owned(),
                    message: String::from("download has no destination argument"),
                })?;
                std::fs::write(destination, bytes).map_err(|err| ShellError::Spawn {
                    program: program.to_owned(),
                    message: err.to_string(),
                })?;
                Ok(CommandOutput {
                    code: Some(0),
                    ..CommandOutput::default()
                })
            }
        }
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[OsString]) -> Result<CommandOutput, ShellError> {
        self.respond(program, args, false)
    }

    fn run_streaming(
        &self,
        program: &str,
        args: &[OsString],
    ) -> Result<CommandOutput, ShellError> {
        self.respond(program, args, true)
    }
}

/// Shell settings with millisecond backoff suitable for tests.
#[must_use]
pub fn shell_config() -> ShellConfig {
    ShellConfig {
        ssh_bin: String::from("ssh"),
        scp_bin: String::from("scp"),
        ssh_user: String::from("buildManager"),
        ssh_port: 22,
        ssh_identity_file: String::from("/keys/rsa.pem"),
        ssh_strict_host_key_checking: false,
        ssh_known_hosts_file: String::from("/dev/null"),
        ssh_control_dir: Some(String::from("/tmp")),
        connect_attempt_timeout_secs: 5,
        connect_timeout_secs: 1,
        connect_initial_backoff_ms: 1,
        connect_max_backoff_ms: 2,
    }
}

/// Build settings for a project named `Game` built under `C:\out`.
#[must_use]
pub fn build_config() -> BuildConfig {
    BuildConfig {
        yoyo_id: String::from("yoyo-42"),
        runtime_version: String::from("2024.2.0.163"),
        steam_sdk_path: String::from(r"C:\steamworks\sdk"),
        yyp_path: String::from(r"C:\dev\Game\Game.yyp"),
        configuration: String::from("Release"),
        git_username: String::from("bot"),
        git_password: String::from("s3cret"),
        git_branch: String::from("main"),
        git_url: String::from("https://git.example.com/studio/game.git"),
        output_folder: String::from(r"C:\out"),
        cache_folder: String::from(r"C:\cache"),
        remote_project_path: None,
        runtime_root: String::from(r"C:\runtimes"),
        options_dir: String::from("resources/options"),
        artifact_dir: String::from("."),
    }
}

/// Builds a job from [`build_config`] reading options from `options_dir`
/// and writing the artifact into `artifact_dir`.
///
/// # Errors
///
/// Returns [`ConfigError`] when the fixture no longer validates.
pub fn build_job(options_dir: &Utf8Path, artifact_dir: &Utf8Path) -> Result<BuildJob, ConfigError> {
    BuildConfig {
        options_dir: options_dir.to_string(),
        artifact_dir: artifact_dir.to_string(),
        ..build_config()
    }
    .into_job()
}

/// Writes the four option files read during staging into `dir`.
///
/// # Errors
///
/// Returns the I/O error when a file cannot be written.
pub fn write_option_files(dir: &Utf8Path) -> std::io::Result<()> {
    let files = [
        ("targetoptions.json", r#"{"target": "Windows"}"#),
        ("preferences.json", r#"{"theme": "dark"}"#),
        (
            "build.bff",
            r#"{"outputFolder": "{BUILD_PATH}\\Output", "projectName": "{PROJECT_NAME}", "config": "{CONFIG}", "jobs": 8}"#,
        ),
        (
            "macros.json",
            r#"{"user": "{USERNAME}", "runtime": "{RUNTIME_VERSION}", "yoyo": "{YOYO_ID}"}"#,
        ),
    ];
    let handle = crate::fs::create_dir_all(dir)?;
    for (name, contents) in files {
        handle.write(name, contents)?;
    }
    Ok(())
}

/// Error returned by [`FakeProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fake provider: {0}")]
pub struct FakeProviderError(pub String);

#[derive(Debug, Default)]
struct FakeProviderState {
    power: Option<PowerState>,
    pending: Option<(PowerState, u32)>,
    transition_polls: u32,
    address: Option<IpAddr>,
    fail_start: bool,
    fail_status: bool,
    fail_stop: bool,
    reject_scripts: bool,
    no_script_channel: bool,
    script_statuses: VecDeque<ScriptStatus>,
    submitted_scripts: Vec<Vec<String>>,
    status_calls: usize,
    address_calls: usize,
    start_calls: usize,
    stop_calls: usize,
}

/// In-memory compute provider that simulates power transitions.
///
/// Start and stop requests move the instance into `starting`/`stopping`;
/// the target state is reported after a configurable number of further
/// status polls.
#[derive(Clone, Debug, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<FakeProviderState>>,
}

impl FakeProvider {
    /// Creates a provider whose instance starts in `power`.
    #[must_use]
    pub fn new(power: PowerState) -> Self {
        let provider = Self::default();
        provider.lock().power = Some(power);
        provider
    }

    /// Creates a provider that does not know the instance.
    #[must_use]
    pub fn missing() -> Self {
        Self::default()
    }

    /// Assigns the public address reported for the instance.
    #[must_use]
    pub fn with_address(self, address: IpAddr) -> Self {
        self.lock().address = Some(address);
        self
    }

    /// Sets how many polls a transition reports the intermediate state.
    #[must_use]
    pub fn with_transition_polls(self, polls: u32) -> Self {
        self.lock().transition_polls = polls;
        self
    }

    /// Places the instance mid-transition: `via` is reported for `polls`
    /// status lookups before `target` takes over.
    #[must_use]
    pub fn in_transition(self, via: PowerState, target: PowerState, polls: u32) -> Self {
        {
            let mut state = self.lock();
            state.power = Some(via);
            state.pending = Some((target, polls));
        }
        self
    }

    /// Makes start requests fail.
    #[must_use]
    pub fn failing_start(self) -> Self {
        self.lock().fail_start = true;
        self
    }

    /// Makes stop requests fail.
    #[must_use]
    pub fn failing_stop(self) -> Self {
        self.lock().fail_stop = true;
        self
    }

    /// Makes status lookups fail.
    #[must_use]
    pub fn failing_status(self) -> Self {
        self.lock().fail_status = true;
        self
    }

    /// Makes script submissions fail.
    #[must_use]
    pub fn rejecting_scripts(self) -> Self {
        self.lock().reject_scripts = true;
        self
    }

    /// Reports that the provider has no out-of-band command channel.
    #[must_use]
    pub fn without_script_channel(self) -> Self {
        self.lock().no_script_channel = true;
        self
    }

    /// Queues the next status reported for a submitted script. With the
    /// queue empty, scripts stay pending.
    pub fn push_script_status(&self, status: ScriptStatus) {
        self.lock().script_statuses.push_back(status);
    }

    /// Current simulated power state, `None` when the instance is unknown.
    #[must_use]
    pub fn power(&self) -> Option<PowerState> {
        self.lock().power
    }

    /// Number of status lookups served.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        self.lock().status_calls
    }

    /// Number of address lookups served.
    #[must_use]
    pub fn address_calls(&self) -> usize {
        self.lock().address_calls
    }

    /// Number of start requests received.
    #[must_use]
    pub fn start_calls(&self) -> usize {
        self.lock().start_calls
    }

    /// Number of stop requests received.
    #[must_use]
    pub fn stop_calls(&self) -> usize {
        self.lock().stop_calls
    }

    /// Scripts submitted so far, one entry of lines per submission.
    #[must_use]
    pub fn submitted_scripts(&self) -> Vec<Vec<String>> {
        self.lock().submitted_scripts.clone()
    }

    fn lock(&self) -> MutexGuard<'_, FakeProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn begin_transition(&self, via: PowerState, target: PowerState) {
        let mut state = self.lock();
        let polls = state.transition_polls;
        state.power = Some(via);
        state.pending = Some((target, polls));
    }
}

impl ComputeProvider for FakeProvider {
    type Error = FakeProviderError;

    fn describe_status<'a>(
        &'a self,
        _instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, Option<PowerState>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.status_calls += 1;
            if state.fail_status {
                return Err(FakeProviderError(String::from("status unavailable")));
            }
            match state.pending {
                Some((target, 0)) => {
                    state.power = Some(target);
                    state.pending = None;
                }
                Some((target, remaining)) => state.pending = Some((target, remaining - 1)),
                None => {}
            }
            Ok(state.power)
        })
    }

    fn start<'a>(&'a self, _instance: &'a InstanceRef) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let fail = {
                let mut state = self.lock();
                state.start_calls += 1;
                state.fail_start
            };
            if fail {
                return Err(FakeProviderError(String::from("start refused")));
            }
            self.begin_transition(PowerState::Starting, PowerState::Running);
            Ok(())
        })
    }

    fn stop<'a>(&'a self, _instance: &'a InstanceRef) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let fail = {
                let mut state = self.lock();
                state.stop_calls += 1;
                state.fail_stop
            };
            if fail {
                return Err(FakeProviderError(String::from("stop refused")));
            }
            self.begin_transition(PowerState::Stopping, PowerState::Stopped);
            Ok(())
        })
    }

    fn describe_network_address<'a>(
        &'a self,
        _instance: &'a InstanceRef,
    ) -> ProviderFuture<'a, Option<IpAddr>, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            state.address_calls += 1;
            Ok(state.address)
        })
    }

    fn supports_remote_scripts(&self) -> bool {
        !self.lock().no_script_channel
    }

    fn send_remote_script<'a>(
        &'a self,
        _instance: &'a InstanceRef,
        lines: &'a [String],
    ) -> ProviderFuture<'a, ScriptInvocationId, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            if state.reject_scripts {
                return Err(FakeProviderError(String::from("command channel offline")));
            }
            state.submitted_scripts.push(lines.to_vec());
            Ok(ScriptInvocationId(format!(
                "invocation-{}",
                state.submitted_scripts.len()
            )))
        })
    }

    fn poll_script_result<'a>(
        &'a self,
        _instance: &'a InstanceRef,
        _invocation: &'a ScriptInvocationId,
    ) -> ProviderFuture<'a, ScriptStatus, Self::Error> {
        Box::pin(async move {
            Ok(self
                .lock()
                .script_statuses
                .pop_front()
                .unwrap_or(ScriptStatus::Pending))
        })
    }
}
