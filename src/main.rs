//! Binary entry point for the lazybuild CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use lazybuild::{
    BuildConfig, BuildPipeline, BuildRequest, HandleError, PipelineError, ProcessCommandRunner,
    RemoteHandle, ScalewayConfig, ScalewayProvider, ScalewayProviderError, ScriptError,
    ShellConfig, StartError, StopError,
};

mod cli;

use cli::{BuildCommand, Cli, Command, ScriptCommand};

type Handle = RemoteHandle<ScalewayProvider>;

/// Exit status for a forced exit on a repeated interrupt.
const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("provider error: {0}")]
    Provider(#[from] ScalewayProviderError),
    #[error("status query failed: {0}")]
    Status(#[from] HandleError<ScalewayProviderError>),
    #[error("startup failed: {0}")]
    Startup(#[from] StartError<ScalewayProviderError>),
    #[error("shutdown failed: {0}")]
    Shutdown(#[from] StopError<ScalewayProviderError>),
    #[error("script failed: {0}")]
    Script(#[from] ScriptError<ScalewayProviderError>),
    #[error("build failed: {0}")]
    Build(#[from] PipelineError<ScalewayProviderError>),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            if interrupt.is_cancelled() {
                warn!("second interrupt received, exiting");
                process::exit(INTERRUPTED_EXIT_CODE);
            }
            warn!("interrupt received, cancelling");
            interrupt.cancel();
        }
    });

    let exit_code = match dispatch(cli, &cancel).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn filter_directive(verbose: bool) -> &'static str {
    if verbose { "lazybuild=debug" } else { "lazybuild=info" }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(verbose)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(cli: Cli, cancel: &CancellationToken) -> Result<(), CliError> {
    let verbose = cli.verbose;
    match cli.command {
        Command::Status => {
            let mut handle = remote_handle(cancel)?;
            let state = handle.query_power_state().await?;
            writeln!(io::stdout(), "{}: {state}", handle.instance()).ok();
        }
        Command::Startup => {
            let mut handle = remote_handle(cancel)?;
            handle.start().await?;
            let address = handle.get_address().await?;
            writeln!(io::stdout(), "{}: running at {address}", handle.instance()).ok();
        }
        Command::Shutdown => {
            let mut handle = remote_handle(cancel)?;
            handle.stop().await?;
            writeln!(io::stdout(), "{}: stopped", handle.instance()).ok();
        }
        Command::Build(args) => build_command(&args, verbose, cancel).await?,
        Command::Script(args) => script_command(&args, cancel).await?,
    }
    Ok(())
}

async fn build_command(
    args: &BuildCommand,
    verbose: bool,
    cancel: &CancellationToken,
) -> Result<(), CliError> {
    let job = BuildConfig::load_without_cli_args()
        .and_then(BuildConfig::into_job)
        .map_err(config_error)?;
    let shell_config = ShellConfig::load_without_cli_args().map_err(config_error)?;
    shell_config.validate().map_err(config_error)?;
    let mut handle = remote_handle(cancel)?;

    let request = BuildRequest {
        clear_cache: args.clear_cache,
        verbose,
        shutdown: args.shutdown,
    };
    let artifact = BuildPipeline::new(
        shell_config,
        ProcessCommandRunner::new(cancel.clone()),
        request,
    )
        .run(&mut handle, job, cancel)
        .await?;
    writeln!(io::stdout(), "{}", artifact.local_path).ok();
    Ok(())
}

async fn script_command(args: &ScriptCommand, cancel: &CancellationToken) -> Result<(), CliError> {
    let handle = remote_handle(cancel)?;
    let output = handle.run_remote_script(&args.path).await?;
    write!(io::stdout(), "{output}").ok();
    Ok(())
}

fn remote_handle(cancel: &CancellationToken) -> Result<Handle, CliError> {
    let config = ScalewayConfig::load_without_cli_args().map_err(config_error)?;
    let instance = config.instance().map_err(config_error)?;
    let provider = ScalewayProvider::new(&config)?;
    Ok(
        RemoteHandle::new(provider, instance, config.wait_policy(), cancel.clone())
            .with_stop_on_release(config.stop_on_release),
    )
}

fn config_error(err: impl std::fmt::Display) -> CliError {
    CliError::Config(err.to_string())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
