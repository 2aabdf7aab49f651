//! Command-line interface definitions for the `lazybuild` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use camino::Utf8PathBuf;
use clap::Parser;

/// Top-level CLI for the `lazybuild` binary.
#[derive(Debug, Parser)]
#[command(
    name = "lazybuild",
    about = "Boot the cloud build machine, compile a GameMaker project on it, and fetch the package",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log at debug level, including every remote command (secrets masked).
    #[arg(long, short, global = true)]
    pub(crate) verbose: bool,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of the `lazybuild` binary.
#[derive(Debug, clap::Subcommand)]
pub(crate) enum Command {
    /// Report the build machine's power state.
    #[command(name = "status", about = "Report the build machine's power state")]
    Status,
    /// Power the build machine on and wait until it is running.
    #[command(name = "startup", about = "Power the build machine on")]
    Startup,
    /// Power the build machine off and wait until it is stopped.
    #[command(name = "shutdown", about = "Power the build machine off")]
    Shutdown,
    /// Run a full remote build and download the packaged artifact.
    #[command(name = "build", about = "Build the project remotely and fetch the package")]
    Build(BuildCommand),
    /// Run a local script on the build machine through the provider's
    /// command channel. Scaleway has none, so this fails there.
    #[command(
        name = "script",
        about = "Run a script on the build machine (not available on Scaleway)"
    )]
    Script(ScriptCommand),
}

/// Arguments for the `lazybuild build` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct BuildCommand {
    /// Empty the compiler cache on the build machine before building.
    #[arg(long)]
    pub(crate) clear_cache: bool,
    /// Power the build machine off once the build has finished.
    #[arg(long)]
    pub(crate) shutdown: bool,
}

/// Arguments for the `lazybuild script` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct ScriptCommand {
    /// Local script whose lines are run on the build machine.
    #[arg(value_name = "PATH")]
    pub(crate) path: Utf8PathBuf,
}
