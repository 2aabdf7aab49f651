//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;
use tempfile::TempDir;

const SCALEWAY_VARS: [&str; 4] = [
    "SCW_SECRET_KEY",
    "SCW_ACCESS_KEY",
    "SCW_INSTANCE_ID",
    "SCW_DEFAULT_ZONE",
];

#[test]
fn help_lists_every_command() {
    let mut cmd = cargo_bin_cmd!("lazybuild");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(contains("status"))
        .stdout(contains("startup"))
        .stdout(contains("shutdown"))
        .stdout(contains("build"))
        .stdout(contains("script"));
}

#[test]
fn script_help_notes_scaleway_limitation() {
    let mut cmd = cargo_bin_cmd!("lazybuild");
    cmd.args(["script", "--help"])
        .assert()
        .success()
        .stdout(contains("not available on Scaleway"));
}

#[test]
fn missing_command_is_a_usage_error() {
    let mut cmd = cargo_bin_cmd!("lazybuild");
    cmd.assert().failure().code(2);
}

#[test]
fn status_without_configuration_reports_config_error() {
    let home = TempDir::new().expect("temp home");
    let mut cmd = cargo_bin_cmd!("lazybuild");
    for var in SCALEWAY_VARS {
        cmd.env_remove(var);
    }
    cmd.env_remove("LAZYBUILD_CONFIG_PATH")
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .current_dir(home.path())
        .arg("status")
        .assert()
        .failure()
        .code(1)
        .stderr(contains("configuration error"));
}
