//! BDD scenarios for the remote build workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{BuildContext, build_context};

#[scenario(
    path = "tests/features/build.feature",
    name = "Clone and build on a stopped machine"
)]
fn scenario_fresh_build(build_context: BuildContext) {
    drop(build_context);
}

#[scenario(
    path = "tests/features/build.feature",
    name = "Update an existing checkout"
)]
fn scenario_update_checkout(build_context: BuildContext) {
    drop(build_context);
}

#[scenario(
    path = "tests/features/build.feature",
    name = "Stop the machine after a compiler failure"
)]
fn scenario_compile_failure(build_context: BuildContext) {
    drop(build_context);
}

#[scenario(
    path = "tests/features/build.feature",
    name = "Report a missing package"
)]
fn scenario_missing_package(build_context: BuildContext) {
    drop(build_context);
}
