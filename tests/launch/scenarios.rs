//! BDD scenarios for the launch workflow.

use rstest_bdd_macros::scenario;

use super::test_helpers::{LaunchContext, launch_context};

#[scenario(
    path = "tests/features/launch.feature",
    name = "Connect once the instance receives an address"
)]
fn scenario_connect_after_address(launch_context: LaunchContext) {
    drop(launch_context);
}

#[scenario(
    path = "tests/features/launch.feature",
    name = "Give up when the instance never receives an address"
)]
fn scenario_address_timeout(launch_context: LaunchContext) {
    drop(launch_context);
}

#[scenario(
    path = "tests/features/launch.feature",
    name = "Run the init script only once across relaunches"
)]
fn scenario_init_once(launch_context: LaunchContext) {
    drop(launch_context);
}

#[scenario(
    path = "tests/features/launch.feature",
    name = "Abort the launch when the init script fails"
)]
fn scenario_init_failure(launch_context: LaunchContext) {
    drop(launch_context);
}

#[scenario(
    path = "tests/features/launch.feature",
    name = "Closing the channel releases the node exactly once"
)]
fn scenario_close_once(launch_context: LaunchContext) {
    drop(launch_context);
}
