//! BDD step definitions for the launch workflow.

use std::time::Duration;

use rstest_bdd_macros::{given, then, when};
use winlaunch::test_support::{ProcessScript, snapshot, unassigned_snapshot};

use super::test_helpers::{
    AGENT_PATH, INIT_PREFIX, LaunchContext, LaunchOutcome, PRIVATE_IP, PUBLIC_IP,
};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

fn check(condition: bool, message: impl FnOnce() -> String) -> Result<(), StepError> {
    if condition {
        Ok(())
    } else {
        Err(StepError::Assertion(message()))
    }
}

#[given("a fresh Windows instance")]
fn fresh_instance(launch_context: &LaunchContext) -> Result<(), StepError> {
    check(launch_context.factory.opened().is_empty(), || {
        String::from("a fresh instance should have no sessions")
    })
}

#[given("the instance reports no address for \"{count}\" attempts")]
fn no_address_for(launch_context: &LaunchContext, count: u32) {
    for _ in 0..count {
        launch_context
            .describer
            .push_snapshot(unassigned_snapshot(launch_context.started));
    }
}

#[given("the instance never receives an address")]
fn never_receives_address(launch_context: &LaunchContext) {
    launch_context
        .describer
        .push_snapshot(unassigned_snapshot(launch_context.started));
}

#[given("the instance has a public address")]
fn has_public_address(launch_context: &LaunchContext) {
    launch_context.describer.push_snapshot(snapshot(
        PRIVATE_IP,
        Some(PUBLIC_IP),
        launch_context.started,
    ));
}

#[given("the WinRM service answers")]
fn service_answers(launch_context: &LaunchContext) {
    launch_context.factory.answer_probes(true);
}

#[given("the launch timeout is \"{secs}\" seconds")]
fn launch_timeout(launch_context: &LaunchContext, secs: u64) {
    launch_context.settings.borrow_mut().launch_timeout = Duration::from_secs(secs);
}

#[given("the node has an init script")]
fn node_has_init_script(launch_context: &LaunchContext) {
    launch_context.settings.borrow_mut().init_script = Some(String::from("choco install git -y"));
}

#[given("the init script fails with exit code \"{code}\"")]
fn init_script_fails(launch_context: &LaunchContext, code: i32) {
    launch_context
        .host
        .on_command(INIT_PREFIX, ProcessScript::exits(code));
}

#[when("I launch the agent")]
fn launch_agent(launch_context: &LaunchContext) {
    launch_context.launch();
}

#[when("I launch the agent again")]
fn launch_agent_again(launch_context: &LaunchContext) {
    launch_context.launch();
}

#[when("the channel is closed twice")]
fn channel_closed_twice(launch_context: &LaunchContext) -> Result<(), StepError> {
    let Some(LaunchOutcome::Success(channel)) = launch_context.outcome() else {
        return Err(StepError::Assertion(String::from(
            "a channel is required before closing it",
        )));
    };
    let results = launch_context
        .runtime
        .block_on(async move { vec![channel.close().await, channel.close().await] });
    launch_context.close_results.replace(results);
    Ok(())
}

#[then("the launch succeeds")]
fn launch_succeeds(launch_context: &LaunchContext) -> Result<(), StepError> {
    match launch_context.outcome() {
        Some(LaunchOutcome::Success(_)) => Ok(()),
        Some(LaunchOutcome::Failure(message)) => Err(StepError::Assertion(format!(
            "expected success, got failure: {message}"
        ))),
        None => Err(StepError::Assertion(String::from("missing outcome"))),
    }
}

#[then("the launch fails with \"{message}\"")]
fn launch_fails_with(launch_context: &LaunchContext, message: String) -> Result<(), StepError> {
    let Some(LaunchOutcome::Failure(failure)) = launch_context.outcome() else {
        return Err(StepError::Assertion(String::from(
            "expected failure outcome",
        )));
    };
    check(failure.contains(&message), || {
        format!("expected failure containing {message:?}, got {failure:?}")
    })
}

#[then("the session is opened at the public address")]
fn session_at_public_address(launch_context: &LaunchContext) -> Result<(), StepError> {
    let opened = launch_context.factory.opened();
    check(opened.last().map(String::as_str) == Some(PUBLIC_IP), || {
        format!("expected last session at {PUBLIC_IP}, opened {opened:?}")
    })
}

#[then("no session is opened")]
fn no_session_opened(launch_context: &LaunchContext) -> Result<(), StepError> {
    let opened = launch_context.factory.opened();
    check(opened.is_empty(), || format!("expected no sessions, opened {opened:?}"))
}

#[then("the log contains \"{text}\"")]
fn log_contains(launch_context: &LaunchContext, text: String) -> Result<(), StepError> {
    check(launch_context.log.contains(&text), || {
        format!(
            "expected log line containing {text:?}, got {:?}",
            launch_context.log.lines()
        )
    })
}

#[then("the log does not contain \"{text}\"")]
fn log_does_not_contain(launch_context: &LaunchContext, text: String) -> Result<(), StepError> {
    check(!launch_context.log.contains(&text), || {
        format!("unexpected log line containing {text:?}")
    })
}

#[then("the init script ran \"{count}\" times")]
fn init_script_ran(launch_context: &LaunchContext, count: usize) -> Result<(), StepError> {
    let runs = launch_context.host.command_count(INIT_PREFIX);
    check(runs == count, || {
        format!("expected {count} init script runs, got {runs}")
    })
}

#[then("the agent is not uploaded")]
fn agent_not_uploaded(launch_context: &LaunchContext) -> Result<(), StepError> {
    check(launch_context.host.upload_count(AGENT_PATH) == 0, || {
        String::from("agent runtime should not be uploaded")
    })
}

#[then("the session is closed \"{count}\" times")]
fn session_closed(launch_context: &LaunchContext, count: u32) -> Result<(), StepError> {
    let closes = launch_context.host.closes();
    check(closes == count, || {
        format!("expected {count} session closes, got {closes}")
    })
}

#[then("the agent process is terminated \"{count}\" times")]
fn process_terminated(launch_context: &LaunchContext, count: u32) -> Result<(), StepError> {
    let terminations = launch_context.host.terminations();
    check(terminations == count, || {
        format!("expected {count} terminations, got {terminations}")
    })
}

#[then("only the first close releases resources")]
fn first_close_wins(launch_context: &LaunchContext) -> Result<(), StepError> {
    let results = launch_context.close_results.borrow().clone();
    check(results == [true, false], || {
        format!("expected close results [true, false], got {results:?}")
    })
}
