//! Shared fixtures for launch BDD scenarios.
//!
//! Steps borrow the context rather than passing it along by value, so the
//! scripted collaborators stay shared and the mutable scenario state lives in
//! `RefCell`s.

use std::cell::RefCell;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use rstest::fixture;
use tokio::runtime::Runtime;
use winlaunch::test_support::{
    FakeHost, ManualClock, MemoryLog, ProcessScript, RecordedChannel, RecordingChannelBuilder,
    ScriptedDescriber, ScriptedFactory,
};
use winlaunch::{BytesArtifact, Bootstrapper, Connector, Launcher, Node};

pub const PRIVATE_IP: &str = "10.0.0.5";
pub const PUBLIC_IP: &str = "203.0.113.7";
pub const AGENT_PATH: &str = r"C:\Windows\Temp\agent.jar";
pub const INIT_PREFIX: &str = "cmd /c";

const AGENT_BYTES: &[u8] = b"PK\x03\x04agent";

#[derive(Clone, Debug)]
pub enum LaunchOutcome {
    Success(Arc<RecordedChannel>),
    Failure(String),
}

#[derive(Clone, Debug)]
pub struct LaunchSettings {
    pub init_script: Option<String>,
    pub launch_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct LaunchContext {
    pub runtime: Arc<Runtime>,
    pub host: FakeHost,
    pub describer: ScriptedDescriber,
    pub factory: ScriptedFactory,
    pub clock: ManualClock,
    pub log: MemoryLog,
    pub started: SystemTime,
    pub settings: RefCell<LaunchSettings>,
    pub outcome: RefCell<Option<LaunchOutcome>>,
    pub close_results: RefCell<Vec<bool>>,
}

#[fixture]
pub fn launch_context() -> LaunchContext {
    let runtime =
        Runtime::new().unwrap_or_else(|err| panic!("tokio runtime should start: {err}"));
    let host = FakeHost::new();
    host.on_command("java", ProcessScript::long_running());
    let started = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

    LaunchContext {
        runtime: Arc::new(runtime),
        factory: ScriptedFactory::new(host.clone()),
        host,
        describer: ScriptedDescriber::new(),
        clock: ManualClock::new(started),
        log: MemoryLog::new(),
        started,
        settings: RefCell::new(LaunchSettings {
            init_script: None,
            launch_timeout: Duration::from_secs(600),
        }),
        outcome: RefCell::new(None),
        close_results: RefCell::new(Vec::new()),
    }
}

impl LaunchContext {
    /// Runs one launch against the scripted collaborators and records the
    /// outcome.
    pub fn launch(&self) {
        let settings = self.settings.borrow().clone();
        let node = Node::builder("win-bdd")
            .init_script(settings.init_script)
            .launch_timeout(settings.launch_timeout)
            .boot_delay(Duration::from_secs(5))
            .build()
            .unwrap_or_else(|err| panic!("node should build: {err}"));
        let launcher = Launcher::new(
            Connector::with_clock(
                self.describer.clone(),
                self.factory.clone(),
                self.clock.clone(),
            ),
            Bootstrapper::new(BytesArtifact::new(AGENT_BYTES), RecordingChannelBuilder::new()),
        );
        let log = self.log.clone();

        let outcome = match self
            .runtime
            .block_on(async move { launcher.launch(&node, Arc::new(log)).await })
        {
            Ok(channel) => LaunchOutcome::Success(Arc::new(channel)),
            Err(err) => LaunchOutcome::Failure(err.to_string()),
        };
        self.outcome.replace(Some(outcome));
    }

    pub fn outcome(&self) -> Option<LaunchOutcome> {
        self.outcome.borrow().clone()
    }
}
