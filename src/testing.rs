//! Fakes for every injectable capability, plus a context builder.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::action::{Action, ActionError, ActionStatus, ErrorKind};
use crate::config::TieredConfig;
use crate::context::RunContext;
use crate::elevation::{ChildProcess, LaunchMode, Launcher, ProtectionService};
use crate::error::FatalError;
use crate::error_log::ErrorLog;
use crate::platform::{HelperDriver, HiveManager, PrivilegeProbe};
use crate::relay::RelayWriter;
use crate::scheduler::{Elevate, Ledger, Privilege};
use crate::ui::Console;

/// Relay region size used by test contexts.
pub const TEST_REGION_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
enum Step {
    Succeed,
    Fail(ErrorKind),
    Incomplete,
}

/// Shared count of `run` calls, readable after the action is boxed.
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU32>);

impl CallCounter {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Action that follows a fixed script of outcomes.
pub struct ScriptedAction {
    script: VecDeque<Step>,
    fallback: Step,
    calls: CallCounter,
    resets: u32,
    weight: u32,
    completed: bool,
}

impl ScriptedAction {
    fn new(script: impl IntoIterator<Item = Step>, fallback: Step) -> Self {
        Self {
            script: script.into_iter().collect(),
            fallback,
            calls: CallCounter::default(),
            resets: 0,
            weight: 1,
            completed: false,
        }
    }

    pub fn succeeding() -> Self {
        Self::new([], Step::Succeed)
    }

    pub fn failing_then_succeeding(failures: usize, kind: ErrorKind) -> Self {
        Self::new(std::iter::repeat_n(Step::Fail(kind), failures), Step::Succeed)
    }

    pub fn always_failing(kind: ErrorKind) -> Self {
        Self::new([], Step::Fail(kind))
    }

    /// Returns without error but reports `NotCompleted` `times` times.
    pub fn silently_incomplete(times: usize) -> Self {
        Self::new(std::iter::repeat_n(Step::Incomplete, times), Step::Succeed)
    }

    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.get()
    }

    pub fn call_counter(&self) -> CallCounter {
        self.calls.clone()
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }
}

#[async_trait]
impl Action for ScriptedAction {
    async fn run(&mut self) -> Result<(), ActionError> {
        self.calls.0.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front().unwrap_or(self.fallback) {
            Step::Succeed => {
                self.completed = true;
                Ok(())
            }
            Step::Incomplete => Ok(()),
            Step::Fail(kind) => {
                Err(ActionError::new(kind, "scripted failure").with_context("scripted"))
            }
        }
    }

    fn reset_progress(&mut self) {
        self.resets += 1;
    }

    fn status(&self) -> ActionStatus {
        if self.completed {
            ActionStatus::Completed
        } else {
            ActionStatus::NotCompleted
        }
    }

    fn progress_weight(&self) -> u32 {
        self.weight
    }

    fn error_string(&self) -> String {
        "ScriptedAction failed".to_string()
    }
}

// ---------------------------------------------------------------------------
// Privilege
// ---------------------------------------------------------------------------

pub struct FakeProbe {
    held: Privilege,
    calls: Arc<AtomicUsize>,
}

impl PrivilegeProbe for FakeProbe {
    fn current(&self) -> Privilege {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.held
    }
}

// ---------------------------------------------------------------------------
// Child processes
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct ChildState {
    exit: Mutex<Option<i32>>,
    killed: AtomicBool,
}

impl ChildState {
    fn exit_code(&self) -> Option<i32> {
        self.exit.lock().map(|e| *e).unwrap_or(None)
    }

    fn set_exit(&self, code: i32) {
        if let Ok(mut exit) = self.exit.lock() {
            exit.get_or_insert(code);
        }
    }
}

/// Child process whose exit is controlled by the test.
pub struct FakeChild {
    state: Arc<ChildState>,
}

/// Lets a test end a [`FakeChild`] from another task.
#[derive(Clone)]
pub struct ExitHandle(Arc<ChildState>);

impl ExitHandle {
    pub fn exit(&self, code: i32) {
        self.0.set_exit(code);
    }
}

impl FakeChild {
    pub fn running() -> Self {
        Self {
            state: Arc::new(ChildState::default()),
        }
    }

    pub fn exited(code: i32) -> Self {
        let child = Self::running();
        child.state.set_exit(code);
        child
    }

    pub fn exit_handle(&self) -> ExitHandle {
        ExitHandle(self.state.clone())
    }

    pub fn was_killed(&self) -> bool {
        self.state.killed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChildProcess for FakeChild {
    fn try_exit_code(&mut self) -> io::Result<Option<i32>> {
        Ok(self.state.exit_code())
    }

    async fn wait(&mut self) -> io::Result<i32> {
        loop {
            if let Some(code) = self.state.exit_code() {
                return Ok(code);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.state.killed.store(true, Ordering::SeqCst);
        self.state.set_exit(-1);
        Ok(())
    }
}

/// What the next launched child does.
#[derive(Debug, Clone)]
pub enum ChildScript {
    /// Exits immediately with this code.
    Exit(i32),
    /// Never exits on its own and never writes.
    Hang,
    /// Writes these lines to the relay named on its command line, then exits.
    Relay { lines: Vec<String>, code: i32 },
}

#[derive(Default)]
struct LauncherState {
    scripts: Mutex<VecDeque<ChildScript>>,
    launches: Mutex<Vec<(LaunchMode, Vec<String>)>>,
    children: Mutex<Vec<Arc<ChildState>>>,
}

#[derive(Clone, Default)]
pub struct FakeLauncher {
    state: Arc<LauncherState>,
}

impl FakeLauncher {
    pub fn new(scripts: impl IntoIterator<Item = ChildScript>) -> Self {
        let launcher = Self::default();
        if let Ok(mut queue) = launcher.state.scripts.lock() {
            queue.extend(scripts);
        }
        launcher
    }

    pub fn launches(&self) -> Vec<(LaunchMode, Vec<String>)> {
        self.state.launches.lock().unwrap().clone()
    }

    /// Whether the `index`-th launched child was killed.
    pub fn killed(&self, index: usize) -> bool {
        self.state.children.lock().unwrap()[index]
            .killed
            .load(Ordering::SeqCst)
    }
}

fn relay_name(args: &[String]) -> Option<&str> {
    let at = args.iter().position(|a| a == "--relay")?;
    args.get(at + 1).map(String::as_str)
}

impl Launcher for FakeLauncher {
    fn launch(&self, mode: LaunchMode, args: &[String]) -> io::Result<Box<dyn ChildProcess>> {
        self.state
            .launches
            .lock()
            .unwrap()
            .push((mode, args.to_vec()));

        let script = self
            .state
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| io::Error::other("no scripted child"))?;

        let child = FakeChild::running();
        match script {
            ChildScript::Exit(code) => child.state.set_exit(code),
            ChildScript::Hang => {}
            ChildScript::Relay { lines, code } => {
                let name = relay_name(args)
                    .ok_or_else(|| io::Error::other("child launched without --relay"))?;
                let mut writer = RelayWriter::open(name, TEST_REGION_SIZE)?;
                for line in lines {
                    writer.append(format!("{line}\n").as_bytes())?;
                }
                child.state.set_exit(code);
            }
        }
        self.state.children.lock().unwrap().push(child.state.clone());
        Ok(Box::new(child))
    }
}

// ---------------------------------------------------------------------------
// Protection service
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ProtectionState {
    engine_running: AtomicBool,
    kill_fails: AtomicBool,
    disable_results: Mutex<VecDeque<bool>>,
    // Number of `false` answers before toggles report ready; None = never.
    toggles_ready_after: Mutex<Option<usize>>,
    remnants: AtomicBool,
    disable_calls: AtomicUsize,
    kill_calls: AtomicUsize,
    toggle_calls: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeProtection {
    state: Arc<ProtectionState>,
}

impl FakeProtection {
    /// Engine not running, kills succeed, disable fails, toggles ready.
    pub fn new() -> Self {
        let fake = Self::default();
        if let Ok(mut after) = fake.state.toggles_ready_after.lock() {
            *after = Some(0);
        }
        fake
    }

    pub fn with_engine_running(self, running: bool) -> Self {
        self.state.engine_running.store(running, Ordering::SeqCst);
        self
    }

    pub fn with_kill_result(self, killed: bool) -> Self {
        self.state.kill_fails.store(!killed, Ordering::SeqCst);
        self
    }

    /// Results of successive `disable` calls; `false` once exhausted.
    pub fn with_disable_results(self, results: impl IntoIterator<Item = bool>) -> Self {
        self.state.disable_results.lock().unwrap().extend(results);
        self
    }

    pub fn with_toggles_ready_after(self, polls: Option<usize>) -> Self {
        *self.state.toggles_ready_after.lock().unwrap() = polls;
        self
    }

    pub fn with_remnants_only(self, remnants: bool) -> Self {
        self.state.remnants.store(remnants, Ordering::SeqCst);
        self
    }

    pub fn disable_calls(&self) -> usize {
        self.state.disable_calls.load(Ordering::SeqCst)
    }

    pub fn kill_calls(&self) -> usize {
        self.state.kill_calls.load(Ordering::SeqCst)
    }

    pub fn toggle_calls(&self) -> usize {
        self.state.toggle_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProtectionService for FakeProtection {
    fn engine_running(&self) -> bool {
        self.state.engine_running.load(Ordering::SeqCst)
    }

    fn kill_engine(&self) -> bool {
        self.state.kill_calls.fetch_add(1, Ordering::SeqCst);
        !self.state.kill_fails.load(Ordering::SeqCst)
    }

    async fn disable(&self) -> anyhow::Result<()> {
        self.state.disable_calls.fetch_add(1, Ordering::SeqCst);
        let ok = self
            .state
            .disable_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(false);
        if ok {
            Ok(())
        } else {
            anyhow::bail!("scripted disable failure")
        }
    }

    async fn toggles_ready(&self) -> bool {
        let polls = self.state.toggle_calls.fetch_add(1, Ordering::SeqCst);
        match *self.state.toggles_ready_after.lock().unwrap() {
            Some(after) => polls >= after,
            None => false,
        }
    }

    async fn remnants_only(&self) -> bool {
        self.state.remnants.load(Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Driver and hives
// ---------------------------------------------------------------------------

#[derive(Default)]
struct DriverState {
    registered: AtomicBool,
    fail_uninstall: AtomicBool,
    installs: AtomicUsize,
    uninstalls: AtomicUsize,
}

#[derive(Clone, Default)]
pub struct FakeDriver {
    state: Arc<DriverState>,
}

impl FakeDriver {
    pub fn registered(self, registered: bool) -> Self {
        self.state.registered.store(registered, Ordering::SeqCst);
        self
    }

    pub fn failing_uninstall(self) -> Self {
        self.state.fail_uninstall.store(true, Ordering::SeqCst);
        self
    }

    pub fn installs(&self) -> usize {
        self.state.installs.load(Ordering::SeqCst)
    }

    pub fn uninstalls(&self) -> usize {
        self.state.uninstalls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HelperDriver for FakeDriver {
    async fn is_registered(&self) -> bool {
        self.state.registered.load(Ordering::SeqCst)
    }

    async fn install(&self) -> anyhow::Result<()> {
        self.state.installs.fetch_add(1, Ordering::SeqCst);
        self.state.registered.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn uninstall(&self) -> anyhow::Result<()> {
        self.state.uninstalls.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_uninstall.load(Ordering::SeqCst) {
            anyhow::bail!("scripted uninstall failure");
        }
        self.state.registered.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct FakeHives {
    releases: Arc<AtomicUsize>,
}

impl FakeHives {
    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HiveManager for FakeHives {
    async fn release_all(&self) -> anyhow::Result<usize> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(0)
    }
}

// ---------------------------------------------------------------------------
// Elevation
// ---------------------------------------------------------------------------

/// Stands in for an elevated child run.
///
/// Optionally appends titles to a ledger file, as the child would.
#[derive(Default)]
pub struct FakeElevator {
    targets: Mutex<Vec<Privilege>>,
    completes: Option<(PathBuf, Vec<String>)>,
    fail: bool,
}

impl FakeElevator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn completing(mut self, ledger: &Path, titles: &[&str]) -> Self {
        self.completes = Some((
            ledger.to_path_buf(),
            titles.iter().map(|t| t.to_string()).collect(),
        ));
        self
    }

    pub fn targets(&self) -> Vec<Privilege> {
        self.targets.lock().unwrap().clone()
    }
}

#[async_trait]
impl Elevate for FakeElevator {
    async fn elevate(&self, _ctx: &RunContext, target: Privilege) -> Result<(), FatalError> {
        self.targets.lock().unwrap().push(target);
        if self.fail {
            return Err(FatalError::HandshakeTimeout);
        }
        if let Some((path, titles)) = &self.completes {
            let mut ledger = Ledger::load(path)?;
            for title in titles {
                ledger.record(title)?;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// A run context over a temporary directory, with a capturing console.
pub struct TestContext {
    pub ctx: RunContext,
    pub dir: TempDir,
    probe_calls: Arc<AtomicUsize>,
}

impl TestContext {
    pub fn captured(&self) -> Vec<String> {
        self.ctx.console.captured()
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }
}

pub struct ContextBuilder {
    held: Privilege,
    launcher: FakeLauncher,
    protection: FakeProtection,
    driver: FakeDriver,
    hives: FakeHives,
    configure: Vec<Box<dyn FnOnce(&mut TieredConfig)>>,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            held: Privilege::Admin,
            launcher: FakeLauncher::default(),
            protection: FakeProtection::new(),
            driver: FakeDriver::default(),
            hives: FakeHives::default(),
            configure: Vec::new(),
        }
    }

    pub fn held(mut self, held: Privilege) -> Self {
        self.held = held;
        self
    }

    pub fn launcher(mut self, launcher: FakeLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn protection(mut self, protection: FakeProtection) -> Self {
        self.protection = protection;
        self
    }

    pub fn driver(mut self, driver: FakeDriver) -> Self {
        self.driver = driver;
        self
    }

    pub fn hives(mut self, hives: FakeHives) -> Self {
        self.hives = hives;
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut TieredConfig) + 'static) -> Self {
        self.configure.push(Box::new(f));
        self
    }

    pub fn build(self) -> TestContext {
        let dir = tempfile::tempdir().unwrap();
        let mut config = TieredConfig {
            ledger_path: dir.path().join("TasksAdded.txt"),
            logs_dir: dir.path().join("Logs"),
            ..TieredConfig::default()
        };
        config.relay.region_size = TEST_REGION_SIZE;
        for f in self.configure {
            f(&mut config);
        }

        let probe_calls = Arc::new(AtomicUsize::new(0));
        let ctx = RunContext {
            console: Console::capture(),
            error_log: ErrorLog::new(&config.logs_dir),
            probe: Box::new(FakeProbe {
                held: self.held,
                calls: probe_calls.clone(),
            }),
            launcher: Box::new(self.launcher),
            protection: Box::new(self.protection),
            driver: Box::new(self.driver),
            hives: Box::new(self.hives),
            http: reqwest::Client::new(),
            child_args: Vec::new(),
            config,
        };
        TestContext {
            ctx,
            dir,
            probe_calls,
        }
    }
}
