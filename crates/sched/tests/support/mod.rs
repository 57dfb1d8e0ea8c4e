//! Instrumented mock collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use herd_core::{
    AcquireRequest, Command, CommandId, CommandOutcome, Device, DeviceKind, ExecHandle,
    ExecReport, HerdError, SchedConfig, SubCommand,
};
use herd_sched::{
    CommandParser, Collaborators, ContextSwitcher, DeviceDriver, PackDispatcher, ResourcePool,
    Scheduler,
};

pub type ScKey = (u64, u32);

pub fn key(sc: &SubCommand) -> ScKey {
    (sc.parent.id.0, sc.idx)
}

// ── Resource pool ────────────────────────────────────────────────────

pub struct MockPool {
    devices: Vec<Device>,
    busy: Mutex<Vec<bool>>,
    /// Test override for `available_bitmap`, to force the core to pop
    /// work while `acquire` yields nothing.
    advertise: Mutex<Option<u64>>,
    /// Devices `acquire` hands out but the worker inventory never saw
    /// (added after scheduler start), so their hand-off fails.
    phantoms: Mutex<Vec<Device>>,
    pub releases: AtomicUsize,
    released_log: Mutex<Vec<String>>,
}

impl MockPool {
    pub fn new(counts: &[(DeviceKind, usize)]) -> Arc<Self> {
        let mut devices = Vec::new();
        for (kind, n) in counts {
            for idx in 0..*n {
                devices.push(Device::new(*kind, idx as u32, format!("dev{}", kind.0)));
            }
        }
        let busy = vec![false; devices.len()];
        Arc::new(Self {
            devices,
            busy: Mutex::new(busy),
            advertise: Mutex::new(None),
            phantoms: Mutex::new(Vec::new()),
            releases: AtomicUsize::new(0),
            released_log: Mutex::new(Vec::new()),
        })
    }

    pub fn add_phantom(&self, kind: DeviceKind, idx: u32) {
        self.phantoms
            .lock()
            .unwrap()
            .push(Device::new(kind, idx, "phantom"));
    }

    pub fn clear_phantoms(&self) {
        self.phantoms.lock().unwrap().clear();
    }

    pub fn was_released(&self, name: &str) -> bool {
        self.released_log.lock().unwrap().iter().any(|n| n == name)
    }

    pub fn occupy_all(&self) {
        self.busy.lock().unwrap().iter_mut().for_each(|b| *b = true);
    }

    pub fn free_all(&self) {
        self.busy.lock().unwrap().iter_mut().for_each(|b| *b = false);
    }

    pub fn advertise(&self, bmp: Option<u64>) {
        *self.advertise.lock().unwrap() = bmp;
    }

    pub fn free_count(&self, kind: DeviceKind) -> usize {
        let busy = self.busy.lock().unwrap();
        self.devices
            .iter()
            .enumerate()
            .filter(|(i, d)| d.kind == kind && !busy[*i])
            .count()
    }
}

impl ResourcePool for MockPool {
    fn acquire(&self, req: &AcquireRequest) -> Vec<Device> {
        let mut busy = self.busy.lock().unwrap();
        let mut out = Vec::new();
        for (i, d) in self.devices.iter().enumerate() {
            if out.len() == req.count {
                break;
            }
            if d.kind == req.kind && !busy[i] {
                busy[i] = true;
                out.push(d.clone());
            }
        }
        for d in self.phantoms.lock().unwrap().iter() {
            if out.len() == req.count {
                break;
            }
            if d.kind == req.kind {
                out.push(d.clone());
            }
        }
        out
    }

    fn release(&self, device: &Device) -> Result<(), HerdError> {
        self.released_log.lock().unwrap().push(device.to_string());
        self.releases.fetch_add(1, Ordering::SeqCst);
        if self
            .phantoms
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.kind == device.kind && d.idx == device.idx)
        {
            return Ok(());
        }
        let mut busy = self.busy.lock().unwrap();
        let i = self
            .devices
            .iter()
            .position(|d| d.kind == device.kind && d.idx == device.idx)
            .ok_or_else(|| HerdError::Driver(format!("unknown device {device}")))?;
        busy[i] = false;
        Ok(())
    }

    fn available_bitmap(&self) -> u64 {
        if let Some(bmp) = *self.advertise.lock().unwrap() {
            return bmp;
        }
        let busy = self.busy.lock().unwrap();
        self.devices
            .iter()
            .enumerate()
            .filter(|(i, _)| !busy[*i])
            .fold(0u64, |bmp, (_, d)| bmp | d.kind.bit())
    }

    fn device_count(&self, kind: DeviceKind) -> usize {
        let phantoms = self
            .phantoms
            .lock()
            .unwrap()
            .iter()
            .filter(|d| d.kind == kind)
            .count();
        self.devices.iter().filter(|d| d.kind == kind).count() + phantoms
    }

    fn device_info(&self, kind: DeviceKind, idx: u32) -> Option<Device> {
        self.devices
            .iter()
            .find(|d| d.kind == kind && d.idx == idx)
            .cloned()
    }
}

// ── Command parser ───────────────────────────────────────────────────

#[derive(Default)]
pub struct MockParser {
    /// Requested execution cores per sub-command (default 1).
    pub cores: Mutex<HashMap<ScKey, usize>>,
    /// Residual chains handed out by `finalize`, one per call.
    pub residuals: Mutex<HashMap<ScKey, Vec<Arc<SubCommand>>>>,
    pub fail_finalize: Mutex<HashSet<ScKey>>,
    /// Every `bind_context` call, in order (one per device execution).
    pub bind_order: Mutex<Vec<ScKey>>,
    /// Every `finalize` call that returned `Ok(None)`.
    pub finalized: Mutex<Vec<ScKey>>,
    pub ctx_releases: AtomicUsize,
}

impl MockParser {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_cores(&self, k: ScKey, n: usize) {
        self.cores.lock().unwrap().insert(k, n);
    }

    pub fn push_residual(&self, k: ScKey, residual: Arc<SubCommand>) {
        self.residuals.lock().unwrap().entry(k).or_default().push(residual);
    }

    pub fn binds(&self) -> usize {
        self.bind_order.lock().unwrap().len()
    }

    pub fn finalized_count(&self, k: ScKey) -> usize {
        self.finalized.lock().unwrap().iter().filter(|x| **x == k).count()
    }
}

impl CommandParser for MockParser {
    fn is_deadline(&self, sc: &SubCommand) -> bool {
        sc.period > 0
    }

    fn exec_core_count(&self, sc: &SubCommand) -> usize {
        self.cores.lock().unwrap().get(&key(sc)).copied().unwrap_or(1)
    }

    fn bind_context(&self, sc: &SubCommand) -> Result<(), HerdError> {
        self.bind_order.lock().unwrap().push(key(sc));
        Ok(())
    }

    fn release_context(&self, _sc: &SubCommand) {
        self.ctx_releases.fetch_add(1, Ordering::SeqCst);
    }

    fn finalize(&self, sc: &SubCommand) -> Result<Option<Arc<SubCommand>>, HerdError> {
        let k = key(sc);
        if self.fail_finalize.lock().unwrap().contains(&k) {
            return Err(HerdError::Parser(format!("finalize rejected {:?}", k)));
        }
        let mut residuals = self.residuals.lock().unwrap();
        if let Some(chain) = residuals.get_mut(&k) {
            if !chain.is_empty() {
                return Ok(Some(chain.remove(0)));
            }
        }
        self.finalized.lock().unwrap().push(k);
        Ok(None)
    }

    fn build_handle(&self, sc: &SubCommand) -> ExecHandle {
        ExecHandle {
            boost: sc.boost,
            multicore_idx: 0,
            ctx: sc.idx,
        }
    }
}

// ── Device driver ────────────────────────────────────────────────────

#[derive(Default)]
pub struct MockDriver {
    pub delay_ms: AtomicUsize,
    pub fail_exec: Mutex<bool>,
    /// (device name, multicore index) per execution.
    pub execs: Mutex<Vec<(String, u32)>>,
    pub power_ons: Mutex<Vec<String>>,
    pub suspend_calls: AtomicUsize,
    pub resume_calls: AtomicUsize,
    /// Fail the Nth suspend call (1-based).
    pub fail_suspend_at: Mutex<Option<usize>>,
}

impl MockDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn exec_count(&self) -> usize {
        self.execs.lock().unwrap().len()
    }
}

#[async_trait]
impl DeviceDriver for MockDriver {
    async fn execute(
        &self,
        device: &Device,
        handle: &ExecHandle,
    ) -> Result<ExecReport, HerdError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        self.execs
            .lock()
            .unwrap()
            .push((device.to_string(), handle.multicore_idx));
        if *self.fail_exec.lock().unwrap() {
            return Err(HerdError::Driver("mock engine fault".into()));
        }
        Ok(ExecReport {
            ip_time: Duration::from_micros(10),
            bandwidth: 7,
        })
    }

    async fn suspend(&self, _device: &Device) -> Result<(), HerdError> {
        let n = self.suspend_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_suspend_at.lock().unwrap() == Some(n) {
            return Err(HerdError::Driver("mock suspend fault".into()));
        }
        Ok(())
    }

    async fn resume(&self, _device: &Device) -> Result<(), HerdError> {
        self.resume_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn power_on(
        &self,
        device: &Device,
        _boost: u32,
        _timeout: Duration,
    ) -> Result<(), HerdError> {
        self.power_ons.lock().unwrap().push(device.to_string());
        Ok(())
    }
}

// ── Context switcher / pack dispatcher ───────────────────────────────

#[derive(Default)]
pub struct MockSwitcher {
    pub switches: AtomicUsize,
}

impl ContextSwitcher for MockSwitcher {
    fn set_context(&self, _device: &Device, _ctx: u32) -> Result<(), HerdError> {
        self.switches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct MockPack {
    pub dispatched: Mutex<Vec<ScKey>>,
    pub checks: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

#[async_trait]
impl PackDispatcher for MockPack {
    async fn dispatch(&self, sc: Arc<SubCommand>) -> Result<(), HerdError> {
        self.dispatched.lock().unwrap().push(key(&sc));
        Ok(())
    }

    fn check_pending(&self) {
        self.checks.fetch_add(1, Ordering::SeqCst);
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Harness ──────────────────────────────────────────────────────────

pub struct Harness {
    pub pool: Arc<MockPool>,
    pub parser: Arc<MockParser>,
    pub driver: Arc<MockDriver>,
    pub switcher: Arc<MockSwitcher>,
    pub pack: Arc<MockPack>,
    pub sched: Scheduler,
}

/// Route scheduler logs through `RUST_LOG` when debugging a test.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn start(counts: &[(DeviceKind, usize)]) -> Harness {
    init_tracing();
    let pool = MockPool::new(counts);
    let parser = MockParser::new();
    let driver = MockDriver::new();
    let switcher = Arc::new(MockSwitcher::default());
    let pack = Arc::new(MockPack::default());
    let sched = Scheduler::start(
        Collaborators {
            pool: pool.clone(),
            parser: parser.clone(),
            ctx_switcher: switcher.clone(),
            driver: driver.clone(),
            pack: pack.clone(),
        },
        SchedConfig::default(),
    )
    .expect("scheduler start");
    Harness {
        pool,
        parser,
        driver,
        switcher,
        pack,
        sched,
    }
}

/// Build a one-sub-command-wide command for tests.
pub fn command(
    id: u64,
    num_subcmds: u32,
) -> (Arc<Command>, tokio::sync::oneshot::Receiver<CommandOutcome>) {
    Command::new(CommandId(id), 42, 42, 1, 100, 300, num_subcmds)
}

pub fn subcmd(cmd: &Arc<Command>, idx: u32, kind: DeviceKind) -> Arc<SubCommand> {
    Arc::new(SubCommand::new(Arc::clone(cmd), idx, kind))
}

/// Sub-command with a deadline period and/or pack membership.
pub fn subcmd_cfg(
    cmd: &Arc<Command>,
    idx: u32,
    kind: DeviceKind,
    period: u64,
    pack_id: u64,
) -> Arc<SubCommand> {
    let mut sc = SubCommand::new(Arc::clone(cmd), idx, kind);
    sc.period = period;
    sc.pack_id = pack_id;
    Arc::new(sc)
}

/// Await a completion with a hard timeout.
pub async fn outcome(
    rx: tokio::sync::oneshot::Receiver<CommandOutcome>,
) -> CommandOutcome {
    tokio::time::timeout(Duration::from_secs(5), rx)
        .await
        .expect("completion timed out")
        .expect("completion sender dropped")
}

/// Poll until `cond` holds, with a hard timeout.
pub async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
