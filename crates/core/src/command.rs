use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::device::DeviceKind;

/// Caller-assigned command identifier, hex-formatted in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandId(pub u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Terminal result delivered to the submitter, exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Done,
    Aborted { reason: String },
}

/// A top-level submitted request, decomposed by the command parser
/// into `num_subcmds` schedulable units.
///
/// The completion sender lives behind a mutex as an `Option`: whoever
/// takes it fires the signal, and nobody can fire it twice.
pub struct Command {
    pub id: CommandId,
    pub pid: u32,
    pub tgid: u32,
    pub priority: u8,
    pub soft_limit_ms: u32,
    pub hard_limit_ms: u32,
    pub num_subcmds: u32,
    /// Units not yet satisfied by reconciliation.
    remaining: AtomicU32,
    /// First terminal driver error observed across all sub-commands.
    exec_error: Mutex<Option<String>>,
    completion: Mutex<Option<oneshot::Sender<CommandOutcome>>>,
}

impl Command {
    /// Create a command and the receiver its completion fires on.
    pub fn new(
        id: CommandId,
        pid: u32,
        tgid: u32,
        priority: u8,
        soft_limit_ms: u32,
        hard_limit_ms: u32,
        num_subcmds: u32,
    ) -> (Arc<Self>, oneshot::Receiver<CommandOutcome>) {
        let (tx, rx) = oneshot::channel();
        let cmd = Arc::new(Self {
            id,
            pid,
            tgid,
            priority,
            soft_limit_ms,
            hard_limit_ms,
            num_subcmds,
            remaining: AtomicU32::new(num_subcmds),
            exec_error: Mutex::new(None),
            completion: Mutex::new(Some(tx)),
        });
        (cmd, rx)
    }

    /// Fire the completion signal. Returns false if it already fired.
    pub fn signal_completion(&self, outcome: CommandOutcome) -> bool {
        let sender = self.completion.lock().unwrap().take();
        match sender {
            // The receiver may be gone; the signal still counts as fired.
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => false,
        }
    }

    /// Mark one sub-command unit satisfied. Returns true for the call
    /// that satisfied the last outstanding unit.
    pub fn satisfy_one(&self) -> bool {
        let prev = self.remaining.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "command over-satisfied");
        prev == 1
    }

    /// Record a terminal driver error; the first one wins.
    pub fn record_exec_error(&self, reason: impl Into<String>) {
        let mut slot = self.exec_error.lock().unwrap();
        if slot.is_none() {
            *slot = Some(reason.into());
        }
    }

    /// The outcome the completion should carry given what has been
    /// recorded so far.
    pub fn outcome(&self) -> CommandOutcome {
        match self.exec_error.lock().unwrap().clone() {
            Some(reason) => CommandOutcome::Aborted { reason },
            None => CommandOutcome::Done,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("num_subcmds", &self.num_subcmds)
            .finish()
    }
}

/// Multi-device fan-out bookkeeping for one sub-command.
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiCore {
    /// Devices this sub-command was assigned to.
    pub total: u32,
    /// Bit per assigned device index.
    pub bitmap: u64,
    /// Index of the last device joined into the fan-out.
    pub last_idx: u32,
}

/// Metrics merged under the sub-command's own lock after each device
/// finishes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScMetrics {
    /// Accumulated bandwidth across all fan-out devices.
    pub bandwidth: u64,
    /// Maximum on-device time reported by any device.
    pub ip_time: Duration,
    /// Boost value of the latest finished execution.
    pub boost: u32,
    /// Wall-clock time of the latest driver call.
    pub driver_time: Duration,
}

/// Queue/execution timestamps.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScStamps {
    pub enqueued: Option<DateTime<Utc>>,
    pub dequeued: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
}

/// One schedulable unit of a command, targeting a device kind.
///
/// An `Arc<SubCommand>` is owned by exactly one container at a time:
/// a submission sub-queue, a worker's assignment channel, or the
/// done-list.
pub struct SubCommand {
    pub parent: Arc<Command>,
    /// Index within the parent command.
    pub idx: u32,
    pub kind: DeviceKind,
    /// Deadline period in microseconds; 0 for best-effort work.
    pub period: u64,
    /// Pack membership; 0 means not packed.
    pub pack_id: u64,
    /// Requested boost value.
    pub boost: u32,
    /// Fan-out reference count: number of assigned devices that have
    /// not yet finished.
    fanout: AtomicU32,
    pub multi: Mutex<MultiCore>,
    pub metrics: Mutex<ScMetrics>,
    pub stamps: Mutex<ScStamps>,
}

impl SubCommand {
    pub fn new(parent: Arc<Command>, idx: u32, kind: DeviceKind) -> Self {
        Self {
            parent,
            idx,
            kind,
            period: 0,
            pack_id: 0,
            boost: 0,
            fanout: AtomicU32::new(0),
            multi: Mutex::new(MultiCore::default()),
            metrics: Mutex::new(ScMetrics::default()),
            stamps: Mutex::new(ScStamps::default()),
        }
    }

    /// Set the fan-out count at dispatch. Only the dispatch engine
    /// calls this, before any assigned device can finish.
    pub fn arm_fanout(&self, devices: u32) {
        self.fanout.store(devices, Ordering::Release);
    }

    pub fn fanout(&self) -> u32 {
        self.fanout.load(Ordering::Acquire)
    }

    /// One device finished. Returns the pre-decrement count: the
    /// single caller that observes 1 took the count to zero, and that
    /// caller alone enqueues the sub-command for reconciliation.
    pub fn finish_one(&self) -> u32 {
        let prev = self.fanout.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prev > 0, "fan-out refcount underflow");
        prev
    }

    /// Drop `n` never-started devices from the fan-out after a partial
    /// hand-off failure. Returns true if this took the count to zero.
    pub fn abandon(&self, n: u32) -> bool {
        if n == 0 {
            return false;
        }
        let prev = self.fanout.fetch_sub(n, Ordering::AcqRel);
        debug_assert!(prev >= n, "fan-out refcount underflow");
        prev == n
    }
}

impl fmt::Debug for SubCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubCommand")
            .field("cmd", &self.parent.id)
            .field("idx", &self.idx)
            .field("kind", &self.kind)
            .field("pack_id", &self.pack_id)
            .finish()
    }
}

/// Per-dispatch execution handle the driver receives, built by the
/// command parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecHandle {
    pub boost: u32,
    /// Position of the executing device within the fan-out.
    pub multicore_idx: u32,
    /// Bound memory-context id for the context switcher.
    pub ctx: u32,
}

/// What the driver reports back from one execution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecReport {
    /// On-device execution time.
    pub ip_time: Duration,
    /// Bandwidth consumed by this execution.
    pub bandwidth: u64,
}
