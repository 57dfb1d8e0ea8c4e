//! Scheduler core: the single coordinating loop and its public
//! handle.
//!
//! No ambient singleton — every [`Scheduler::start`] builds a fresh
//! context, so tests construct as many schedulers as they like.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use herd_core::{highest_kind, HerdError, SchedConfig, SubCommand};

use crate::dispatch::{dispatch, DispatchFailure};
use crate::pause;
use crate::queue::{InsertMode, SubmitQueue};
use crate::reconcile::{reconcile_one, DoneList};
use crate::traits::{CommandParser, ContextSwitcher, DeviceDriver, PackDispatcher, ResourcePool};
use crate::worker::{spawn_workers, WorkerDeps, WorkerRegistry};

/// External collaborators the scheduler drives.
pub struct Collaborators {
    pub pool: Arc<dyn ResourcePool>,
    pub parser: Arc<dyn CommandParser>,
    pub ctx_switcher: Arc<dyn ContextSwitcher>,
    pub driver: Arc<dyn DeviceDriver>,
    pub pack: Arc<dyn PackDispatcher>,
}

/// Shared scheduler state: one instance per [`Scheduler`].
pub(crate) struct SchedCtx {
    pub(crate) config: SchedConfig,
    pub(crate) queue: SubmitQueue,
    pub(crate) done: Arc<DoneList>,
    pub(crate) wake: Arc<Notify>,
    pub(crate) pause: AtomicBool,
    pub(crate) stop: AtomicBool,
    pub(crate) pool: Arc<dyn ResourcePool>,
    pub(crate) parser: Arc<dyn CommandParser>,
    pub(crate) driver: Arc<dyn DeviceDriver>,
    pub(crate) pack: Arc<dyn PackDispatcher>,
    pub(crate) workers: WorkerRegistry,
}

/// Handle to a running scheduler.
pub struct Scheduler {
    ctx: Arc<SchedCtx>,
    core: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Spawn the core loop and one worker per pool device. Must be
    /// called from within a tokio runtime. An incomplete device
    /// inventory aborts initialization.
    pub fn start(collab: Collaborators, config: SchedConfig) -> Result<Self, HerdError> {
        let Collaborators {
            pool,
            parser,
            ctx_switcher,
            driver,
            pack,
        } = collab;

        let wake = Arc::new(Notify::new());
        let done = Arc::new(DoneList::new(Arc::clone(&wake)));

        let deps = WorkerDeps {
            pool: Arc::clone(&pool),
            parser: Arc::clone(&parser),
            ctx_switcher,
            driver: Arc::clone(&driver),
            done: Arc::clone(&done),
        };
        let workers = spawn_workers(&deps, config.assign_depth)?;
        let queue = SubmitQueue::new(pool.as_ref(), Arc::clone(&parser));

        let ctx = Arc::new(SchedCtx {
            config,
            queue,
            done,
            wake,
            pause: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            pool,
            parser,
            driver,
            pack,
            workers,
        });

        let core = tokio::spawn(run_core(Arc::clone(&ctx)));
        info!(workers = ctx.workers.len(), "scheduler started");
        Ok(Self {
            ctx,
            core: Mutex::new(Some(core)),
        })
    }

    /// Enqueue a sub-command and wake the core.
    pub fn submit(&self, sc: Arc<SubCommand>) -> Result<(), HerdError> {
        if self.ctx.stop.load(Ordering::Acquire) {
            return Err(HerdError::Stopped);
        }
        self.ctx.queue.insert(sc, InsertMode::Tail)?;
        self.ctx.wake.notify_one();
        Ok(())
    }

    /// Trigger one scheduler pass with no new payload.
    pub fn wake(&self) {
        self.ctx.wake.notify_one();
    }

    pub fn paused(&self) -> bool {
        self.ctx.pause.load(Ordering::Acquire)
    }

    /// Suspend all devices and gate dispatch. Idempotent: pausing an
    /// already-paused scheduler warns and touches no device.
    pub async fn pause(&self) -> Result<(), HerdError> {
        pause::pause(&self.ctx).await
    }

    /// Resume all devices, clear the pause gate, trigger a pass.
    pub async fn resume(&self) {
        pause::resume(&self.ctx).await;
    }

    /// Queued sub-commands for a kind (diagnostics and tests).
    pub fn queue_len(&self, kind: herd_core::DeviceKind) -> usize {
        self.ctx.queue.len(kind)
    }

    /// Cooperative shutdown: set the stop flag, wake the core once,
    /// close every worker's assignment channel, and wait for all of
    /// them to drain in-flight work. In-flight driver calls are never
    /// cancelled.
    pub async fn shutdown(&self) {
        if self.ctx.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("scheduler shutdown requested");
        self.ctx.pack.shutdown().await;
        self.ctx.wake.notify_one();

        let core = self.core.lock().unwrap().take();
        if let Some(core) = core {
            if let Err(e) = core.await {
                error!(error = %e, "core task join failed");
            }
        }
        for task in self.ctx.workers.close() {
            if let Err(e) = task.await {
                error!(error = %e, "worker task join failed");
            }
        }
        info!("scheduler shutdown complete");
    }
}

/// The coordinating loop. Every wake re-scans all pending work:
/// multiple wake posts may coalesce into one observed wake, and a
/// wake with nothing to do is normal.
async fn run_core(ctx: Arc<SchedCtx>) {
    debug!("scheduler core started");
    while !ctx.stop.load(Ordering::Acquire) {
        ctx.wake.notified().await;
        if ctx.stop.load(Ordering::Acquire) {
            break;
        }

        // Reconciliation runs even while paused.
        let mut drained = 0;
        while drained < ctx.config.max_drain_per_pass {
            match reconcile_one(&ctx.done, ctx.parser.as_ref(), &ctx.queue, &ctx.wake) {
                Ok(()) => drained += 1,
                Err(HerdError::QueueEmpty) => break,
                Err(e) => {
                    warn!(error = %e, "reconcile failed");
                    drained += 1;
                }
            }
        }
        if !ctx.done.is_empty() {
            ctx.wake.notify_one();
        }

        ctx.pack.check_pending();

        if ctx.pause.load(Ordering::Acquire) {
            continue;
        }

        let Some(kind) = highest_kind(ctx.pool.available_bitmap()) else {
            debug!("no device capacity, back to idle");
            continue;
        };
        let Some(sc) = ctx.queue.pop(kind) else {
            debug!(kind = %kind, "no queued work for available kind");
            continue;
        };

        match dispatch(&ctx, sc).await {
            Ok(()) => {}
            Err(DispatchFailure::Requeue(sc, e)) => {
                debug!(cmd = %sc.parent.id, idx = sc.idx, error = %e, "dispatch deferred");
                if let Err(ie) = ctx.queue.insert(sc, InsertMode::Front) {
                    error!(error = %ie, "front reinsert failed, sub-command dropped");
                }
            }
            Err(DispatchFailure::InFlight(e)) => {
                warn!(error = %e, "partial fan-out hand-off failure");
            }
        }

        // Amortize wake signals: if capacity remains after a dispatch
        // attempt, run another pass without waiting for a new wake.
        // When a dispatch deferred while the pool still advertises the
        // kind, this re-polls hot until the bitmap and acquire agree;
        // the deferred item retries on every pass until then.
        if ctx.pool.available_bitmap() != 0 {
            ctx.wake.notify_one();
        }
    }
    warn!("scheduler core stopped");
}
