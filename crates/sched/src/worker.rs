//! Per-device workers.
//!
//! One tokio task per physical device, fed through a bounded
//! assignment channel. A worker executes one sub-command at a time:
//! bind context, trace, run the driver, merge metrics, release the
//! device, then decrement the fan-out reference count — the worker
//! that takes the count to zero enqueues the sub-command on the
//! done-list.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use herd_core::{Device, DeviceKind, HerdError, SubCommand};

use crate::reconcile::DoneList;
use crate::traits::{CommandParser, ContextSwitcher, DeviceDriver, ResourcePool};

/// One unit of work handed to a device worker.
pub(crate) struct Assignment {
    pub sc: Arc<SubCommand>,
    /// Position of this device within the sub-command's fan-out.
    pub multicore_idx: u32,
}

/// Shared collaborator handles a worker needs.
#[derive(Clone)]
pub(crate) struct WorkerDeps {
    pub pool: Arc<dyn ResourcePool>,
    pub parser: Arc<dyn CommandParser>,
    pub ctx_switcher: Arc<dyn ContextSwitcher>,
    pub driver: Arc<dyn DeviceDriver>,
    pub done: Arc<DoneList>,
}

struct WorkerEntry {
    tx: mpsc::Sender<Assignment>,
    task: JoinHandle<()>,
}

/// Handles to every spawned device worker, keyed by (kind, index).
pub(crate) struct WorkerRegistry {
    inner: Mutex<HashMap<(DeviceKind, u32), WorkerEntry>>,
}

impl WorkerRegistry {
    /// Hand a sub-command to the worker bound to `device`. Fails when
    /// the worker is unknown, stopped, or its slot is already full.
    pub(crate) fn assign(&self, device: &Device, assignment: Assignment) -> Result<(), HerdError> {
        let inner = self.inner.lock().unwrap();
        let entry = inner
            .get(&(device.kind, device.idx))
            .ok_or_else(|| HerdError::DispatchFailed(format!("no worker for {device}")))?;
        entry
            .tx
            .try_send(assignment)
            .map_err(|e| HerdError::DispatchFailed(format!("{device}: {e}")))
    }

    /// Close every assignment channel (workers exit after finishing
    /// in-flight work) and hand back the join handles.
    pub(crate) fn close(&self) -> Vec<JoinHandle<()>> {
        let mut inner = self.inner.lock().unwrap();
        inner.drain().map(|(_, entry)| entry.task).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// Spawn one worker per device in the pool inventory. An inventory
/// hole (count says a device exists, info says it does not) aborts
/// initialization entirely.
pub(crate) fn spawn_workers(
    deps: &WorkerDeps,
    assign_depth: usize,
) -> Result<WorkerRegistry, HerdError> {
    let mut workers = HashMap::new();
    for k in 0..herd_core::DEVICE_KIND_MAX as u8 {
        let kind = DeviceKind(k);
        for idx in 0..deps.pool.device_count(kind) as u32 {
            let device = deps.pool.device_info(kind, idx).ok_or_else(|| {
                HerdError::Init(format!("missing device info for kind {kind} idx {idx}"))
            })?;
            let (tx, rx) = mpsc::channel(assign_depth.max(1));
            let task = tokio::spawn(run_worker(device.clone(), rx, deps.clone()));
            workers.insert((kind, idx), WorkerEntry { tx, task });
        }
    }
    Ok(WorkerRegistry {
        inner: Mutex::new(workers),
    })
}

async fn run_worker(device: Device, mut rx: mpsc::Receiver<Assignment>, deps: WorkerDeps) {
    debug!(dev = %device, "device worker started");
    while let Some(assignment) = rx.recv().await {
        execute_one(&device, assignment, &deps).await;
    }
    debug!(dev = %device, "device worker stopped");
}

/// Run one assignment to completion. Whatever goes wrong, the device
/// is released and the fan-out count decremented — the command
/// lifecycle must not leak.
async fn execute_one(device: &Device, assignment: Assignment, deps: &WorkerDeps) {
    let Assignment { sc, multicore_idx } = assignment;

    let mut handle = deps.parser.build_handle(&sc);
    handle.multicore_idx = multicore_idx;

    let bound = match deps.parser.bind_context(&sc) {
        Ok(()) => {
            if device.self_ctx {
                Ok(())
            } else {
                deps.ctx_switcher.set_context(device, handle.ctx)
            }
        }
        Err(e) => Err(e),
    };

    match bound {
        Ok(()) => {
            crate::trace::exec_start(&sc, device, &handle);
            sc.stamps.lock().unwrap().started = Some(Utc::now());
            let t0 = Instant::now();

            let result = deps.driver.execute(device, &handle).await;

            let driver_time = t0.elapsed();
            sc.stamps.lock().unwrap().ended = Some(Utc::now());

            {
                let mut metrics = sc.metrics.lock().unwrap();
                metrics.driver_time = driver_time;
                metrics.boost = handle.boost;
                if let Ok(report) = &result {
                    metrics.bandwidth += report.bandwidth;
                    metrics.ip_time = metrics.ip_time.max(report.ip_time);
                }
            }

            crate::trace::exec_end(&sc, device, &handle, result.as_ref());
            if let Err(e) = result {
                sc.parent.record_exec_error(e.to_string());
            }
        }
        Err(e) => {
            error!(cmd = %sc.parent.id, idx = sc.idx, dev = %device, error = %e, "context bind failed");
            sc.parent.record_exec_error(e.to_string());
        }
    }

    if let Err(e) = deps.pool.release(device) {
        error!(dev = %device, error = %e, "device release failed");
    }

    let prev = sc.finish_one();
    debug!(cmd = %sc.parent.id, idx = sc.idx, dev = %device, ref_left = prev - 1, "exec finished");
    if prev == 1 {
        deps.done.push(sc);
    }
}
