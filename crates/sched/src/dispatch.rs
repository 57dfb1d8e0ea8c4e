//! Dispatch engine: turn a popped sub-command into device
//! assignments, including multi-device fan-out.

use std::sync::Arc;

use tracing::{debug, warn};

use herd_core::{AcquirePolicy, AcquireRequest, HerdError, SubCommand};

use crate::sched::SchedCtx;
use crate::worker::Assignment;

/// How a dispatch attempt failed.
pub(crate) enum DispatchFailure {
    /// No device started the work; the sub-command is handed back
    /// intact for front-of-queue reinsertion.
    Requeue(Arc<SubCommand>, HerdError),
    /// Part of the fan-out already started. The running devices
    /// complete the lifecycle; the sub-command must not be requeued.
    InFlight(HerdError),
}

/// Dispatch one sub-command. Pack members go wholesale to the pack
/// dispatcher; ordinary sub-commands fan out over try-acquired
/// devices.
pub(crate) async fn dispatch(
    ctx: &SchedCtx,
    sc: Arc<SubCommand>,
) -> Result<(), DispatchFailure> {
    if sc.pack_id != 0 {
        return match ctx.pack.dispatch(Arc::clone(&sc)).await {
            Ok(()) => Ok(()),
            Err(e) => Err(DispatchFailure::Requeue(sc, e)),
        };
    }
    dispatch_norm(ctx, sc).await
}

async fn dispatch_norm(ctx: &SchedCtx, sc: Arc<SubCommand>) -> Result<(), DispatchFailure> {
    let kind = sc.kind;
    let dev_num = ctx.pool.device_count(kind);
    let want = ctx.parser.exec_core_count(&sc).min(dev_num).max(1);
    let policy = if ctx.parser.is_deadline(&sc) {
        AcquirePolicy::RoundRobin
    } else {
        AcquirePolicy::Sequential
    };

    let devices = ctx.pool.acquire(&AcquireRequest {
        kind,
        count: want,
        policy,
    });
    if devices.is_empty() {
        return Err(DispatchFailure::Requeue(sc, HerdError::ResourceExhausted(kind)));
    }
    let got = devices.len() as u32;

    {
        let mut multi = sc.multi.lock().unwrap();
        multi.total = got;
        multi.bitmap = devices.iter().fold(0u64, |bmp, d| bmp | (1u64 << d.idx));
        multi.last_idx = devices.last().map(|d| d.idx).unwrap_or(0);
    }
    sc.arm_fanout(got);
    debug!(
        cmd = %sc.parent.id, idx = sc.idx, kind = %kind,
        got, want, "devices acquired"
    );

    // Multi-core join: the first device is powered by its own
    // execution, the rest are brought up before hand-off.
    if got > 1 {
        for device in devices.iter().skip(1) {
            if let Err(e) = ctx
                .driver
                .power_on(device, sc.boost, ctx.config.power_on_timeout())
                .await
            {
                warn!(dev = %device, error = %e, "power on failed");
            }
        }
    }

    let mut started: u32 = 0;
    for (i, device) in devices.iter().enumerate() {
        let assignment = Assignment {
            sc: Arc::clone(&sc),
            multicore_idx: i as u32,
        };
        if let Err(e) = ctx.workers.assign(device, assignment) {
            warn!(cmd = %sc.parent.id, idx = sc.idx, dev = %device, error = %e, "hand-off failed");

            // Roll back every device that never started.
            for unused in &devices[i..] {
                if let Err(re) = ctx.pool.release(unused) {
                    warn!(dev = %unused, error = %re, "rollback release failed");
                }
            }
            let not_started = got - started;
            if started == 0 {
                // Nothing is running; disarm and retry later.
                sc.arm_fanout(0);
                return Err(DispatchFailure::Requeue(
                    sc,
                    HerdError::DispatchFailed(e.to_string()),
                ));
            }
            // Drop the never-started share from the refcount. Started
            // devices may already have finished, so the subtraction
            // itself can be the step that reaches zero.
            if sc.abandon(not_started) {
                ctx.done.push(Arc::clone(&sc));
            }
            return Err(DispatchFailure::InFlight(HerdError::DispatchFailed(
                e.to_string(),
            )));
        }
        started += 1;
    }

    Ok(())
}
