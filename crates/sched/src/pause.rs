//! Pause/resume controller.
//!
//! Pause suspends every device and gates the dispatch step of the
//! core loop; reconciliation of in-flight completions continues and
//! running work is never preempted. A suspend failure triggers one
//! bounded compensating pass that resumes whatever was already
//! suspended — rollback never re-enters itself.

use std::sync::atomic::Ordering;

use tracing::{error, info, warn};

use herd_core::{Device, HerdError};

use crate::sched::SchedCtx;
use crate::traits::enumerate_devices;

pub(crate) async fn pause(ctx: &SchedCtx) -> Result<(), HerdError> {
    if ctx.pause.swap(true, Ordering::AcqRel) {
        warn!("already paused");
        return Ok(());
    }

    let mut suspended: Vec<Device> = Vec::new();
    for device in enumerate_devices(ctx.pool.as_ref()) {
        match ctx.driver.suspend(&device).await {
            Ok(()) => suspended.push(device),
            Err(e) => {
                error!(dev = %device, error = %e, "suspend failed, rolling back");
                rollback(ctx, &suspended).await;
                ctx.pause.store(false, Ordering::Release);
                return Err(e);
            }
        }
    }

    info!(devices = suspended.len(), "scheduler paused");
    Ok(())
}

/// Single compensating pass: resume each already-suspended device,
/// logging failures without retrying them.
async fn rollback(ctx: &SchedCtx, suspended: &[Device]) {
    for device in suspended {
        if let Err(e) = ctx.driver.resume(device).await {
            error!(dev = %device, error = %e, "rollback resume failed");
        }
    }
}

pub(crate) async fn resume(ctx: &SchedCtx) {
    if !ctx.pause.load(Ordering::Acquire) {
        warn!("resume while not paused");
    } else {
        info!("resuming");
    }

    // Per-device failures are logged, never aborting the sweep; the
    // pause gate always clears.
    for device in enumerate_devices(ctx.pool.as_ref()) {
        if let Err(e) = ctx.driver.resume(&device).await {
            error!(dev = %device, error = %e, "resume failed");
        }
    }

    ctx.pause.store(false, Ordering::Release);
    ctx.wake.notify_one();
}
