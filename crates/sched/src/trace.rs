//! Structured dispatch-start / dispatch-end events.
//!
//! Append-only diagnostics for the tracing subscriber; nothing in the
//! scheduler parses these back.

use tracing::{debug, error};

use herd_core::{Device, ExecHandle, ExecReport, HerdError, SubCommand};

pub(crate) fn exec_start(sc: &SubCommand, device: &Device, handle: &ExecHandle) {
    let multi = *sc.multi.lock().unwrap();
    debug!(
        pid = sc.parent.pid,
        tgid = sc.parent.tgid,
        cmd = %sc.parent.id,
        sc_idx = sc.idx,
        num_sc = sc.parent.num_subcmds,
        kind = %device.kind,
        dev = %device,
        pack = sc.pack_id,
        mc_idx = handle.multicore_idx,
        mc_total = multi.total,
        mc_bmp = format_args!("{:#x}", multi.bitmap),
        priority = sc.parent.priority,
        soft = sc.parent.soft_limit_ms,
        hard = sc.parent.hard_limit_ms,
        boost = handle.boost,
        "exec start"
    );
}

pub(crate) fn exec_end(
    sc: &SubCommand,
    device: &Device,
    handle: &ExecHandle,
    result: Result<&ExecReport, &HerdError>,
) {
    let multi = *sc.multi.lock().unwrap();
    let metrics = *sc.metrics.lock().unwrap();
    match result {
        Ok(report) => debug!(
            pid = sc.parent.pid,
            cmd = %sc.parent.id,
            sc_idx = sc.idx,
            kind = %device.kind,
            dev = %device,
            pack = sc.pack_id,
            mc_idx = handle.multicore_idx,
            mc_total = multi.total,
            boost = handle.boost,
            ip_time_us = report.ip_time.as_micros() as u64,
            driver_us = metrics.driver_time.as_micros() as u64,
            "exec done"
        ),
        Err(e) => error!(
            pid = sc.parent.pid,
            cmd = %sc.parent.id,
            sc_idx = sc.idx,
            kind = %device.kind,
            dev = %device,
            pack = sc.pack_id,
            mc_idx = handle.multicore_idx,
            mc_total = multi.total,
            boost = handle.boost,
            driver_us = metrics.driver_time.as_micros() as u64,
            error = %e,
            "exec fail"
        ),
    }
}
