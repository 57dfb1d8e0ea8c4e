use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use herd_core::{
    AcquireRequest, Device, DeviceKind, ExecHandle, ExecReport, HerdError, SubCommand,
    DEVICE_KIND_MAX,
};

/// Device inventory, acquisition, and power state.
///
/// Acquisition is always try-only: the pool returns whatever devices
/// are free right now, possibly fewer than requested, possibly none,
/// and never blocks. Absence of devices is a normal outcome.
pub trait ResourcePool: Send + Sync {
    /// Try to acquire up to `req.count` devices of `req.kind`.
    fn acquire(&self, req: &AcquireRequest) -> Vec<Device>;

    /// Return a previously acquired device.
    fn release(&self, device: &Device) -> Result<(), HerdError>;

    /// One bit per device kind with at least one free device.
    fn available_bitmap(&self) -> u64;

    /// Total devices of the given kind, free or busy.
    fn device_count(&self, kind: DeviceKind) -> usize;

    /// Describe a device by kind and index.
    fn device_info(&self, kind: DeviceKind, idx: u32) -> Option<Device>;
}

/// Decomposes commands into sub-commands and owns their memory
/// contexts and residual chains.
pub trait CommandParser: Send + Sync {
    /// Whether this sub-command carries a deadline classification.
    fn is_deadline(&self, sc: &SubCommand) -> bool;

    /// How many execution cores the sub-command asks for.
    fn exec_core_count(&self, sc: &SubCommand) -> usize;

    /// Bind the sub-command's memory context before execution.
    fn bind_context(&self, sc: &SubCommand) -> Result<(), HerdError>;

    /// Release the bound memory context during reconciliation.
    fn release_context(&self, sc: &SubCommand);

    /// Finalize a finished sub-command. `Ok(Some(_))` hands back a
    /// residual chained sub-command that must be scheduled; call again
    /// until it returns `Ok(None)`.
    fn finalize(&self, sc: &SubCommand) -> Result<Option<Arc<SubCommand>>, HerdError>;

    /// Build the per-dispatch execution handle (boost, context id).
    fn build_handle(&self, sc: &SubCommand) -> ExecHandle;
}

/// Driver entry points for one device class.
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Run the sub-command's work on the device. Blocks (at the
    /// device's pace) until the hardware finishes.
    async fn execute(&self, device: &Device, handle: &ExecHandle)
        -> Result<ExecReport, HerdError>;

    async fn suspend(&self, device: &Device) -> Result<(), HerdError>;

    async fn resume(&self, device: &Device) -> Result<(), HerdError>;

    async fn power_on(
        &self,
        device: &Device,
        boost: u32,
        timeout: Duration,
    ) -> Result<(), HerdError>;
}

/// Switches the execution context ahead of a dispatch, for device
/// classes that do not manage their own.
pub trait ContextSwitcher: Send + Sync {
    fn set_context(&self, device: &Device, ctx: u32) -> Result<(), HerdError>;
}

/// Batching path for pack-member sub-commands.
#[async_trait]
pub trait PackDispatcher: Send + Sync {
    /// Take over dispatch of a pack-member sub-command wholesale.
    async fn dispatch(&self, sc: Arc<SubCommand>) -> Result<(), HerdError>;

    /// Periodic consolidation check, once per scheduler pass.
    fn check_pending(&self);

    /// Tear down at scheduler shutdown.
    async fn shutdown(&self);
}

/// Enumerate every device the pool knows about, in (kind, index)
/// order. Used for worker spawning and the pause/resume sweeps.
pub fn enumerate_devices(pool: &dyn ResourcePool) -> Vec<Device> {
    let mut devices = Vec::new();
    for k in 0..DEVICE_KIND_MAX as u8 {
        let kind = DeviceKind(k);
        for idx in 0..pool.device_count(kind) {
            if let Some(d) = pool.device_info(kind, idx as u32) {
                devices.push(d);
            }
        }
    }
    devices
}
