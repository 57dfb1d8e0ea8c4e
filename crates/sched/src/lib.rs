//! Deadline-aware scheduler for heterogeneous accelerator devices.
//!
//! Sub-commands are queued per device kind (deadline before normal),
//! dispatched with multi-device fan-out onto per-device workers, and
//! reconciled exactly once when their fan-out reference count drops to
//! zero. The whole pipeline can be paused and resumed.
//!
//! Collaborators — the device resource pool, the command parser, the
//! pack dispatcher, the context switcher, and the device driver — are
//! trait objects supplied at [`Scheduler::start`].

pub mod queue;
pub mod reconcile;
pub mod sched;
pub mod traits;

mod dispatch;
mod pause;
mod trace;
mod worker;

pub use queue::{InsertMode, SubmitQueue};
pub use reconcile::DoneList;
pub use sched::{Collaborators, Scheduler};
pub use traits::{
    enumerate_devices, CommandParser, ContextSwitcher, DeviceDriver, PackDispatcher, ResourcePool,
};
