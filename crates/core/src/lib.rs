pub mod command;
pub mod config;
pub mod device;
pub mod error;

pub use command::{
    Command, CommandId, CommandOutcome, ExecHandle, ExecReport, MultiCore, ScMetrics, ScStamps,
    SubCommand,
};
pub use config::SchedConfig;
pub use device::{
    AcquirePolicy, AcquireRequest, Device, DeviceKind, highest_kind, DEVICE_KIND_MAX,
};
pub use error::HerdError;
