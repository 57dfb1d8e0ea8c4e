use thiserror::Error;

use crate::device::DeviceKind;

/// Errors surfaced by the scheduler and its collaborators.
#[derive(Debug, Error)]
pub enum HerdError {
    #[error("no queue for device kind {0}")]
    InvalidDeviceKind(DeviceKind),

    #[error("no device of kind {0} available")]
    ResourceExhausted(DeviceKind),

    #[error("dispatch hand-off failed: {0}")]
    DispatchFailed(String),

    #[error("nothing to reconcile")]
    QueueEmpty,

    #[error("command parser error: {0}")]
    Parser(String),

    #[error("device driver error: {0}")]
    Driver(String),

    #[error("pack dispatcher error: {0}")]
    Pack(String),

    #[error("scheduler init failed: {0}")]
    Init(String),

    #[error("scheduler is stopped")]
    Stopped,
}
