use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Number of representable device kinds. Kinds index bits of a `u64`
/// availability bitmap, so the range is fixed at 0..64.
pub const DEVICE_KIND_MAX: usize = 64;

/// A class of accelerator device (e.g. one bit per engine family).
/// Higher kinds are preferred by the scheduler when several have
/// capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeviceKind(pub u8);

impl DeviceKind {
    /// Whether this kind fits the availability bitmap.
    pub fn is_valid(self) -> bool {
        (self.0 as usize) < DEVICE_KIND_MAX
    }

    /// This kind's bit in an availability bitmap.
    pub fn bit(self) -> u64 {
        1u64 << self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pick the highest-preference kind out of an availability bitmap.
pub fn highest_kind(bmp: u64) -> Option<DeviceKind> {
    if bmp == 0 {
        None
    } else {
        Some(DeviceKind(63 - bmp.leading_zeros() as u8))
    }
}

/// One physical execution unit, described by the resource pool.
///
/// The pool owns device lifecycle; the scheduler only borrows a
/// `Device` between acquire and release.
#[derive(Debug, Clone)]
pub struct Device {
    pub kind: DeviceKind,
    pub idx: u32,
    pub name: Arc<str>,
    /// Device classes that bind their own execution context skip the
    /// context-switcher call on dispatch.
    pub self_ctx: bool,
}

impl Device {
    pub fn new(kind: DeviceKind, idx: u32, name: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            idx,
            name: name.into(),
            self_ctx: false,
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-#{}", self.name, self.idx)
    }
}

/// Device selection policy for an acquire call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquirePolicy {
    /// Rotate across instances; used for deadline work.
    RoundRobin,
    /// Lowest free index first.
    Sequential,
}

/// A non-blocking device acquisition request. The pool may return
/// fewer devices than `count`, including none.
#[derive(Debug, Clone)]
pub struct AcquireRequest {
    pub kind: DeviceKind,
    pub count: usize,
    pub policy: AcquirePolicy,
}
