//! Per-device-kind submission queues.
//!
//! Each kind known to the resource pool gets a pair of sub-queues:
//! deadline (drained first) and normal (FIFO). A sub-command lives in
//! exactly one sub-queue of exactly one pair at a time — the queue
//! takes ownership of the `Arc` on insert and gives it up on pop.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tracing::debug;

use herd_core::{DeviceKind, HerdError, SubCommand, DEVICE_KIND_MAX};

use crate::traits::{CommandParser, ResourcePool};

/// Where an insert lands within its sub-queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertMode {
    /// Fresh submissions append at the tail.
    Tail,
    /// Retries after a dispatch failure go ahead of all tail inserts.
    /// Multiple pending retries stack LIFO at the front.
    Front,
}

#[derive(Default)]
struct QueuePair {
    deadline: VecDeque<Arc<SubCommand>>,
    normal: VecDeque<Arc<SubCommand>>,
}

pub struct SubmitQueue {
    pairs: Mutex<HashMap<DeviceKind, QueuePair>>,
    parser: Arc<dyn CommandParser>,
}

impl SubmitQueue {
    /// Build queue pairs for every kind the pool has devices for.
    pub fn new(pool: &dyn ResourcePool, parser: Arc<dyn CommandParser>) -> Self {
        let kinds = (0..DEVICE_KIND_MAX as u8)
            .map(DeviceKind)
            .filter(|k| pool.device_count(*k) > 0);
        Self::with_kinds(kinds, parser)
    }

    pub fn with_kinds(
        kinds: impl IntoIterator<Item = DeviceKind>,
        parser: Arc<dyn CommandParser>,
    ) -> Self {
        let pairs = kinds
            .into_iter()
            .map(|k| (k, QueuePair::default()))
            .collect();
        Self {
            pairs: Mutex::new(pairs),
            parser,
        }
    }

    /// Enqueue a sub-command, classified by its deadline flag.
    pub fn insert(&self, sc: Arc<SubCommand>, mode: InsertMode) -> Result<(), HerdError> {
        let deadline = self.parser.is_deadline(&sc);
        let mut pairs = self.pairs.lock().unwrap();
        let pair = pairs
            .get_mut(&sc.kind)
            .ok_or(HerdError::InvalidDeviceKind(sc.kind))?;

        debug!(
            cmd = %sc.parent.id, idx = sc.idx, kind = %sc.kind,
            deadline, ?mode, "insert sub-command"
        );
        sc.stamps.lock().unwrap().enqueued = Some(Utc::now());

        let q = if deadline {
            &mut pair.deadline
        } else {
            &mut pair.normal
        };
        match mode {
            InsertMode::Tail => q.push_back(sc),
            InsertMode::Front => q.push_front(sc),
        }
        Ok(())
    }

    /// Pop the next sub-command for a kind: deadline sub-queue
    /// strictly before normal.
    pub fn pop(&self, kind: DeviceKind) -> Option<Arc<SubCommand>> {
        let mut pairs = self.pairs.lock().unwrap();
        let pair = pairs.get_mut(&kind)?;
        let sc = pair
            .deadline
            .pop_front()
            .or_else(|| pair.normal.pop_front())?;

        sc.stamps.lock().unwrap().dequeued = Some(Utc::now());
        debug!(
            cmd = %sc.parent.id, idx = sc.idx, kind = %kind,
            period = sc.period, "pop sub-command"
        );
        Some(sc)
    }

    /// Queued sub-commands for a kind, both sub-queues.
    pub fn len(&self, kind: DeviceKind) -> usize {
        let pairs = self.pairs.lock().unwrap();
        pairs
            .get(&kind)
            .map(|p| p.deadline.len() + p.normal.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, kind: DeviceKind) -> bool {
        self.len(kind) == 0
    }
}
