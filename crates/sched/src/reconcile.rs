//! Done-list and completion reconciliation.
//!
//! Device workers push a sub-command here exactly once, when its
//! fan-out reference count reaches zero. The scheduler core drains the
//! list at the start of each pass, one entry per call.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::Notify;
use tracing::{debug, warn};

use herd_core::{CommandOutcome, HerdError, SubCommand};

use crate::queue::{InsertMode, SubmitQueue};
use crate::traits::CommandParser;

/// FIFO of fully-finished sub-commands awaiting reconciliation.
///
/// Producers: any device worker. Sole consumer: the reconciler on the
/// scheduler core. Pushing wakes the core.
pub struct DoneList {
    inner: Mutex<VecDeque<Arc<SubCommand>>>,
    wake: Arc<Notify>,
}

impl DoneList {
    pub fn new(wake: Arc<Notify>) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            wake,
        }
    }

    pub fn push(&self, sc: Arc<SubCommand>) {
        debug!(cmd = %sc.parent.id, idx = sc.idx, "sub-command done");
        self.inner.lock().unwrap().push_back(sc);
        self.wake.notify_one();
    }

    pub fn pop(&self) -> Option<Arc<SubCommand>> {
        self.inner.lock().unwrap().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Reconcile at most one done-list entry.
///
/// Releases the bound memory context, then finalizes through the
/// command parser. Residual chained sub-commands are fed straight back
/// through the normal submission path without waiting for a new wake.
/// A parser failure aborts the remaining chain: the parent command is
/// signalled immediately and the error returned, no retry.
pub fn reconcile_one(
    done: &DoneList,
    parser: &dyn CommandParser,
    queue: &SubmitQueue,
    wake: &Notify,
) -> Result<(), HerdError> {
    let sc = done.pop().ok_or(HerdError::QueueEmpty)?;
    let parent = Arc::clone(&sc.parent);

    parser.release_context(&sc);

    loop {
        match parser.finalize(&sc) {
            Err(e) => {
                warn!(cmd = %parent.id, idx = sc.idx, error = %e, "finalize failed, aborting command");
                parent.signal_completion(CommandOutcome::Aborted {
                    reason: e.to_string(),
                });
                return Err(e);
            }
            Ok(Some(residual)) => {
                debug!(
                    cmd = %residual.parent.id, idx = residual.idx,
                    "scheduling residual sub-command"
                );
                if let Err(e) = queue.insert(residual, InsertMode::Tail) {
                    warn!(cmd = %parent.id, error = %e, "residual enqueue failed");
                    parent.signal_completion(CommandOutcome::Aborted {
                        reason: e.to_string(),
                    });
                    return Err(e);
                }
                wake.notify_one();
            }
            Ok(None) => {
                if parent.satisfy_one() {
                    let outcome = parent.outcome();
                    debug!(cmd = %parent.id, ?outcome, "command complete");
                    parent.signal_completion(outcome);
                }
                return Ok(());
            }
        }
    }
}
