//! Signal / direct-advance (§4.6): decide, post-commit, which listeners
//! need waking and which can have their cursor advanced in place without
//! ever being told.
//!
//! Two passes under one queue-lock-exclusive critical section: a precise
//! pass over listeners of the committed channels, then a broad pass over
//! every listener using the transaction's before/after head to tell "has
//! nothing new in scope" apart from "might, we don't know". Signals
//! (`Notify::notify_one`) are sent after the lock is released.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Notify;
use tracing::debug;

use crate::control::Core;
use crate::cursor::SlotId;
use crate::oracle::TransactionOracle;
use crate::pagedlog::PagedLog;
use crate::position::QueuePosition;

pub async fn signal_and_direct_advance<L: PagedLog, O: TransactionOracle>(
    core: &Core<L, O>,
    dboid: u32,
    channels: &[String],
    head_before_write: QueuePosition,
    head_after_write: QueuePosition,
) {
    let to_wake: Vec<(i32, Arc<Notify>)> = {
        let mut guard = core.control.write().await;
        let mut marked: HashSet<SlotId> = HashSet::new();
        let mut wake = Vec::new();

        for channel in channels {
            for slot_id in core.registry.listeners(dboid, channel) {
                if marked.contains(&slot_id) {
                    continue;
                }
                if guard.cursors[slot_id as usize].wakeup_pending {
                    continue;
                }
                if guard.cursors[slot_id as usize].pos == guard.head {
                    continue;
                }
                marked.insert(slot_id);
                guard.cursors[slot_id as usize].wakeup_pending = true;
                if let Some(pid) = guard.cursors[slot_id as usize].pid {
                    wake.push((pid, guard.cursors[slot_id as usize].notify.clone()));
                }
            }
        }

        for slot_id in guard.listener_ids() {
            if marked.contains(&slot_id) {
                continue;
            }
            if guard.cursors[slot_id as usize].wakeup_pending {
                continue;
            }
            let pos = guard.cursors[slot_id as usize].pos;
            if pos == head_before_write && !guard.cursors[slot_id as usize].advancing_pos {
                guard.cursors[slot_id as usize].pos = head_after_write;
                crate::metrics::DIRECT_ADVANCES.inc();
            } else if pos < head_before_write {
                guard.cursors[slot_id as usize].wakeup_pending = true;
                if let Some(pid) = guard.cursors[slot_id as usize].pid {
                    wake.push((pid, guard.cursors[slot_id as usize].notify.clone()));
                }
            }
            // pos > head_before_write: this listener is already past
            // everything this transaction wrote; nothing to do.
        }

        wake
    };

    for (pid, notify) in to_wake {
        notify.notify_one();
        crate::metrics::SIGNALS_SENT.inc();
        debug!(pid, "signaled listener");
    }
}
