//! The pre-commit writer (§4.2): serializes queue writes cluster-wide via
//! the writer mutex (acquired by the caller, see [`crate::backend`]),
//! streams pending notifications into queue pages, and pads every page's
//! trailing slack with a dummy entry.

use std::time::Instant;

use tracing::{debug, warn};

use crate::control::Core;
use crate::entry::QueueEntry;
use crate::error::NotifyError;
use crate::oracle::{TransactionOracle, Xid};
use crate::pagedlog::PagedLog;
use crate::position::QueuePosition;
use crate::txn::Notification;

/// Queue positions bracketing a single writer's pre-commit: used by the
/// signal/direct-advance pass (§4.6) and the caller's bookkeeping.
#[derive(Debug, Clone, Copy)]
pub struct WriteSpan {
    pub head_before: QueuePosition,
    pub head_after: QueuePosition,
    /// Set when a page crossed a `cleanup_interval` boundary while writing;
    /// the caller should run [`crate::tail::maybe_advance_tail`] post-commit
    /// (§4.5 step 3), after the signal pass, not immediately here.
    pub try_advance_tail: bool,
}

/// Caller must hold the writer mutex for the duration of this call and
/// until transaction end. Only called when `notifications` is non-empty.
pub async fn enqueue_pending<L: PagedLog, O: TransactionOracle>(
    core: &Core<L, O>,
    xid: Xid,
    dboid: u32,
    pid: i32,
    notifications: &[Notification],
) -> Result<WriteSpan, NotifyError> {
    debug_assert!(!notifications.is_empty());

    let head_before = core.control.read().await.head;
    let page_size = core.config.page_size as u32;

    let mut idx = 0usize;
    let mut try_advance_tail = false;

    while idx < notifications.len() {
        let current_head = {
            let mut guard = core.control.write().await;

            let depth = guard.head.page.saturating_sub(guard.tail.page);
            if depth >= core.config.max_queue_pages {
                return Err(NotifyError::QueueFull);
            }
            maybe_warn_on_fill(core, &mut guard, depth);

            guard.head
        };

        let mut page = if current_head.offset == 0 {
            core.paged_log.zero_new_page(current_head.page).await
        } else {
            core.paged_log.write_pin(current_head.page).await
        };
        page.mark_dirty();

        let mut offset = current_head.offset;
        let mut rolled_to_new_page = false;

        while idx < notifications.len() {
            let n = &notifications[idx];
            let entry = QueueEntry {
                dboid,
                xid: xid.0,
                pid,
                channel: n.channel.clone(),
                payload: n.payload.clone(),
            };
            let len = entry.encoded_len();
            let remaining = page_size - offset;

            if len <= remaining {
                let start = offset as usize;
                entry.encode(&mut page.buffer()[start..start + len as usize]);
                if core.config.trace_notify {
                    debug!(channel = %n.channel, page = current_head.page, offset, "wrote notify entry");
                }
                offset += len;
                idx += 1;
                crate::metrics::ENTRIES_WRITTEN.inc();
                if offset == page_size {
                    rolled_to_new_page = true;
                    break;
                }
            } else {
                let start = offset as usize;
                QueueEntry::encode_dummy(&mut page.buffer()[start..page_size as usize], remaining);
                offset = page_size;
                rolled_to_new_page = true;
                break;
            }
        }

        let new_head = if rolled_to_new_page {
            let next_page = current_head.page + 1;
            drop(page);
            core.paged_log.zero_new_page(next_page).await;
            if next_page % core.config.cleanup_interval == 0 {
                try_advance_tail = true;
            }
            QueuePosition::new(next_page, 0)
        } else {
            // Release the bank lock before requesting the queue lock below:
            // §5 mandates bank-lock acquisitions nest inside the queue lock,
            // never the reverse.
            drop(page);
            QueuePosition::new(current_head.page, offset)
        };

        core.control.write().await.head = new_head;
    }

    let head_after = core.control.read().await.head;

    Ok(WriteSpan {
        head_before,
        head_after,
        try_advance_tail,
    })
}

fn maybe_warn_on_fill<L: PagedLog, O: TransactionOracle>(
    core: &Core<L, O>,
    guard: &mut crate::control::ControlBlockInner,
    depth: u64,
) {
    if depth * 2 < core.config.max_queue_pages {
        return;
    }
    let now = Instant::now();
    let should_warn = guard
        .last_warn_ts
        .map_or(true, |t| now.duration_since(t) >= core.config.warn_interval);
    if !should_warn {
        return;
    }
    guard.last_warn_ts = Some(now);
    let laggard_pid = guard
        .cursors
        .iter()
        .filter(|s| !s.is_free())
        .min_by_key(|s| s.pos)
        .and_then(|s| s.pid);
    warn!(
        depth,
        max_queue_pages = core.config.max_queue_pages,
        laggard_pid,
        "notification queue is more than half full"
    );
    crate::metrics::QUEUE_FULL_WARNINGS.inc();
}
