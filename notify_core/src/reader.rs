//! The post-signal/idle reader (§4.3): replays queue entries from a
//! listener's cursor up to the last observed head, filtering by database,
//! transaction visibility, and local subscription, and always publishing
//! the cursor's new position before returning — whether delivery succeeded
//! or failed.
//!
//! The publish-on-exit guarantee here covers every value this function can
//! return (`Ok` and `Err`), matching §4.3 step 5/"crucial ordering": cur is
//! always advanced over an entry before any action that can fail, so a
//! delivery error never causes that entry to be replayed. It does not cover
//! the future being dropped mid-poll (e.g. an external `select!` losing the
//! race) — `tokio::sync::RwLock` has no synchronous write path a `Drop` impl
//! could call, so that case is left to the caller to avoid by not racing a
//! cursor's own drain against itself.

use crate::control::Core;
use crate::cursor::SlotId;
use crate::entry::QueueEntry;
use crate::oracle::{TransactionOracle, Xid};
use crate::pagedlog::PagedLog;
use crate::position::QueuePosition;
use crate::registry::LocalSubscription;
use crate::sink::{DeliveredNotification, NotificationSink};

/// Drive one pass of `drain_notifications` for `slot`. Returns the number
/// of notifications actually handed to `sink`. Only called outside any
/// transaction, at an idle point (§4.3 preamble).
pub async fn drain_notifications<L: PagedLog, O: TransactionOracle>(
    core: &Core<L, O>,
    slot: SlotId,
    dboid: u32,
    local: &LocalSubscription,
    sink: &mut dyn NotificationSink,
) -> anyhow::Result<usize> {
    let (mut cur, head) = {
        let mut guard = core.control.write().await;
        guard.cursors[slot as usize].wakeup_pending = false;
        guard.cursors[slot as usize].advancing_pos = true;
        (guard.cursors[slot as usize].pos, guard.head)
    };

    if cur == head {
        core.control.write().await.cursors[slot as usize].advancing_pos = false;
        return Ok(0);
    }

    // Safe to release the queue lock from here on: this slot is already
    // linked into the listener list, so no truncation can pass `cur`.
    let snapshot = core.oracle.current_snapshot();
    let page_size = core.config.page_size as u32;
    let mut delivered = 0usize;
    let mut failure: Option<anyhow::Error> = None;

    'outer: while cur < head {
        let page_no = cur.page;
        let slice_start = cur.offset;
        let end_offset = if page_no == head.page { head.offset } else { page_size };

        let bytes = {
            let page = core.paged_log.read_pin(page_no).await;
            page.buffer()[slice_start as usize..end_offset as usize].to_vec()
        };

        while cur.page == page_no && cur.offset < end_offset {
            let rel = (cur.offset - slice_start) as usize;
            let decoded = match QueueEntry::decode(&bytes[rel..]) {
                Ok(d) => d,
                Err(e) => {
                    failure = Some(e.into());
                    break 'outer;
                }
            };

            let next_offset = cur.offset + decoded.encoded_len;
            let next_cur = if next_offset == page_size {
                QueuePosition::new(page_no + 1, 0)
            } else {
                QueuePosition::new(page_no, next_offset)
            };

            if decoded.is_padding() || decoded.dboid != dboid {
                cur = next_cur;
                continue;
            }

            let xid = Xid(decoded.xid);
            if core.oracle.xid_in_progress(xid, &snapshot) {
                // Leave `cur` at the start of this entry: it is not yet
                // decided and must be re-examined on the next drain.
                break 'outer;
            }

            // Advance cur before the one action that can fail, so a
            // delivery error never replays this entry.
            cur = next_cur;

            if core.oracle.xid_committed(xid) && local.is_listening(&decoded.channel) {
                let notification = DeliveredNotification {
                    pid: decoded.pid,
                    channel: decoded.channel,
                    payload: decoded.payload,
                };
                match sink.deliver(notification).await {
                    Ok(()) => {
                        delivered += 1;
                        crate::metrics::ENTRIES_DELIVERED.inc();
                    }
                    Err(e) => {
                        failure = Some(e);
                        break 'outer;
                    }
                }
            }
            // Aborted, or committed-but-not-subscribed: already skipped by
            // advancing cur above.
        }
    }

    {
        let mut guard = core.control.write().await;
        guard.cursors[slot as usize].pos = cur;
        guard.cursors[slot as usize].advancing_pos = false;
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(delivered),
    }
}
