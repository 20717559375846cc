//! Tail advance & truncation (§4.7): shrink the queue's live range to the
//! slowest listener's cursor, and drop whole truncation segments once the
//! new tail has crossed one.

use tracing::debug;

use crate::control::Core;
use crate::oracle::TransactionOracle;
use crate::pagedlog::PagedLog;

/// Called by writers at most every `cleanup_interval` pages (§4.6) and
/// opportunistically by [`Core::queue_usage`]. Cheap to call when nothing
/// has moved: the common case is `segment_boundary == stop_page`.
pub async fn maybe_advance_tail<L: PagedLog, O: TransactionOracle>(core: &Core<L, O>) {
    let _tail_guard = core.tail_lock.lock().await;

    let stop_page_snapshot = {
        let mut guard = core.control.write().await;
        let mut min = guard.head;
        for slot in &guard.cursors {
            if !slot.is_free() {
                min = min.min(slot.pos);
            }
        }
        guard.tail = min;
        guard.stop_page
    };

    let new_tail_page = core.control.read().await.tail.page;
    let segment_boundary = (new_tail_page / core.config.segment_size) * core.config.segment_size;

    if segment_boundary > stop_page_snapshot {
        debug!(segment_boundary, stop_page_snapshot, "truncating paged log");
        core.paged_log.truncate_before(segment_boundary);
        core.control.write().await.stop_page = segment_boundary;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NotifyConfig;
    use crate::oracle::fake::FakeOracle;
    use crate::pagedlog::InMemoryPagedLog;
    use crate::position::QueuePosition;

    fn test_core(segment_size: u64) -> std::sync::Arc<Core<InMemoryPagedLog, FakeOracle>> {
        let mut conf = NotifyConfig::default();
        conf.page_size = 64;
        conf.segment_size = segment_size;
        conf.max_channel_len = 16;
        Core::new(conf, InMemoryPagedLog::new(64), FakeOracle::new())
    }

    #[tokio::test]
    async fn tail_tracks_the_slowest_live_listener() {
        let core = test_core(4);
        {
            let mut guard = core.control.write().await;
            guard.head = QueuePosition::new(10, 0);
            let slow = guard.claim_listener_slot(1, 5);
            guard.cursors[slow as usize].pos = QueuePosition::new(3, 0);
            let fast = guard.claim_listener_slot(2, 5);
            guard.cursors[fast as usize].pos = QueuePosition::new(8, 0);
        }
        maybe_advance_tail(&core).await;
        assert_eq!(core.control.read().await.tail, QueuePosition::new(3, 0));
    }

    #[tokio::test]
    async fn tail_advances_to_head_with_no_listeners() {
        let core = test_core(4);
        core.control.write().await.head = QueuePosition::new(7, 0);
        maybe_advance_tail(&core).await;
        assert_eq!(core.control.read().await.tail, QueuePosition::new(7, 0));
    }

    #[tokio::test]
    async fn crossing_a_segment_boundary_truncates_and_advances_stop_page() {
        let core = test_core(4);
        for p in 0..9 {
            core.paged_log.zero_new_page(p).await;
        }
        core.control.write().await.head = QueuePosition::new(9, 0);
        maybe_advance_tail(&core).await;
        // tail.page = 9, segment_size = 4 -> boundary 8
        assert_eq!(core.control.read().await.stop_page, 8);
        assert_eq!(core.paged_log.resident_pages(), 1);
    }

    #[tokio::test]
    async fn does_not_truncate_within_the_same_segment() {
        let core = test_core(4);
        for p in 0..3 {
            core.paged_log.zero_new_page(p).await;
        }
        core.control.write().await.head = QueuePosition::new(2, 0);
        maybe_advance_tail(&core).await;
        assert_eq!(core.control.read().await.stop_page, 0);
        assert_eq!(core.paged_log.resident_pages(), 3);
    }
}
