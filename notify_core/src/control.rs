//! The queue control block (§3) and the `Core` object that ties the
//! paged-log store, the control block, and the channel registry together
//! behind the lock protocol §5 mandates.
//!
//! Global mutable state lives in exactly one place: a `Core` created once
//! by the embedding server and shared via `Arc` — no hidden process-wide
//! singleton (§9).

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};

use crate::config::NotifyConfig;
use crate::cursor::{CursorSlot, SlotId, INVALID_SLOT};
use crate::oracle::TransactionOracle;
use crate::pagedlog::PagedLog;
use crate::position::QueuePosition;
use crate::registry::ChannelRegistry;

/// `ControlBlock` (§3), minus the cursor table's `pos`/`wakeup_pending`/
/// `advancing_pos` fields' fine-grained locking: a real shared-memory
/// LWLock lets a SHARED holder still atomically touch its own cursor, but
/// `tokio::sync::RwLock` has no such escape hatch, so every mutation here
/// — including a backend updating only its own cursor — takes the queue
/// lock in EXCLUSIVE mode. This does not change any observable ordering
/// or delivery guarantee; it only gives up one micro-optimization in
/// lock granularity.
pub(crate) struct ControlBlockInner {
    pub head: QueuePosition,
    pub tail: QueuePosition,
    pub stop_page: u64,
    pub first_listener: SlotId,
    pub last_warn_ts: Option<Instant>,
    pub cursors: Vec<CursorSlot>,
}

impl ControlBlockInner {
    fn new() -> Self {
        ControlBlockInner {
            head: QueuePosition::ZERO,
            tail: QueuePosition::ZERO,
            stop_page: 0,
            first_listener: INVALID_SLOT,
            last_warn_ts: None,
            cursors: Vec::new(),
        }
    }

    /// Claim a free slot (or grow the table) for `pid`/`dboid` and link it
    /// into the sorted listener list, initializing `pos` to the max of
    /// `tail` and every other same-database listener's `pos` (§4.4): this
    /// skips messages that predate this LISTEN while never skipping one
    /// that might still be relevant, because the backend is linked into
    /// the listener list before any page can be truncated out from under
    /// it (§9 open question, preserved as-is).
    pub fn claim_listener_slot(&mut self, pid: i32, dboid: u32) -> SlotId {
        let mut start_pos = self.tail;
        for slot in &self.cursors {
            if !slot.is_free() && slot.dboid == dboid {
                start_pos = start_pos.max(slot.pos);
            }
        }

        let id = match self.cursors.iter().position(|s| s.is_free()) {
            Some(id) => id as SlotId,
            None => {
                self.cursors.push(CursorSlot::free());
                (self.cursors.len() - 1) as SlotId
            }
        };

        {
            let slot = &mut self.cursors[id as usize];
            slot.pid = Some(pid);
            slot.dboid = dboid;
            slot.pos = start_pos;
            slot.wakeup_pending = false;
            slot.advancing_pos = false;
        }
        self.link_listener(id);
        id
    }

    fn link_listener(&mut self, id: SlotId) {
        // Keep the list sorted ascending by slot id (§5 shared-resource
        // policy) for cache-friendly traversal.
        if self.first_listener == INVALID_SLOT || self.first_listener > id {
            self.cursors[id as usize].next_listener = self.first_listener;
            self.first_listener = id;
            return;
        }
        let mut prev = self.first_listener;
        loop {
            let next = self.cursors[prev as usize].next_listener;
            if next == INVALID_SLOT || next > id {
                self.cursors[id as usize].next_listener = next;
                self.cursors[prev as usize].next_listener = id;
                return;
            }
            prev = next;
        }
    }

    fn unlink_listener(&mut self, id: SlotId) {
        let mut cursor = self.first_listener;
        if cursor == id {
            self.first_listener = self.cursors[id as usize].next_listener;
            self.cursors[id as usize].next_listener = INVALID_SLOT;
            return;
        }
        while cursor != INVALID_SLOT {
            let next = self.cursors[cursor as usize].next_listener;
            if next == id {
                self.cursors[cursor as usize].next_listener = self.cursors[id as usize].next_listener;
                self.cursors[id as usize].next_listener = INVALID_SLOT;
                return;
            }
            cursor = next;
        }
    }

    /// `deregister` (§4.4): free the slot if its local subscription set is
    /// empty.
    pub fn deregister(&mut self, id: SlotId) {
        self.unlink_listener(id);
        let slot = &mut self.cursors[id as usize];
        slot.pid = None;
        slot.wakeup_pending = false;
        slot.advancing_pos = false;
    }

    pub fn listener_ids(&self) -> Vec<SlotId> {
        let mut ids = Vec::new();
        let mut cursor = self.first_listener;
        while cursor != INVALID_SLOT {
            ids.push(cursor);
            cursor = self.cursors[cursor as usize].next_listener;
        }
        ids
    }

    #[cfg(test)]
    pub fn listener_ids_are_sorted_and_match_live_slots(&self) -> bool {
        let ids = self.listener_ids();
        let sorted = ids.windows(2).all(|w| w[0] < w[1]);
        let live: std::collections::BTreeSet<SlotId> = self
            .cursors
            .iter()
            .enumerate()
            .filter(|(_, s)| !s.is_free())
            .map(|(i, _)| i as SlotId)
            .collect();
        let linked: std::collections::BTreeSet<SlotId> = ids.into_iter().collect();
        sorted && linked == live
    }
}

/// Ties the paged-log store, the control block, and the channel registry
/// together. One `Core` per database cluster process; tests build their
/// own.
pub struct Core<L: PagedLog, O: TransactionOracle> {
    pub(crate) config: NotifyConfig,
    pub(crate) paged_log: L,
    pub(crate) oracle: O,
    /// Cluster-wide heavyweight lock serializing writers (§4.2 step 1,
    /// §5 lock #1). Held by a transaction from pre-commit through commit
    /// or abort — wrapped in its own `Arc` so a [`crate::backend::BackendHandle`]
    /// can carry an owned guard across that span without borrowing `Core`.
    pub(crate) writer_mutex: Arc<Mutex<()>>,
    /// Cluster-wide lock serializing tail-advance/truncation (§4.7, §5
    /// lock #2).
    pub(crate) tail_lock: Mutex<()>,
    /// "queue-lock" (§5 lock #3).
    pub(crate) control: RwLock<ControlBlockInner>,
    pub(crate) registry: ChannelRegistry,
}

impl<L: PagedLog, O: TransactionOracle> Core<L, O> {
    pub fn new(config: NotifyConfig, paged_log: L, oracle: O) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Core {
            config,
            paged_log,
            oracle,
            writer_mutex: Arc::new(Mutex::new(())),
            tail_lock: Mutex::new(()),
            control: RwLock::new(ControlBlockInner::new()),
            registry: ChannelRegistry::new(),
        })
    }

    pub fn config(&self) -> &NotifyConfig {
        &self.config
    }

    /// The transaction oracle this `Core` was built with. Exposed so a
    /// caller driving transaction boundaries (a real transaction manager,
    /// or a test oracle like `oracle::fake::FakeOracle`) can reach it
    /// through the same `Arc<Core<_, _>>` handed to every `BackendHandle`.
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// `queue_usage()` (§6): `(head.page - tail.page) / max_queue_pages`,
    /// computed after an opportunistic tail advance, deliberately against
    /// the *logical* tail (minimum listener cursor page) rather than the
    /// physical `stop_page`, to avoid instability across segment
    /// boundaries (§9 open question, preserved as-is).
    pub async fn queue_usage(&self) -> f64 {
        crate::tail::maybe_advance_tail(self).await;
        let guard = self.control.read().await;
        let depth = guard.head.page.saturating_sub(guard.tail.page);
        let usage = depth as f64 / self.config.max_queue_pages as f64;
        crate::metrics::QUEUE_USAGE.set(usage);
        usage
    }

    pub async fn queue_depth_pages(&self) -> u64 {
        let guard = self.control.read().await;
        guard.head.page.saturating_sub(guard.tail.page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_and_deregister_keep_listener_list_sorted() {
        let mut inner = ControlBlockInner::new();
        let a = inner.claim_listener_slot(100, 1);
        let b = inner.claim_listener_slot(200, 1);
        let c = inner.claim_listener_slot(300, 1);
        assert!(inner.listener_ids_are_sorted_and_match_live_slots());
        inner.deregister(b);
        assert!(inner.listener_ids_are_sorted_and_match_live_slots());
        assert_eq!(inner.listener_ids(), vec![a.min(c), a.max(c)]);
    }

    #[test]
    fn freed_slot_is_reused() {
        let mut inner = ControlBlockInner::new();
        let a = inner.claim_listener_slot(100, 1);
        inner.deregister(a);
        let b = inner.claim_listener_slot(200, 1);
        assert_eq!(a, b);
    }

    #[test]
    fn new_listener_starts_at_max_of_tail_and_sibling_cursors() {
        let mut inner = ControlBlockInner::new();
        inner.tail = QueuePosition::new(1, 0);
        let a = inner.claim_listener_slot(100, 1);
        inner.cursors[a as usize].pos = QueuePosition::new(5, 0);
        let b = inner.claim_listener_slot(200, 1);
        assert_eq!(inner.cursors[b as usize].pos, QueuePosition::new(5, 0));

        // a different database doesn't influence the starting position
        let c = inner.claim_listener_slot(300, 2);
        assert_eq!(inner.cursors[c as usize].pos, QueuePosition::new(1, 0));
    }
}
