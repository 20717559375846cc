//! The per-backend cursor table (§3): one `CursorSlot` per backend slot,
//! threaded into a singly-linked list (by slot id, ascending) rooted at
//! `ControlBlockInner::first_listener` so a writer only has to walk active
//! listeners instead of the whole slot array.

use std::sync::Arc;

use tokio::sync::Notify;

use crate::position::QueuePosition;

pub type SlotId = u32;
pub const INVALID_SLOT: SlotId = u32::MAX;

/// `BackendCursor` (§3). `pid.is_none()` means the slot is free.
pub struct CursorSlot {
    pub pid: Option<i32>,
    pub dboid: u32,
    pub next_listener: SlotId,
    pub pos: QueuePosition,
    pub wakeup_pending: bool,
    pub advancing_pos: bool,
    /// Stand-in for the process-signal primitive (§6, §9): `notify_one()`
    /// replaces `kill(pid, SIGUSR1)`; a listener's event loop awaits it.
    pub notify: Arc<Notify>,
}

impl CursorSlot {
    pub fn free() -> Self {
        CursorSlot {
            pid: None,
            dboid: 0,
            next_listener: INVALID_SLOT,
            pos: QueuePosition::ZERO,
            wakeup_pending: false,
            advancing_pos: false,
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_free(&self) -> bool {
        self.pid.is_none()
    }
}
