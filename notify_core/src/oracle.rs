//! The transaction-id/snapshot manager (§6): an external collaborator this
//! crate only ever queries, never mutates. Whether a given xid is
//! in-progress, committed, or aborted decides whether a queue entry is
//! replay-pending, deliverable, or skippable (§4.3).

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Xid(pub u64);

/// A point-in-time view used to decide whether an xid not yet known to be
/// committed or aborted should be treated as still in progress.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Lowest xid not yet known to have committed when the snapshot was
    /// taken; anything below is surely decided one way or the other.
    pub xmin: Xid,
    /// First as-yet-unassigned xid at snapshot time; anything at or above
    /// this is necessarily still in progress (it started after us).
    pub xmax: Xid,
    /// Xids between xmin and xmax that were in progress at snapshot time.
    pub in_progress: BTreeSet<Xid>,
}

impl Snapshot {
    pub fn in_progress_at_snapshot(&self, xid: Xid) -> bool {
        xid >= self.xmax || (xid >= self.xmin && self.in_progress.contains(&xid))
    }
}

/// Consumed from the surrounding database engine's transaction manager.
pub trait TransactionOracle: Send + Sync {
    /// The xid of the calling backend's current transaction.
    fn current_xid(&self) -> Xid;

    /// A snapshot suitable for gating queue-entry visibility.
    fn current_snapshot(&self) -> Snapshot;

    /// Whether `xid` was still in progress as of `snapshot`.
    fn xid_in_progress(&self, xid: Xid, snapshot: &Snapshot) -> bool {
        snapshot.in_progress_at_snapshot(xid)
    }

    /// Whether `xid` is now known to have committed. Only meaningful once
    /// `xid_in_progress` has returned `false` for it.
    fn xid_committed(&self, xid: Xid) -> bool;
}

/// A deterministic oracle for tests: the caller explicitly marks xids
/// committed or aborted and hands out fixed snapshots, instead of racing
/// real wall-clock transactions.
pub mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum FakeStatus {
        InProgress,
        Committed,
        Aborted,
    }

    pub struct FakeOracle {
        next_xid: AtomicU64,
        statuses: Mutex<HashMap<Xid, FakeStatus>>,
    }

    impl Default for FakeOracle {
        fn default() -> Self {
            FakeOracle {
                next_xid: AtomicU64::new(1),
                statuses: Mutex::new(HashMap::new()),
            }
        }
    }

    impl FakeOracle {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn begin(&self) -> Xid {
            let xid = Xid(self.next_xid.fetch_add(1, Ordering::SeqCst));
            self.statuses.lock().unwrap().insert(xid, FakeStatus::InProgress);
            xid
        }

        pub fn commit(&self, xid: Xid) {
            self.statuses.lock().unwrap().insert(xid, FakeStatus::Committed);
        }

        pub fn abort(&self, xid: Xid) {
            self.statuses.lock().unwrap().insert(xid, FakeStatus::Aborted);
        }

        /// A snapshot that sees every xid still tagged in-progress right
        /// now as in-progress, and everything else as decided.
        pub fn snapshot(&self) -> Snapshot {
            let statuses = self.statuses.lock().unwrap();
            let in_progress: BTreeSet<Xid> = statuses
                .iter()
                .filter(|(_, s)| **s == FakeStatus::InProgress)
                .map(|(x, _)| *x)
                .collect();
            let xmax = Xid(self.next_xid.load(Ordering::SeqCst));
            Snapshot {
                xmin: Xid(0),
                xmax,
                in_progress,
            }
        }
    }

    impl TransactionOracle for FakeOracle {
        fn current_xid(&self) -> Xid {
            // Tests call `begin()` explicitly; this is only used when a
            // caller wants "whatever the most recently begun xid was".
            Xid(self.next_xid.load(Ordering::SeqCst).saturating_sub(1))
        }

        fn current_snapshot(&self) -> Snapshot {
            self.snapshot()
        }

        fn xid_in_progress(&self, xid: Xid, snapshot: &Snapshot) -> bool {
            let statuses = self.statuses.lock().unwrap();
            match statuses.get(&xid) {
                Some(FakeStatus::InProgress) => true,
                Some(_) => false,
                None => snapshot.in_progress_at_snapshot(xid),
            }
        }

        fn xid_committed(&self, xid: Xid) -> bool {
            matches!(self.statuses.lock().unwrap().get(&xid), Some(FakeStatus::Committed))
        }
    }
}
