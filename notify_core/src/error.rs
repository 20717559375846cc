//! Error kinds surfaced across the module boundary (see §7 error handling).
//!
//! Internal invariant violations (lock-ordering bugs, a slot with no
//! registry entry) are `debug_assert!`s, not recoverable errors — they are
//! bugs in this crate, not conditions a caller can act on.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    /// Channel name empty/too long, or payload too long.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Pre-commit writer could not fit the transaction's notifications
    /// within `max_queue_pages`. The caller's transaction must roll back.
    #[error("notification queue is full")]
    QueueFull,

    /// The paged-log collaborator failed (out of memory, corrupt page,
    /// etc). Handled identically to `QueueFull` at pre-commit.
    #[error("paged log error")]
    PagedLogError(#[from] anyhow::Error),

    /// `at_prepare` was called with pending LISTEN/UNLISTEN/NOTIFY actions.
    #[error("cannot PREPARE a transaction that has executed LISTEN, UNLISTEN, or NOTIFY")]
    PrepareNotSupported,

    /// `notify` was called from a backend role that may not publish.
    #[error("cannot execute NOTIFY in a parallel worker")]
    ParallelWorkerNotAllowed,
}
