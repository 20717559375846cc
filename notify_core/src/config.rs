//! Configurable parameters (§6) plus the paged-log geometry they imply.

use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Size of one paged-log page, in bytes. 8 KiB to match a typical
    /// database block size.
    pub page_size: usize,

    /// Pages per truncation segment; the paged-log collaborator only
    /// truncates on segment boundaries.
    pub segment_size: u64,

    /// Hard cap on `head.page - tail.page`. Crossing it fails the writer
    /// with [`crate::error::NotifyError::QueueFull`].
    pub max_queue_pages: u64,

    /// Count of in-memory page buffers kept by the paged-log collaborator.
    /// Only affects throughput, but must exceed `cleanup_interval` or the
    /// working set thrashes the buffer pool.
    pub notify_buffers: usize,

    /// When set, per-entry queue writes/reads are logged at `trace!`.
    pub trace_notify: bool,

    /// Pages between tail-advance attempts.
    pub cleanup_interval: u64,

    /// Minimum gap between repeated "queue more than half full" warnings.
    pub warn_interval: Duration,

    /// Number of pending notifications in a (sub)transaction before a
    /// dedup hash is built instead of a linear scan.
    pub min_hashable_notifies: usize,

    /// Maximum channel name length, NUL terminator excluded.
    pub max_channel_len: usize,
}

impl NotifyConfig {
    /// Maximum payload length, NUL terminator excluded. Derived from page
    /// geometry the same way the channel bound carves room for the entry
    /// header plus some slack for alignment padding.
    pub fn max_payload_len(&self) -> usize {
        self.page_size
            .saturating_sub(self.max_channel_len)
            .saturating_sub(128)
    }

    pub fn validate(&self) -> Result<()> {
        if self.notify_buffers as u64 <= self.cleanup_interval {
            bail!(
                "notify_buffers ({}) must exceed cleanup_interval ({})",
                self.notify_buffers,
                self.cleanup_interval
            );
        }
        if self.max_queue_pages == 0 {
            bail!("max_queue_pages must be positive");
        }
        if self.max_channel_len == 0 || self.max_channel_len + 128 >= self.page_size {
            bail!("max_channel_len does not leave room for a payload in one page");
        }
        Ok(())
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        NotifyConfig {
            page_size: 8192,
            segment_size: 16,
            max_queue_pages: 1_048_576,
            notify_buffers: 64,
            trace_notify: false,
            cleanup_interval: 4,
            warn_interval: Duration::from_millis(5000),
            min_hashable_notifies: 16,
            max_channel_len: 64,
        }
    }
}
