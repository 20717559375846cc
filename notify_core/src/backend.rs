//! The public surface (§6): one [`BackendHandle`] per client session,
//! wired to a shared [`Core`]. Wraps transaction-scoped state (`TxnState`),
//! the backend's cursor slot and local subscription set, and drives the
//! pre-commit/commit/abort protocol that the rest of the crate implements.

use std::sync::Arc;

use tokio::sync::OwnedMutexGuard;

use crate::config::NotifyConfig;
use crate::control::Core;
use crate::cursor::SlotId;
use crate::error::NotifyError;
use crate::oracle::TransactionOracle;
use crate::pagedlog::PagedLog;
use crate::queue::{enqueue_pending, WriteSpan};
use crate::reader::drain_notifications;
use crate::registry::LocalSubscription;
use crate::signal::signal_and_direct_advance;
use crate::sink::{NotificationSink, NullSink};
use crate::txn::{ListenAction, Notification, TxnState};

/// PostgreSQL rejects `NOTIFY`/`LISTEN`/`UNLISTEN` from inside a parallel
/// worker (§9 Supplemented features); this is the real check behind
/// [`NotifyError::ParallelWorkerNotAllowed`] rather than a dead variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendRole {
    Normal,
    ParallelWorker,
}

/// One client session's view of the shared notification subsystem.
pub struct BackendHandle<L: PagedLog, O: TransactionOracle> {
    core: Arc<Core<L, O>>,
    pub pid: i32,
    pub dboid: u32,
    role: BackendRole,
    slot: Option<SlotId>,
    local: LocalSubscription,
    txn: TxnState,
    pending_write_span: Option<WriteSpan>,
    pending_channels: Vec<String>,
    writer_guard: Option<OwnedMutexGuard<()>>,
}

impl<L: PagedLog, O: TransactionOracle> BackendHandle<L, O> {
    pub fn new(core: Arc<Core<L, O>>, pid: i32, dboid: u32, role: BackendRole) -> Self {
        let min_hashable = core.config().min_hashable_notifies;
        BackendHandle {
            core,
            pid,
            dboid,
            role,
            slot: None,
            local: LocalSubscription::default(),
            txn: TxnState::new(min_hashable),
            pending_write_span: None,
            pending_channels: Vec::new(),
            writer_guard: None,
        }
    }

    pub fn config(&self) -> &NotifyConfig {
        self.core.config()
    }

    pub fn listening_channels(&self) -> impl Iterator<Item = &str> {
        self.local.iter()
    }

    pub async fn queue_usage(&self) -> f64 {
        self.core.queue_usage().await
    }

    pub fn listen(&mut self, nesting_level: u32, channel: String) -> Result<(), NotifyError> {
        validate_channel(&channel, self.core.config())?;
        self.txn.add_action(nesting_level, ListenAction::Listen(channel));
        Ok(())
    }

    pub fn unlisten(&mut self, nesting_level: u32, channel: String) -> Result<(), NotifyError> {
        validate_channel(&channel, self.core.config())?;
        self.txn.add_action(nesting_level, ListenAction::Unlisten(channel));
        Ok(())
    }

    pub fn unlisten_all(&mut self, nesting_level: u32) {
        self.txn.add_action(nesting_level, ListenAction::UnlistenAll);
    }

    /// `notify()` (§6): validated and deduplicated against whatever else is
    /// pending at this nesting level; the actual queue write happens at
    /// `pre_commit`.
    pub fn notify(&mut self, nesting_level: u32, channel: String, payload: String) -> Result<(), NotifyError> {
        if self.role == BackendRole::ParallelWorker {
            return Err(NotifyError::ParallelWorkerNotAllowed);
        }
        self.txn.add_notification(nesting_level, channel, payload, self.core.config())
    }

    pub fn sub_commit(&mut self, nesting_level: u32) {
        self.txn.sub_commit(nesting_level);
    }

    pub fn sub_abort(&mut self, nesting_level: u32) {
        self.txn.sub_abort(nesting_level);
    }

    pub fn at_prepare(&self) -> Result<(), NotifyError> {
        if self.txn.has_pending() {
            Err(NotifyError::PrepareNotSupported)
        } else {
            Ok(())
        }
    }

    /// §4.5 step 1: claim a cursor slot on this transaction's first ever
    /// LISTEN (idempotent across transactions), then write pending
    /// notifies to the queue under the writer mutex, which is held until
    /// `commit`/`abort`.
    pub async fn pre_commit(&mut self) -> Result<(), NotifyError> {
        if self.slot.is_none() && self.txn.has_listen_action() {
            let slot = self.core.control.write().await.claim_listener_slot(self.pid, self.dboid);
            self.slot = Some(slot);
            // Skip past already-committed stale entries; the local
            // subscription set is still empty so nothing is delivered.
            let mut discard = NullSink;
            drain_notifications(&self.core, slot, self.dboid, &self.local, &mut discard)
                .await
                .map_err(NotifyError::PagedLogError)?;
        }

        let notifications = self.txn.take_notifications();
        if !notifications.is_empty() {
            self.writer_guard = Some(self.core.writer_mutex.clone().lock_owned().await);
            let xid = self.core.oracle.current_xid();
            let span = enqueue_pending(&self.core, xid, self.dboid, self.pid, &notifications).await?;
            self.pending_channels = unique_channels(&notifications);
            self.pending_write_span = Some(span);
        }
        Ok(())
    }

    /// §4.5 step 3: replay LISTEN/UNLISTEN actions against the local and
    /// shared registries, run the signal/direct-advance pass, opportunis­
    /// tically advance the tail, then release the writer mutex.
    pub async fn commit(&mut self) {
        let actions = self.txn.take_actions();
        for action in actions {
            match action {
                ListenAction::Listen(channel) => {
                    if self.local.insert(channel.clone()) {
                        debug_assert!(
                            self.slot.is_some(),
                            "a committed LISTEN implies pre_commit claimed a slot"
                        );
                        if let Some(slot) = self.slot {
                            self.core.registry.subscribe(self.dboid, &channel, slot);
                        }
                    }
                }
                ListenAction::Unlisten(channel) => {
                    if self.local.remove(&channel) {
                        if let Some(slot) = self.slot {
                            self.core.registry.unsubscribe(self.dboid, &channel, slot);
                        }
                    }
                }
                ListenAction::UnlistenAll => {
                    self.local.clear();
                    if let Some(slot) = self.slot {
                        self.core.registry.unsubscribe_all(self.dboid, slot);
                    }
                }
            }
        }

        if let Some(span) = self.pending_write_span.take() {
            let channels = std::mem::take(&mut self.pending_channels);
            signal_and_direct_advance(&self.core, self.dboid, &channels, span.head_before, span.head_after).await;
            if span.try_advance_tail {
                crate::tail::maybe_advance_tail(&self.core).await;
            }
        }

        self.deregister_if_idle().await;
        self.writer_guard = None;
    }

    /// §4.5 top-level abort: discard all pending state; if `pre_commit`
    /// claimed a slot but no LISTEN ever committed, release it.
    pub async fn abort(&mut self) {
        self.txn.clear();
        self.pending_write_span = None;
        self.pending_channels.clear();
        self.deregister_if_idle().await;
        self.writer_guard = None;
    }

    /// Block until this backend's cursor has been signaled, then run one
    /// `drain_notifications` pass. Stand-in for the signal-handler-driven
    /// main loop (§6 `on_notify_interrupt`); only valid once a slot exists.
    pub async fn wait_and_drain(&self, sink: &mut dyn NotificationSink) -> anyhow::Result<usize> {
        let slot = self.slot.expect("wait_and_drain called before any LISTEN committed");
        let notify = self.core.control.read().await.cursors[slot as usize].notify.clone();
        notify.notified().await;
        drain_notifications(&self.core, slot, self.dboid, &self.local, sink).await
    }

    /// Run a `drain_notifications` pass right now, without waiting on a
    /// signal first. A backend may poll at idle points instead of relying
    /// solely on the signal path; direct-advanced or already-caught-up
    /// cursors make this a cheap no-op.
    pub async fn drain_now(&self, sink: &mut dyn NotificationSink) -> anyhow::Result<usize> {
        let slot = self.slot.expect("drain_now called before any LISTEN committed");
        drain_notifications(&self.core, slot, self.dboid, &self.local, sink).await
    }

    async fn deregister_if_idle(&mut self) {
        if let Some(slot) = self.slot {
            if self.local.is_empty() {
                self.core.control.write().await.deregister(slot);
                self.slot = None;
            }
        }
    }
}

fn validate_channel(channel: &str, config: &NotifyConfig) -> Result<(), NotifyError> {
    if channel.is_empty() || channel.len() > config.max_channel_len {
        return Err(NotifyError::InvalidParameter(format!(
            "channel name length {} exceeds max_channel_len {}",
            channel.len(),
            config.max_channel_len
        )));
    }
    Ok(())
}

fn unique_channels(notifications: &[Notification]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for n in notifications {
        if seen.insert(n.channel.clone()) {
            out.push(n.channel.clone());
        }
    }
    out
}
