//! Per-transaction pending state (§4.5): two nesting-level-tagged frame
//! stacks, one for LISTEN/UNLISTEN actions and one for NOTIFY events,
//! merged or discarded as subtransactions commit or abort.

use std::collections::HashSet;

use crate::config::NotifyConfig;
use crate::error::NotifyError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAction {
    Listen(String),
    Unlisten(String),
    UnlistenAll,
}

/// A pending NOTIFY, deduplicated within its frame by `(channel, payload)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub channel: String,
    pub payload: String,
}

struct ActionsFrame {
    nesting_level: u32,
    actions: Vec<ListenAction>,
}

struct NotifiesFrame {
    nesting_level: u32,
    entries: Vec<Notification>,
    /// Built lazily once `entries.len()` crosses `min_hashable_notifies`
    /// (§3 PendingNotifiesFrame); below that a linear scan is cheaper.
    dedup: Option<HashSet<(String, String)>>,
}

impl NotifiesFrame {
    fn new(nesting_level: u32) -> Self {
        NotifiesFrame {
            nesting_level,
            entries: Vec::new(),
            dedup: None,
        }
    }

    fn contains(&self, n: &Notification) -> bool {
        match &self.dedup {
            Some(set) => set.contains(&(n.channel.clone(), n.payload.clone())),
            None => self.entries.iter().any(|e| *e == *n),
        }
    }

    fn push(&mut self, n: Notification, min_hashable_notifies: usize) {
        if let Some(set) = &mut self.dedup {
            set.insert((n.channel.clone(), n.payload.clone()));
        }
        self.entries.push(n);
        if self.dedup.is_none() && self.entries.len() >= min_hashable_notifies {
            self.dedup = Some(
                self.entries
                    .iter()
                    .map(|e| (e.channel.clone(), e.payload.clone()))
                    .collect(),
            );
        }
    }
}

/// State accumulated by one top-level transaction (and its subtransactions)
/// between `pre_commit`/`commit`/`abort` calls. One instance per backend
/// transaction; owned by [`crate::backend::BackendHandle`].
pub struct TxnState {
    min_hashable_notifies: usize,
    actions: Vec<ActionsFrame>,
    notifies: Vec<NotifiesFrame>,
}

impl TxnState {
    pub fn new(min_hashable_notifies: usize) -> Self {
        TxnState {
            min_hashable_notifies,
            actions: Vec::new(),
            notifies: Vec::new(),
        }
    }

    pub fn add_action(&mut self, nesting_level: u32, action: ListenAction) {
        match self.actions.last_mut() {
            Some(frame) if frame.nesting_level == nesting_level => frame.actions.push(action),
            _ => self.actions.push(ActionsFrame {
                nesting_level,
                actions: vec![action],
            }),
        }
    }

    /// Validate and queue a NOTIFY, dropping it if an identical
    /// `(channel, payload)` pair is already pending at this nesting level.
    pub fn add_notification(
        &mut self,
        nesting_level: u32,
        channel: String,
        payload: String,
        config: &NotifyConfig,
    ) -> Result<(), NotifyError> {
        if channel.is_empty() || channel.len() > config.max_channel_len {
            return Err(NotifyError::InvalidParameter(format!(
                "channel name length {} exceeds max_channel_len {}",
                channel.len(),
                config.max_channel_len
            )));
        }
        if payload.len() > config.max_payload_len() {
            return Err(NotifyError::InvalidParameter(format!(
                "payload length {} exceeds max_payload_len {}",
                payload.len(),
                config.max_payload_len()
            )));
        }

        let notification = Notification { channel, payload };
        let min_hashable = self.min_hashable_notifies;
        match self.notifies.last_mut() {
            Some(frame) if frame.nesting_level == nesting_level => {
                if !frame.contains(&notification) {
                    frame.push(notification, min_hashable);
                }
            }
            _ => {
                let mut frame = NotifiesFrame::new(nesting_level);
                frame.push(notification, min_hashable);
                self.notifies.push(frame);
            }
        }
        Ok(())
    }

    /// §4.5 Subcommit: fold the subtransaction's frame into its parent
    /// (re-running dedup for notifies, since conflicting LISTEN/UNLISTEN
    /// order matters and so actions are concatenated as-is) when the
    /// parent is adjacent, otherwise just relabel the frame one level down.
    pub fn sub_commit(&mut self, nesting_level: u32) {
        let min_hashable = self.min_hashable_notifies;

        if self
            .actions
            .last()
            .map_or(false, |f| f.nesting_level == nesting_level)
        {
            let mut frame = self.actions.pop().unwrap();
            let merge_into_parent = self
                .actions
                .last()
                .map_or(false, |p| p.nesting_level >= nesting_level.saturating_sub(1));
            if merge_into_parent {
                self.actions.last_mut().unwrap().actions.append(&mut frame.actions);
            } else {
                frame.nesting_level = nesting_level.saturating_sub(1);
                self.actions.push(frame);
            }
        }

        if self
            .notifies
            .last()
            .map_or(false, |f| f.nesting_level == nesting_level)
        {
            let frame = self.notifies.pop().unwrap();
            let merge_into_parent = self
                .notifies
                .last()
                .map_or(false, |p| p.nesting_level >= nesting_level.saturating_sub(1));
            if merge_into_parent {
                let parent = self.notifies.last_mut().unwrap();
                for n in frame.entries {
                    if !parent.contains(&n) {
                        parent.push(n, min_hashable);
                    }
                }
            } else {
                let mut frame = frame;
                frame.nesting_level = nesting_level.saturating_sub(1);
                self.notifies.push(frame);
            }
        }
    }

    /// §4.5 Subabort: discard every frame at or above `nesting_level`.
    pub fn sub_abort(&mut self, nesting_level: u32) {
        while self.actions.last().map_or(false, |f| f.nesting_level >= nesting_level) {
            self.actions.pop();
        }
        while self.notifies.last().map_or(false, |f| f.nesting_level >= nesting_level) {
            self.notifies.pop();
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.actions.is_empty() || !self.notifies.is_empty()
    }

    /// Whether any pending frame contains a `Listen` action — used by
    /// pre-commit to decide whether this backend needs a cursor slot at all
    /// (§4.4 `listen_precommit`, idempotent: a backend that already has one
    /// never claims a second).
    pub fn has_listen_action(&self) -> bool {
        self.actions
            .iter()
            .any(|f| f.actions.iter().any(|a| matches!(a, ListenAction::Listen(_))))
    }

    /// Flatten every frame's actions in stack order (bottom to top, i.e.
    /// oldest nesting first) and clear the stack. Called by top-level
    /// commit's post-commit replay (§4.5 step 3).
    pub fn take_actions(&mut self) -> Vec<ListenAction> {
        self.actions.drain(..).flat_map(|f| f.actions).collect()
    }

    /// Flatten every frame's notifies in stack order and clear the stack.
    /// Called by pre-commit (§4.2) just before `enqueue_pending`.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifies.drain(..).flat_map(|f| f.entries).collect()
    }

    pub fn clear(&mut self) {
        self.actions.clear();
        self.notifies.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NotifyConfig {
        NotifyConfig::default()
    }

    #[test]
    fn duplicate_notification_in_same_frame_is_dropped() {
        let mut txn = TxnState::new(16);
        txn.add_notification(0, "c".into(), "p".into(), &config()).unwrap();
        txn.add_notification(0, "c".into(), "p".into(), &config()).unwrap();
        assert_eq!(txn.take_notifications().len(), 1);
    }

    #[test]
    fn dedup_hash_kicks_in_past_threshold_and_still_catches_duplicates() {
        let mut txn = TxnState::new(4);
        for i in 0..4 {
            txn.add_notification(0, "c".into(), format!("p{i}"), &config()).unwrap();
        }
        // Now past the threshold; a repeat of an earlier payload must still
        // be recognized via the hash index, not just a fresh linear scan.
        txn.add_notification(0, "c".into(), "p2".into(), &config()).unwrap();
        assert_eq!(txn.take_notifications().len(), 4);
    }

    #[test]
    fn subcommit_merges_into_adjacent_parent_and_dedups_notifies() {
        let mut txn = TxnState::new(16);
        txn.add_notification(0, "c".into(), "a".into(), &config()).unwrap();
        txn.add_action(0, ListenAction::Listen("c".into()));

        txn.add_notification(1, "c".into(), "a".into(), &config()).unwrap(); // dup vs parent
        txn.add_notification(1, "c".into(), "b".into(), &config()).unwrap();
        txn.add_action(1, ListenAction::Unlisten("c".into()));

        txn.sub_commit(1);

        let notifies = txn.take_notifications();
        assert_eq!(notifies.len(), 2);
        assert!(notifies.iter().any(|n| n.payload == "a"));
        assert!(notifies.iter().any(|n| n.payload == "b"));

        let actions = txn.take_actions();
        assert_eq!(
            actions,
            vec![
                ListenAction::Listen("c".into()),
                ListenAction::Unlisten("c".into()),
            ]
        );
    }

    #[test]
    fn subcommit_relabels_when_parent_frame_is_not_adjacent() {
        let mut txn = TxnState::new(16);
        // No frame at nesting level 1 exists (e.g. an empty inner savepoint),
        // so the level-2 frame's parent in the stack is level 0: not
        // adjacent to level 2, so it is relabeled to level 1 instead of
        // merged.
        txn.add_notification(0, "c".into(), "a".into(), &config()).unwrap();
        txn.add_notification(2, "c".into(), "b".into(), &config()).unwrap();

        txn.sub_commit(2);

        let notifies = txn.take_notifications();
        assert_eq!(notifies.len(), 2);
    }

    #[test]
    fn subabort_discards_frames_at_or_above_its_level() {
        let mut txn = TxnState::new(16);
        txn.add_action(0, ListenAction::Listen("keep".into()));
        txn.add_action(1, ListenAction::Listen("drop-me".into()));
        txn.sub_abort(1);
        assert_eq!(txn.take_actions(), vec![ListenAction::Listen("keep".into())]);
    }

    #[test]
    fn has_pending_reflects_either_stack() {
        let mut txn = TxnState::new(16);
        assert!(!txn.has_pending());
        txn.add_action(0, ListenAction::UnlistenAll);
        assert!(txn.has_pending());
        txn.clear();
        assert!(!txn.has_pending());
    }

    #[test]
    fn rejects_channel_and_payload_over_the_configured_bounds() {
        let mut txn = TxnState::new(16);
        let mut conf = config();
        conf.max_channel_len = 4;
        assert!(txn
            .add_notification(0, "too-long".into(), "p".into(), &conf)
            .is_err());
        assert!(txn.add_notification(0, "".into(), "p".into(), &conf).is_err());
    }
}
