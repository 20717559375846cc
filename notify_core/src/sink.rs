//! The frontend wire protocol (§1, §6) is out of scope; this module only
//! defines the narrow capability the reader path (§4.3) needs to hand a
//! delivered notification off to it.

use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredNotification {
    pub pid: i32,
    pub channel: String,
    pub payload: String,
}

/// Consumed from the frontend wire-protocol collaborator (§6).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn deliver(&mut self, notification: DeliveredNotification) -> anyhow::Result<()>;
}

/// An in-memory sink for tests: just records what would have been sent to
/// a client.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub received: Vec<DeliveredNotification>,
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn deliver(&mut self, notification: DeliveredNotification) -> anyhow::Result<()> {
        self.received.push(notification);
        Ok(())
    }
}

/// A sink that discards everything, used where a drain is only run to
/// advance a cursor past already-committed stale entries (§4.4
/// `listen_precommit`) and nothing should actually be delivered yet.
#[derive(Debug, Default)]
pub struct NullSink;

#[async_trait]
impl NotificationSink for NullSink {
    async fn deliver(&mut self, _notification: DeliveredNotification) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A sink whose `deliver` always fails, for exercising the "cursor still
/// advances even though delivery errored" guarantee (§4.3, §7).
#[derive(Debug, Default)]
pub struct FailingSink;

#[async_trait]
impl NotificationSink for FailingSink {
    async fn deliver(&mut self, _notification: DeliveredNotification) -> anyhow::Result<()> {
        anyhow::bail!("frontend transport is gone")
    }
}
