//! End-to-end scenarios driving multiple [`BackendHandle`]s against one
//! shared [`Core`], using the in-memory paged log and a fake transaction
//! oracle that lets a test decide exactly when a transaction's xid is
//! "committed" instead of racing real wall-clock transactions.

use std::sync::Arc;

use notify_core::config::NotifyConfig;
use notify_core::metrics::DIRECT_ADVANCES;
use notify_core::oracle::fake::FakeOracle;
use notify_core::pagedlog::InMemoryPagedLog;
use notify_core::sink::{DeliveredNotification, RecordingSink};
use notify_core::{BackendHandle, BackendRole, Core, NotifyError};

fn test_core(page_size: usize, max_channel_len: usize, max_queue_pages: u64) -> Arc<Core<InMemoryPagedLog, FakeOracle>> {
    let mut conf = NotifyConfig::default();
    conf.page_size = page_size;
    conf.max_channel_len = max_channel_len;
    conf.max_queue_pages = max_queue_pages;
    Core::new(conf, InMemoryPagedLog::new(page_size), FakeOracle::new())
}

fn default_core() -> Arc<Core<InMemoryPagedLog, FakeOracle>> {
    test_core(4096, 32, 1_024)
}

#[tokio::test]
async fn s1_ordered_delivery_across_two_committing_transactions() {
    let core = default_core();

    let mut a = BackendHandle::new(core.clone(), 10, 5, BackendRole::Normal);
    a.listen(0, "orders".into()).unwrap();
    a.pre_commit().await.unwrap();
    a.commit().await;

    let mut b = BackendHandle::new(core.clone(), 20, 5, BackendRole::Normal);
    let xid_b = core.oracle().begin();
    b.notify(0, "orders".into(), "r1".into()).unwrap();
    b.notify(0, "orders".into(), "r2".into()).unwrap();
    b.pre_commit().await.unwrap();
    core.oracle().commit(xid_b);
    b.commit().await;

    let mut c = BackendHandle::new(core.clone(), 30, 5, BackendRole::Normal);
    let xid_c = core.oracle().begin();
    c.notify(0, "orders".into(), "s1".into()).unwrap();
    c.pre_commit().await.unwrap();
    core.oracle().commit(xid_c);
    c.commit().await;

    let mut sink = RecordingSink::default();
    a.wait_and_drain(&mut sink).await.unwrap();

    assert_eq!(
        sink.received,
        vec![
            DeliveredNotification {
                pid: 20,
                channel: "orders".into(),
                payload: "r1".into(),
            },
            DeliveredNotification {
                pid: 20,
                channel: "orders".into(),
                payload: "r2".into(),
            },
            DeliveredNotification {
                pid: 30,
                channel: "orders".into(),
                payload: "s1".into(),
            },
        ]
    );
}

#[tokio::test]
async fn s2_duplicate_notify_in_one_transaction_is_collapsed() {
    let core = default_core();

    let mut listener = BackendHandle::new(core.clone(), 1, 5, BackendRole::Normal);
    listener.listen(0, "t".into()).unwrap();
    listener.pre_commit().await.unwrap();
    listener.commit().await;

    let mut writer = BackendHandle::new(core.clone(), 2, 5, BackendRole::Normal);
    let xid = core.oracle().begin();
    writer.notify(0, "t".into(), "x".into()).unwrap();
    writer.notify(0, "t".into(), "x".into()).unwrap();
    writer.notify(0, "t".into(), "y".into()).unwrap();
    writer.pre_commit().await.unwrap();
    core.oracle().commit(xid);
    writer.commit().await;

    let mut sink = RecordingSink::default();
    listener.wait_and_drain(&mut sink).await.unwrap();

    assert_eq!(
        sink.received.iter().map(|n| n.payload.as_str()).collect::<Vec<_>>(),
        vec!["x", "y"]
    );
}

#[tokio::test]
async fn s3_self_notify_is_delivered_to_the_same_backend() {
    let core = default_core();
    let mut backend = BackendHandle::new(core.clone(), 77, 5, BackendRole::Normal);

    backend.listen(0, "s".into()).unwrap();
    backend.pre_commit().await.unwrap();
    backend.commit().await;

    let xid = core.oracle().begin();
    backend.notify(0, "s".into(), "hello".into()).unwrap();
    backend.pre_commit().await.unwrap();
    core.oracle().commit(xid);
    backend.commit().await;

    let mut sink = RecordingSink::default();
    backend.wait_and_drain(&mut sink).await.unwrap();
    assert_eq!(
        sink.received,
        vec![DeliveredNotification {
            pid: 77,
            channel: "s".into(),
            payload: "hello".into(),
        }]
    );
}

#[tokio::test]
async fn s4_cross_database_notify_is_invisible_to_the_listener() {
    let core = default_core();

    let mut a = BackendHandle::new(core.clone(), 1, 1 /* db1 */, BackendRole::Normal);
    a.listen(0, "x".into()).unwrap();
    a.pre_commit().await.unwrap();
    a.commit().await;

    let mut b = BackendHandle::new(core.clone(), 2, 2 /* db2 */, BackendRole::Normal);
    let xid = core.oracle().begin();
    b.notify(0, "x".into(), "p".into()).unwrap();
    b.pre_commit().await.unwrap();
    core.oracle().commit(xid);
    b.commit().await;

    // The cross-db writer either direct-advances A's cursor (A never cared
    // about db2) or leaves it behind; either way nothing is ever delivered.
    let mut sink = RecordingSink::default();
    let delivered = a.drain_now(&mut sink).await.unwrap();
    assert_eq!(delivered, 0);
    assert!(sink.received.is_empty());
}

#[tokio::test]
async fn s5_queue_full_at_pre_commit_rolls_back_cleanly() {
    // page_size=128, max_queue_pages=2: three same-sized entries each
    // exactly tile one page, so the third trips QueueFull before writing.
    let core = test_core(128, 16, 2);

    let mut stuck_listener = BackendHandle::new(core.clone(), 1, 5, BackendRole::Normal);
    stuck_listener.listen(0, "x".into()).unwrap();
    stuck_listener.pre_commit().await.unwrap();
    stuck_listener.commit().await; // never drains again; pins the tail at page 0

    let mut writer = BackendHandle::new(core.clone(), 2, 5, BackendRole::Normal);
    let xid = core.oracle().begin();
    for i in 0..3u8 {
        let payload = format!("{}{}", "a".repeat(104), i);
        writer.notify(0, "x".into(), payload).unwrap();
    }
    let result = writer.pre_commit().await;
    assert!(matches!(result, Err(NotifyError::QueueFull)));

    writer.abort().await;
    core.oracle().abort(xid);

    assert!(writer.listening_channels().next().is_none());
    assert!(writer.at_prepare().is_ok());
}

#[tokio::test]
async fn s6_an_uninvolved_listener_is_direct_advanced_not_signaled() {
    let core = default_core();

    let mut l1 = BackendHandle::new(core.clone(), 1, 5, BackendRole::Normal);
    l1.listen(0, "a".into()).unwrap();
    l1.pre_commit().await.unwrap();
    l1.commit().await;

    let mut l2 = BackendHandle::new(core.clone(), 2, 5, BackendRole::Normal);
    l2.listen(0, "b".into()).unwrap();
    l2.pre_commit().await.unwrap();
    l2.commit().await;

    let before = DIRECT_ADVANCES.get();

    let mut writer = BackendHandle::new(core.clone(), 3, 5, BackendRole::Normal);
    let xid = core.oracle().begin();
    writer.notify(0, "a".into(), "hi".into()).unwrap();
    writer.pre_commit().await.unwrap();
    core.oracle().commit(xid);
    writer.commit().await;

    assert!(DIRECT_ADVANCES.get() >= before + 1);

    let mut sink = RecordingSink::default();
    l1.wait_and_drain(&mut sink).await.unwrap();
    assert_eq!(sink.received[0].payload, "hi");

    // L2 was never signaled; its cursor already sits at head, so a poll
    // finds nothing to do.
    let mut l2_sink = RecordingSink::default();
    assert_eq!(l2.drain_now(&mut l2_sink).await.unwrap(), 0);
}

#[tokio::test]
async fn many_writers_with_randomized_payloads_still_deliver_in_commit_order() {
    use rand::Rng;

    let core = default_core();
    let mut listener = BackendHandle::new(core.clone(), 1, 5, BackendRole::Normal);
    listener.listen(0, "fuzz".into()).unwrap();
    listener.pre_commit().await.unwrap();
    listener.commit().await;

    let mut rng = rand::thread_rng();
    let mut expected = Vec::new();
    for writer_idx in 0..8 {
        let pid = 100 + writer_idx;
        let mut writer = BackendHandle::new(core.clone(), pid, 5, BackendRole::Normal);
        let xid = core.oracle().begin();
        let notify_count = rng.gen_range(1..=4);
        for n in 0..notify_count {
            let payload: String = (0..rng.gen_range(1..=20))
                .map(|_| rng.gen_range(b'a'..=b'z') as char)
                .collect();
            writer.notify(0, "fuzz".into(), format!("{n}:{payload}")).unwrap();
            expected.push((pid, format!("{n}:{payload}")));
        }
        writer.pre_commit().await.unwrap();
        core.oracle().commit(xid);
        writer.commit().await;
    }

    let mut sink = RecordingSink::default();
    listener.wait_and_drain(&mut sink).await.unwrap();

    let actual: Vec<(i32, String)> = sink.received.into_iter().map(|n| (n.pid, n.payload)).collect();
    assert_eq!(actual, expected);
}

#[tokio::test]
async fn listen_then_unlisten_in_one_transaction_is_a_net_no_op() {
    let core = default_core();
    let mut backend = BackendHandle::new(core.clone(), 1, 5, BackendRole::Normal);

    backend.listen(0, "c".into()).unwrap();
    backend.unlisten(0, "c".into()).unwrap();
    backend.pre_commit().await.unwrap();
    backend.commit().await;

    assert!(backend.listening_channels().next().is_none());
}
