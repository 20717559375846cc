//! Process-wide notify-queue metrics.

use once_cell::sync::Lazy;
use prometheus::{register_gauge, register_int_counter, Gauge, IntCounter};

pub static ENTRIES_WRITTEN: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "notify_entries_written_total",
        "Notification queue entries written by pre-commit writers"
    )
    .expect("failed to register notify_entries_written_total")
});

pub static ENTRIES_DELIVERED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "notify_entries_delivered_total",
        "Notifications delivered to a listener's frontend"
    )
    .expect("failed to register notify_entries_delivered_total")
});

pub static SIGNALS_SENT: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "notify_signals_sent_total",
        "Wakeups sent to listener backends"
    )
    .expect("failed to register notify_signals_sent_total")
});

pub static DIRECT_ADVANCES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "notify_direct_advances_total",
        "Listener cursors advanced in place instead of being woken"
    )
    .expect("failed to register notify_direct_advances_total")
});

pub static QUEUE_FULL_WARNINGS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "notify_queue_full_warnings_total",
        "Times the queue crossed 50% fill and a warning was logged"
    )
    .expect("failed to register notify_queue_full_warnings_total")
});

pub static QUEUE_USAGE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "notify_queue_usage_ratio",
        "(head.page - tail.page) / max_queue_pages, sampled after an opportunistic tail advance"
    )
    .expect("failed to register notify_queue_usage_ratio")
});
