//! Process-wide queue counters, read by the server before a scrape.

use std::sync::atomic::{AtomicU64, Ordering};

/// Where a queued task is in its life, plus retry attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Enqueued,
    Started,
    Completed,
    Failed,
    Aborted,
    Retried,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Enqueued,
        Stage::Started,
        Stage::Completed,
        Stage::Failed,
        Stage::Aborted,
        Stage::Retried,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Stage::Enqueued => "enqueued",
            Stage::Started => "started",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
            Stage::Aborted => "aborted",
            Stage::Retried => "retries",
        }
    }
}

static COUNTS: [AtomicU64; 6] = [
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
    AtomicU64::new(0),
];

pub fn record(stage: Stage) {
    COUNTS[stage as usize].fetch_add(1, Ordering::Relaxed);
}

pub fn count(stage: Stage) -> u64 {
    COUNTS[stage as usize].load(Ordering::Relaxed)
}

/// Every stage with its current count, in [`Stage::ALL`] order.
pub fn snapshot() -> Vec<(Stage, u64)> {
    Stage::ALL.iter().map(|&stage| (stage, count(stage))).collect()
}

/// Tasks pushed but not yet settled in any way.
pub fn in_flight() -> u64 {
    let settled = count(Stage::Completed) + count(Stage::Failed) + count(Stage::Aborted);
    count(Stage::Enqueued).saturating_sub(settled)
}
