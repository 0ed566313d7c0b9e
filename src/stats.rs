use std::sync::atomic::{AtomicU64, Ordering};

/// Cluster-wide counters shared by every peer.
///
/// Injected into each peer at construction; peers never reach for ambient
/// global state. The counters are atomic so a snapshot can be taken from
/// outside the event loop at any time.
#[derive(Debug, Default)]
pub struct ClusterStats {
    messages: AtomicU64,
    jobs_total: AtomicU64,
    jobs_finished: AtomicU64,
    lost_notifications: AtomicU64,
}

impl ClusterStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_jobs(&self, n: u64) {
        self.jobs_total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_job_finished(&self) {
        self.jobs_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lost_notification(&self) {
        self.lost_notifications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn messages(&self) -> u64 {
        self.messages.load(Ordering::Relaxed)
    }

    pub fn jobs_total(&self) -> u64 {
        self.jobs_total.load(Ordering::Relaxed)
    }

    pub fn jobs_finished(&self) -> u64 {
        self.jobs_finished.load(Ordering::Relaxed)
    }

    pub fn lost_notifications(&self) -> u64 {
        self.lost_notifications.load(Ordering::Relaxed)
    }

    /// True once every job handed to the cluster has completed.
    pub fn all_finished(&self) -> bool {
        let total = self.jobs_total();
        total > 0 && self.jobs_finished() == total
    }
}
