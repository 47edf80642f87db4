use std::{
    sync::Arc,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    time::Instant,
};

use once_cell::sync::Lazy;

pub static METRICS: Lazy<Arc<Metrics>> = Lazy::new(|| Arc::new(Metrics::new()));

#[derive(Debug)]
pub struct Metrics {
    start: Instant,
    ready: AtomicBool,
    sessions_active: AtomicUsize,
    sessions_saved: AtomicU64,
    session_save_failures: AtomicU64,
    storage_read_failures: AtomicU64,
    storage_write_failures: AtomicU64,
    sessions_recovered: AtomicU64,
    recovery_failures: AtomicU64,
    sessions_swept: AtomicU64,
}

impl Metrics {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            ready: AtomicBool::new(false),
            sessions_active: AtomicUsize::new(0),
            sessions_saved: AtomicU64::new(0),
            session_save_failures: AtomicU64::new(0),
            storage_read_failures: AtomicU64::new(0),
            storage_write_failures: AtomicU64::new(0),
            sessions_recovered: AtomicU64::new(0),
            recovery_failures: AtomicU64::new(0),
            sessions_swept: AtomicU64::new(0),
        }
    }

    pub fn set_ready(&self, v: bool) {
        self.ready.store(v, Ordering::Relaxed);
    }
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn set_sessions_active(&self, n: usize) {
        self.sessions_active.store(n, Ordering::Relaxed);
    }

    pub fn session_saved(&self) {
        self.sessions_saved.fetch_add(1, Ordering::Relaxed);
    }
    pub fn session_save_failed(&self) {
        self.session_save_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn storage_read_failed(&self) {
        self.storage_read_failures.fetch_add(1, Ordering::Relaxed);
    }
    pub fn storage_write_failed(&self) {
        self.storage_write_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn recovered(&self) {
        self.sessions_recovered.fetch_add(1, Ordering::Relaxed);
    }
    pub fn recovery_failed(&self) {
        self.recovery_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn swept(&self, n: usize) {
        self.sessions_swept.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.start.elapsed().as_secs(),
            ready: self.is_ready(),
            sessions_active: self.sessions_active.load(Ordering::Relaxed),
            sessions_saved: self.sessions_saved.load(Ordering::Relaxed),
            session_save_failures: self.session_save_failures.load(Ordering::Relaxed),
            storage_read_failures: self.storage_read_failures.load(Ordering::Relaxed),
            storage_write_failures: self.storage_write_failures.load(Ordering::Relaxed),
            sessions_recovered: self.sessions_recovered.load(Ordering::Relaxed),
            recovery_failures: self.recovery_failures.load(Ordering::Relaxed),
            sessions_swept: self.sessions_swept.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub ready: bool,
    pub sessions_active: usize,
    pub sessions_saved: u64,
    pub session_save_failures: u64,
    pub storage_read_failures: u64,
    pub storage_write_failures: u64,
    pub sessions_recovered: u64,
    pub recovery_failures: u64,
    pub sessions_swept: u64,
}
