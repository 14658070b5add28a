use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared run/cancel switch. Crawls check it cooperatively; it never interrupts a fetch in flight.
#[derive(Debug, Clone, Default)]
pub struct RunFlag(Arc<AtomicBool>);

impl RunFlag {
    /// Idle flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Flag that is already running, for crawls driven outside an orchestrator.
    pub fn running() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    /// idle -> running; false if it was already running.
    pub fn try_start(&self) -> bool {
        self.0.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    /// running -> idle; false if it was already idle.
    pub fn try_stop(&self) -> bool {
        self.0.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire).is_ok()
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// URLs already claimed by one crawl run.
#[derive(Debug, Clone, Default)]
pub struct VisitedSet(Arc<Mutex<HashSet<String>>>);

impl VisitedSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims `url`; true only for the first caller.
    pub fn insert(&self, url: &str) -> bool {
        let mut urls = self.0.lock();
        if urls.contains(url) {
            return false;
        }
        urls.insert(url.to_string())
    }

    pub fn contains(&self, url: &str) -> bool {
        self.0.lock().contains(url)
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}
