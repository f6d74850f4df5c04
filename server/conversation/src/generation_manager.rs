//! Registry of cancellable in-flight jobs: response generations and TTS
//! synthesis, each keyed by the id of the thing they're producing.
//!
//! Cancellation is a `watch::Sender<bool>` per job; the job task holds the
//! matching `Receiver` and treats `*rx.borrow() == true` (observed at its
//! next suspension point) as "stop now". Sending under a held lock is safe
//! because `watch::Sender::send` never blocks.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::debug;

/// Handle registered for one cancellable job. Cloning the receiver out is
/// how a spawned task observes cancellation.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

struct Entry {
    tx: watch::Sender<bool>,
    started_at: Instant,
}

#[derive(Default)]
struct Jobs {
    entries: HashMap<String, Entry>,
}

impl Jobs {
    fn register(&mut self, id: String) -> (CancelHandle, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        self.entries.insert(id, Entry { tx: tx.clone(), started_at: Instant::now() });
        (CancelHandle { tx }, rx)
    }

    fn unregister(&mut self, id: &str) {
        self.entries.remove(id);
    }

    fn cancel(&mut self, id: &str) -> bool {
        if let Some(entry) = self.entries.get(id) {
            let _ = entry.tx.send(true);
            true
        } else {
            false
        }
    }

    fn cancel_all(&mut self) -> usize {
        let n = self.entries.len();
        for entry in self.entries.values() {
            let _ = entry.tx.send(true);
        }
        self.entries.clear();
        n
    }

    fn cleanup_stale(&mut self, max_age: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.started_at) > max_age)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &stale {
            if let Some(entry) = self.entries.remove(id) {
                let _ = entry.tx.send(true);
            }
        }
        stale.len()
    }
}

/// Independent registries for generations and TTS jobs, each guarded by its
/// own lock so cancelling one class never blocks the other.
#[derive(Default)]
pub struct GenerationManager {
    generations: Mutex<Jobs>,
    tts: Mutex<Jobs>,
}

impl GenerationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_generation(&self, id: impl Into<String>) -> (CancelHandle, watch::Receiver<bool>) {
        self.generations.lock().register(id.into())
    }

    pub fn unregister_generation(&self, id: &str) {
        self.generations.lock().unregister(id);
    }

    /// Empty id cancels every registered generation.
    pub fn cancel_generation(&self, id: &str) -> bool {
        if id.is_empty() {
            let n = self.generations.lock().cancel_all();
            n > 0
        } else {
            self.generations.lock().cancel(id)
        }
    }

    pub fn cleanup_stale_generations(&self, max_age: Duration) -> usize {
        self.generations.lock().cleanup_stale(max_age)
    }

    pub fn register_tts(&self, id: impl Into<String>) -> (CancelHandle, watch::Receiver<bool>) {
        self.tts.lock().register(id.into())
    }

    pub fn unregister_tts(&self, id: &str) {
        self.tts.lock().unregister(id);
    }

    pub fn cancel_tts(&self, id: &str) -> bool {
        if id.is_empty() {
            let n = self.tts.lock().cancel_all();
            n > 0
        } else {
            self.tts.lock().cancel(id)
        }
    }

    /// Barge-in: cancel every active generation and TTS job.
    pub fn cancel_all(&self) {
        let generations = self.generations.lock().cancel_all();
        let tts = self.tts.lock().cancel_all();
        debug!(generations, tts, "cancel_all (barge-in)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_by_id_reports_cancelled_only_to_that_job() {
        let mgr = GenerationManager::new();
        let (_h1, rx1) = mgr.register_generation("a");
        let (_h2, rx2) = mgr.register_generation("b");

        assert!(mgr.cancel_generation("a"));
        assert!(*rx1.borrow());
        assert!(!*rx2.borrow());
    }

    #[test]
    fn empty_id_cancels_all_and_empties_registry() {
        let mgr = GenerationManager::new();
        let (_h1, rx1) = mgr.register_generation("a");
        let (_h2, rx2) = mgr.register_generation("b");

        assert!(mgr.cancel_generation(""));
        assert!(*rx1.borrow());
        assert!(*rx2.borrow());
        // registry is empty: cancelling again reports nothing to cancel
        assert!(!mgr.cancel_generation("a"));
    }

    #[test]
    fn unregister_removes_without_cancelling() {
        let mgr = GenerationManager::new();
        let (_h, rx) = mgr.register_generation("a");
        mgr.unregister_generation("a");
        assert!(!*rx.borrow());
        assert!(!mgr.cancel_generation("a"));
    }

    #[test]
    fn cleanup_stale_cancels_only_old_jobs() {
        let mgr = GenerationManager::new();
        let (_h1, rx1) = mgr.register_generation("old");
        std::thread::sleep(Duration::from_millis(20));
        let (_h2, rx2) = mgr.register_generation("new");

        let cancelled = mgr.cleanup_stale_generations(Duration::from_millis(10));
        assert_eq!(cancelled, 1);
        assert!(*rx1.borrow());
        assert!(!*rx2.borrow());
    }

    #[test]
    fn generations_and_tts_are_independent() {
        let mgr = GenerationManager::new();
        let (_hg, rxg) = mgr.register_generation("x");
        let (_ht, rxt) = mgr.register_tts("x");

        mgr.cancel_tts("x");
        assert!(!*rxg.borrow());
        assert!(*rxt.borrow());
    }

    #[test]
    fn cancel_all_hits_both_registries() {
        let mgr = GenerationManager::new();
        let (_hg, rxg) = mgr.register_generation("g");
        let (_ht, rxt) = mgr.register_tts("t");

        mgr.cancel_all();
        assert!(*rxg.borrow());
        assert!(*rxt.borrow());
    }
}
