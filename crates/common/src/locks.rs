//! Keyed mutual exclusion.
//!
//! Cutlog never takes a global lock. Critical sections are scoped to one
//! key (a project id, an asset id, an export id) so work on unrelated keys
//! proceeds in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// A set of mutexes created on demand, one per key.
#[derive(Debug, Default)]
pub struct KeyedLocks {
    slots: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl KeyedLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the lock for `key`.
    ///
    /// Calls for the same key are serialized; calls for different keys
    /// never wait on each other beyond the brief slot lookup.
    pub fn with<R>(&self, key: &str, f: impl FnOnce() -> R) -> R {
        let slot = self.slot(key);
        let result = {
            let _guard = slot.lock().unwrap_or_else(|e| e.into_inner());
            f()
        };
        self.release(key, slot);
        result
    }

    /// Number of keys with a live slot.
    pub fn active_keys(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn slot(&self, key: &str) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release(&self, key: &str, slot: Arc<Mutex<()>>) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        // Map entry plus our handle: nobody else is waiting.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn test_same_key_is_serialized() {
        let locks = Arc::new(KeyedLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    locks.with("project-a", || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(std::time::Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_slots_are_released_after_use() {
        let locks = KeyedLocks::new();
        let value = locks.with("a", || 7);
        assert_eq!(value, 7);
        assert_eq!(locks.active_keys(), 0);
    }
}
