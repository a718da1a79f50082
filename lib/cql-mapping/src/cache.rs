use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

struct Entry<P> {
    prepared: P,
    last_used: Instant,
}

/// Prepared statements keyed by CQL text, bounded by size and idle time.
///
/// A miss only costs a re-prepare; eviction never affects results.
pub struct StatementCache<P> {
    capacity: usize,
    idle: Duration,
    entries: Mutex<HashMap<String, Entry<P>>>,
}

impl<P: Clone> StatementCache<P> {
    /// `capacity` of zero disables caching.
    pub fn new(capacity: usize, idle: Duration) -> Self {
        Self {
            capacity,
            idle,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, cql: &str) -> Option<P> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        let fresh = entries
            .get(cql)
            .map(|entry| now.duration_since(entry.last_used) <= self.idle)?;
        if !fresh {
            entries.remove(cql);
            return None;
        }

        let entry = entries.get_mut(cql)?;
        entry.last_used = now;
        Some(entry.prepared.clone())
    }

    pub fn insert(&self, cql: &str, prepared: P) {
        if self.capacity == 0 {
            return;
        }

        let mut entries = self.entries.lock();
        let now = Instant::now();
        entries.retain(|_, entry| now.duration_since(entry.last_used) <= self.idle);
        if entries.len() >= self.capacity && !entries.contains_key(cql) {
            // least recently used goes first
            let oldest = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            if let Some(key) = oldest {
                entries.remove(&key);
            }
        }
        entries.insert(
            cql.to_string(),
            Entry {
                prepared,
                last_used: now,
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
