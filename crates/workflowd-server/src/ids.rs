// ABOUTME: Process-unique identifier generation for connections and tasks.
// ABOUTME: A start-time seed plus an atomic counter, so ids never repeat within a process.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Generates `<prefix>-<seed>-<n>` ids.
#[derive(Debug)]
pub struct IdGenerator {
    prefix: &'static str,
    seed: u128,
    next: AtomicU64,
}

impl IdGenerator {
    pub fn new(prefix: &'static str) -> Self {
        let seed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        Self {
            prefix,
            seed,
            next: AtomicU64::new(0),
        }
    }

    pub fn next_id(&self) -> String {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", self.prefix, self.seed, n)
    }
}
