//! Named monotonic counters for cache and pipeline observability.

use std::collections::HashMap;
use std::sync::Mutex;

use once_cell::sync::Lazy;

static COUNTERS: Lazy<Mutex<HashMap<&'static str, u64>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Records one occurrence of a cache-related event (hit, miss, store, evict).
pub fn cache_event(name: &'static str) {
    let mut counters = COUNTERS.lock().expect("profiling counters poisoned");
    *counters.entry(name).or_insert(0) += 1;
}

/// Reads the current value of a counter; zero if it never fired.
pub fn counter(name: &str) -> u64 {
    let counters = COUNTERS.lock().expect("profiling counters poisoned");
    counters.get(name).copied().unwrap_or(0)
}

/// Clears all counters. Intended for tests and explicit resets.
pub fn reset() {
    let mut counters = COUNTERS.lock().expect("profiling counters poisoned");
    counters.clear();
}
