//! Per-socket 1-in-N sampling
//!
//! The generated probe keeps one counter per socket pointer in a bounded
//! hash table and only lets an event through once the counter reaches the
//! threshold:
//!
//! ```text
//! lookup_or_try_init(sk, 0) fails  -> increment(sk), drop
//! count < N                        -> increment(sk), drop
//! otherwise                        -> delete(sk), submit
//! ```
//!
//! A failed lookup drops the event rather than letting it through. The
//! [`SampleTable`] trait describes the table primitives the generated code
//! relies on and [`SampleGate`] runs the same decision sequence host-side.

use sockprobe_common::{Family, SAMPLE_TABLE_CAPACITY};
use std::{collections::HashMap, sync::Mutex};

use crate::{symbols::Symbols, writer::SourceWriter};

/// Emit the sampling sequence for `family`, keyed by the `sk` binding
pub fn emit(w: &mut SourceWriter, symbols: &Symbols, family: Family, threshold: u64) {
    let table = symbols.sample_table(family);

    w.line("u64 *count;");
    w.line("u64 zero = 0;");
    w.line(format!("count = {table}.lookup_or_try_init(&sk, &zero);"));
    w.open("if (!count) {");
    w.line(format!("{table}.increment(sk);"));
    w.line("return 0;");
    w.close("}");
    w.open(format!("if (*count < {threshold}) {{"));
    w.line(format!("{table}.increment(sk);"));
    w.line("return 0;");
    w.close("}");
    w.line(format!("{table}.delete(&sk);"));
}

/// Socket-keyed counter table primitives
///
/// Implementations must make each operation atomic with respect to
/// concurrent callers on other keys and on the same key.
pub trait SampleTable {
    /// Current counter for `key`, inserting `init` if absent. `None` when
    /// the entry could not be created.
    fn lookup_or_try_init(&self, key: u64, init: u64) -> Option<u64>;

    /// Add one to the counter for `key`, best effort
    fn increment(&self, key: u64);

    /// Remove the counter for `key`
    fn delete(&self, key: u64);
}

/// In-memory [`SampleTable`] with the same capacity bound as the kernel map
#[derive(Debug)]
pub struct BoundedSampleTable {
    capacity: usize,
    counters: Mutex<HashMap<u64, u64>>,
}

impl BoundedSampleTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            counters: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, u64>> {
        // counters stay consistent even if a holder panicked
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for BoundedSampleTable {
    fn default() -> Self {
        Self::new(SAMPLE_TABLE_CAPACITY as usize)
    }
}

impl SampleTable for BoundedSampleTable {
    fn lookup_or_try_init(&self, key: u64, init: u64) -> Option<u64> {
        let mut counters = self.lock();
        if let Some(count) = counters.get(&key) {
            return Some(*count);
        }
        if counters.len() >= self.capacity {
            return None;
        }
        counters.insert(key, init);
        Some(init)
    }

    fn increment(&self, key: u64) {
        let mut counters = self.lock();
        if let Some(count) = counters.get_mut(&key) {
            *count += 1;
        } else if counters.len() < self.capacity {
            counters.insert(key, 1);
        }
    }

    fn delete(&self, key: u64) {
        self.lock().remove(&key);
    }
}

/// Host-side run of the generated sampling decision
#[derive(Debug)]
pub struct SampleGate<T> {
    table: T,
    threshold: u64,
}

impl<T: SampleTable> SampleGate<T> {
    pub fn new(table: T, threshold: u64) -> Self {
        Self { table, threshold }
    }

    /// Whether the event for socket `key` is submitted
    pub fn admit(&self, key: u64) -> bool {
        if self.threshold == 0 {
            return true;
        }

        let count = match self.table.lookup_or_try_init(key, 0) {
            Some(count) => count,
            None => {
                self.table.increment(key);
                return false;
            }
        };

        if count < self.threshold {
            self.table.increment(key);
            return false;
        }

        self.table.delete(key);
        true
    }

    pub fn table(&self) -> &T {
        &self.table
    }
}
