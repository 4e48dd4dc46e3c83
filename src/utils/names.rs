//! Unique name generation for synthesized identifiers.
//!
//! Reduction axes and anonymous tensors need names that never collide within
//! a process run. A `NameGenerator` is passed explicitly to the constructors
//! that synthesize names; `global()` is the process-wide default instance.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Thread-safe generator of `prefix_N` names.
#[derive(Debug, Default)]
pub struct NameGenerator {
    counter: AtomicUsize,
}

impl NameGenerator {
    pub const fn new() -> Self {
        Self { counter: AtomicUsize::new(0) }
    }

    /// Produce a fresh name with the given prefix.
    pub fn fresh(&self, prefix: &str) -> String {
        let id = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}_{}", prefix, id)
    }

    /// Number of names handed out so far.
    pub fn issued(&self) -> usize {
        self.counter.load(Ordering::Relaxed)
    }
}

static GLOBAL_NAMES: NameGenerator = NameGenerator::new();

/// The process-wide name generator.
pub fn global() -> &'static NameGenerator {
    &GLOBAL_NAMES
}
