// ============================================================================
// Version - Optimistic Concurrency Token
// ============================================================================
//
// One Version lives inside one aggregate instance. It remembers the sequence
// read from storage and whether the in-memory state has diverged from it.
//
//   new()            -> current 0, modified, loaded -1 (never stored)
//   restore(n)       -> current n, unmodified, loaded n
//   record_modification() on restore(n) -> current n+1, loaded n
//
// ============================================================================

/// Sentinel returned by `loaded()` for an aggregate that was never persisted.
pub const NEVER_STORED: i64 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    seq: i64,
    modified: bool,
}

impl Version {
    /// Version of a brand new aggregate. It counts as modified so that the
    /// first save inserts it.
    pub fn new() -> Self {
        Self {
            seq: 0,
            modified: true,
        }
    }

    /// Version of an aggregate read back from storage at `stored`.
    pub fn restore(stored: i64) -> Self {
        Self {
            seq: stored,
            modified: false,
        }
    }

    /// Records that the aggregate state changed. Only the first call per
    /// loaded instance bumps the sequence.
    pub fn record_modification(&mut self) {
        if self.modified {
            return;
        }

        self.seq += 1;
        self.modified = true;
    }

    /// Sequence this instance claims on its next write.
    pub fn current(&self) -> i64 {
        self.seq
    }

    pub fn modified(&self) -> bool {
        self.modified
    }

    pub fn previous(&self) -> i64 {
        if self.seq == 0 {
            return 0;
        }

        self.seq - 1
    }

    /// Sequence this instance expects to find in storage.
    pub fn loaded(&self) -> i64 {
        if self.modified {
            return self.seq - 1;
        }

        self.seq
    }

    pub fn is_new(&self) -> bool {
        self.loaded() == NEVER_STORED
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new()
    }
}
