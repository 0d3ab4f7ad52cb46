//! Change Coalescer - Pending-changes buffer with a shared debounce window
//!
//! Buffers field writes and releases them as one batch once the window has
//! been quiet for its full length.
//!
//! # Pattern
//!
//! - Every write overwrites the pending value for its field (last writer wins)
//! - Every write re-arms ONE deadline shared by all fields
//! - The event loop calls [`ChangeCoalescer::tick`]; once the deadline has
//!   passed, the whole buffer merges into the target state in one go
//!
//! ```text
//! Clean ──record──▶ Dirty{deadline} ──record──▶ Dirty{deadline'} ──tick──▶ Clean
//! ```
//!
//! The coalescer never reads time itself. Callers pass `now`, so the window
//! is deterministic under test.

use std::time::{Duration, Instant};

use crate::fields::{Field, FieldSet, GlobalState};

/// Default quiet period before a flush.
pub const DEFAULT_WINDOW: Duration = Duration::from_millis(100);

// =============================================================================
// STATE
// =============================================================================

/// Debounce state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoalescerState {
    /// Nothing pending.
    Clean,
    /// One or more fields pending, timer armed.
    Dirty {
        /// When the first write of this batch landed.
        first_write: Instant,
        /// When the batch becomes due.
        deadline: Instant,
    },
}

/// What a flush applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushReport {
    /// Fields merged into the target.
    pub fields: FieldSet,
    /// Writes recorded for this batch, including overwritten ones.
    pub writes: u32,
    /// Time from the first write to the flush.
    pub held_for: Duration,
    /// True if the batch was released by `max_delay` rather than by quiet.
    pub forced_by_deadline: bool,
}

// =============================================================================
// COALESCER
// =============================================================================

/// Owned pending-changes buffer. One per store.
#[derive(Debug, Clone)]
pub struct ChangeCoalescer {
    window: Duration,
    max_delay: Option<Duration>,
    /// Values for dirty fields. Slots outside `dirty` are meaningless.
    pending: GlobalState,
    dirty: FieldSet,
    writes: u32,
    state: CoalescerState,
}

impl ChangeCoalescer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            max_delay: None,
            pending: GlobalState::default(),
            dirty: FieldSet::empty(),
            writes: 0,
            state: CoalescerState::Clean,
        }
    }

    /// Cap how long a continuously re-armed batch may be held.
    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay
    }

    /// Change the quiet period. Pending writes and `max_delay` are kept;
    /// the new window applies from the next write.
    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn state(&self) -> CoalescerState {
        self.state
    }

    pub fn is_dirty(&self) -> bool {
        matches!(self.state, CoalescerState::Dirty { .. })
    }

    /// Fields currently pending.
    pub fn dirty_fields(&self) -> FieldSet {
        self.dirty
    }

    /// Pending value for `F`, if `F` has been written since the last flush.
    pub fn pending<F: Field>(&self) -> Option<&F::Value> {
        if self.dirty.contains(F::KEY) {
            Some(F::slot(&self.pending))
        } else {
            None
        }
    }

    /// Record a write and (re-)arm the shared deadline.
    pub fn record<F: Field>(&mut self, value: F::Value, now: Instant) {
        *F::slot_mut(&mut self.pending) = value;
        self.dirty |= F::KEY;
        self.writes = self.writes.saturating_add(1);

        let deadline = now + self.window;
        self.state = match self.state {
            CoalescerState::Clean => CoalescerState::Dirty {
                first_write: now,
                deadline,
            },
            CoalescerState::Dirty { first_write, .. } => CoalescerState::Dirty {
                first_write,
                deadline,
            },
        };
    }

    /// Time left before the batch is due. `None` when clean.
    pub fn time_until_flush(&self, now: Instant) -> Option<Duration> {
        match self.state {
            CoalescerState::Clean => None,
            CoalescerState::Dirty { first_write, deadline } => {
                let due = match self.max_delay {
                    Some(max) => deadline.min(first_write + max),
                    None => deadline,
                };
                Some(due.saturating_duration_since(now))
            }
        }
    }

    /// Merge the batch into `target` if it is due.
    pub fn tick(&mut self, now: Instant, target: &mut GlobalState) -> Option<FlushReport> {
        let CoalescerState::Dirty { first_write, deadline } = self.state else {
            return None;
        };

        if now >= deadline {
            return Some(self.apply(now, first_write, false, target));
        }

        match self.max_delay {
            Some(max) if now >= first_write + max => {
                Some(self.apply(now, first_write, true, target))
            }
            _ => None,
        }
    }

    /// Merge the batch into `target` now, ignoring the deadline.
    pub fn flush_into(&mut self, now: Instant, target: &mut GlobalState) -> Option<FlushReport> {
        let CoalescerState::Dirty { first_write, .. } = self.state else {
            return None;
        };
        Some(self.apply(now, first_write, false, target))
    }

    /// Drop everything pending without applying it.
    pub fn discard(&mut self) -> FieldSet {
        let dropped = self.dirty;
        self.clear();
        dropped
    }

    fn apply(
        &mut self,
        now: Instant,
        first_write: Instant,
        forced_by_deadline: bool,
        target: &mut GlobalState,
    ) -> FlushReport {
        target.merge_masked(&self.pending, self.dirty);
        let report = FlushReport {
            fields: self.dirty,
            writes: self.writes,
            held_for: now.saturating_duration_since(first_write),
            forced_by_deadline,
        };
        self.clear();
        report
    }

    fn clear(&mut self) {
        self.dirty = FieldSet::empty();
        self.writes = 0;
        self.state = CoalescerState::Clean;
    }
}

impl Default for ChangeCoalescer {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}
