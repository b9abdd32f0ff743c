//! Dirty-range tracking for the per-draw tables
//!
//! Each table (object records, instance payloads) tracks one contiguous slot
//! span that differs from the device copy. A removal shifts every later slot,
//! so it escalates the table to a full refresh instead.

use std::ops::Range;

/// Upload state of one per-draw table
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DirtyState {
    /// Device copy matches the CPU table
    #[default]
    Clean,
    /// Slots in this half-open span must be uploaded
    Span(Range<usize>),
    /// The whole table must be uploaded
    Full,
}

impl DirtyState {
    /// Widen the dirty span to include `slots`
    pub fn mark(&mut self, slots: Range<usize>) {
        if slots.is_empty() {
            return;
        }
        *self = match std::mem::take(self) {
            Self::Clean => Self::Span(slots),
            Self::Span(span) => Self::Span(span.start.min(slots.start)..span.end.max(slots.end)),
            Self::Full => Self::Full,
        };
    }

    /// Mark a single slot
    pub fn mark_slot(&mut self, slot: usize) {
        self.mark(slot..slot + 1);
    }

    /// Require a full upload
    pub fn mark_full(&mut self) {
        *self = Self::Full;
    }

    /// Whether anything needs uploading
    pub fn is_dirty(&self) -> bool {
        !matches!(self, Self::Clean)
    }

    /// Take the pending state, leaving the table clean
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }
}
