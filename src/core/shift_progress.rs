//! Folds the separation engine's per-shift offsets into one monotonic counter.
//!
//! The engine reports the offset of the segment it is working on, and that offset
//! goes back to 0 every time a new shift (pass over the input) begins. A progress
//! bar wants a single value that only grows and lands on `shift_length * shifts`.

/// One progress notification from the separation engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SeparationEvent {
    pub is_start: bool,
    pub segment_offset: Option<u64>,
    /// Length of one shift as announced by the engine. Informational only.
    pub shift_length: u64,
}

impl SeparationEvent {
    pub fn start() -> Self {
        Self {
            is_start: true,
            ..Default::default()
        }
    }

    pub fn offset(segment_offset: u64, shift_length: u64) -> Self {
        Self {
            is_start: false,
            segment_offset: Some(segment_offset),
            shift_length,
        }
    }
}

/// State of one separation run. Build a fresh one per run.
#[derive(Clone, Debug)]
pub struct ShiftProgress {
    shift_length: u64,
    shifts: u64,
    last_offset: u64,
    emitted: u64,
}

impl ShiftProgress {
    pub fn new(shift_length: u64, shifts: u32) -> Self {
        Self {
            shift_length,
            shifts: u64::from(shifts.max(1)),
            last_offset: 0,
            emitted: 0,
        }
    }

    pub fn total(&self) -> u64 {
        self.shift_length.saturating_mul(self.shifts)
    }

    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    pub fn last_offset(&self) -> u64 {
        self.last_offset
    }

    /// Returns the increment to report for `event`, `None` for events that carry no progress.
    pub fn on_event(&mut self, event: &SeparationEvent) -> Option<u64> {
        if event.is_start {
            return None;
        }
        let offset = event.segment_offset?;

        let delta = if offset == 0 && self.last_offset != 0 {
            // New shift: credit what was left of the previous one.
            let rest = self.shift_length.saturating_sub(self.last_offset);
            self.last_offset = 0;
            rest
        } else if offset >= self.last_offset {
            let d = offset - self.last_offset;
            self.last_offset = offset;
            d
        } else {
            // Offsets never move backwards inside a shift; ignore stragglers.
            0
        };

        Some(self.credit(delta))
    }

    /// Brings the counter to its declared total. Call once the run has succeeded.
    pub fn finalize(&mut self) -> u64 {
        let rest = self.total().saturating_sub(self.emitted);
        self.emitted += rest;
        self.last_offset = 0;
        rest
    }

    fn credit(&mut self, delta: u64) -> u64 {
        let capped = delta.min(self.total().saturating_sub(self.emitted));
        self.emitted += capped;
        capped
    }
}
