//! One-shot debounce deadline on a wrapping microsecond clock.
//!
//! The clock is a free-running `u32` that wraps every ~71 minutes, so a
//! deadline is compared by interpreting `now - deadline` as a signed value:
//! non-negative means the deadline has passed. This stays correct across a
//! wrap as long as deadlines are never more than `2^31 - 1` ticks away.

/// Largest distance between `now` and a deadline that the signed comparison
/// can represent.
pub const MAX_SPAN: u32 = i32::MAX as u32;

/// Returns true when `now` is at or after `deadline`, modulo 2^32.
#[inline]
pub const fn reached(now: u32, deadline: u32) -> bool {
    (now.wrapping_sub(deadline) as i32) >= 0
}

/// A single-deadline countdown.
///
/// `check` fires at most once per `set`: a true result disarms the timer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DebounceTimer {
    deadline: u32,
    enabled: bool,
}

impl DebounceTimer {
    /// A disarmed timer.
    pub const fn new() -> Self {
        Self {
            deadline: 0,
            enabled: false,
        }
    }

    /// Arm the timer, replacing any previous deadline.
    pub fn set(&mut self, deadline: u32) {
        self.deadline = deadline;
        self.enabled = true;
    }

    pub fn is_armed(&self) -> bool {
        self.enabled
    }

    /// Returns true if the timer is armed and its deadline is at or before
    /// `now`, disarming it in that case.
    pub fn check(&mut self, now: u32) -> bool {
        if self.enabled && reached(now, self.deadline) {
            self.enabled = false;
            true
        } else {
            false
        }
    }
}

impl Default for DebounceTimer {
    fn default() -> Self {
        Self::new()
    }
}
