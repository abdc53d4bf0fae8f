//! Per-channel scan with time-based debouncing.
//!
//! A scan pass compares each channel's raw state with what the host was last
//! told. A pending change is reported only when the channel's debounce timer
//! is not holding it back (disarmed, or armed and now expired). Reporting
//! re-arms the timer; with `reset_on_every_change` a held-back change that
//! flickered since the previous scan re-arms it too, so bouncing keeps
//! pushing the report out while a steady pending state does not.
//!
//! The engine can be entered from the polling loop and from a pin-change
//! interrupt. [`SharedScanner`] serializes the two with a [`ScanGuard`]: a
//! busy flag plus a not-before instant, both checked and updated inside a
//! short critical section that never covers the scan itself.

use core::cell::{Cell, UnsafeCell};

use critical_section::Mutex;
use heapless::Deque;

use crate::channel::{Registry, MAX_CHANNELS};
use crate::config::DeviceConfig;
use crate::event::Event;
use crate::ports::{Clock, Inputs, SerialLink};
use crate::timer;

/// Quiet time enforced after a completed pass before another may start, in
/// microseconds. Absorbs interrupt-driven calls landing right behind a
/// polled pass.
///
/// Interrupt-driven passes must stay short: an AVR handler runs with
/// interrupts off, and blocking there for more than one Timer0 overflow
/// (about 1 ms) loses clock ticks. Such passes go through
/// [`SharedScanner::scan_deferred`], which never waits on the link.
pub const GUARD_MARGIN_US: u32 = 20;

/// The debounce engine for one streaming session.
#[derive(Clone, Debug, Default)]
pub struct ScanEngine {
    config: DeviceConfig,
    channels: Registry,
}

impl ScanEngine {
    pub fn new(config: DeviceConfig, channels: Registry) -> Self {
        Self { config, channels }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn channels(&self) -> &Registry {
        &self.channels
    }

    /// Run one pass over every channel, writing an event byte for each
    /// change that makes it through the debounce window.
    pub fn scan<I, L>(&mut self, now: u32, inputs: &mut I, link: &mut L) -> Result<(), L::Error>
    where
        I: Inputs,
        L: SerialLink,
    {
        self.scan_with(now, inputs, |event| link.write_byte(event.to_byte()))
    }

    /// Like [`scan`](Self::scan), handing each event to `emit`.
    pub fn scan_with<I, E>(
        &mut self,
        now: u32,
        inputs: &mut I,
        mut emit: impl FnMut(Event) -> Result<(), E>,
    ) -> Result<(), E>
    where
        I: Inputs,
    {
        let window = self.config.debounce_us;
        let restart_on_flicker = self.config.reset_on_every_change;

        for (index, channel) in self.channels.iter_mut().enumerate() {
            let active = inputs.is_active(channel.pin);
            let flicker = active != channel.sampled;
            channel.sampled = active;
            if active == channel.reported {
                continue;
            }

            // An armed timer that has not expired holds the change back.
            // Checking an expired timer consumes it.
            let open = !channel.timer.is_armed() || channel.timer.check(now);

            if open {
                emit(Event::new(index as u8, active))?;
                channel.reported = active;
            }
            if open || (restart_on_flicker && flicker) {
                channel.timer.set(now.wrapping_add(window));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy)]
struct GuardState {
    not_before: u32,
    /// `not_before` is in force. Cleared once it is reached so a stale
    /// instant never reads as the future after the clock wraps.
    holding: bool,
    busy: bool,
}

/// Time-gated re-entrancy guard for scan passes.
pub struct ScanGuard {
    state: Mutex<Cell<GuardState>>,
}

impl ScanGuard {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Cell::new(GuardState {
                not_before: 0,
                holding: false,
                busy: false,
            })),
        }
    }

    /// Claim a pass if none is running and the not-before instant has been
    /// reached.
    pub fn try_enter(&self, now: u32) -> Option<ScanPass<'_>> {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let state = cell.get();
            if state.busy || (state.holding && !timer::reached(now, state.not_before)) {
                return None;
            }
            cell.set(GuardState {
                holding: false,
                busy: true,
                ..state
            });
            Some(ScanPass {
                guard: self,
                finished_at: None,
            })
        })
    }

    /// Claim the guard regardless of the not-before instant, dropping any
    /// hold-off. Used outside of streaming to swap engines in and out.
    fn try_claim(&self) -> Option<ScanPass<'_>> {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let state = cell.get();
            if state.busy {
                return None;
            }
            cell.set(GuardState {
                holding: false,
                busy: true,
                ..state
            });
            Some(ScanPass {
                guard: self,
                finished_at: None,
            })
        })
    }

    fn release(&self, finished_at: Option<u32>) {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut state = cell.get();
            if let Some(now) = finished_at {
                state.not_before = now.wrapping_add(GUARD_MARGIN_US);
                state.holding = true;
            }
            state.busy = false;
            cell.set(state);
        });
    }
}

impl Default for ScanGuard {
    fn default() -> Self {
        Self::new()
    }
}

/// Proof of an exclusive pass. Dropping it releases the guard.
pub struct ScanPass<'a> {
    guard: &'a ScanGuard,
    finished_at: Option<u32>,
}

impl ScanPass<'_> {
    /// Release the guard and hold off further passes until `now` plus
    /// [`GUARD_MARGIN_US`].
    pub fn finish(mut self, now: u32) {
        self.finished_at = Some(now);
    }
}

impl Drop for ScanPass<'_> {
    fn drop(&mut self) {
        self.guard.release(self.finished_at);
    }
}

/// Returned when the guard is held by a running pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Busy;

/// Capacity of the queue for events found by interrupt-driven passes.
pub const DEFERRED_CAPACITY: usize = MAX_CHANNELS;

struct Slot {
    engine: Option<ScanEngine>,
    /// Event bytes from deferred passes, not yet written to the link.
    pending: Deque<u8, DEFERRED_CAPACITY>,
}

/// Scan engine slot shared between the main loop and interrupt handlers.
///
/// The engine is only reachable while holding a [`ScanPass`], so at most one
/// context touches it at a time. Interrupt handlers run deferred passes that
/// queue their event bytes instead of waiting on the link with interrupts
/// off; the next polled pass writes the queue out ahead of its own events.
pub struct SharedScanner {
    guard: ScanGuard,
    slot: UnsafeCell<Slot>,
}

// SAFETY: every access to `slot` happens while holding the guard's busy flag,
// which is set and cleared inside a critical section.
unsafe impl Sync for SharedScanner {}

impl SharedScanner {
    pub const fn new() -> Self {
        Self {
            guard: ScanGuard::new(),
            slot: UnsafeCell::new(Slot {
                engine: None,
                pending: Deque::new(),
            }),
        }
    }

    /// Run a gated scan pass, first writing out events queued by deferred
    /// passes. Returns `Ok(false)` without scanning if another pass is
    /// running, the guard margin has not elapsed, or no engine is installed.
    pub fn scan<C, I, L>(&self, clock: &C, inputs: &mut I, link: &mut L) -> Result<bool, L::Error>
    where
        C: Clock,
        I: Inputs,
        L: SerialLink,
    {
        let Some(pass) = self.guard.try_enter(clock.micros()) else {
            return Ok(false);
        };
        // SAFETY: `pass` holds the busy flag.
        let slot = unsafe { &mut *self.slot.get() };
        while let Some(&byte) = slot.pending.front() {
            link.write_byte(byte)?;
            slot.pending.pop_front();
        }
        let Some(engine) = slot.engine.as_mut() else {
            return Ok(false);
        };
        let result = engine.scan(clock.micros(), inputs, link);
        pass.finish(clock.micros());
        result.map(|()| true)
    }

    /// Run a gated scan pass that queues its events for the next [`scan`].
    ///
    /// Never touches the link, so it is safe to call with interrupts
    /// disabled. Skipped (returning false) when the queue cannot hold one
    /// event per channel; the changes are then picked up by the next polled
    /// pass instead of being lost.
    ///
    /// [`scan`]: SharedScanner::scan
    pub fn scan_deferred<C, I>(&self, clock: &C, inputs: &mut I) -> bool
    where
        C: Clock,
        I: Inputs,
    {
        let Some(pass) = self.guard.try_enter(clock.micros()) else {
            return false;
        };
        // SAFETY: `pass` holds the busy flag.
        let Slot { engine, pending } = unsafe { &mut *self.slot.get() };
        let Some(engine) = engine.as_mut() else {
            return false;
        };
        if DEFERRED_CAPACITY - pending.len() < engine.channels().len() {
            return false;
        }
        // Room was checked above, so pushing cannot fail.
        let _ = engine.scan_with(clock.micros(), inputs, |event| {
            pending.push_back(event.to_byte())
        });
        pass.finish(clock.micros());
        true
    }

    /// Put an engine in the slot, dropping any previous engine and queued
    /// events.
    pub fn install(&self, engine: ScanEngine) -> Result<(), Busy> {
        let _pass = self.guard.try_claim().ok_or(Busy)?;
        // SAFETY: `_pass` holds the busy flag.
        let slot = unsafe { &mut *self.slot.get() };
        slot.pending.clear();
        slot.engine = Some(engine);
        Ok(())
    }

    /// Remove the engine, if any, discarding queued events. Returns `None`
    /// if a pass is running.
    pub fn take(&self) -> Option<ScanEngine> {
        let _pass = self.guard.try_claim()?;
        // SAFETY: `_pass` holds the busy flag.
        let slot = unsafe { &mut *self.slot.get() };
        slot.pending.clear();
        slot.engine.take()
    }
}

impl Default for SharedScanner {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimClock, SimInputs, SimLink};

    const PIN: u8 = 5;

    fn engine(debounce_us: u32, reset_on_every_change: bool) -> ScanEngine {
        let mut channels = Registry::new();
        channels.add(PIN);
        let config = DeviceConfig {
            debounce_us,
            reset_on_every_change,
            interrupt_assist: false,
        };
        ScanEngine::new(config, channels)
    }

    /// Scan at `now` and return the bytes written.
    fn scan_at(engine: &mut ScanEngine, inputs: &mut SimInputs, now: u32) -> Vec<u8> {
        inputs.clock().set(now);
        let mut link = SimLink::new();
        engine.scan(now, inputs, &mut link).unwrap();
        link.take_output()
    }

    #[test]
    fn test_first_change_reports_immediately() {
        let clock = SimClock::new(0);
        let mut inputs = SimInputs::new(clock.clone());
        let mut engine = engine(2000, true);

        assert!(scan_at(&mut engine, &mut inputs, 0).is_empty());
        inputs.schedule(100, PIN, true);
        assert_eq!(scan_at(&mut engine, &mut inputs, 100), [0x80]);
        assert!(engine.channels().get(0).unwrap().reported);
    }

    #[test]
    fn test_idempotent_without_change() {
        let clock = SimClock::new(0);
        let mut inputs = SimInputs::new(clock.clone());
        let mut engine = engine(2000, true);
        inputs.schedule(0, PIN, true);

        assert_eq!(scan_at(&mut engine, &mut inputs, 10), [0x80]);
        assert!(scan_at(&mut engine, &mut inputs, 11).is_empty());
        assert!(scan_at(&mut engine, &mut inputs, 5000).is_empty());
    }

    #[test]
    fn test_change_held_until_window_elapses() {
        let clock = SimClock::new(0);
        let mut inputs = SimInputs::new(clock.clone());
        let mut engine = engine(2000, false);

        inputs.schedule(0, PIN, true);
        assert_eq!(scan_at(&mut engine, &mut inputs, 0), [0x80]);

        // Release inside the window stays pending, however often we scan.
        inputs.schedule(500, PIN, false);
        for now in (500..2000).step_by(100) {
            assert!(scan_at(&mut engine, &mut inputs, now).is_empty(), "at {now}");
        }
        assert_eq!(scan_at(&mut engine, &mut inputs, 2000), [0x00]);
        assert!(scan_at(&mut engine, &mut inputs, 2001).is_empty());
    }

    #[test]
    fn test_first_change_anchoring_ignores_flicker() {
        let clock = SimClock::new(0);
        let mut inputs = SimInputs::new(clock.clone());
        let mut engine = engine(1000, false);

        inputs.schedule(0, PIN, true);
        assert_eq!(scan_at(&mut engine, &mut inputs, 0), [0x80]);

        // Flicker every 100us for the whole window, ending released.
        let mut level = true;
        for now in (100..1000).step_by(100) {
            level = !level;
            inputs.schedule(now, PIN, level);
            assert!(scan_at(&mut engine, &mut inputs, now).is_empty());
        }
        inputs.schedule(950, PIN, false);
        assert_eq!(scan_at(&mut engine, &mut inputs, 1000), [0x00]);
    }

    #[test]
    fn test_last_change_anchoring_delays_under_flicker() {
        let clock = SimClock::new(0);
        let mut inputs = SimInputs::new(clock.clone());
        let mut engine = engine(1000, true);

        inputs.schedule(0, PIN, true);
        assert_eq!(scan_at(&mut engine, &mut inputs, 0), [0x80]);

        // A release seen every 500us keeps re-arming the window.
        for now in (500..5000).step_by(500) {
            inputs.schedule(now, PIN, false);
            assert!(scan_at(&mut engine, &mut inputs, now).is_empty(), "at {now}");
            inputs.schedule(now + 1, PIN, true);
            assert!(scan_at(&mut engine, &mut inputs, now + 1).is_empty());
        }
        // Once it stays released for a full window, the release goes out.
        inputs.schedule(5000, PIN, false);
        assert!(scan_at(&mut engine, &mut inputs, 5000).is_empty());
        assert!(scan_at(&mut engine, &mut inputs, 5999).is_empty());
        assert_eq!(scan_at(&mut engine, &mut inputs, 6000), [0x00]);
    }

    #[test]
    fn test_window_across_clock_wrap() {
        let start = u32::MAX - 499;
        let clock = SimClock::new(start);
        let mut inputs = SimInputs::new(clock.clone());
        let mut engine = engine(1000, false);

        inputs.schedule(start, PIN, true);
        assert_eq!(scan_at(&mut engine, &mut inputs, start), [0x80]);
        inputs.schedule(start.wrapping_add(10), PIN, false);
        assert!(scan_at(&mut engine, &mut inputs, start.wrapping_add(10)).is_empty());
        assert!(scan_at(&mut engine, &mut inputs, 499).is_empty());
        assert_eq!(scan_at(&mut engine, &mut inputs, 500), [0x00]);
    }

    #[test]
    fn test_channels_use_their_index() {
        let clock = SimClock::new(0);
        let mut inputs = SimInputs::new(clock.clone());
        let mut channels = Registry::new();
        channels.add(2);
        channels.add(7);
        channels.add(2);
        let mut engine = ScanEngine::new(DeviceConfig::new(), channels);

        inputs.schedule(0, 2, true);
        assert_eq!(scan_at(&mut engine, &mut inputs, 0), [0x80, 0x82]);
        inputs.schedule(10, 7, true);
        assert_eq!(scan_at(&mut engine, &mut inputs, 10), [0x81]);
    }

    #[test]
    fn test_guard_margin_and_busy() {
        let guard = ScanGuard::new();
        let pass = guard.try_enter(100).unwrap();
        assert!(guard.try_enter(100).is_none());
        pass.finish(150);
        assert!(guard.try_enter(150 + GUARD_MARGIN_US - 1).is_none());
        let pass = guard.try_enter(150 + GUARD_MARGIN_US).unwrap();
        drop(pass);
        // Dropping without finishing leaves the instant alone.
        assert!(guard.try_enter(150 + GUARD_MARGIN_US).is_some());
    }

    #[test]
    fn test_guard_margin_across_wrap() {
        let guard = ScanGuard::new();
        guard.try_enter(0).unwrap().finish(u32::MAX - 5);
        assert!(guard.try_enter(u32::MAX).is_none());
        assert!(guard.try_enter(GUARD_MARGIN_US - 7).is_none());
        assert!(guard.try_enter(GUARD_MARGIN_US - 6).is_some());
    }

    #[test]
    fn test_stale_margin_never_blocks() {
        let fresh = ScanGuard::new();
        assert!(fresh.try_enter(u32::MAX - 3).is_some());

        let guard = ScanGuard::new();
        guard.try_enter(0).unwrap().finish(0);
        assert!(guard.try_enter(GUARD_MARGIN_US).is_some());
        assert!(guard.try_enter(1 << 31).is_some());

        // A hold-off left over from the last session is dropped on install.
        guard.try_enter(0).unwrap().finish(0);
        drop(guard.try_claim().unwrap());
        assert!(guard.try_enter(1 << 31).is_some());
    }

    #[test]
    fn test_shared_scanner_is_gated() {
        let clock = SimClock::new(1000);
        let mut inputs = SimInputs::new(clock.clone());
        let mut link = SimLink::new();
        let shared = SharedScanner::new();

        // Nothing installed yet.
        assert!(!shared.scan(&clock, &mut inputs, &mut link).unwrap());

        shared.install(engine(2000, true)).unwrap();
        inputs.schedule(1000, PIN, true);
        assert!(shared.scan(&clock, &mut inputs, &mut link).unwrap());
        assert_eq!(link.take_output(), [0x80]);

        // Immediately again: inside the guard margin.
        assert!(!shared.scan(&clock, &mut inputs, &mut link).unwrap());
        clock.advance(GUARD_MARGIN_US);
        assert!(shared.scan(&clock, &mut inputs, &mut link).unwrap());
        assert!(link.take_output().is_empty());

        let engine = shared.take().unwrap();
        assert_eq!(engine.channels().len(), 1);
        assert!(shared.take().is_none());
    }

    #[test]
    fn test_shared_scanner_skips_while_busy() {
        let clock = SimClock::new(0);
        let mut inputs = SimInputs::new(clock.clone());
        let mut link = SimLink::new();
        let shared = SharedScanner::new();
        shared.install(engine(0, true)).unwrap();

        let pass = shared.guard.try_enter(0).unwrap();
        assert!(!shared.scan(&clock, &mut inputs, &mut link).unwrap());
        assert!(!shared.scan_deferred(&clock, &mut inputs));
        assert!(shared.take().is_none());
        assert_eq!(shared.install(engine(0, true)), Err(Busy));
        drop(pass);
        assert!(shared.take().is_some());
    }

    fn engine_for(pins: &[u8]) -> ScanEngine {
        let mut channels = Registry::new();
        for &pin in pins {
            channels.add(pin);
        }
        ScanEngine::new(DeviceConfig::new(), channels)
    }

    #[test]
    fn test_deferred_events_go_out_first() {
        let clock = SimClock::new(0);
        let mut inputs = SimInputs::new(clock.clone());
        let mut link = SimLink::new();
        let shared = SharedScanner::new();
        shared.install(engine_for(&[1, 2])).unwrap();

        inputs.schedule(0, 1, true);
        assert!(shared.scan_deferred(&clock, &mut inputs));

        clock.advance(GUARD_MARGIN_US);
        inputs.schedule(GUARD_MARGIN_US, 2, true);
        assert!(shared.scan(&clock, &mut inputs, &mut link).unwrap());
        assert_eq!(link.take_output(), [0x80, 0x81]);
    }

    #[test]
    fn test_deferred_pass_skipped_without_room() {
        let clock = SimClock::new(0);
        let mut inputs = SimInputs::new(clock.clone());
        let mut link = SimLink::new();
        let shared = SharedScanner::new();
        shared.install(engine_for(&[0; MAX_CHANNELS])).unwrap();

        inputs.schedule(0, 0, true);
        assert!(shared.scan_deferred(&clock, &mut inputs));

        // The queue is full; the release waits for a polled pass.
        clock.set(5000);
        inputs.schedule(5000, 0, false);
        assert!(!shared.scan_deferred(&clock, &mut inputs));
        assert!(shared.scan(&clock, &mut inputs, &mut link).unwrap());

        let out = link.take_output();
        assert_eq!(out.len(), 2 * MAX_CHANNELS);
        let presses: Vec<u8> = (0..MAX_CHANNELS as u8).map(|i| 0x80 | i).collect();
        let releases: Vec<u8> = (0..MAX_CHANNELS as u8).collect();
        assert_eq!(out[..MAX_CHANNELS], presses[..]);
        assert_eq!(out[MAX_CHANNELS..], releases[..]);
    }

    #[test]
    fn test_take_discards_deferred_events() {
        let clock = SimClock::new(0);
        let mut inputs = SimInputs::new(clock.clone());
        let mut link = SimLink::new();
        let shared = SharedScanner::new();
        shared.install(engine_for(&[1])).unwrap();

        inputs.schedule(0, 1, true);
        assert!(shared.scan_deferred(&clock, &mut inputs));
        assert!(shared.take().is_some());

        shared.install(engine_for(&[1])).unwrap();
        assert!(shared.scan(&clock, &mut inputs, &mut link).unwrap());
        assert_eq!(link.take_output(), [0x80]);
    }
}
