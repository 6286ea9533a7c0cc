//! Start/pause accumulator for dispensing and confirmation spans.
//!
//! `pause` accumulates the active span into `elapsed`; `tick` overwrites
//! `elapsed` with the live span since the last `start` and is meant as a
//! readout inside one uninterrupted span. Not synchronized; callers serialize.

use std::sync::Arc;
use std::time::Instant;

use titrator_traits::Clock;

pub struct Timer {
    clock: Arc<dyn Clock + Send + Sync>,
    elapsed: f64,
    started_at: Option<Instant>,
    paused_at: Option<Instant>,
    started: bool,
    paused: bool,
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("elapsed", &self.elapsed)
            .field("started", &self.started)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

impl Timer {
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self {
            clock,
            elapsed: 0.0,
            started_at: None,
            paused_at: None,
            started: false,
            paused: false,
        }
    }

    /// Arm the timer. Re-arming keeps `elapsed`.
    pub fn start(&mut self) {
        self.started_at = Some(self.clock.now());
        self.paused_at = None;
        self.started = true;
        self.paused = false;
    }

    pub fn tick(&mut self) {
        if let Some(at) = self.started_at {
            self.elapsed = self.clock.secs_since(at);
        }
    }

    pub fn pause(&mut self) {
        if !self.started || self.paused {
            return;
        }
        if let Some(at) = self.started_at {
            self.elapsed += self.clock.secs_since(at);
        }
        self.paused_at = Some(self.clock.now());
        self.paused = true;
    }

    pub fn reset(&mut self) {
        self.elapsed = 0.0;
        self.started_at = None;
        self.paused_at = None;
        self.started = false;
        self.paused = false;
    }

    /// Seconds accumulated so far.
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Started and not paused.
    pub fn is_running(&self) -> bool {
        self.started && !self.paused
    }

    pub fn paused_at(&self) -> Option<Instant> {
        self.paused_at
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use titrator_traits::clock::test_clock::TestClock;

    fn timer() -> (TestClock, Timer) {
        let clock = TestClock::new();
        let t = Timer::new(Arc::new(clock.clone()));
        (clock, t)
    }

    #[test]
    fn start_sleep_pause_measures_span() {
        let (clock, mut t) = timer();
        t.start();
        clock.sleep(Duration::from_millis(1500));
        t.pause();
        assert!((t.elapsed() - 1.5).abs() < 1e-9);
        assert!(t.is_paused());
    }

    #[test]
    fn two_cycles_sum() {
        let (clock, mut t) = timer();
        t.start();
        clock.advance_secs(2.0);
        t.pause();
        clock.advance_secs(10.0); // paused time is not counted
        t.start();
        clock.advance_secs(3.0);
        t.pause();
        assert!((t.elapsed() - 5.0).abs() < 1e-9);
    }

    #[test]
    fn tick_overwrites() {
        let (clock, mut t) = timer();
        t.start();
        clock.advance_secs(2.0);
        t.pause();
        t.start();
        clock.advance_secs(1.0);
        t.tick();
        assert!((t.elapsed() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn reset_zeroes_from_any_state() {
        let (clock, mut t) = timer();
        t.reset();
        assert_eq!(t.elapsed(), 0.0);
        t.start();
        clock.advance_secs(4.0);
        t.tick();
        t.reset();
        assert_eq!(t.elapsed(), 0.0);
        assert!(!t.is_started());
        assert!(!t.is_paused());
    }

    #[test]
    fn pause_without_start_is_noop() {
        let (clock, mut t) = timer();
        clock.advance_secs(1.0);
        t.pause();
        assert_eq!(t.elapsed(), 0.0);
        assert!(!t.is_paused());
    }
}
