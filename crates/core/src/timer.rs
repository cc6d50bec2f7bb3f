//! Periodic frame timer.

use std::time::{Duration, Instant};

/// Timer driving the render loop at a fixed cadence.
///
/// The frame scheduler ticks once per interval; the timer only answers
/// "is the next tick due" and measures the time between ticks.
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    last_tick: Instant,
    interval: Duration,
}

impl Timer {
    /// Create a timer firing every `interval`, starting from now.
    pub fn new(interval: Duration) -> Self {
        let now = Instant::now();
        Self {
            start: now,
            last_tick: now,
            interval,
        }
    }

    /// Create a timer from a target rate in frames per second.
    ///
    /// A rate of zero means "as fast as possible".
    pub fn with_rate(frames_per_second: u32) -> Self {
        let interval = match frames_per_second {
            0 => Duration::ZERO,
            fps => Duration::from_secs_f64(1.0 / f64::from(fps)),
        };
        Self::new(interval)
    }

    /// Get the configured tick interval.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Get the total elapsed time since the timer was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Get the elapsed time in seconds since the timer was created.
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed().as_secs_f32()
    }

    /// Instant at which the next tick becomes due.
    pub fn next_deadline(&self) -> Instant {
        self.last_tick + self.interval
    }

    /// Whether a tick is due at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_deadline()
    }

    /// Get the time elapsed since the last call to `tick()` and restart the interval.
    pub fn tick(&mut self) -> Duration {
        let now = Instant::now();
        let delta = now - self.last_tick;
        self.last_tick = now;
        delta
    }

    /// Reset the timer to the current time.
    pub fn reset(&mut self) {
        let now = Instant::now();
        self.start = now;
        self.last_tick = now;
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::with_rate(60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_rate_is_always_due() {
        let timer = Timer::with_rate(0);
        assert_eq!(timer.interval(), Duration::ZERO);
        assert!(timer.is_due(Instant::now()));
    }

    #[test]
    fn test_deadline_follows_interval() {
        let timer = Timer::new(Duration::from_secs(3600));
        assert!(!timer.is_due(Instant::now()));
        assert!(timer.is_due(timer.next_deadline()));
    }

    #[test]
    fn test_tick_restarts_interval() {
        let mut timer = Timer::new(Duration::from_millis(1));
        std::thread::sleep(Duration::from_millis(2));
        let delta = timer.tick();
        assert!(delta >= Duration::from_millis(2));
        assert!(timer.next_deadline() > Instant::now() - Duration::from_millis(1));
    }
}
