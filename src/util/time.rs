//! Time utilities for the game loop

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Get current Unix timestamp in milliseconds
pub fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as i64
}

/// Minutes in an in-game day
pub const MINUTES_PER_DAY: i16 = 1440;

/// Largest time factor that still gives a game minute of at least 1ms
pub const MAX_TIME_FACTOR: u32 = 60_000;

/// Real duration of one in-game minute for the given time factor
///
/// Never zero: factors above [`MAX_TIME_FACTOR`] run at one minute per millisecond.
pub fn game_minute_period(time_factor: u32) -> Duration {
    let millis = 60_000 / u64::from(time_factor.max(1));
    Duration::from_millis(millis.max(1))
}

/// Whether `now` falls in the night span `[night_start, night_end]`, which wraps midnight
pub fn is_night(now: i16, night_start: i16, night_end: i16) -> bool {
    !(now > night_end && now < night_start)
}

/// Measures the time elapsed between two logic ticks
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    /// Restart the timer, returning the time elapsed since the last restart
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now.duration_since(self.start);
        self.start = now;
        elapsed
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minute_period_follows_time_factor() {
        assert_eq!(game_minute_period(60), Duration::from_secs(1));
        assert_eq!(game_minute_period(1), Duration::from_secs(60));
        assert_eq!(game_minute_period(0), Duration::from_secs(60));
    }

    #[test]
    fn minute_period_is_never_zero() {
        assert_eq!(game_minute_period(MAX_TIME_FACTOR), Duration::from_millis(1));
        assert_eq!(game_minute_period(100_000), Duration::from_millis(1));
        assert!(!game_minute_period(u32::MAX).is_zero());
    }

    #[test]
    fn night_wraps_midnight() {
        assert!(is_night(1080, 1080, 480));
        assert!(is_night(0, 1080, 480));
        assert!(is_night(480, 1080, 480));
        assert!(!is_night(481, 1080, 480));
        assert!(!is_night(720, 1080, 480));
    }

    #[test]
    fn lap_restarts_the_timer() {
        let mut timer = Timer::new();
        std::thread::sleep(Duration::from_millis(5));
        assert!(timer.lap() >= Duration::from_millis(5));
        assert!(timer.elapsed() < Duration::from_millis(5));
    }
}
