//! Pass Timer - Timing Utilities
//!
//! Measures collection passes and destruction batches.

use std::time::{Duration, Instant};

/// PassTimer - timer for one collector pass
pub struct PassTimer {
    start: Instant,
}

impl PassTimer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ns(&self) -> u64 {
        self.elapsed().as_nanos().min(u64::MAX as u128) as u64
    }

    pub fn elapsed_us(&self) -> u64 {
        self.elapsed().as_micros().min(u64::MAX as u128) as u64
    }

    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed().as_secs_f64() * 1000.0
    }

    /// Restart and return the time elapsed so far
    pub fn lap(&mut self) -> Duration {
        let now = Instant::now();
        let elapsed = now - self.start;
        self.start = now;
        elapsed
    }
}

impl Default for PassTimer {
    fn default() -> Self {
        Self::start()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lap_restarts() {
        let mut timer = PassTimer::start();
        std::thread::sleep(Duration::from_millis(2));
        let first = timer.lap();
        assert!(first >= Duration::from_millis(2));
        assert!(timer.elapsed() < first + Duration::from_secs(1));
    }
}
