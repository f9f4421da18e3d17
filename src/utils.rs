use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// Wall-clock milliseconds since the Unix epoch
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Rolling frame-rate estimate over the last `window` ticks
pub struct FpsMeter {
    ticks: HeapRb<Instant>,
}

impl FpsMeter {
    pub fn new(window: usize) -> Self {
        Self {
            ticks: HeapRb::new(window.max(2)),
        }
    }

    pub fn tick(&mut self, at: Instant) {
        self.ticks.push_overwrite(at);
    }

    pub fn fps(&self) -> f64 {
        let count = self.ticks.occupied_len();
        if count < 2 {
            return 0.0;
        }
        let (Some(first), Some(last)) = (self.ticks.iter().next(), self.ticks.iter().last())
        else {
            return 0.0;
        };
        let span = last.saturating_duration_since(*first);
        if span == Duration::ZERO {
            return 0.0;
        }
        (count - 1) as f64 / span.as_secs_f64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_over_window() {
        let mut meter = FpsMeter::new(8);
        let base = Instant::now();
        for i in 0..20u64 {
            meter.tick(base + Duration::from_millis(i * 50));
        }
        assert!((meter.fps() - 20.0).abs() < 0.01);
    }

    #[test]
    fn fps_needs_two_ticks() {
        let mut meter = FpsMeter::new(4);
        assert_eq!(meter.fps(), 0.0);
        meter.tick(Instant::now());
        assert_eq!(meter.fps(), 0.0);
    }
}
