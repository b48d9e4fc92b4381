//! Frame rate measurement over a sliding window

const NUM_FPS_SAMPLES: usize = 10;

/// Tracks the measured frame rate from microsecond frame timestamps.
///
/// Each tick records one instantaneous rate sample; [`FpsCounter::fps`]
/// averages the last ten of them.
#[derive(Debug)]
pub struct FpsCounter {
    samples: [f32; NUM_FPS_SAMPLES],
    cursor: usize,
    last_timestamp: i64,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            samples: [0.0; NUM_FPS_SAMPLES],
            cursor: 0,
            last_timestamp: 0,
        }
    }

    /// Records a frame stamped at `timestamp` microseconds. Returns true
    /// once per full sample window, which is a good moment to log.
    pub fn tick(&mut self, timestamp: i64) -> bool {
        let delta = timestamp - self.last_timestamp;
        self.last_timestamp = timestamp;
        self.tick_delta(delta)
    }

    /// Records a frame that arrived `delta_us` microseconds after the
    /// previous one.
    pub fn tick_delta(&mut self, delta_us: i64) -> bool {
        let delta_us = delta_us.max(1);
        self.samples[self.cursor] = 1_000_000.0 / delta_us as f32;
        self.cursor = (self.cursor + 1) % NUM_FPS_SAMPLES;
        self.cursor == 0
    }

    /// Mean rate over the sample window, in frames per second.
    pub fn fps(&self) -> f32 {
        let sum: f32 = self.samples.iter().sum();
        sum / NUM_FPS_SAMPLES as f32
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steady_rate_converges() {
        let mut counter = FpsCounter::new();
        let mut wrapped = 0;
        for i in 0..20 {
            if counter.tick_delta(16_666) {
                wrapped += 1;
            }
            if i == 9 {
                assert_eq!(wrapped, 1);
            }
        }
        assert_eq!(wrapped, 2);
        assert!((counter.fps() - 60.0).abs() < 0.1);
    }

    #[test]
    fn test_zero_delta_does_not_divide_by_zero() {
        let mut counter = FpsCounter::new();
        counter.tick_delta(0);
        assert!(counter.fps().is_finite());
    }

    #[test]
    fn test_tick_measures_from_timestamps() {
        let mut counter = FpsCounter::new();
        counter.tick(0);
        for i in 1..=10 {
            counter.tick(i * 33_333);
        }
        assert!((counter.fps() - 30.0).abs() < 0.1);
    }
}
