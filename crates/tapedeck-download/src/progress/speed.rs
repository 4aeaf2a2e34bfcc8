//! Transfer speed smoothing.

use std::time::Instant;

/// EWA smoothing factor for speed calculation (2% of instant speed, 98% of previous).
const EWA_SMOOTHING: f64 = 0.02;

/// Exponentially weighted transfer speed.
///
/// The first sample is taken as-is; later samples move the estimate by
/// `EWA_SMOOTHING` of the instantaneous speed.
#[derive(Debug, Clone)]
pub struct SpeedEstimator {
    last_bytes: u64,
    last_time: Instant,
    speed_bps: f64,
    first_update: bool,
}

impl SpeedEstimator {
    /// Start measuring from `initial_bytes` (the resumed prefix counts as zero speed).
    pub fn new(initial_bytes: u64) -> Self {
        Self::starting_at(initial_bytes, Instant::now())
    }

    const fn starting_at(initial_bytes: u64, now: Instant) -> Self {
        Self {
            last_bytes: initial_bytes,
            last_time: now,
            speed_bps: 0.0,
            first_update: true,
        }
    }

    /// Feed a new byte count and return the smoothed speed.
    pub fn update(&mut self, downloaded: u64) -> f64 {
        self.update_at(downloaded, Instant::now())
    }

    fn update_at(&mut self, downloaded: u64, now: Instant) -> f64 {
        let elapsed = now.duration_since(self.last_time).as_secs_f64();
        if elapsed <= 0.0 {
            return self.speed_bps;
        }

        let bytes_delta = downloaded.saturating_sub(self.last_bytes);
        #[allow(clippy::cast_precision_loss)]
        let instant_speed = bytes_delta as f64 / elapsed;

        if self.first_update {
            self.speed_bps = instant_speed;
            self.first_update = false;
        } else {
            self.speed_bps =
                EWA_SMOOTHING.mul_add(instant_speed, (1.0 - EWA_SMOOTHING) * self.speed_bps);
        }

        self.last_bytes = downloaded;
        self.last_time = now;
        self.speed_bps
    }
}
