//! Progress tracking and throttling.
//!
//! This module handles checkpoint rate-limiting and speed smoothing for
//! transfer progress.

mod speed;
mod throttle;

pub use speed::SpeedEstimator;
pub use throttle::ProgressThrottle;
