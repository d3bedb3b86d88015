//! Anti-boost coverage smoother.
//!
//! Coverage estimates jitter and occasionally spike on a bad fusion frame.
//! The smoother keeps a short median window and treats large upward jumps
//! with suspicion (they advance at `anti_boost_factor`), while downward
//! motion passes through at `degrade_factor` (default 1.0, immediate).
//! Non-finite inputs hold the previous output; enough of them in a row latch
//! the worst-case fallback.

use std::collections::VecDeque;

use crate::numeric::stats::median_f64;

/// Smoother tuning.
#[derive(Clone, Copy, Debug)]
pub struct SmootherConfig {
    pub window: usize,
    pub jitter_band: f64,
    pub anti_boost_factor: f64,
    pub normal_improve_factor: f64,
    pub degrade_factor: f64,
    pub max_consecutive_invalid: u32,
    pub worst_case_fallback: f64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            window: 5,
            jitter_band: 0.01,
            anti_boost_factor: 0.25,
            normal_improve_factor: 0.6,
            degrade_factor: 1.0,
            max_consecutive_invalid: 3,
            worst_case_fallback: 0.0,
        }
    }
}

/// Median-window smoother with conditional asymmetric response.
#[derive(Clone, Debug)]
pub struct AntiBoostSmoother {
    config: SmootherConfig,
    window: VecDeque<f64>,
    prev: Option<f64>,
    consecutive_invalid: u32,
}

impl AntiBoostSmoother {
    pub fn new(config: SmootherConfig) -> Self {
        Self {
            window: VecDeque::with_capacity(config.window),
            config,
            prev: None,
            consecutive_invalid: 0,
        }
    }

    /// Feed one raw value, get the smoothed output.
    pub fn smooth(&mut self, value: f64) -> f64 {
        if !value.is_finite() {
            self.consecutive_invalid += 1;
            if self.consecutive_invalid >= self.config.max_consecutive_invalid {
                // Latch: the fallback becomes the previous output too, so a
                // recovery climbs from the floor instead of snapping back.
                self.prev = Some(self.config.worst_case_fallback);
                return self.config.worst_case_fallback;
            }
            return self.prev.unwrap_or(self.config.worst_case_fallback);
        }

        self.consecutive_invalid = 0;
        if self.window.len() == self.config.window {
            self.window.pop_front();
        }
        self.window.push_back(value);

        let median = median_f64(self.window.make_contiguous()).unwrap_or(value);
        let prev = self.prev.unwrap_or(median);
        let delta = value - prev;

        let output = if delta.abs() < self.config.jitter_band {
            median
        } else if delta > 3.0 * self.config.jitter_band {
            prev + delta * self.config.anti_boost_factor
        } else if delta > 0.0 {
            prev + delta * self.config.normal_improve_factor
        } else {
            prev + delta * self.config.degrade_factor
        };

        self.prev = Some(output);
        output
    }

    pub fn consecutive_invalid(&self) -> u32 {
        self.consecutive_invalid
    }

    pub fn last_output(&self) -> Option<f64> {
        self.prev
    }
}
