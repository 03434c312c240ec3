//! Position History, Outlier Rejection and Track Smoothing
//!
//! ## Overview
//!
//! Raw solver output jitters with RSSI noise. This module keeps a bounded
//! history of accepted fixes and uses it three ways:
//!
//! 1. **Outlier gate** - a candidate far from the recent running average is
//!    a multipath artifact, not motion, and is rejected.
//! 2. **Confidence-weighted moving average** - high-confidence fixes pull
//!    the smoothed track harder than marginal ones.
//! 3. **Constant-velocity Kalman** (optional) - tracks position and
//!    velocity per axis, so the estimate keeps moving through short gaps.

use crate::{
    buffer::Ring,
    constants::{
        OUTLIER_DISTANCE, OUTLIER_WINDOW, POSITION_HISTORY, POSITION_KALMAN_Q, POSITION_KALMAN_R,
        POSITION_MAX_AGE_MS,
    },
    events::Point,
    time::{elapsed_ms, Timestamp},
};

/// One accepted fix retained for smoothing and outlier checks
#[derive(Debug, Clone, Copy)]
struct HistoryEntry {
    position: Point,
    confidence: f32,
    timestamp: Timestamp,
}

/// Per-axis constant-velocity Kalman track
///
/// State is `[position, velocity]` with a 2x2 covariance. The measurement
/// observes position only; velocity is inferred.
#[derive(Debug, Clone, Copy)]
struct AxisTrack {
    pos: f32,
    vel: f32,
    // Covariance [[p00, p01], [p01, p11]]
    p00: f32,
    p01: f32,
    p11: f32,
}

impl AxisTrack {
    fn new(pos: f32) -> Self {
        Self {
            pos,
            vel: 0.0,
            p00: 1.0,
            p01: 0.0,
            p11: 1.0,
        }
    }

    fn update(&mut self, measurement: f32, dt_s: f32, q: f32, r: f32) -> f32 {
        // Predict through the constant-velocity model
        self.pos += self.vel * dt_s;
        let p00 = self.p00 + dt_s * (2.0 * self.p01 + dt_s * self.p11) + q * dt_s;
        let p01 = self.p01 + dt_s * self.p11;
        let p11 = self.p11 + q * dt_s;

        // Correct with the position measurement
        let innovation = measurement - self.pos;
        let s = p00 + r;
        let k0 = p00 / s;
        let k1 = p01 / s;

        self.pos += k0 * innovation;
        self.vel += k1 * innovation;
        self.p00 = (1.0 - k0) * p00;
        self.p01 = (1.0 - k0) * p01;
        self.p11 = p11 - k1 * p01;

        self.pos
    }
}

/// Smoothing strategy for accepted fixes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Smoothing {
    /// Confidence-weighted moving average over the history window
    WeightedAverage,
    /// Constant-velocity 2D Kalman track
    Kalman,
}

impl Default for Smoothing {
    fn default() -> Self {
        Smoothing::WeightedAverage
    }
}

/// Bounded fix history with outlier gating and smoothing
pub struct PositionFilter {
    history: Ring<HistoryEntry, POSITION_HISTORY>,
    smoothing: Smoothing,
    track: Option<(AxisTrack, AxisTrack)>,
    smoothed: Option<(Point, f32, Timestamp)>,
    last_update: Timestamp,
    outliers_rejected: u32,
}

impl PositionFilter {
    /// Create an empty filter with the chosen smoothing strategy
    pub fn new(smoothing: Smoothing) -> Self {
        Self {
            history: Ring::new(),
            smoothing,
            track: None,
            smoothed: None,
            last_update: 0,
            outliers_rejected: 0,
        }
    }

    /// Check a candidate fix against the recent running average
    ///
    /// Returns `true` (outlier) when the history holds enough fixes and the
    /// candidate jumped farther than physically plausible. An empty or thin
    /// history accepts everything; there is nothing to compare against.
    pub fn is_outlier(&self, candidate: Point) -> bool {
        if self.history.len() < 3 {
            return false;
        }

        let recent = self.recent_average(OUTLIER_WINDOW);
        candidate.distance_to(&recent) > OUTLIER_DISTANCE
    }

    /// Record an outlier rejection (counter only; the fix is discarded)
    pub fn note_outlier(&mut self) {
        self.outliers_rejected += 1;
    }

    /// Accept a fix into the history and return the smoothed position
    pub fn accept(&mut self, position: Point, confidence: f32, now: Timestamp) -> Point {
        self.history.push(HistoryEntry {
            position,
            confidence,
            timestamp: now,
        });

        let smoothed = match self.smoothing {
            Smoothing::WeightedAverage => self.weighted_average(),
            Smoothing::Kalman => self.kalman_step(position, now),
        };

        self.smoothed = Some((smoothed, confidence, now));
        self.last_update = now;
        smoothed
    }

    /// Age out history entries past the maximum age
    pub fn age_out(&mut self, now: Timestamp) {
        self.history
            .retain(|entry| elapsed_ms(entry.timestamp, now) <= POSITION_MAX_AGE_MS);
        if self.history.is_empty() {
            self.smoothed = None;
        }
    }

    /// Most recent smoothed position, if any fix survives aging
    ///
    /// This is the same value the matching [`accept`](Self::accept) call
    /// returned, not the raw fix that went into the history.
    pub fn latest(&self) -> Option<(Point, f32, Timestamp)> {
        self.smoothed
    }

    /// Fixes rejected by the outlier gate
    pub fn outliers_rejected(&self) -> u32 {
        self.outliers_rejected
    }

    /// Number of retained fixes
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Drop all history and track state
    pub fn reset(&mut self) {
        self.history.clear();
        self.track = None;
        self.smoothed = None;
        self.last_update = 0;
    }

    fn recent_average(&self, window: usize) -> Point {
        let len = self.history.len();
        let start = len.saturating_sub(window);

        let (mut sx, mut sy, mut n) = (0.0f32, 0.0f32, 0.0f32);
        for i in start..len {
            if let Some(entry) = self.history.get(i) {
                sx += entry.position.x;
                sy += entry.position.y;
                n += 1.0;
            }
        }

        Point::new(sx / n, sy / n)
    }

    fn weighted_average(&self) -> Point {
        let (mut sx, mut sy, mut total) = (0.0f32, 0.0f32, 0.0f32);
        for entry in self.history.iter() {
            let weight = entry.confidence.max(0.01);
            sx += entry.position.x * weight;
            sy += entry.position.y * weight;
            total += weight;
        }

        Point::new(sx / total, sy / total)
    }

    fn kalman_step(&mut self, measurement: Point, now: Timestamp) -> Point {
        let dt_s = if self.track.is_some() {
            (elapsed_ms(self.last_update, now) as f32 / 1000.0).clamp(0.01, 5.0)
        } else {
            0.0
        };

        let (tx, ty) = self
            .track
            .get_or_insert((AxisTrack::new(measurement.x), AxisTrack::new(measurement.y)));

        Point::new(
            tx.update(measurement.x, dt_s, POSITION_KALMAN_Q, POSITION_KALMAN_R),
            ty.update(measurement.y, dt_s, POSITION_KALMAN_Q, POSITION_KALMAN_R),
        )
    }
}

impl Default for PositionFilter {
    fn default() -> Self {
        Self::new(Smoothing::WeightedAverage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thin_history_accepts_anything() {
        let filter = PositionFilter::default();
        assert!(!filter.is_outlier(Point::new(500.0, 500.0)));
    }

    #[test]
    fn jump_beyond_threshold_is_outlier() {
        let mut filter = PositionFilter::default();
        for i in 0..5u64 {
            filter.accept(Point::new(5.0, 5.0), 0.9, i * 1_000);
        }

        assert!(filter.is_outlier(Point::new(20.0, 20.0)));
        assert!(!filter.is_outlier(Point::new(7.0, 6.0)));
    }

    #[test]
    fn weighted_average_favors_confident_fixes() {
        let mut filter = PositionFilter::default();
        filter.accept(Point::new(0.0, 0.0), 0.1, 0);
        let smoothed = filter.accept(Point::new(10.0, 0.0), 0.9, 1_000);

        // The confident fix at x=10 dominates the weak one at x=0
        assert!(smoothed.x > 8.0, "got {:?}", smoothed);
    }

    #[test]
    fn latest_reports_the_smoothed_track() {
        let mut filter = PositionFilter::default();
        filter.accept(Point::new(0.0, 0.0), 0.9, 0);
        let smoothed = filter.accept(Point::new(10.0, 0.0), 0.9, 1_000);

        // Not the raw x=10 entry that went into the history
        let (latest, confidence, timestamp) = filter.latest().unwrap();
        assert_eq!(latest, smoothed);
        assert!(latest.x < 9.0, "got {:?}", latest);
        assert_eq!(timestamp, 1_000);
        assert!((confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn aging_empties_history() {
        let mut filter = PositionFilter::default();
        filter.accept(Point::new(1.0, 1.0), 0.9, 0);
        filter.accept(Point::new(2.0, 2.0), 0.9, 500);

        filter.age_out(20_000);
        assert_eq!(filter.history_len(), 0);
        assert!(filter.latest().is_none());
    }

    #[test]
    fn kalman_tracks_steady_motion() {
        let mut filter = PositionFilter::new(Smoothing::Kalman);

        // Walk along x at 1 m/s, one fix per second
        let mut last = Point::new(0.0, 0.0);
        for i in 0..20u64 {
            last = filter.accept(Point::new(i as f32, 0.0), 0.9, i * 1_000);
        }

        // Track should settle close to the true position with y pinned
        assert!((last.x - 19.0).abs() < 1.0, "got {:?}", last);
        assert!(last.y.abs() < 0.1);
    }

    #[test]
    fn kalman_smooths_jitter() {
        let mut filter = PositionFilter::new(Smoothing::Kalman);

        let noise = [0.4f32, -0.3, 0.2, -0.5, 0.3, -0.2, 0.5, -0.4];
        let mut last = Point::new(0.0, 0.0);
        for (i, n) in noise.iter().cycle().take(30).enumerate() {
            last = filter.accept(Point::new(5.0 + n, 5.0 - n), 0.8, i as u64 * 500);
        }

        assert!((last.x - 5.0).abs() < 0.4, "got {:?}", last);
        assert!((last.y - 5.0).abs() < 0.4);
    }
}
