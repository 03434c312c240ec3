//! Position Estimator: Reference Table, Solver Orchestration, Calibration
//!
//! ## Overview
//!
//! Turns per-beacon smoothed RSSI into a 2D position in the deployment's
//! local coordinate frame:
//!
//! ```text
//! measurements ──→ calibrated refs ──→ ranges ──→ trilateration
//!                                                      │ singular
//!                                                      ▼
//!                                             weighted centroid
//!                                                      │
//!                validate ← outlier gate ← confidence/quality
//!                    │
//!                    ▼
//!          smoothing (CWMA / CV-Kalman) ──→ PositionEstimate
//! ```
//!
//! Every failure mode maps to a [`PositionError`] variant; the caller keeps
//! its last-known state and the pipeline simply skips the zone update.

pub mod filter;
pub mod solver;

use heapless::Vec;

use crate::{
    constants::{
        CONFIDENCE_THRESHOLD, MAX_COORDINATE, MAX_REFERENCES, MIN_TRILATERATION_BEACONS,
        REFERENCE_STALE_MS,
    },
    errors::{ConfigError, PositionError, PositionResult},
    events::{BeaconId, Point},
    time::{elapsed_ms, Timestamp},
};

pub use filter::{PositionFilter, Smoothing};
pub use solver::{RangeObservation, SolveMethod};

/// A surveyed beacon the estimator can range against
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BeaconReference {
    /// Beacon identity, matches [`crate::events::RawSample::beacon`]
    pub id: BeaconId,
    /// Surveyed position (m, local frame)
    pub position: Point,
    /// Received power at 1 m for this beacon (dBm)
    pub tx_power_1m_dbm: f32,
    /// Per-beacon path-loss exponent
    pub path_loss_exponent: f32,
    /// Calibration performed; uncalibrated refs are excluded from solves
    pub calibrated: bool,
    /// Expected ranging accuracy (m)
    pub accuracy_m: f32,
    /// Last time a measurement matched this reference
    #[cfg_attr(feature = "serde", serde(skip))]
    pub last_seen: Timestamp,
}

/// One smoothed RSSI input to [`PositionEstimator::estimate`]
#[derive(Debug, Clone, Copy)]
pub struct Measurement {
    /// Beacon identity
    pub id: BeaconId,
    /// Smoothed RSSI (dBm)
    pub rssi_dbm: i16,
    /// When the smoothed value was produced; stale measurements are skipped
    pub timestamp: Timestamp,
}

/// A validated, smoothed position fix
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PositionEstimate {
    /// Smoothed position (m, local frame)
    pub position: Point,
    /// Residual-based confidence in [0, 1]
    pub confidence: f32,
    /// Expected position error (m)
    pub accuracy_m: f32,
    /// Blended quality score (residuals, count, geometry)
    pub quality: f32,
    /// References used in the solve
    pub beacon_count: usize,
    /// Solver that produced the raw fix
    pub method: SolveMethod,
    /// Horizontal dilution of precision
    pub hdop: f32,
    /// Fix timestamp
    pub timestamp: Timestamp,
}

/// Estimator tuning
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EstimatorConfig {
    /// Minimum calibrated references for a solve
    pub min_beacons: usize,
    /// Estimates below this confidence are discarded
    pub confidence_threshold: f32,
    /// References unmatched for this long are excluded (ms)
    pub reference_stale_ms: u64,
    /// Smoothing strategy for accepted fixes
    pub smoothing: Smoothing,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_beacons: MIN_TRILATERATION_BEACONS,
            confidence_threshold: CONFIDENCE_THRESHOLD,
            reference_stale_ms: REFERENCE_STALE_MS,
            smoothing: Smoothing::WeightedAverage,
        }
    }
}

/// Solve counters for the status snapshot
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct EstimatorStats {
    /// Successful fixes
    pub solves: u32,
    /// Fixes produced by the centroid fallback
    pub fallbacks: u32,
    /// Fixes rejected by the outlier gate
    pub outliers: u32,
    /// Solve attempts that returned an error
    pub failures: u32,
}

/// Position estimator with a fixed-capacity reference table
pub struct PositionEstimator {
    config: EstimatorConfig,
    references: Vec<BeaconReference, MAX_REFERENCES>,
    filter: PositionFilter,
    stats: EstimatorStats,
}

impl PositionEstimator {
    /// Create an estimator with the given tuning and no references
    pub fn new(config: EstimatorConfig) -> Self {
        Self {
            filter: PositionFilter::new(config.smoothing),
            config,
            references: Vec::new(),
            stats: EstimatorStats::default(),
        }
    }

    /// Install or replace a beacon reference
    pub fn add_reference(&mut self, reference: BeaconReference) -> Result<(), ConfigError> {
        if let Some(existing) = self.references.iter_mut().find(|r| r.id == reference.id) {
            *existing = reference;
            return Ok(());
        }

        self.references
            .push(reference)
            .map_err(|_| ConfigError::CapacityExceeded {
                what: "beacon references",
            })
    }

    /// Remove a reference by identity
    pub fn remove_reference(&mut self, id: &BeaconId) -> bool {
        let before = self.references.len();
        self.references.retain(|r| r.id != *id);
        self.references.len() != before
    }

    /// Drop all references
    pub fn clear_references(&mut self) {
        self.references.clear();
    }

    /// Installed references
    pub fn references(&self) -> &[BeaconReference] {
        &self.references
    }

    /// Refine a reference's 1m power from samples taken at a known position
    ///
    /// `tx = mean(rssi) + 10·n·log10(d)` where `d` is the true distance
    /// between the known position and the surveyed beacon. Marks the
    /// reference calibrated.
    pub fn calibrate(
        &mut self,
        id: &BeaconId,
        known_position: Point,
        rssi_samples: &[i16],
    ) -> Result<(), ConfigError> {
        if rssi_samples.is_empty() {
            return Err(ConfigError::InvalidReference {
                reason: "calibration needs at least one sample",
            });
        }

        let reference = self
            .references
            .iter_mut()
            .find(|r| r.id == *id)
            .ok_or(ConfigError::InvalidReference {
                reason: "unknown beacon id",
            })?;

        let distance = known_position.distance_to(&reference.position);
        if distance < 0.1 {
            return Err(ConfigError::InvalidReference {
                reason: "calibration point too close to the beacon",
            });
        }

        let sum: i32 = rssi_samples.iter().map(|&r| r as i32).sum();
        let mean_rssi = sum as f32 / rssi_samples.len() as f32;

        reference.tx_power_1m_dbm =
            mean_rssi + 10.0 * reference.path_loss_exponent * libm::log10f(distance);
        reference.calibrated = true;

        crate::log_info!(
            "calibrated {}: tx_1m={:.1}dBm from {} samples at {:.1}m",
            reference.id,
            reference.tx_power_1m_dbm,
            rssi_samples.len(),
            distance
        );

        Ok(())
    }

    /// Produce a validated position fix from the current measurements
    pub fn estimate(
        &mut self,
        measurements: &[Measurement],
        now: Timestamp,
    ) -> PositionResult<PositionEstimate> {
        let result = self.solve(measurements, now);
        match result {
            Ok(_) => self.stats.solves += 1,
            // Outliers are counted by the filter
            Err(PositionError::Outlier) => {}
            Err(_) => self.stats.failures += 1,
        }
        result
    }

    fn solve(
        &mut self,
        measurements: &[Measurement],
        now: Timestamp,
    ) -> PositionResult<PositionEstimate> {
        self.filter.age_out(now);

        let observations = self.build_observations(measurements, now);
        if observations.len() < self.config.min_beacons {
            return Err(PositionError::InsufficientBeacons {
                required: self.config.min_beacons,
                available: observations.len(),
            });
        }

        let (raw, method) = match solver::trilaterate(&observations) {
            Ok(point) => (point, SolveMethod::Trilateration),
            Err(PositionError::SingularGeometry) => {
                self.stats.fallbacks += 1;
                (
                    solver::weighted_centroid(&observations)?,
                    SolveMethod::WeightedCentroid,
                )
            }
            Err(e) => return Err(e),
        };

        if !raw.x.is_finite()
            || !raw.y.is_finite()
            || libm::fabsf(raw.x) > MAX_COORDINATE
            || libm::fabsf(raw.y) > MAX_COORDINATE
        {
            return Err(PositionError::ImplausibleEstimate);
        }

        let residual = solver::residual_error(&observations, raw);
        let hdop = solver::hdop(&observations, raw);
        let confidence = 1.0 / (1.0 + residual);
        let quality = solver::quality_score(residual, observations.len(), hdop);

        if confidence < self.config.confidence_threshold {
            return Err(PositionError::LowConfidence);
        }

        if self.filter.is_outlier(raw) {
            self.filter.note_outlier();
            return Err(PositionError::Outlier);
        }

        let smoothed = self.filter.accept(raw, confidence, now);

        Ok(PositionEstimate {
            position: smoothed,
            confidence,
            accuracy_m: residual.max(0.1) * hdop.max(1.0),
            quality,
            beacon_count: observations.len(),
            method,
            hdop,
            timestamp: now,
        })
    }

    fn build_observations(
        &mut self,
        measurements: &[Measurement],
        now: Timestamp,
    ) -> Vec<RangeObservation, MAX_REFERENCES> {
        let stale_ms = self.config.reference_stale_ms;
        let mut observations = Vec::new();

        for measurement in measurements {
            if elapsed_ms(measurement.timestamp, now) > stale_ms {
                continue;
            }

            let Some(reference) = self
                .references
                .iter_mut()
                .find(|r| r.id == measurement.id)
            else {
                continue;
            };

            reference.last_seen = now;
            if !reference.calibrated {
                continue;
            }

            let exponent = (reference.tx_power_1m_dbm - measurement.rssi_dbm as f32)
                / (10.0 * reference.path_loss_exponent);
            let distance = libm::powf(10.0, exponent);

            // Full vec means MAX_REFERENCES observations already; enough
            let _ = observations.push(RangeObservation {
                position: reference.position,
                distance_m: distance,
            });
        }

        observations
    }

    /// Latest smoothed position surviving history aging
    pub fn last_fix(&self) -> Option<(Point, f32, Timestamp)> {
        self.filter.latest()
    }

    /// Solve counters
    pub fn stats(&self) -> EstimatorStats {
        EstimatorStats {
            outliers: self.filter.outliers_rejected(),
            ..self.stats
        }
    }

    /// Drop history and track state, keep references
    pub fn reset_history(&mut self) {
        self.filter.reset();
    }

    /// Replace the tuning; smoothing changes reset the track
    pub fn set_config(&mut self, config: EstimatorConfig) {
        if config.smoothing != self.config.smoothing {
            self.filter = PositionFilter::new(config.smoothing);
        }
        self.config = config;
    }

    /// Current tuning
    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }
}

impl Default for PositionEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{PATH_LOSS_EXPONENT, TX_POWER_AT_1M_DBM};

    fn beacon(n: u8) -> BeaconId {
        use core::fmt::Write;
        let mut s = heapless::String::<23>::new();
        write!(s, "AA:BB:CC:DD:EE:{:02X}", n).unwrap();
        BeaconId::new(&s).unwrap()
    }

    fn reference(n: u8, x: f32, y: f32) -> BeaconReference {
        BeaconReference {
            id: beacon(n),
            position: Point::new(x, y),
            tx_power_1m_dbm: TX_POWER_AT_1M_DBM,
            path_loss_exponent: PATH_LOSS_EXPONENT,
            calibrated: true,
            accuracy_m: 1.0,
            last_seen: 0,
        }
    }

    /// RSSI that the default model maps back to exactly `distance`
    fn rssi_for(distance: f32) -> i16 {
        let rssi = TX_POWER_AT_1M_DBM - 10.0 * PATH_LOSS_EXPONENT * libm::log10f(distance);
        libm::roundf(rssi) as i16
    }

    fn m(n: u8, rssi_dbm: i16, timestamp: Timestamp) -> Measurement {
        Measurement {
            id: beacon(n),
            rssi_dbm,
            timestamp,
        }
    }

    fn square_estimator() -> PositionEstimator {
        let mut estimator = PositionEstimator::default();
        estimator.add_reference(reference(1, 0.0, 0.0)).unwrap();
        estimator.add_reference(reference(2, 10.0, 0.0)).unwrap();
        estimator.add_reference(reference(3, 0.0, 10.0)).unwrap();
        estimator.add_reference(reference(4, 10.0, 10.0)).unwrap();
        estimator
    }

    #[test]
    fn two_beacons_is_insufficient() {
        let mut estimator = square_estimator();
        let measurements = [m(1, -60, 0), m(2, -60, 0)];

        assert!(matches!(
            estimator.estimate(&measurements, 0),
            Err(PositionError::InsufficientBeacons {
                required: 3,
                available: 2
            })
        ));
        assert_eq!(estimator.stats().failures, 1);
    }

    #[test]
    fn uncalibrated_references_excluded() {
        let mut estimator = square_estimator();
        let mut uncal = reference(5, 5.0, 5.0);
        uncal.calibrated = false;
        estimator.add_reference(uncal).unwrap();

        let measurements = [m(1, -60, 0), m(2, -60, 0), m(5, -50, 0)];

        // Only two usable references remain
        assert!(matches!(
            estimator.estimate(&measurements, 0),
            Err(PositionError::InsufficientBeacons { available: 2, .. })
        ));
    }

    #[test]
    fn clean_geometry_solves_near_truth() {
        let mut estimator = square_estimator();
        // True position (5, 5): equidistant sqrt(50) ≈ 7.07m from all corners
        let d = libm::sqrtf(50.0);
        let rssi = rssi_for(d);
        let measurements = [
            m(1, rssi, 1_000),
            m(2, rssi, 1_000),
            m(3, rssi, 1_000),
            m(4, rssi, 1_000),
        ];

        let estimate = estimator.estimate(&measurements, 1_000).unwrap();
        assert!(estimate.position.distance_to(&Point::new(5.0, 5.0)) < 0.5);
        assert!(estimate.confidence > 0.8);
        assert_eq!(estimate.method, SolveMethod::Trilateration);
        assert_eq!(estimate.beacon_count, 4);
    }

    #[test]
    fn collinear_geometry_falls_back_to_centroid() {
        let mut estimator = PositionEstimator::default();
        estimator.add_reference(reference(1, 0.0, 0.0)).unwrap();
        estimator.add_reference(reference(2, 5.0, 0.0)).unwrap();
        estimator.add_reference(reference(3, 10.0, 0.0)).unwrap();

        let rssi = rssi_for(3.0);
        let measurements = [m(1, rssi, 0), m(2, rssi, 0), m(3, rssi, 0)];

        match estimator.estimate(&measurements, 0) {
            Ok(estimate) => {
                assert_eq!(estimate.method, SolveMethod::WeightedCentroid);
                assert_eq!(estimator.stats().fallbacks, 1);
            }
            // Centroid fixes on a line can fail the confidence gate; the
            // fallback must still have been attempted
            Err(PositionError::LowConfidence) => {
                assert_eq!(estimator.stats().fallbacks, 1);
            }
            Err(e) => panic!("unexpected error {:?}", e),
        }
    }

    #[test]
    fn sudden_jump_rejected_as_outlier() {
        let mut estimator = square_estimator();
        let d = libm::sqrtf(50.0);
        let rssi = rssi_for(d);

        for i in 0..5u64 {
            let now = i * 1_000;
            let steady = [m(1, rssi, now), m(2, rssi, now), m(3, rssi, now), m(4, rssi, now)];
            estimator.estimate(&steady, now).unwrap();
        }

        // Consistent ranges placing the fix near (20, 20), 21 units away
        // from the established (5, 5) track
        let jumped = [
            m(1, rssi_for(28.284), 6_000),
            m(2, rssi_for(22.360), 6_000),
            m(3, rssi_for(22.360), 6_000),
            m(4, rssi_for(14.142), 6_000),
        ];

        assert!(matches!(
            estimator.estimate(&jumped, 6_000),
            Err(PositionError::Outlier)
        ));
        assert_eq!(estimator.stats().outliers, 1);

        // Last known fix is still the steady one
        let (position, _, _) = estimator.last_fix().unwrap();
        assert!(position.distance_to(&Point::new(5.0, 5.0)) < 1.0);
    }

    #[test]
    fn calibration_updates_tx_power() {
        let mut estimator = PositionEstimator::default();
        let mut uncal = reference(1, 0.0, 0.0);
        uncal.calibrated = false;
        uncal.tx_power_1m_dbm = -50.0;
        estimator.add_reference(uncal).unwrap();

        // Samples taken 10m away averaging -79dBm imply tx_1m = -59
        estimator
            .calibrate(&beacon(1), Point::new(10.0, 0.0), &[-79, -79, -79])
            .unwrap();

        let reference = &estimator.references()[0];
        assert!(reference.calibrated);
        assert!((reference.tx_power_1m_dbm - (-59.0)).abs() < 0.1);
    }

    #[test]
    fn calibration_rejects_unknown_beacon() {
        let mut estimator = PositionEstimator::default();
        assert!(matches!(
            estimator.calibrate(&beacon(9), Point::new(1.0, 0.0), &[-60]),
            Err(ConfigError::InvalidReference { .. })
        ));
    }
}
