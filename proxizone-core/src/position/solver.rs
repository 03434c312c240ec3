//! Closed-Form 2D Trilateration and Quality Metrics
//!
//! ## Overview
//!
//! Given range observations to beacons at known coordinates, recover the
//! receiver position. Primary path is least-squares trilateration with
//! reference-beacon linearization; when the geometry is degenerate (beacons
//! nearly collinear) the caller falls back to a weighted centroid.
//!
//! ## Linearization
//!
//! Subtracting the first beacon's circle equation from each of the others
//! removes the quadratic terms and leaves a linear system:
//!
//! ```text
//! 2(xᵢ−x₀)·x + 2(yᵢ−y₀)·y = d₀² − dᵢ² + xᵢ² − x₀² + yᵢ² − y₀²
//! ```
//!
//! solved via the 2x2 normal equations in closed form. No matrix library,
//! no iteration, bounded time on a microcontroller.

use crate::{
    constants::{IDEAL_BEACON_COUNT, SINGULAR_DET_EPSILON},
    errors::{PositionError, PositionResult},
    events::Point,
};

/// One beacon range input to the solver
#[derive(Debug, Clone, Copy)]
pub struct RangeObservation {
    /// Surveyed beacon position
    pub position: Point,
    /// Estimated distance to that beacon (m)
    pub distance_m: f32,
}

/// Which solver produced a position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum SolveMethod {
    /// Least-squares trilateration
    Trilateration,
    /// Inverse-distance weighted centroid (degenerate-geometry fallback)
    WeightedCentroid,
}

/// Least-squares trilateration over three or more range observations
///
/// Fails with [`PositionError::SingularGeometry`] when the beacons are
/// close to collinear; callers fall back to [`weighted_centroid`].
pub fn trilaterate(observations: &[RangeObservation]) -> PositionResult<Point> {
    if observations.len() < 3 {
        return Err(PositionError::InsufficientBeacons {
            required: 3,
            available: observations.len(),
        });
    }

    let origin = observations[0];
    let (x0, y0, d0) = (origin.position.x, origin.position.y, origin.distance_m);

    // Accumulate the 2x2 normal equations of A·p = c
    let (mut saa, mut sab, mut sbb, mut sac, mut sbc) = (0.0f32, 0.0f32, 0.0f32, 0.0f32, 0.0f32);

    for obs in &observations[1..] {
        let (xi, yi, di) = (obs.position.x, obs.position.y, obs.distance_m);

        let a = 2.0 * (xi - x0);
        let b = 2.0 * (yi - y0);
        let c = d0 * d0 - di * di + xi * xi - x0 * x0 + yi * yi - y0 * y0;

        saa += a * a;
        sab += a * b;
        sbb += b * b;
        sac += a * c;
        sbc += b * c;
    }

    let det = saa * sbb - sab * sab;
    if libm::fabsf(det) < SINGULAR_DET_EPSILON {
        return Err(PositionError::SingularGeometry);
    }

    Ok(Point {
        x: (sac * sbb - sbc * sab) / det,
        y: (saa * sbc - sab * sac) / det,
    })
}

/// Inverse-distance weighted centroid
///
/// Coarse but never degenerate: a usable position even when every beacon
/// sits on one wall.
pub fn weighted_centroid(observations: &[RangeObservation]) -> PositionResult<Point> {
    if observations.is_empty() {
        return Err(PositionError::InsufficientBeacons {
            required: 1,
            available: 0,
        });
    }

    let (mut wx, mut wy, mut total) = (0.0f32, 0.0f32, 0.0f32);
    for obs in observations {
        // Close beacons dominate; clamp so a contact reading cannot blow up
        let weight = 1.0 / obs.distance_m.max(0.1);
        wx += obs.position.x * weight;
        wy += obs.position.y * weight;
        total += weight;
    }

    Ok(Point {
        x: wx / total,
        y: wy / total,
    })
}

/// RMS mismatch between solved position and the measured ranges (m)
pub fn residual_error(observations: &[RangeObservation], position: Point) -> f32 {
    if observations.is_empty() {
        return 0.0;
    }

    let mut sum_sq = 0.0f32;
    for obs in observations {
        let predicted = position.distance_to(&obs.position);
        let residual = predicted - obs.distance_m;
        sum_sq += residual * residual;
    }

    libm::sqrtf(sum_sq / observations.len() as f32)
}

/// Horizontal dilution of precision at the solved position
///
/// Computed from the unit vectors toward each beacon; low values mean the
/// beacons surround the receiver, high values mean they cluster in one
/// direction and small range errors swing the fix widely.
pub fn hdop(observations: &[RangeObservation], position: Point) -> f32 {
    const DEGENERATE_HDOP: f32 = 99.0;

    if observations.len() < 2 {
        return DEGENERATE_HDOP;
    }

    let (mut sxx, mut sxy, mut syy) = (0.0f32, 0.0f32, 0.0f32);
    for obs in observations {
        let dx = obs.position.x - position.x;
        let dy = obs.position.y - position.y;
        let range = libm::sqrtf(dx * dx + dy * dy).max(0.1);

        let (ux, uy) = (dx / range, dy / range);
        sxx += ux * ux;
        sxy += ux * uy;
        syy += uy * uy;
    }

    let det = sxx * syy - sxy * sxy;
    if libm::fabsf(det) < SINGULAR_DET_EPSILON {
        return DEGENERATE_HDOP;
    }

    // trace of (GᵀG)⁻¹ for the 2x2 case
    libm::sqrtf((sxx + syy) / det).min(DEGENERATE_HDOP)
}

/// Blended quality score in [0, 1]
///
/// Mean of three factors: residual agreement, beacon count against the
/// ideal, and HDOP-derived geometry quality.
pub fn quality_score(residual_m: f32, beacon_count: usize, hdop_value: f32) -> f32 {
    let residual_score = 1.0 / (1.0 + residual_m.max(0.0));
    let count_score = (beacon_count as f32 / IDEAL_BEACON_COUNT as f32).min(1.0);
    let geometry_score = (1.0 / hdop_value.max(1.0)).min(1.0);

    (residual_score + count_score + geometry_score) / 3.0
}
