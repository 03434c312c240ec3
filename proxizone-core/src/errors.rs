//! Error Types for the Positioning Pipeline
//!
//! ## Design Philosophy
//!
//! Nothing in this crate is fatal to the device. The taxonomy mirrors how
//! each failure is consumed:
//!
//! 1. **Data quality** failures (weak or corrupted samples) are not errors at
//!    all - the smoother rejects them silently and bumps counters, because a
//!    noisy radio produces thousands of them per minute.
//!
//! 2. **Insufficient data** and **geometric degeneracy** are explicit
//!    [`PositionError`] values: the caller holds last-known state and tries
//!    again next cycle. Degeneracy triggers an automatic fallback solver
//!    before it ever reaches the caller.
//!
//! 3. **Configuration** failures are [`ConfigError`] results from a load
//!    attempt; the previously valid configuration stays in effect.
//!
//! All variants are small and `Copy` - errors travel through hot per-tick
//! paths and must not allocate.

use thiserror_no_std::Error;

/// Result type for position estimation
pub type PositionResult<T> = Result<T, PositionError>;

/// Errors from the position estimator - kept small for embedded use
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionError {
    /// Too few usable beacon references this cycle
    #[error("Need {required} beacons, have {available}")]
    InsufficientBeacons {
        /// Minimum references required for trilateration
        required: usize,
        /// Calibrated, non-stale references actually available
        available: usize,
    },

    /// Beacon geometry is collinear or otherwise singular
    #[error("Beacon geometry is degenerate")]
    SingularGeometry,

    /// Solver produced a position below the confidence threshold
    #[error("Estimate confidence below threshold")]
    LowConfidence,

    /// Estimate rejected as an outlier against recent history
    #[error("Estimate rejected as outlier")]
    Outlier,

    /// Solver produced NaN/infinite or out-of-bounds coordinates
    #[error("Estimate coordinates are not plausible")]
    ImplausibleEstimate,
}

/// Errors from configuration loading
///
/// A failed load never disturbs the running configuration.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Blob could not be parsed at all
    #[error("Configuration blob is malformed")]
    Malformed,

    /// A zone definition is invalid
    #[error("Invalid zone definition: {reason}")]
    InvalidZone { reason: &'static str },

    /// A beacon reference is invalid
    #[error("Invalid beacon reference: {reason}")]
    InvalidReference { reason: &'static str },

    /// Smoother tuning parameter out of range
    #[error("Invalid smoother tuning: {reason}")]
    InvalidTuning { reason: &'static str },

    /// More entries than the fixed-capacity stores can hold
    #[error("Configuration exceeds capacity: {what}")]
    CapacityExceeded { what: &'static str },
}

#[cfg(feature = "defmt")]
impl defmt::Format for PositionError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::InsufficientBeacons { required, available } =>
                defmt::write!(fmt, "Need {} beacons, have {}", required, available),
            Self::SingularGeometry =>
                defmt::write!(fmt, "Degenerate beacon geometry"),
            Self::LowConfidence =>
                defmt::write!(fmt, "Confidence below threshold"),
            Self::Outlier =>
                defmt::write!(fmt, "Outlier estimate rejected"),
            Self::ImplausibleEstimate =>
                defmt::write!(fmt, "Implausible coordinates"),
        }
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ConfigError {
    fn format(&self, fmt: defmt::Formatter) {
        match self {
            Self::Malformed => defmt::write!(fmt, "Malformed config"),
            Self::InvalidZone { reason } => defmt::write!(fmt, "Invalid zone: {}", reason),
            Self::InvalidReference { reason } => defmt::write!(fmt, "Invalid reference: {}", reason),
            Self::InvalidTuning { reason } => defmt::write!(fmt, "Invalid tuning: {}", reason),
            Self::CapacityExceeded { what } => defmt::write!(fmt, "Over capacity: {}", what),
        }
    }
}
