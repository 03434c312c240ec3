//! Tunable Defaults for the Positioning Core
//!
//! Every threshold, window size and timeout used by the pipeline lives here
//! under a name. Runtime configuration (see `config`) overrides most of
//! these; the values are the calibrated defaults for a room-scale indoor
//! deployment with BLE advertising beacons.

// ===== SIGNAL SMOOTHER =====

/// Number of raw samples retained per beacon window.
///
/// Ten advertising packets at a typical 100ms interval give a ~1s window,
/// enough to reject multipath spikes without visible lag.
pub const SAMPLE_WINDOW: usize = 10;

/// Minimum valid samples before a smoothed value is published.
///
/// Half the window: publishing earlier lets a single spike dominate the
/// median.
pub const MIN_VALID_SAMPLES: usize = SAMPLE_WINDOW / 2;

/// Quality floor in dBm; weaker samples are discarded.
pub const QUALITY_FLOOR_DBM: i16 = -95;

/// Maximum age of the oldest retained sample for the window to count as
/// fresh (milliseconds).
pub const MAX_WINDOW_LATENCY_MS: u64 = 500;

/// Fraction trimmed from each end by the trimmed-mean aggregator.
pub const TRIM_FRACTION: f32 = 0.1;

/// Default IIR smoothing coefficient (weight of the newest aggregate).
pub const IIR_ALPHA: f32 = 0.3;

/// Default scalar Kalman process noise (Q).
pub const SCALAR_KALMAN_Q: f32 = 0.1;

/// Default scalar Kalman measurement noise (R).
pub const SCALAR_KALMAN_R: f32 = 2.0;

/// Filter counts as converged once its error covariance drops below this.
pub const FILTER_CONVERGENCE_COVARIANCE: f32 = 0.5;

/// Beacon slots tracked by the smoother; newly seen beacons are dropped
/// (not an error) while all slots are occupied.
pub const MAX_TRACKED_BEACONS: usize = 16;

/// Idle time after which a smoother slot is reclaimed (milliseconds).
pub const SMOOTHER_SLOT_TIMEOUT_MS: u64 = 10_000;

// ===== BEACON REGISTRY =====

/// Maximum beacons held by the registry.
pub const MAX_REGISTRY_BEACONS: usize = 16;

/// Maximum distinct location groups.
pub const MAX_LOCATIONS: usize = 8;

/// Beacons unseen for this long are expired (milliseconds).
pub const BEACON_TIMEOUT_MS: u64 = 30_000;

/// RSSI above which a location counts as "in proximity" (dBm).
pub const PROXIMITY_RSSI_DBM: i16 = -70;

/// Calibrated received power at 1 m (dBm).
///
/// From the device calibration runs; individual references may override it.
pub const TX_POWER_AT_1M_DBM: f32 = -59.0;

/// Indoor path-loss exponent (2.0 = free space; walls push it toward 3).
pub const PATH_LOSS_EXPONENT: f32 = 2.0;

/// Distances are clamped to this ceiling (meters).
pub const MAX_BEACON_RANGE_M: f32 = 50.0;

/// Subtracted from every distance estimate so physical contact reads ~0 m.
pub const CONTACT_OFFSET_M: f32 = 0.1;

// ===== POSITION ESTIMATOR =====

/// Minimum calibrated references for trilateration.
pub const MIN_TRILATERATION_BEACONS: usize = 3;

/// Beacon count at which the count-ratio quality factor saturates.
pub const IDEAL_BEACON_COUNT: usize = 5;

/// References unseen for this long are excluded from solves (milliseconds).
pub const REFERENCE_STALE_MS: u64 = 10_000;

/// Maximum beacon references the estimator holds.
pub const MAX_REFERENCES: usize = 16;

/// Estimates below this confidence are discarded.
pub const CONFIDENCE_THRESHOLD: f32 = 0.6;

/// Position history depth used for outlier rejection and smoothing.
pub const POSITION_HISTORY: usize = 10;

/// History entries older than this are aged out (milliseconds).
pub const POSITION_MAX_AGE_MS: u64 = 10_000;

/// New estimates farther than this from the recent running average are
/// rejected as outliers (same units as beacon coordinates).
pub const OUTLIER_DISTANCE: f32 = 10.0;

/// History entries averaged for the outlier check.
pub const OUTLIER_WINDOW: usize = 5;

/// |det| below this marks the trilateration normal equations singular.
pub const SINGULAR_DET_EPSILON: f32 = 1e-6;

/// Sanity bound on solver output coordinates.
pub const MAX_COORDINATE: f32 = 1000.0;

/// Position Kalman process noise.
pub const POSITION_KALMAN_Q: f32 = 0.1;

/// Position Kalman measurement noise.
pub const POSITION_KALMAN_R: f32 = 1.0;

// ===== ZONE ENGINE =====

/// Maximum zones tracked.
pub const MAX_ZONES: usize = 16;

/// Maximum vertices in a polygon zone.
pub const MAX_POLYGON_VERTICES: usize = 12;

/// Occupancy must persist this long before a transition commits
/// (milliseconds).
pub const ZONE_ENTRY_DELAY_MS: u64 = 2_000;

/// Minimum spacing between alert callbacks for one zone (milliseconds).
pub const ZONE_COOLDOWN_MS: u64 = 5_000;

/// Transition records retained in the ring buffer.
pub const TRANSITION_HISTORY: usize = 32;

/// With no valid position for this long, occupancy clears and the location
/// becomes unknown (milliseconds).
pub const POSITION_STALENESS_MS: u64 = 15_000;

// ===== SAMPLE QUEUE =====

/// Capacity of the radio-to-tick sample queue. Must be a power of two.
pub const SAMPLE_QUEUE_CAPACITY: usize = 64;
