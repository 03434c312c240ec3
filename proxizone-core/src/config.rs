//! Runtime Configuration Blob
//!
//! ## Overview
//!
//! Deployments differ in beacon placement, zone layout and radio
//! environment, so all of it arrives as one JSON blob (BLE characteristic
//! write or serial command on device, a file in tests):
//!
//! ```json
//! {
//!   "smoother": { "quality_floor_dbm": -92, "filter": "Kalman" },
//!   "registry": { "proximity_rssi_dbm": -65 },
//!   "references": [
//!     { "id": "AA:BB:CC:DD:EE:01", "position": { "x": 0.0, "y": 0.0 },
//!       "tx_power_1m_dbm": -59.0, "path_loss_exponent": 2.0,
//!       "calibrated": true, "accuracy_m": 1.0 }
//!   ],
//!   "zones": [
//!     { "id": "pen", "shape": "circle",
//!       "center": { "x": 5.0, "y": 5.0 }, "radius_m": 3.0,
//!       "alert_mode": "buzzer" }
//!   ]
//! }
//! ```
//!
//! Every section is optional and falls back to the calibrated defaults.
//!
//! ## Atomicity
//!
//! Parsing and validation happen on a detached [`SystemConfig`] value.
//! Nothing touches the running pipeline until the whole blob has been
//! accepted; a malformed or invalid blob leaves the previous configuration
//! fully in effect.

use heapless::Vec;

use crate::{
    constants::{MAX_REFERENCES, MAX_ZONES},
    errors::ConfigError,
    position::{BeaconReference, EstimatorConfig},
    registry::RegistryConfig,
    smoother::SmootherConfig,
    zones::ZoneDefinition,
};

/// Complete system configuration
///
/// The unit that is parsed, validated and applied atomically.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemConfig {
    /// Signal smoother tuning
    #[cfg_attr(feature = "serde", serde(default))]
    pub smoother: Option<SmootherConfig>,
    /// Registry path-loss and grouping tuning
    #[cfg_attr(feature = "serde", serde(default))]
    pub registry: Option<RegistryConfig>,
    /// Estimator tuning
    #[cfg_attr(feature = "serde", serde(default))]
    pub estimator: Option<EstimatorConfig>,
    /// Surveyed beacon references
    #[cfg_attr(feature = "serde", serde(default))]
    pub references: Vec<BeaconReference, MAX_REFERENCES>,
    /// Zone definitions
    #[cfg_attr(feature = "serde", serde(default))]
    pub zones: Vec<ZoneDefinition, MAX_ZONES>,
}

impl SystemConfig {
    /// Parse and validate a JSON blob
    ///
    /// Returns the detached config; nothing has been applied yet.
    #[cfg(feature = "serde")]
    pub fn from_json(blob: &str) -> Result<Self, ConfigError> {
        let config: SystemConfig = serde_json::from_str(blob).map_err(|_e| {
            crate::log_warn!("config parse failed: {}", _e);
            ConfigError::Malformed
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Serialize the current configuration back to JSON
    #[cfg(all(feature = "serde", feature = "std"))]
    pub fn to_json(&self) -> Result<std::string::String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|_| ConfigError::Malformed)
    }

    /// Validate every section without applying anything
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(smoother) = &self.smoother {
            validate_smoother(smoother)?;
        }

        if let Some(registry) = &self.registry {
            if registry.path_loss_exponent < 1.0 || registry.path_loss_exponent > 6.0 {
                return Err(ConfigError::InvalidTuning {
                    reason: "path loss exponent outside [1, 6]",
                });
            }
            if registry.max_range_m <= 0.0 {
                return Err(ConfigError::InvalidTuning {
                    reason: "max range must be positive",
                });
            }
        }

        if let Some(estimator) = &self.estimator {
            if estimator.min_beacons < 3 {
                return Err(ConfigError::InvalidTuning {
                    reason: "trilateration needs at least 3 beacons",
                });
            }
            if !(0.0..=1.0).contains(&estimator.confidence_threshold) {
                return Err(ConfigError::InvalidTuning {
                    reason: "confidence threshold outside [0, 1]",
                });
            }
        }

        for reference in self.references.iter() {
            if reference.id.is_empty() {
                return Err(ConfigError::InvalidReference {
                    reason: "empty beacon id",
                });
            }
            if !reference.position.x.is_finite() || !reference.position.y.is_finite() {
                return Err(ConfigError::InvalidReference {
                    reason: "non-finite coordinates",
                });
            }
            if reference.path_loss_exponent <= 0.0 {
                return Err(ConfigError::InvalidReference {
                    reason: "path loss exponent must be positive",
                });
            }
        }

        let mut seen: Vec<&crate::events::Label, MAX_ZONES> = Vec::new();
        for zone in self.zones.iter() {
            zone.shape.validate()?;
            if seen.iter().any(|id| **id == zone.id) {
                return Err(ConfigError::InvalidZone {
                    reason: "duplicate zone id",
                });
            }
            let _ = seen.push(&zone.id);
        }

        Ok(())
    }
}

fn validate_smoother(config: &SmootherConfig) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&config.iir_alpha) || config.iir_alpha == 0.0 {
        return Err(ConfigError::InvalidTuning {
            reason: "IIR alpha outside (0, 1]",
        });
    }
    if config.kalman_q <= 0.0 || config.kalman_r <= 0.0 {
        return Err(ConfigError::InvalidTuning {
            reason: "Kalman noise must be positive",
        });
    }
    if config.min_valid_samples == 0 || config.min_valid_samples > crate::constants::SAMPLE_WINDOW {
        return Err(ConfigError::InvalidTuning {
            reason: "minimum valid samples outside the window",
        });
    }
    if let crate::smoother::Aggregation::TrimmedMean { trim } = config.aggregation {
        if !(0.0..0.5).contains(&trim) {
            return Err(ConfigError::InvalidTuning {
                reason: "trim fraction outside [0, 0.5)",
            });
        }
    }
    Ok(())
}
