//! Cooperative Tick Orchestrator
//!
//! ## Overview
//!
//! Wires the stages into one pass that runs on the main loop (or an RTOS
//! task), typically every 100-500ms:
//!
//! ```text
//! tick(now):
//!   drain queue ──→ smoother ──→ registry (names, groups, proximity)
//!                      │
//!                 ready beacons ──→ estimator ──→ zone engine ──→ AlertSink
//! ```
//!
//! The radio callback only pushes into the shared [`SampleQueue`]; every
//! other structure is owned here and touched solely on the tick, so the
//! crate needs no locking beyond the queue's atomics.
//!
//! ## Name Registration
//!
//! Queued samples carry just the beacon identity to stay compact. The radio
//! driver reports advertised names separately via
//! [`Pipeline::register_name`] whenever a scan response carries one; samples
//! from unnamed beacons are tracked under the `Unknown` location.

use heapless::FnvIndexMap;

use crate::{
    config::SystemConfig,
    constants::{MAX_LOCATIONS, MAX_REFERENCES, MAX_ZONES, SAMPLE_QUEUE_CAPACITY},
    errors::ConfigError,
    events::{AlertSink, BeaconId, Label, Point, ProximityChange, ZoneTransition},
    position::{Measurement, PositionEstimate, PositionEstimator},
    queue::SampleQueue,
    registry::{BeaconName, BeaconRegistry, LocationGroup},
    smoother::SignalSmoother,
    time::Timestamp,
    zones::ZoneEngine,
};

/// Per-tick outcome counters
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TickStats {
    /// Ticks executed
    pub ticks: u32,
    /// Samples drained from the queue in total
    pub samples_drained: u32,
    /// Ticks that produced a position fix
    pub fixes: u32,
}

/// Serializable system state for the external telemetry reporter
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct StatusSnapshot {
    /// Snapshot timestamp
    pub timestamp: Timestamp,
    /// Latest smoothed position, the same track `tick` hands consumers
    pub position: Option<Point>,
    /// Confidence of that position
    pub confidence: Option<f32>,
    /// False once the position has been stale past the limit
    pub location_known: bool,
    /// Zones currently occupied
    pub occupied_zones: heapless::Vec<Label, MAX_ZONES>,
    /// Most recent committed transition
    pub last_transition: Option<ZoneTransition>,
    /// Beacons with active smoother slots
    pub tracked_beacons: usize,
    /// Smoother counters
    pub smoother: crate::smoother::SmootherStats,
    /// Estimator counters
    pub estimator: crate::position::EstimatorStats,
    /// Tick counters
    pub tick: TickStats,
    /// Samples dropped by queue overflow
    pub queue_dropped: u32,
}

/// The assembled positioning pipeline
///
/// Owns every stage; borrows the sample queue shared with the radio
/// callback and takes the alert sink per tick.
pub struct Pipeline<'q> {
    queue: &'q SampleQueue<SAMPLE_QUEUE_CAPACITY>,
    smoother: SignalSmoother,
    registry: BeaconRegistry,
    estimator: PositionEstimator,
    zones: ZoneEngine,
    names: FnvIndexMap<BeaconId, BeaconName, MAX_REFERENCES>,
    proximity: FnvIndexMap<Label, bool, MAX_LOCATIONS>,
    stats: TickStats,
}

impl<'q> Pipeline<'q> {
    /// Assemble a pipeline with default tuning around a shared queue
    pub fn new(queue: &'q SampleQueue<SAMPLE_QUEUE_CAPACITY>) -> Self {
        Self {
            queue,
            smoother: SignalSmoother::default(),
            registry: BeaconRegistry::default(),
            estimator: PositionEstimator::default(),
            zones: ZoneEngine::new(),
            names: FnvIndexMap::new(),
            proximity: FnvIndexMap::new(),
            stats: TickStats::default(),
        }
    }

    /// Record a beacon's advertised name (radio driver, scan response path)
    pub fn register_name(&mut self, id: &BeaconId, name: &str) {
        let _ = self.names.insert(*id, BeaconName::truncated(name));
    }

    /// Run one cooperative pass over all stages
    ///
    /// Returns the position fix when this tick produced one. All alert
    /// callbacks fire synchronously inside this call.
    pub fn tick(&mut self, now: Timestamp, sink: &mut dyn AlertSink) -> Option<PositionEstimate> {
        self.stats.ticks += 1;

        while let Some(sample) = self.queue.pop() {
            self.stats.samples_drained += 1;
            self.smoother.accept_sample(
                &sample.beacon,
                sample.rssi_dbm,
                sample.quality_valid,
                sample.timestamp,
            );
        }

        self.smoother.expire(now);

        let mut measurements: heapless::Vec<Measurement, MAX_REFERENCES> = heapless::Vec::new();
        for (id, rssi_dbm) in self.smoother.ready(now) {
            let name = self.names.get(&id).map(|n| n.as_str()).unwrap_or("");
            self.registry.observe(name, &id, rssi_dbm, now);

            let _ = measurements.push(Measurement {
                id,
                rssi_dbm,
                timestamp: now,
            });
        }

        self.registry.expire(now);
        self.emit_proximity_changes(now, sink);

        // Idle ticks (no ready beacons) are not solve attempts
        let fix = if measurements.is_empty() {
            None
        } else {
            self.estimator.estimate(&measurements, now).ok()
        };
        let position = fix.map(|f| (f.position, f.confidence));
        self.zones.update(position, now, sink);

        if fix.is_some() {
            self.stats.fixes += 1;
        }
        fix
    }

    /// Proximity edge detection over the registry's location groups
    ///
    /// Runs off raw beacon strength, so it keeps working when positioning
    /// has too few references for a fix.
    fn emit_proximity_changes(&mut self, now: Timestamp, sink: &mut dyn AlertSink) {
        let groups: heapless::Vec<LocationGroup, MAX_LOCATIONS> =
            self.registry.groups().iter().copied().collect();

        for group in &groups {
            let was = self.proximity.get(&group.location).copied().unwrap_or(false);
            if group.in_proximity != was {
                let _ = self.proximity.insert(group.location, group.in_proximity);
                sink.proximity_change(&ProximityChange {
                    location: group.location,
                    in_range: group.in_proximity,
                    timestamp: now,
                });
            }
        }

        // Locations whose beacons all expired leave range too
        let mut vanished: heapless::Vec<Label, MAX_LOCATIONS> = heapless::Vec::new();
        for (location, in_range) in self.proximity.iter() {
            if *in_range && !groups.iter().any(|g| g.location == *location) {
                let _ = vanished.push(*location);
            }
        }
        for location in vanished {
            let _ = self.proximity.insert(location, false);
            sink.proximity_change(&ProximityChange {
                location,
                in_range: false,
                timestamp: now,
            });
        }
    }

    /// Validate and apply a configuration blob atomically
    ///
    /// On any error the running configuration is untouched.
    pub fn apply_config(&mut self, config: &SystemConfig) -> Result<(), ConfigError> {
        config.validate()?;

        if config.references.len() > MAX_REFERENCES {
            return Err(ConfigError::CapacityExceeded {
                what: "beacon references",
            });
        }
        if config.zones.len() > MAX_ZONES {
            return Err(ConfigError::CapacityExceeded { what: "zones" });
        }

        // Validation passed; mutate for real
        if let Some(smoother) = config.smoother {
            self.smoother.set_config(smoother);
        }
        if let Some(registry) = config.registry {
            self.registry.set_config(registry);
        }
        if let Some(estimator) = config.estimator {
            self.estimator.set_config(estimator);
        }

        if !config.references.is_empty() {
            self.estimator.clear_references();
            for reference in config.references.iter() {
                self.estimator.add_reference(*reference)?;
            }
        }

        if !config.zones.is_empty() {
            self.zones.clear_zones();
            for zone in config.zones.iter() {
                self.zones.add_zone(zone.clone())?;
            }
        }

        crate::log_info!(
            "configuration applied: {} references, {} zones",
            config.references.len(),
            config.zones.len()
        );
        Ok(())
    }

    /// Current system state for telemetry
    pub fn snapshot(&mut self, now: Timestamp) -> StatusSnapshot {
        let last_fix = self.estimator.last_fix();
        let occupied_zones = self.zones.occupied_zones().copied().collect();

        StatusSnapshot {
            timestamp: now,
            position: last_fix.map(|(p, _, _)| p),
            confidence: last_fix.map(|(_, c, _)| c),
            location_known: self.zones.location_known(),
            occupied_zones,
            last_transition: self.zones.last_transition().copied(),
            tracked_beacons: self.smoother.tracked_beacons(),
            smoother: self.smoother.stats(),
            estimator: self.estimator.stats(),
            tick: self.stats,
            queue_dropped: self
                .queue
                .stats()
                .dropped
                .load(core::sync::atomic::Ordering::Relaxed),
        }
    }

    /// Smoother stage, for diagnostics queries
    pub fn smoother(&self) -> &SignalSmoother {
        &self.smoother
    }

    /// Registry stage, for beacon and group queries
    pub fn registry(&mut self) -> &mut BeaconRegistry {
        &mut self.registry
    }

    /// Estimator stage, for reference management and calibration
    pub fn estimator(&mut self) -> &mut PositionEstimator {
        &mut self.estimator
    }

    /// Zone engine, for occupancy and history queries
    pub fn zones(&self) -> &ZoneEngine {
        &self.zones
    }

    /// Zone engine, for programmatic zone management
    pub fn zones_mut(&mut self) -> &mut ZoneEngine {
        &mut self.zones
    }
}
