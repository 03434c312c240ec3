//! Zone Containment and Debounced Transition Detection
//!
//! ## Overview
//!
//! Zones are named regions of the deployment plane. Each position update
//! is tested against every zone, but raw containment never reaches the
//! alert sink directly: a change must persist for the zone's entry delay
//! before it commits, so a track jittering across a boundary produces no
//! event storm.
//!
//! ```text
//! position ──→ raw containment ──→ debounce ──→ committed transition
//!                                     │               │
//!                              flicker dies here      ├──→ transition ring
//!                                                     └──→ AlertSink (cooldown gated)
//! ```
//!
//! ## Position Loss
//!
//! With no valid position, committed occupancy is held - the wearer did
//! not teleport out of the room because the radio faded. Past the
//! staleness limit all occupancy clears and `location_known` goes false;
//! no synthetic exit events are emitted, the snapshot carries the state.

use heapless::Vec;

use crate::{
    buffer::Ring,
    constants::{MAX_POLYGON_VERTICES, MAX_ZONES, POSITION_STALENESS_MS, TRANSITION_HISTORY},
    errors::ConfigError,
    events::{AlertMode, AlertSink, Label, Point, ZoneTransition},
    time::{elapsed_ms, Timestamp},
};

/// Geometric extent of a zone
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "shape", rename_all = "snake_case"))]
pub enum ZoneShape {
    /// All points within `radius_m` of `center`
    Circle { center: Point, radius_m: f32 },
    /// Axis-aligned rectangle as center plus half extents
    Rect {
        center: Point,
        half_width_m: f32,
        half_height_m: f32,
    },
    /// Simple polygon, vertices in order (either winding)
    Polygon {
        vertices: Vec<Point, MAX_POLYGON_VERTICES>,
    },
}

impl ZoneShape {
    /// Point-in-shape test
    ///
    /// Polygons use ray casting toward +x. Horizontal edges are skipped;
    /// an edge counts as crossed when the point's y lies strictly inside
    /// the edge's y-range and the x-intersection is right of the point.
    pub fn contains(&self, point: &Point) -> bool {
        match self {
            ZoneShape::Circle { center, radius_m } => point.distance_to(center) <= *radius_m,
            ZoneShape::Rect {
                center,
                half_width_m,
                half_height_m,
            } => {
                libm::fabsf(point.x - center.x) <= *half_width_m
                    && libm::fabsf(point.y - center.y) <= *half_height_m
            }
            ZoneShape::Polygon { vertices } => {
                let n = vertices.len();
                if n < 3 {
                    return false;
                }

                let mut inside = false;
                let mut j = n - 1;
                for i in 0..n {
                    let (vi, vj) = (vertices[i], vertices[j]);

                    if (vi.y > point.y) != (vj.y > point.y) {
                        let x_cross = vi.x + (point.y - vi.y) / (vj.y - vi.y) * (vj.x - vi.x);
                        if point.x < x_cross {
                            inside = !inside;
                        }
                    }
                    j = i;
                }
                inside
            }
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match self {
            ZoneShape::Circle { radius_m, .. } => {
                if !radius_m.is_finite() || *radius_m <= 0.0 {
                    return Err(ConfigError::InvalidZone {
                        reason: "circle radius must be positive",
                    });
                }
            }
            ZoneShape::Rect {
                half_width_m,
                half_height_m,
                ..
            } => {
                if *half_width_m <= 0.0 || *half_height_m <= 0.0 {
                    return Err(ConfigError::InvalidZone {
                        reason: "rect extents must be positive",
                    });
                }
            }
            ZoneShape::Polygon { vertices } => {
                if vertices.len() < 3 {
                    return Err(ConfigError::InvalidZone {
                        reason: "polygon needs at least 3 vertices",
                    });
                }
            }
        }
        Ok(())
    }
}

/// A named zone with its debounce and alert tuning
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ZoneDefinition {
    /// Zone name, unique within the engine
    pub id: Label,
    /// Geometric extent, flattened so zone JSON stays one object
    #[cfg_attr(feature = "serde", serde(flatten))]
    pub shape: ZoneShape,
    /// Raw occupancy change must persist this long to commit (0 = immediate)
    #[cfg_attr(feature = "serde", serde(default = "default_entry_delay"))]
    pub entry_delay_ms: u64,
    /// Minimum spacing between alert callbacks for this zone
    #[cfg_attr(feature = "serde", serde(default = "default_cooldown"))]
    pub cooldown_ms: u64,
    /// How the alert subsystem should signal this zone's transitions
    #[cfg_attr(feature = "serde", serde(default))]
    pub alert_mode: AlertMode,
}

#[cfg(feature = "serde")]
fn default_entry_delay() -> u64 {
    crate::constants::ZONE_ENTRY_DELAY_MS
}

#[cfg(feature = "serde")]
fn default_cooldown() -> u64 {
    crate::constants::ZONE_COOLDOWN_MS
}

/// Per-zone debounce state
#[derive(Debug, Clone, Copy, Default)]
struct ZoneState {
    /// Committed occupancy
    occupied: bool,
    /// Raw state awaiting its persistence window, with onset time
    pending: Option<(bool, Timestamp)>,
    /// Last alert callback for cooldown gating
    last_alert: Option<Timestamp>,
}

/// Debounced zone engine
pub struct ZoneEngine {
    zones: Vec<ZoneDefinition, MAX_ZONES>,
    states: Vec<ZoneState, MAX_ZONES>,
    transitions: Ring<ZoneTransition, TRANSITION_HISTORY>,
    staleness_ms: u64,
    last_position: Option<Timestamp>,
    location_known: bool,
    alerts_suppressed: u32,
}

impl ZoneEngine {
    /// Create an engine with no zones
    pub fn new() -> Self {
        Self {
            zones: Vec::new(),
            states: Vec::new(),
            transitions: Ring::new(),
            staleness_ms: POSITION_STALENESS_MS,
            last_position: None,
            location_known: false,
            alerts_suppressed: 0,
        }
    }

    /// Add a zone after validating its shape; ids must be unique
    pub fn add_zone(&mut self, zone: ZoneDefinition) -> Result<(), ConfigError> {
        zone.shape.validate()?;

        if self.zones.iter().any(|z| z.id == zone.id) {
            return Err(ConfigError::InvalidZone {
                reason: "duplicate zone id",
            });
        }

        self.zones
            .push(zone)
            .map_err(|_| ConfigError::CapacityExceeded { what: "zones" })?;
        // Cannot fail: states mirrors zones
        let _ = self.states.push(ZoneState::default());
        Ok(())
    }

    /// Remove a zone by id; its state and pending debounce go with it
    pub fn remove_zone(&mut self, id: &Label) -> bool {
        match self.zones.iter().position(|z| z.id == *id) {
            Some(i) => {
                self.zones.remove(i);
                self.states.remove(i);
                true
            }
            None => false,
        }
    }

    /// Drop all zones and state, keep the transition history
    pub fn clear_zones(&mut self) {
        self.zones.clear();
        self.states.clear();
    }

    /// Feed one position update (or its absence) through the debouncer
    ///
    /// Committed transitions are appended to the history ring and forwarded
    /// to `sink`, gated per zone by its cooldown.
    pub fn update(
        &mut self,
        position: Option<(Point, f32)>,
        now: Timestamp,
        sink: &mut dyn AlertSink,
    ) {
        let Some((point, confidence)) = position else {
            self.handle_position_loss(now);
            return;
        };

        self.last_position = Some(now);
        self.location_known = true;

        for (zone, state) in self.zones.iter().zip(self.states.iter_mut()) {
            let raw = zone.shape.contains(&point);

            if raw == state.occupied {
                // Flicker back inside the delay window dies here
                state.pending = None;
                continue;
            }

            let since = match state.pending {
                Some((pending_raw, since)) if pending_raw == raw => since,
                _ => {
                    state.pending = Some((raw, now));
                    now
                }
            };

            if elapsed_ms(since, now) < zone.entry_delay_ms {
                continue;
            }

            state.occupied = raw;
            state.pending = None;

            let transition = ZoneTransition {
                zone: zone.id,
                entered: raw,
                timestamp: now,
                position: point,
                confidence,
                alert_mode: zone.alert_mode,
            };
            self.transitions.push(transition);

            let in_cooldown = state
                .last_alert
                .is_some_and(|last| elapsed_ms(last, now) < zone.cooldown_ms);
            if in_cooldown {
                self.alerts_suppressed += 1;
            } else {
                state.last_alert = Some(now);
                sink.zone_transition(&transition);
            }
        }
    }

    fn handle_position_loss(&mut self, now: Timestamp) {
        let Some(last) = self.last_position else {
            return;
        };

        if elapsed_ms(last, now) <= self.staleness_ms {
            // Hold occupancy; a faded radio is not a departure
            return;
        }

        if self.location_known {
            crate::log_warn!("position stale for {}ms, clearing occupancy", self.staleness_ms);
        }

        // No synthetic exits; the snapshot carries location_known = false
        self.location_known = false;
        for state in self.states.iter_mut() {
            state.occupied = false;
            state.pending = None;
        }
    }

    /// Committed occupancy for one zone
    pub fn is_occupied(&self, id: &Label) -> bool {
        self.zones
            .iter()
            .zip(self.states.iter())
            .find(|(z, _)| z.id == *id)
            .is_some_and(|(_, s)| s.occupied)
    }

    /// Ids of all currently occupied zones
    pub fn occupied_zones(&self) -> impl Iterator<Item = &Label> {
        self.zones
            .iter()
            .zip(self.states.iter())
            .filter(|(_, s)| s.occupied)
            .map(|(z, _)| &z.id)
    }

    /// Whether a sufficiently recent valid position exists
    pub fn location_known(&self) -> bool {
        self.location_known
    }

    /// Transition history, oldest first
    pub fn transitions(&self) -> impl Iterator<Item = &ZoneTransition> {
        self.transitions.iter()
    }

    /// Most recent transition
    pub fn last_transition(&self) -> Option<&ZoneTransition> {
        self.transitions.last()
    }

    /// Alerts swallowed by cooldown gating
    pub fn alerts_suppressed(&self) -> u32 {
        self.alerts_suppressed
    }

    /// Configured zones
    pub fn zones(&self) -> &[ZoneDefinition] {
        &self.zones
    }
}

impl Default for ZoneEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ZONE_COOLDOWN_MS;
    use crate::events::ProximityChange;

    /// Sink that records everything it is handed
    #[derive(Default)]
    struct RecordingSink {
        transitions: std::vec::Vec<ZoneTransition>,
        proximity: std::vec::Vec<ProximityChange>,
    }

    impl AlertSink for RecordingSink {
        fn zone_transition(&mut self, transition: &ZoneTransition) {
            self.transitions.push(*transition);
        }
        fn proximity_change(&mut self, change: &ProximityChange) {
            self.proximity.push(*change);
        }
    }

    fn circle(id: &str, x: f32, y: f32, r: f32, delay_ms: u64) -> ZoneDefinition {
        ZoneDefinition {
            id: Label::new(id).unwrap(),
            shape: ZoneShape::Circle {
                center: Point::new(x, y),
                radius_m: r,
            },
            entry_delay_ms: delay_ms,
            cooldown_ms: ZONE_COOLDOWN_MS,
            alert_mode: AlertMode::default(),
        }
    }

    fn l_shaped_polygon() -> ZoneShape {
        // L-shape: outer corner at (4,4) carved out
        let vertices: Vec<Point, MAX_POLYGON_VERTICES> = [
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(4.0, 2.0),
            Point::new(2.0, 2.0),
            Point::new(2.0, 4.0),
            Point::new(0.0, 4.0),
        ]
        .into_iter()
        .collect();
        ZoneShape::Polygon { vertices }
    }

    #[test]
    fn circle_containment() {
        let shape = ZoneShape::Circle {
            center: Point::new(5.0, 5.0),
            radius_m: 2.0,
        };
        assert!(shape.contains(&Point::new(5.0, 5.0)));
        assert!(shape.contains(&Point::new(6.9, 5.0)));
        assert!(!shape.contains(&Point::new(7.5, 5.0)));
    }

    #[test]
    fn rect_containment() {
        let shape = ZoneShape::Rect {
            center: Point::new(0.0, 0.0),
            half_width_m: 3.0,
            half_height_m: 1.0,
        };
        assert!(shape.contains(&Point::new(2.9, 0.9)));
        assert!(!shape.contains(&Point::new(2.9, 1.1)));
        assert!(!shape.contains(&Point::new(3.1, 0.0)));
    }

    #[test]
    fn polygon_concave_containment() {
        let shape = l_shaped_polygon();

        // Inside both arms of the L
        assert!(shape.contains(&Point::new(1.0, 1.0)));
        assert!(shape.contains(&Point::new(3.0, 1.0)));
        assert!(shape.contains(&Point::new(1.0, 3.0)));

        // In the carved-out corner
        assert!(!shape.contains(&Point::new(3.0, 3.0)));

        // Clearly outside
        assert!(!shape.contains(&Point::new(5.0, 5.0)));
        assert!(!shape.contains(&Point::new(-1.0, 1.0)));
    }

    #[test]
    fn degenerate_polygon_rejected() {
        let mut engine = ZoneEngine::new();
        let vertices: Vec<Point, MAX_POLYGON_VERTICES> =
            [Point::new(0.0, 0.0), Point::new(1.0, 0.0)].into_iter().collect();

        let result = engine.add_zone(ZoneDefinition {
            id: Label::new("bad").unwrap(),
            shape: ZoneShape::Polygon { vertices },
            entry_delay_ms: 0,
            cooldown_ms: 0,
            alert_mode: AlertMode::default(),
        });
        assert!(matches!(result, Err(ConfigError::InvalidZone { .. })));
    }

    #[test]
    fn boundary_flicker_produces_no_events() {
        let mut engine = ZoneEngine::new();
        engine.add_zone(circle("pen", 0.0, 0.0, 5.0, 2_000)).unwrap();
        let mut sink = RecordingSink::default();

        // Oscillate across the boundary every 500ms, never persisting
        for i in 0..8u64 {
            let x = if i % 2 == 0 { 4.0 } else { 6.0 };
            engine.update(Some((Point::new(x, 0.0), 0.9)), i * 500, &mut sink);
        }

        assert!(sink.transitions.is_empty());
        assert!(!engine.is_occupied(&Label::new("pen").unwrap()));
    }

    #[test]
    fn sustained_presence_commits_one_entry() {
        let mut engine = ZoneEngine::new();
        engine.add_zone(circle("pen", 0.0, 0.0, 5.0, 2_000)).unwrap();
        let mut sink = RecordingSink::default();

        for i in 0..10u64 {
            engine.update(Some((Point::new(1.0, 0.0), 0.9)), i * 500, &mut sink);
        }

        assert_eq!(sink.transitions.len(), 1);
        assert!(sink.transitions[0].entered);
        assert_eq!(sink.transitions[0].zone.as_str(), "pen");
        assert!(engine.is_occupied(&Label::new("pen").unwrap()));
    }

    #[test]
    fn zero_delay_commits_immediately() {
        let mut engine = ZoneEngine::new();
        engine.add_zone(circle("pen", 0.0, 0.0, 5.0, 0)).unwrap();
        let mut sink = RecordingSink::default();

        engine.update(Some((Point::new(0.0, 0.0), 0.9)), 100, &mut sink);
        assert_eq!(sink.transitions.len(), 1);
    }

    #[test]
    fn exit_debounced_symmetrically() {
        let mut engine = ZoneEngine::new();
        // No cooldown, so the sink sees every committed transition
        let mut zone = circle("pen", 0.0, 0.0, 5.0, 1_000);
        zone.cooldown_ms = 0;
        engine.add_zone(zone).unwrap();
        let mut sink = RecordingSink::default();

        // Enter and commit
        engine.update(Some((Point::new(0.0, 0.0), 0.9)), 0, &mut sink);
        engine.update(Some((Point::new(0.0, 0.0), 0.9)), 1_000, &mut sink);
        assert_eq!(sink.transitions.len(), 1);

        // Step out; exit must persist the delay too
        engine.update(Some((Point::new(10.0, 0.0), 0.9)), 2_000, &mut sink);
        assert_eq!(sink.transitions.len(), 1);
        engine.update(Some((Point::new(10.0, 0.0), 0.9)), 3_000, &mut sink);
        assert_eq!(sink.transitions.len(), 2);
        assert!(!sink.transitions[1].entered);
        assert_eq!(engine.transitions().count(), 2);
    }

    #[test]
    fn transition_carries_zone_alert_mode() {
        let mut engine = ZoneEngine::new();
        let mut zone = circle("pen", 0.0, 0.0, 5.0, 0);
        zone.alert_mode = AlertMode::Vibration;
        engine.add_zone(zone).unwrap();
        let mut sink = RecordingSink::default();

        engine.update(Some((Point::new(0.0, 0.0), 0.9)), 0, &mut sink);
        assert_eq!(sink.transitions.len(), 1);
        assert_eq!(sink.transitions[0].alert_mode, AlertMode::Vibration);
    }

    #[test]
    fn cooldown_suppresses_alerts_not_transitions() {
        let mut engine = ZoneEngine::new();
        let mut zone = circle("pen", 0.0, 0.0, 5.0, 0);
        zone.cooldown_ms = 10_000;
        engine.add_zone(zone).unwrap();
        let mut sink = RecordingSink::default();

        // Enter, exit, enter in quick succession with zero delay
        engine.update(Some((Point::new(0.0, 0.0), 0.9)), 0, &mut sink);
        engine.update(Some((Point::new(10.0, 0.0), 0.9)), 1_000, &mut sink);
        engine.update(Some((Point::new(0.0, 0.0), 0.9)), 2_000, &mut sink);

        // All three transitions are recorded, only the first alerted
        assert_eq!(engine.transitions().count(), 3);
        assert_eq!(sink.transitions.len(), 1);
        assert_eq!(engine.alerts_suppressed(), 2);
    }

    #[test]
    fn occupancy_held_through_short_outage() {
        let mut engine = ZoneEngine::new();
        engine.add_zone(circle("pen", 0.0, 0.0, 5.0, 0)).unwrap();
        let mut sink = RecordingSink::default();
        let pen = Label::new("pen").unwrap();

        engine.update(Some((Point::new(0.0, 0.0), 0.9)), 0, &mut sink);
        assert!(engine.is_occupied(&pen));

        // 10s of no position: inside the staleness limit, occupancy holds
        engine.update(None, 10_000, &mut sink);
        assert!(engine.is_occupied(&pen));
        assert!(engine.location_known());
    }

    #[test]
    fn stale_position_clears_occupancy_silently() {
        let mut engine = ZoneEngine::new();
        engine.add_zone(circle("pen", 0.0, 0.0, 5.0, 0)).unwrap();
        let mut sink = RecordingSink::default();
        let pen = Label::new("pen").unwrap();

        engine.update(Some((Point::new(0.0, 0.0), 0.9)), 0, &mut sink);
        let events_before = sink.transitions.len();

        engine.update(None, POSITION_STALENESS_MS + 1_000, &mut sink);
        assert!(!engine.is_occupied(&pen));
        assert!(!engine.location_known());
        // No synthetic exit
        assert_eq!(sink.transitions.len(), events_before);
    }
}
