//! Beacon Registry: Identity, Distance and Location Grouping
//!
//! ## Overview
//!
//! The smoother answers "how strong is this beacon"; the registry answers
//! "what is this beacon and how far away is it". It parses the advertised
//! name into location and id, converts smoothed RSSI into a distance
//! estimate via the log-distance path-loss model, and aggregates beacons
//! into per-location groups for proximity decisions.
//!
//! ## Name Convention
//!
//! Beacons advertise `<Prefix>-<Location>[-<SubZone>]-<Id>`:
//!
//! ```text
//! "Zone-Home-01"        → location "Home",   id "01"
//! "Zone-Garden-Gate-02" → location "Garden", sub-zone "Gate", id "02"
//! "Beacon7"             → location "Unknown", id "00"
//! ```
//!
//! ## Distance Model
//!
//! Log-distance path loss, `d = 10^((tx_1m − rssi) / (10·n))`, clamped to
//! the maximum plausible range and shifted down by a contact offset so that
//! a beacon pressed against the receiver reads approximately zero meters.

use heapless::Vec;

use crate::{
    constants::{
        BEACON_TIMEOUT_MS, CONTACT_OFFSET_M, MAX_BEACON_RANGE_M, MAX_LOCATIONS,
        MAX_REGISTRY_BEACONS, PATH_LOSS_EXPONENT, PROXIMITY_RSSI_DBM, TX_POWER_AT_1M_DBM,
    },
    events::{BeaconId, InlineStr, Label},
    time::{elapsed_ms, Timestamp},
};

/// Full advertised name, longer than a plain label
pub type BeaconName = InlineStr<31>;

/// Structured fields recovered from an advertised beacon name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedName {
    /// Location group ("Home", "Garden", ... or "Unknown")
    pub location: Label,
    /// Optional sub-zone segment
    pub sub_zone: Option<Label>,
    /// Short id, "00" when unparseable
    pub id: Label,
}

/// Parse `<Prefix>-<Location>[-<SubZone>]-<Id>`
///
/// Anything with fewer than three `-` segments maps to location `Unknown`,
/// id `00`; the beacon is still tracked, just ungrouped.
pub fn parse_name(name: &str) -> ParsedName {
    let mut segments: Vec<&str, 6> = Vec::new();
    for part in name.split('-') {
        if segments.push(part).is_err() {
            break;
        }
    }

    if segments.len() < 3 {
        return ParsedName {
            location: Label::truncated("Unknown"),
            sub_zone: None,
            id: Label::truncated("00"),
        };
    }

    let location = Label::truncated(segments[1]);
    let id = Label::truncated(segments[segments.len() - 1]);
    let sub_zone = if segments.len() >= 4 {
        Some(Label::truncated(segments[2]))
    } else {
        None
    };

    ParsedName {
        location,
        sub_zone,
        id,
    }
}

/// Eviction priority derived from the location group
///
/// When the registry is full, the lowest-priority beacon makes room for a
/// higher-priority newcomer. Safety-relevant locations always win.
pub(crate) fn location_priority(location: &Label) -> u8 {
    match location.as_str() {
        "Safe" => 4,
        "Alert" => 3,
        "Home" => 2,
        "Garden" => 1,
        _ => 0,
    }
}

/// RSSI-to-confidence step function
///
/// Monotone in RSSI; a strong signal near the receiver is trustworthy, a
/// signal near the quality floor barely is.
pub fn rssi_confidence(rssi_dbm: i16) -> f32 {
    match rssi_dbm {
        r if r >= -45 => 1.0,
        r if r >= -60 => 0.8,
        r if r >= -70 => 0.6,
        r if r >= -80 => 0.4,
        r if r >= -90 => 0.2,
        _ => 0.1,
    }
}

/// Path-loss and grouping tuning
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RegistryConfig {
    /// Beacons unseen for this long are expired (ms)
    pub timeout_ms: u64,
    /// RSSI above which a location counts as in proximity (dBm)
    pub proximity_rssi_dbm: i16,
    /// Calibrated received power at 1 m (dBm)
    pub tx_power_1m_dbm: f32,
    /// Path-loss exponent (2.0 free space, higher indoors)
    pub path_loss_exponent: f32,
    /// Distance clamp ceiling (m)
    pub max_range_m: f32,
    /// Subtracted so physical contact reads ~0 m
    pub contact_offset_m: f32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: BEACON_TIMEOUT_MS,
            proximity_rssi_dbm: PROXIMITY_RSSI_DBM,
            tx_power_1m_dbm: TX_POWER_AT_1M_DBM,
            path_loss_exponent: PATH_LOSS_EXPONENT,
            max_range_m: MAX_BEACON_RANGE_M,
            contact_offset_m: CONTACT_OFFSET_M,
        }
    }
}

/// One tracked beacon with its parsed identity and derived measurements
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TrackedBeacon {
    /// Radio-layer identity (MAC or logical id)
    pub identity: BeaconId,
    /// Full advertised name
    pub name: BeaconName,
    /// Parsed location group
    pub location: Label,
    /// Parsed sub-zone, if any
    pub sub_zone: Option<Label>,
    /// Parsed short id
    pub short_id: Label,
    /// Latest smoothed RSSI (dBm)
    pub rssi_dbm: i16,
    /// Distance estimate from the path-loss model (m)
    pub distance_m: f32,
    /// Step-function confidence in the latest reading
    pub confidence: f32,
    /// Eviction priority (higher survives)
    pub priority: u8,
    /// First observation timestamp
    pub first_seen: Timestamp,
    /// Latest observation timestamp
    pub last_seen: Timestamp,
    /// Total observations
    pub detections: u32,
}

/// Per-location aggregate over active beacons
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct LocationGroup {
    /// Location name
    pub location: Label,
    /// Active beacons in the group
    pub active_count: usize,
    /// Mean RSSI over the group (dBm)
    pub average_rssi_dbm: f32,
    /// Smallest distance estimate in the group (m)
    pub closest_distance_m: f32,
    /// Strongest beacon exceeds the proximity threshold
    pub in_proximity: bool,
}

/// Fixed-capacity registry of observed beacons
///
/// Location groups are recomputed lazily: observation and expiry mark them
/// dirty, [`groups`](Self::groups) rebuilds on demand.
pub struct BeaconRegistry {
    config: RegistryConfig,
    beacons: Vec<TrackedBeacon, MAX_REGISTRY_BEACONS>,
    groups: Vec<LocationGroup, MAX_LOCATIONS>,
    groups_dirty: bool,
    evictions: u32,
}

impl BeaconRegistry {
    /// Create a registry with the given tuning
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            beacons: Vec::new(),
            groups: Vec::new(),
            groups_dirty: false,
            evictions: 0,
        }
    }

    /// Record one observation of a beacon
    ///
    /// Updates the existing entry or inserts a new one. At capacity the
    /// lowest-priority beacon is evicted when the newcomer outranks it;
    /// otherwise the newcomer is dropped.
    pub fn observe(
        &mut self,
        name: &str,
        identity: &BeaconId,
        rssi_dbm: i16,
        now: Timestamp,
    ) -> bool {
        self.groups_dirty = true;

        let distance_m = self.estimate_distance(rssi_dbm);
        let confidence = rssi_confidence(rssi_dbm);

        if let Some(beacon) = self.beacons.iter_mut().find(|b| b.identity == *identity) {
            beacon.rssi_dbm = rssi_dbm;
            beacon.distance_m = distance_m;
            beacon.confidence = confidence;
            beacon.last_seen = now;
            beacon.detections += 1;

            // Scan responses trail advertisements, so the name can show up
            // (or change) after the entry already exists
            if !name.is_empty() && beacon.name.as_str() != name {
                let parsed = parse_name(name);
                beacon.name = BeaconName::truncated(name);
                beacon.location = parsed.location;
                beacon.sub_zone = parsed.sub_zone;
                beacon.short_id = parsed.id;
                beacon.priority = location_priority(&parsed.location);
            }
            return true;
        }

        let parsed = parse_name(name);
        let entry = TrackedBeacon {
            identity: *identity,
            name: BeaconName::truncated(name),
            location: parsed.location,
            sub_zone: parsed.sub_zone,
            short_id: parsed.id,
            rssi_dbm,
            distance_m,
            confidence,
            priority: location_priority(&parsed.location),
            first_seen: now,
            last_seen: now,
            detections: 1,
        };

        if let Err(entry) = self.beacons.push(entry) {
            let victim = self
                .beacons
                .iter()
                .enumerate()
                .min_by_key(|(_, b)| (b.priority, b.last_seen))
                .map(|(i, b)| (i, b.priority));

            match victim {
                Some((i, priority)) if priority < entry.priority => {
                    crate::log_debug!(
                        "registry full, evicting priority {} for {}",
                        priority,
                        entry.name
                    );
                    self.evictions += 1;
                    self.beacons[i] = entry;
                }
                _ => return false,
            }
        }

        true
    }

    /// Drop beacons unseen past the timeout; no events are emitted
    pub fn expire(&mut self, now: Timestamp) {
        let timeout = self.config.timeout_ms;
        let before = self.beacons.len();
        self.beacons
            .retain(|b| elapsed_ms(b.last_seen, now) <= timeout);

        if self.beacons.len() != before {
            self.groups_dirty = true;
        }
    }

    /// Distance from RSSI via the log-distance model
    pub fn estimate_distance(&self, rssi_dbm: i16) -> f32 {
        let exponent =
            (self.config.tx_power_1m_dbm - rssi_dbm as f32) / (10.0 * self.config.path_loss_exponent);
        let raw = libm::powf(10.0, exponent);
        let clamped = raw.min(self.config.max_range_m);
        (clamped - self.config.contact_offset_m).max(0.0)
    }

    /// Per-location aggregates, rebuilt when observations changed
    pub fn groups(&mut self) -> &[LocationGroup] {
        if self.groups_dirty {
            self.rebuild_groups();
            self.groups_dirty = false;
        }
        &self.groups
    }

    fn rebuild_groups(&mut self) {
        self.groups.clear();

        for beacon in self.beacons.iter() {
            if let Some(group) = self
                .groups
                .iter_mut()
                .find(|g| g.location == beacon.location)
            {
                let n = group.active_count as f32;
                group.average_rssi_dbm =
                    (group.average_rssi_dbm * n + beacon.rssi_dbm as f32) / (n + 1.0);
                group.active_count += 1;
                group.closest_distance_m = group.closest_distance_m.min(beacon.distance_m);
                group.in_proximity =
                    group.in_proximity || beacon.rssi_dbm > self.config.proximity_rssi_dbm;
            } else {
                let group = LocationGroup {
                    location: beacon.location,
                    active_count: 1,
                    average_rssi_dbm: beacon.rssi_dbm as f32,
                    closest_distance_m: beacon.distance_m,
                    in_proximity: beacon.rssi_dbm > self.config.proximity_rssi_dbm,
                };
                if self.groups.push(group).is_err() {
                    crate::log_warn!("location group capacity reached, {} ungrouped", beacon.location);
                }
            }
        }
    }

    /// All tracked beacons
    pub fn beacons(&self) -> &[TrackedBeacon] {
        &self.beacons
    }

    /// Look up one beacon by identity
    pub fn get(&self, identity: &BeaconId) -> Option<&TrackedBeacon> {
        self.beacons.iter().find(|b| b.identity == *identity)
    }

    /// Beacons belonging to one location group
    pub fn beacons_at(&self, location: Label) -> impl Iterator<Item = &TrackedBeacon> {
        self.beacons.iter().filter(move |b| b.location == location)
    }

    /// Closest beacon within one location group
    pub fn closest_at(&self, location: Label) -> Option<&TrackedBeacon> {
        self.beacons_at(location)
            .min_by(|a, b| a.distance_m.total_cmp(&b.distance_m))
    }

    /// Closest beacon overall
    pub fn closest(&self) -> Option<&TrackedBeacon> {
        self.beacons
            .iter()
            .min_by(|a, b| a.distance_m.total_cmp(&b.distance_m))
    }

    /// Number of tracked beacons
    pub fn len(&self) -> usize {
        self.beacons.len()
    }

    /// Check if no beacons are tracked
    pub fn is_empty(&self) -> bool {
        self.beacons.is_empty()
    }

    /// Beacons evicted to make room for higher-priority entries
    pub fn evictions(&self) -> u32 {
        self.evictions
    }

    /// Replace the tuning wholesale (config loader path)
    pub fn set_config(&mut self, config: RegistryConfig) {
        self.config = config;
        self.groups_dirty = true;
    }

    /// Current tuning
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }
}

impl Default for BeaconRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(n: u8) -> BeaconId {
        use core::fmt::Write;
        let mut s = heapless::String::<23>::new();
        write!(s, "AA:BB:CC:DD:EE:{:02X}", n).unwrap();
        BeaconId::new(&s).unwrap()
    }

    #[test]
    fn parses_three_segment_name() {
        let parsed = parse_name("Zone-Home-01");
        assert_eq!(parsed.location.as_str(), "Home");
        assert_eq!(parsed.id.as_str(), "01");
        assert!(parsed.sub_zone.is_none());
    }

    #[test]
    fn parses_sub_zone_name() {
        let parsed = parse_name("Zone-Garden-Gate-02");
        assert_eq!(parsed.location.as_str(), "Garden");
        assert_eq!(parsed.sub_zone.unwrap().as_str(), "Gate");
        assert_eq!(parsed.id.as_str(), "02");
    }

    #[test]
    fn unparseable_name_is_unknown() {
        for name in ["Beacon7", "Zone-Home", ""] {
            let parsed = parse_name(name);
            assert_eq!(parsed.location.as_str(), "Unknown");
            assert_eq!(parsed.id.as_str(), "00");
        }
    }

    #[test]
    fn distance_model_reference_points() {
        let registry = BeaconRegistry::default();

        // At tx_power_1m the model reads 1m, minus the contact offset
        let at_1m = registry.estimate_distance(-59);
        assert!((at_1m - 0.9).abs() < 0.01, "got {}", at_1m);

        // 20dB below tx_power_1m with n=2.0 is 10m
        let at_10m = registry.estimate_distance(-79);
        assert!((at_10m - 9.9).abs() < 0.05, "got {}", at_10m);

        // Contact: stronger than tx_power_1m floors near zero
        let contact = registry.estimate_distance(-30);
        assert!(contact < 0.1, "got {}", contact);

        // Very weak signals clamp to max range
        let far = registry.estimate_distance(-120);
        assert!(far <= MAX_BEACON_RANGE_M, "got {}", far);
    }

    #[test]
    fn confidence_steps_are_monotone() {
        let rssis = [-30, -45, -50, -65, -75, -85, -95];
        let mut last = f32::INFINITY;
        for rssi in rssis {
            let c = rssi_confidence(rssi);
            assert!(c <= last);
            last = c;
        }
        assert_eq!(rssi_confidence(-40), 1.0);
        assert_eq!(rssi_confidence(-95), 0.1);
    }

    #[test]
    fn observe_then_update() {
        let mut registry = BeaconRegistry::default();
        let id = identity(1);

        assert!(registry.observe("Zone-Home-01", &id, -60, 1_000));
        assert!(registry.observe("Zone-Home-01", &id, -55, 2_000));

        let beacon = registry.get(&id).unwrap();
        assert_eq!(beacon.rssi_dbm, -55);
        assert_eq!(beacon.detections, 2);
        assert_eq!(beacon.first_seen, 1_000);
        assert_eq!(beacon.last_seen, 2_000);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn expiry_drops_stale_beacons() {
        let mut registry = BeaconRegistry::default();
        registry.observe("Zone-Home-01", &identity(1), -60, 0);
        registry.observe("Zone-Home-02", &identity(2), -60, 25_000);

        registry.expire(40_000);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&identity(1)).is_none());
        assert!(registry.get(&identity(2)).is_some());
    }

    #[test]
    fn groups_aggregate_per_location() {
        let mut registry = BeaconRegistry::default();
        registry.observe("Zone-Home-01", &identity(1), -60, 0);
        registry.observe("Zone-Home-02", &identity(2), -70, 0);
        registry.observe("Zone-Garden-01", &identity(3), -80, 0);

        let groups = registry.groups();
        assert_eq!(groups.len(), 2);

        let home = groups
            .iter()
            .find(|g| g.location.as_str() == "Home")
            .unwrap();
        assert_eq!(home.active_count, 2);
        assert!((home.average_rssi_dbm - (-65.0)).abs() < 0.01);
        assert!(home.in_proximity); // -60 > -70

        let garden = groups
            .iter()
            .find(|g| g.location.as_str() == "Garden")
            .unwrap();
        assert!(!garden.in_proximity); // -80 <= -70
    }

    #[test]
    fn groups_follow_expiry() {
        let mut registry = BeaconRegistry::default();
        registry.observe("Zone-Home-01", &identity(1), -60, 0);
        assert_eq!(registry.groups().len(), 1);

        registry.expire(60_000);
        assert!(registry.groups().is_empty());
    }

    #[test]
    fn capacity_evicts_lowest_priority() {
        let mut registry = BeaconRegistry::default();

        // Fill with priority-0 beacons
        for n in 0..MAX_REGISTRY_BEACONS as u8 {
            assert!(registry.observe("Zone-Shed-01", &identity(n), -60, u64::from(n)));
        }
        assert_eq!(registry.len(), MAX_REGISTRY_BEACONS);

        // A Safe-location beacon outranks them and displaces the oldest-seen
        assert!(registry.observe("Zone-Safe-01", &identity(100), -60, 100));
        assert_eq!(registry.len(), MAX_REGISTRY_BEACONS);
        assert!(registry.get(&identity(100)).is_some());
        assert!(registry.get(&identity(0)).is_none());
        assert_eq!(registry.evictions(), 1);

        // Another priority-0 beacon cannot displace anyone
        assert!(!registry.observe("Zone-Shed-99", &identity(101), -60, 200));
    }

    #[test]
    fn closest_queries() {
        let mut registry = BeaconRegistry::default();
        registry.observe("Zone-Home-01", &identity(1), -80, 0);
        registry.observe("Zone-Home-02", &identity(2), -50, 0);
        registry.observe("Zone-Garden-01", &identity(3), -65, 0);

        let home = Label::new("Home").unwrap();
        assert_eq!(registry.closest_at(home).unwrap().identity, identity(2));
        assert_eq!(registry.closest().unwrap().identity, identity(2));
        assert_eq!(registry.beacons_at(home).count(), 2);
    }

    #[test]
    fn late_name_reparses_identity() {
        let mut registry = BeaconRegistry::default();
        let id = identity(1);

        // First samples arrive before any scan response carries the name
        registry.observe("", &id, -60, 0);
        let beacon = registry.get(&id).unwrap();
        assert_eq!(beacon.location.as_str(), "Unknown");
        assert_eq!(beacon.priority, 0);

        registry.observe("Zone-Home-01", &id, -60, 1_000);
        let beacon = registry.get(&id).unwrap();
        assert_eq!(beacon.location.as_str(), "Home");
        assert_eq!(beacon.short_id.as_str(), "01");
        assert_eq!(beacon.priority, 2);
        assert_eq!(beacon.detections, 2);
        assert_eq!(registry.len(), 1);
    }
}
