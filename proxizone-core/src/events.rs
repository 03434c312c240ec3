//! Shared Data Currency Between Pipeline Stages
//!
//! ## Overview
//!
//! The types that cross module boundaries live here: the raw sample the
//! radio callback enqueues, the transition and proximity events the zone
//! engine emits, and the [`AlertSink`] trait the external alert subsystem
//! implements.
//!
//! ## Memory Model
//!
//! Everything is `Copy` and stack-sized so events can sit in lock-free
//! queues and ring buffers without allocation:
//!
//! ```text
//! RawSample size:
//! ├── beacon id: 24 bytes (inline string)
//! ├── rssi: 2 bytes
//! ├── timestamp: 8 bytes
//! ├── quality flag: 1 byte
//! └── padding
//! ```
//!
//! ## Dependency Injection
//!
//! The original device firmware wired alerting through global manager
//! singletons. Here each pipeline tick borrows an `&mut dyn AlertSink`;
//! callbacks run synchronously on the cooperative tick, never in the radio
//! callback context.

use crate::time::Timestamp;
use core::fmt;

/// Maximum inline beacon identity length (fits "AA:BB:CC:DD:EE:FF")
pub const MAX_BEACON_ID: usize = 23;

/// Maximum inline label length (zone ids, location names)
pub const MAX_LABEL: usize = 15;

/// Stack-allocated string with a fixed byte capacity
///
/// Identities longer than the capacity are rejected at construction; the
/// radio layer never produces them in practice.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InlineStr<const N: usize> {
    len: u8,
    data: [u8; N],
}

impl<const N: usize> InlineStr<N> {
    /// Create from a string slice; `None` if it exceeds the capacity
    pub fn new(s: &str) -> Option<Self> {
        let bytes = s.as_bytes();
        if bytes.len() > N {
            return None;
        }

        let mut data = [0u8; N];
        data[..bytes.len()].copy_from_slice(bytes);

        Some(Self {
            len: bytes.len() as u8,
            data,
        })
    }

    /// Create from a string slice, truncating at the capacity
    ///
    /// Truncation lands on a UTF-8 boundary.
    pub fn truncated(s: &str) -> Self {
        if let Some(inline) = Self::new(s) {
            return inline;
        }

        let mut end = N;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        // end <= N and on a boundary, so this cannot fail
        Self::new(&s[..end]).unwrap_or(Self {
            len: 0,
            data: [0u8; N],
        })
    }

    /// View as a string slice
    pub fn as_str(&self) -> &str {
        // Only valid UTF-8 is stored by the constructors
        core::str::from_utf8(&self.data[..self.len as usize]).unwrap_or("")
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl<const N: usize> fmt::Debug for InlineStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl<const N: usize> fmt::Display for InlineStr<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl<const N: usize> serde::Serialize for InlineStr<N> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

#[cfg(feature = "serde")]
impl<'de, const N: usize> serde::Deserialize<'de> for InlineStr<N> {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct Visitor<const N: usize>;

        impl<'de, const N: usize> serde::de::Visitor<'de> for Visitor<N> {
            type Value = InlineStr<N>;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "a string of at most {} bytes", N)
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                InlineStr::new(v)
                    .ok_or_else(|| E::invalid_length(v.len(), &self))
            }
        }

        deserializer.deserialize_str(Visitor)
    }
}

/// Beacon identity as delivered by the radio layer (MAC or logical id)
pub type BeaconId = InlineStr<MAX_BEACON_ID>;

/// Short label: zone id or location name
pub type Label = InlineStr<MAX_LABEL>;

/// 2D point in the deployment's local coordinate frame (meters)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point {
    /// X coordinate (m)
    pub x: f32,
    /// Y coordinate (m)
    pub y: f32,
}

impl Point {
    /// Construct from coordinates
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point
    pub fn distance_to(&self, other: &Point) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        libm::sqrtf(dx * dx + dy * dy)
    }
}

/// One raw advertisement observation, produced by the radio callback
///
/// Transient: consumed by the smoother and never stored beyond the queue.
#[derive(Debug, Clone, Copy)]
pub struct RawSample {
    /// Beacon the advertisement came from
    pub beacon: BeaconId,
    /// Received signal strength in dBm
    pub rssi_dbm: i16,
    /// When the radio saw the packet
    pub timestamp: Timestamp,
    /// Link-layer quality check passed (CRC etc.)
    pub quality_valid: bool,
}

/// How the alert subsystem should signal a committed transition
///
/// Configured per zone; the sink receives it with every transition and
/// decides which actuators to drive. `None` zones are still reported, the
/// sink just has nothing to sound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AlertMode {
    /// Record silently, drive no hardware
    None,
    /// Audible buzzer only
    Buzzer,
    /// Vibration motor only
    Vibration,
    /// Buzzer and vibration together
    #[default]
    Both,
}

/// A committed zone boundary crossing
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ZoneTransition {
    /// Zone that was entered or exited
    pub zone: Label,
    /// True for enter, false for exit
    pub entered: bool,
    /// When the transition committed (after debounce)
    pub timestamp: Timestamp,
    /// Position that triggered the transition
    pub position: Point,
    /// Confidence of that position estimate
    pub confidence: f32,
    /// Hardware signaling configured for the zone
    pub alert_mode: AlertMode,
}

/// A location group moving in or out of proximity range
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ProximityChange {
    /// Location whose proximity state flipped
    pub location: Label,
    /// True when now in range
    pub in_range: bool,
    /// When the change was observed
    pub timestamp: Timestamp,
}

/// Callback surface for the external alert subsystem
///
/// Invoked synchronously on the cooperative tick. Implementations must not
/// block; they decide *how* hardware is driven, this crate only decides
/// *when*.
pub trait AlertSink {
    /// A zone was entered or exited (already debounced and cooldown-gated)
    fn zone_transition(&mut self, transition: &ZoneTransition);

    /// A beacon location group came into or left proximity range
    fn proximity_change(&mut self, change: &ProximityChange);
}

/// Sink that discards all events; useful for tests and headless operation
#[derive(Debug, Default)]
pub struct NullAlertSink;

impl AlertSink for NullAlertSink {
    fn zone_transition(&mut self, _transition: &ZoneTransition) {}
    fn proximity_change(&mut self, _change: &ProximityChange) {}
}
