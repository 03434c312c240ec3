//! ProxiZone Core - BLE Beacon Positioning for Wearable Trackers
//!
//! ## Overview
//!
//! Physics-aware positioning for battery-powered wearables that listen to
//! BLE advertising beacons. Raw RSSI is noisy, multipath-ridden and
//! irregular; this crate turns it into a stable 2D position and debounced
//! zone enter/exit events:
//!
//! ```text
//! Radio callback                     Cooperative tick
//!      │                                   │
//!  SampleQueue ──→ SignalSmoother ──→ BeaconRegistry ──→ proximity events
//!  (lock-free)     (median + filter)  (names, distance)
//!                        │
//!                  PositionEstimator ──→ ZoneEngine ──→ zone events
//!                  (trilateration)       (debounce)
//! ```
//!
//! ## Design Constraints
//!
//! - **No allocation**: every store is fixed-capacity (`heapless`, const
//!   generics); suitable for `no_std` targets with ~64KB RAM
//! - **No blocking**: the only cross-context structure is a lock-free
//!   queue; everything else runs on a single cooperative tick
//! - **Nothing fatal**: estimation failures are ordinary [`PositionError`]
//!   values and downstream holds last-known state
//!
//! ## Quick Start
//!
//! ```rust
//! use proxizone_core::{NullAlertSink, Pipeline, SampleQueue};
//! use proxizone_core::events::{BeaconId, RawSample};
//!
//! static QUEUE: SampleQueue<64> = SampleQueue::new();
//!
//! let mut pipeline = Pipeline::new(&QUEUE);
//! let mut sink = NullAlertSink;
//!
//! // Radio callback side: push compact samples
//! let id = BeaconId::new("AA:BB:CC:DD:EE:01").unwrap();
//! QUEUE.push(RawSample {
//!     beacon: id,
//!     rssi_dbm: -60,
//!     timestamp: 100,
//!     quality_valid: true,
//! });
//!
//! // Main loop side: one cooperative pass
//! pipeline.register_name(&id, "Zone-Home-01");
//! let fix = pipeline.tick(200, &mut sink);
//! assert!(fix.is_none()); // one sample is not enough for a window
//! ```
//!
//! ## Features
//!
//! - `std` (default): serde configuration, `log` diagnostics
//! - `embedded`: `defmt` formatting for error types
//! - `serde`: configuration blob and status snapshot serialization

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]
#![warn(missing_docs)]

// Optional logging, compiled out entirely without the `log` feature
#[cfg(feature = "log")]
macro_rules! log_debug {
    ($($arg:tt)*) => { log::debug!($($arg)*) };
}
#[cfg(not(feature = "log"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "log")]
macro_rules! log_info {
    ($($arg:tt)*) => { log::info!($($arg)*) };
}
#[cfg(not(feature = "log"))]
macro_rules! log_info {
    ($($arg:tt)*) => {};
}

#[cfg(feature = "log")]
macro_rules! log_warn {
    ($($arg:tt)*) => { log::warn!($($arg)*) };
}
#[cfg(not(feature = "log"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {};
}

pub(crate) use {log_debug, log_info, log_warn};

pub mod buffer;
pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod pipeline;
pub mod position;
pub mod queue;
pub mod registry;
pub mod smoother;
pub mod time;
pub mod zones;

pub use config::SystemConfig;
pub use errors::{ConfigError, PositionError, PositionResult};
pub use events::{
    AlertMode, AlertSink, NullAlertSink, Point, ProximityChange, RawSample, ZoneTransition,
};
pub use pipeline::{Pipeline, StatusSnapshot};
pub use position::{BeaconReference, PositionEstimate, PositionEstimator};
pub use queue::SampleQueue;
pub use registry::BeaconRegistry;
pub use smoother::SignalSmoother;
pub use time::Timestamp;
pub use zones::{ZoneDefinition, ZoneEngine, ZoneShape};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
