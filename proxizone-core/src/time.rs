//! Time handling for the positioning core
//!
//! Every stage works on plain millisecond timestamps supplied by the
//! caller (a hardware tick counter on device, literals in tests) and
//! compared with `saturating_sub` - there are no blocking waits anywhere
//! in the crate.

/// Timestamp in milliseconds since device boot
pub type Timestamp = u64;

/// Elapsed milliseconds between two timestamps, zero if `later` precedes
pub fn elapsed_ms(earlier: Timestamp, later: Timestamp) -> u64 {
    later.saturating_sub(earlier)
}
