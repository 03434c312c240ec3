//! Packet-Level Signal Smoothing
//!
//! ## Overview
//!
//! Advertising packets arrive irregularly and partly corrupted: CRC errors,
//! multipath spikes, deep fades. This module turns that stream into one
//! stable per-beacon RSSI estimate:
//!
//! ```text
//! raw packets → quality gate → per-beacon window → median/trimmed mean
//!                                                        ↓
//!                                        optional temporal filter (IIR/Kalman)
//! ```
//!
//! ## Publishing Rules
//!
//! A smoothed value is published only when the window holds enough valid
//! samples (half the window, or full) *and* the oldest retained sample is
//! within the latency bound. A beacon that stops advertising simply stops
//! publishing; the caller holds its last-known value or treats the beacon
//! as unavailable.
//!
//! ## Capacity Policy
//!
//! Beacon slots are a fixed-capacity arena. Once every slot is taken, newly
//! seen beacons are silently dropped and counted - not an error - until
//! [`SignalSmoother::expire`] reclaims an idle slot.

use heapless::Vec;

use crate::{
    buffer::Ring,
    constants::{
        FILTER_CONVERGENCE_COVARIANCE, IIR_ALPHA, MAX_TRACKED_BEACONS, MAX_WINDOW_LATENCY_MS,
        MIN_VALID_SAMPLES, QUALITY_FLOOR_DBM, SAMPLE_WINDOW, SCALAR_KALMAN_Q, SCALAR_KALMAN_R,
        SMOOTHER_SLOT_TIMEOUT_MS, TRIM_FRACTION,
    },
    events::BeaconId,
    time::{elapsed_ms, Timestamp},
};

/// Window aggregation method
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Aggregation {
    /// Median; even counts average the two middle values
    Median,
    /// Drop `trim` fraction from each end, average the rest
    TrimmedMean {
        /// Fraction of samples trimmed per end, in [0, 0.5)
        trim: f32,
    },
}

impl Default for Aggregation {
    fn default() -> Self {
        Aggregation::Median
    }
}

/// Secondary temporal filter stacked on the window aggregate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FilterKind {
    /// Window aggregate only
    Disabled,
    /// Exponential IIR: `f = alpha * raw + (1 - alpha) * f_prev`
    Iir,
    /// Scalar Kalman: predict `P += Q`, correct with gain `K = P / (P + R)`
    Kalman,
}

impl Default for FilterKind {
    fn default() -> Self {
        FilterKind::Disabled
    }
}

/// Smoother tuning, overridable at runtime through the config loader
///
/// Every field has a calibrated default, so config blobs may set only the
/// fields they care about.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SmootherConfig {
    /// Samples below this RSSI are discarded (dBm)
    pub quality_floor_dbm: i16,
    /// Valid samples needed before publishing (window-full also publishes)
    pub min_valid_samples: usize,
    /// Oldest retained sample must be younger than this (ms)
    pub max_latency_ms: u64,
    /// Window aggregation method
    pub aggregation: Aggregation,
    /// Temporal filter selection
    pub filter: FilterKind,
    /// IIR coefficient, runtime adjustable
    pub iir_alpha: f32,
    /// Kalman process noise, runtime adjustable
    pub kalman_q: f32,
    /// Kalman measurement noise, runtime adjustable
    pub kalman_r: f32,
    /// Idle slots older than this are reclaimed (ms)
    pub slot_timeout_ms: u64,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self {
            quality_floor_dbm: QUALITY_FLOOR_DBM,
            min_valid_samples: MIN_VALID_SAMPLES,
            max_latency_ms: MAX_WINDOW_LATENCY_MS,
            aggregation: Aggregation::Median,
            filter: FilterKind::Disabled,
            iir_alpha: IIR_ALPHA,
            kalman_q: SCALAR_KALMAN_Q,
            kalman_r: SCALAR_KALMAN_R,
            slot_timeout_ms: SMOOTHER_SLOT_TIMEOUT_MS,
        }
    }
}

/// One retained sample
#[derive(Debug, Clone, Copy)]
struct SampleEntry {
    rssi_dbm: i16,
    timestamp: Timestamp,
}

/// Scalar temporal filter state, persists across windows
#[derive(Debug, Clone, Copy, Default)]
struct TemporalFilter {
    initialized: bool,
    value: f32,
    covariance: f32,
    updates: u32,
    // Diagnostics accumulators
    raw_sum: f32,
    raw_sq_sum: f32,
    err_sq_sum: f32,
}

impl TemporalFilter {
    fn update(&mut self, kind: FilterKind, config: &SmootherConfig, measurement: f32) -> f32 {
        if !self.initialized {
            self.initialized = true;
            self.value = measurement;
            self.covariance = 1.0;
        } else {
            match kind {
                FilterKind::Disabled => self.value = measurement,
                FilterKind::Iir => {
                    self.value =
                        config.iir_alpha * measurement + (1.0 - config.iir_alpha) * self.value;
                }
                FilterKind::Kalman => {
                    // Predict
                    self.covariance += config.kalman_q;
                    // Correct
                    let gain = self.covariance / (self.covariance + config.kalman_r);
                    self.value += gain * (measurement - self.value);
                    self.covariance *= 1.0 - gain;
                }
            }
        }

        self.updates += 1;
        self.raw_sum += measurement;
        self.raw_sq_sum += measurement * measurement;
        let err = self.value - measurement;
        self.err_sq_sum += err * err;

        self.value
    }

    fn diagnostics(&self) -> FilterDiagnostics {
        let n = self.updates as f32;
        let (variance, rms_error) = if self.updates > 1 {
            let mean = self.raw_sum / n;
            let var = (self.raw_sq_sum / n - mean * mean).max(0.0);
            (var, libm::sqrtf(self.err_sq_sum / n))
        } else {
            (0.0, 0.0)
        };

        FilterDiagnostics {
            updates: self.updates,
            variance,
            rms_error,
            converged: self.initialized
                && self.updates >= 5
                && self.covariance < FILTER_CONVERGENCE_COVARIANCE,
        }
    }
}

/// Filter health readout
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterDiagnostics {
    /// Total filter updates
    pub updates: u32,
    /// Variance of the raw aggregates fed in
    pub variance: f32,
    /// RMS deviation of the filtered output from the raw aggregates
    pub rms_error: f32,
    /// Covariance settled below the convergence threshold
    pub converged: bool,
}

/// Per-beacon smoothing statistics
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SlotStats {
    /// Samples accepted into the window
    pub accepted: u32,
    /// Samples discarded by the quality gate
    pub discarded: u32,
    /// Age span of the current window (ms)
    pub latency_ms: u64,
    /// Last accepted-sample timestamp
    pub last_update: Timestamp,
}

/// Per-beacon tracking slot
#[derive(Debug, Clone)]
struct Slot {
    id: BeaconId,
    window: Ring<SampleEntry, SAMPLE_WINDOW>,
    stats: SlotStats,
    smoothed: Option<i16>,
    filter: TemporalFilter,
}

impl Slot {
    fn new(id: BeaconId) -> Self {
        Self {
            id,
            window: Ring::new(),
            stats: SlotStats::default(),
            smoothed: None,
            filter: TemporalFilter::default(),
        }
    }

    fn oldest_timestamp(&self) -> Option<Timestamp> {
        self.window.get(0).map(|s| s.timestamp)
    }

    fn ready(&self, min_valid: usize) -> bool {
        self.window.len() >= min_valid || self.window.is_full()
    }

    fn aggregate(&self, method: Aggregation) -> Option<i16> {
        if self.window.is_empty() {
            return None;
        }

        let mut values: Vec<i16, SAMPLE_WINDOW> =
            self.window.iter().map(|s| s.rssi_dbm).collect();
        values.sort_unstable();

        match method {
            Aggregation::Median => {
                let n = values.len();
                if n % 2 == 1 {
                    Some(values[n / 2])
                } else {
                    let lo = values[n / 2 - 1] as i32;
                    let hi = values[n / 2] as i32;
                    Some(((lo + hi) / 2) as i16)
                }
            }
            Aggregation::TrimmedMean { trim } => {
                let n = values.len();
                let cut = ((n as f32) * trim.clamp(0.0, 0.49)) as usize;
                let kept = &values[cut..n - cut];
                if kept.is_empty() {
                    return None;
                }
                let sum: i32 = kept.iter().map(|&v| v as i32).sum();
                Some((sum / kept.len() as i32) as i16)
            }
        }
    }
}

/// Global smoother counters
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SmootherStats {
    /// Samples accepted across all beacons
    pub processed: u32,
    /// Samples discarded by the quality gate
    pub discarded: u32,
    /// Samples from unseen beacons dropped because all slots were taken
    pub unslotted: u32,
}

/// Per-beacon RSSI smoother with fixed slot capacity
pub struct SignalSmoother {
    config: SmootherConfig,
    slots: Vec<Slot, MAX_TRACKED_BEACONS>,
    stats: SmootherStats,
}

impl SignalSmoother {
    /// Create a smoother with the given tuning
    pub fn new(config: SmootherConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            stats: SmootherStats::default(),
        }
    }

    /// Feed one raw sample through the quality gate into its beacon window
    ///
    /// Returns whether the sample was accepted. Rejections (bad quality,
    /// below the floor, no free slot) only bump counters.
    pub fn accept_sample(
        &mut self,
        id: &BeaconId,
        rssi_dbm: i16,
        quality_valid: bool,
        now: Timestamp,
    ) -> bool {
        if !quality_valid || rssi_dbm < self.config.quality_floor_dbm {
            self.stats.discarded += 1;
            if let Some(slot) = self.slot_mut(id) {
                slot.stats.discarded += 1;
            }
            return false;
        }

        let slot = match self.slot_index(id) {
            Some(i) => &mut self.slots[i],
            None => {
                if self.slots.push(Slot::new(*id)).is_err() {
                    // Capacity policy: unseen beacons wait for expiry
                    self.stats.unslotted += 1;
                    return false;
                }
                let last = self.slots.len() - 1;
                &mut self.slots[last]
            }
        };

        slot.window.push(SampleEntry {
            rssi_dbm,
            timestamp: now,
        });
        slot.stats.accepted += 1;
        slot.stats.last_update = now;
        slot.stats.latency_ms = slot
            .oldest_timestamp()
            .map(|oldest| elapsed_ms(oldest, now))
            .unwrap_or(0);

        if slot.ready(self.config.min_valid_samples) {
            if let Some(aggregate) = slot.aggregate(self.config.aggregation) {
                slot.smoothed = Some(aggregate);
                if self.config.filter != FilterKind::Disabled {
                    slot.filter
                        .update(self.config.filter, &self.config, aggregate as f32);
                }
            }
        }

        self.stats.processed += 1;
        true
    }

    /// Smoothed RSSI for a beacon, if its window is ready and fresh
    ///
    /// Idempotent: with no new samples and the same `now`, repeated calls
    /// return the same value.
    pub fn smoothed(&self, id: &BeaconId, now: Timestamp) -> Option<i16> {
        let slot = self.slot(id)?;
        if !slot.ready(self.config.min_valid_samples) {
            return None;
        }

        let oldest = slot.oldest_timestamp()?;
        if elapsed_ms(oldest, now) > self.config.max_latency_ms {
            return None;
        }

        slot.smoothed
    }

    /// All beacons whose windows are ready and fresh, with their smoothed
    /// values
    pub fn ready(&self, now: Timestamp) -> impl Iterator<Item = (BeaconId, i16)> + '_ {
        self.slots
            .iter()
            .filter_map(move |slot| self.smoothed(&slot.id, now).map(|rssi| (slot.id, rssi)))
    }

    /// Temporally filtered RSSI, if a filter is enabled and initialized
    ///
    /// Unlike [`smoothed`](Self::smoothed) this persists across window
    /// gaps - the filter state is the beacon's long-horizon estimate.
    pub fn filtered(&self, id: &BeaconId) -> Option<f32> {
        if self.config.filter == FilterKind::Disabled {
            return None;
        }
        let slot = self.slot(id)?;
        slot.filter.initialized.then_some(slot.filter.value)
    }

    /// Filter diagnostics for a beacon
    pub fn filter_diagnostics(&self, id: &BeaconId) -> Option<FilterDiagnostics> {
        self.slot(id).map(|s| s.filter.diagnostics())
    }

    /// Per-beacon window statistics
    pub fn slot_stats(&self, id: &BeaconId) -> Option<SlotStats> {
        self.slot(id).map(|s| s.stats)
    }

    /// Global counters
    pub fn stats(&self) -> SmootherStats {
        self.stats
    }

    /// Number of occupied beacon slots
    pub fn tracked_beacons(&self) -> usize {
        self.slots.len()
    }

    /// Reclaim slots idle past the slot timeout
    pub fn expire(&mut self, now: Timestamp) {
        let timeout = self.config.slot_timeout_ms;
        self.slots
            .retain(|slot| elapsed_ms(slot.stats.last_update, now) <= timeout);
    }

    /// Forget one beacon entirely
    pub fn clear_beacon(&mut self, id: &BeaconId) {
        if let Some(i) = self.slot_index(id) {
            self.slots.swap_remove(i);
        }
    }

    /// Reset every temporal filter but keep the windows
    pub fn reset_filters(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.filter = TemporalFilter::default();
        }
    }

    /// Adjust the IIR coefficient at runtime
    pub fn set_iir_alpha(&mut self, alpha: f32) {
        self.config.iir_alpha = alpha.clamp(0.01, 1.0);
    }

    /// Adjust Kalman noise parameters at runtime
    pub fn set_kalman_noise(&mut self, process: f32, measurement: f32) {
        self.config.kalman_q = process.max(1e-6);
        self.config.kalman_r = measurement.max(1e-6);
    }

    /// Replace the tuning wholesale (config loader path)
    pub fn set_config(&mut self, config: SmootherConfig) {
        self.config = config;
    }

    /// Current tuning
    pub fn config(&self) -> &SmootherConfig {
        &self.config
    }

    fn slot(&self, id: &BeaconId) -> Option<&Slot> {
        self.slots.iter().find(|s| s.id == *id)
    }

    fn slot_mut(&mut self, id: &BeaconId) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|s| s.id == *id)
    }

    fn slot_index(&self, id: &BeaconId) -> Option<usize> {
        self.slots.iter().position(|s| s.id == *id)
    }
}

impl Default for SignalSmoother {
    fn default() -> Self {
        Self::new(SmootherConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beacon(n: u8) -> BeaconId {
        use core::fmt::Write;
        let mut s = heapless::String::<23>::new();
        write!(s, "AA:BB:CC:DD:EE:{:02X}", n).unwrap();
        BeaconId::new(&s).unwrap()
    }

    fn feed(smoother: &mut SignalSmoother, id: &BeaconId, values: &[i16], start: Timestamp) {
        for (i, &v) in values.iter().enumerate() {
            smoother.accept_sample(id, v, true, start + i as u64 * 50);
        }
    }

    #[test]
    fn rejects_bad_quality_and_weak_signal() {
        let mut smoother = SignalSmoother::default();
        let id = beacon(1);

        assert!(!smoother.accept_sample(&id, -60, false, 0));
        assert!(!smoother.accept_sample(&id, -99, true, 0));
        assert!(smoother.accept_sample(&id, -60, true, 0));

        let stats = smoother.stats();
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.discarded, 2);
    }

    #[test]
    fn not_ready_below_minimum() {
        let mut smoother = SignalSmoother::default();
        let id = beacon(1);

        feed(&mut smoother, &id, &[-60, -61], 0);
        assert!(smoother.smoothed(&id, 100).is_none());

        feed(&mut smoother, &id, &[-62, -63, -64], 200);
        assert!(smoother.smoothed(&id, 400).is_some());
    }

    #[test]
    fn median_resists_spike() {
        let mut smoother = SignalSmoother::default();
        let id = beacon(1);

        // One +30dB multipath spike among steady -60s
        feed(&mut smoother, &id, &[-60, -60, -30, -60, -60], 0);
        assert_eq!(smoother.smoothed(&id, 250), Some(-60));
    }

    #[test]
    fn median_even_count_averages_middles() {
        let mut smoother = SignalSmoother::default();
        let id = beacon(1);

        feed(&mut smoother, &id, &[-58, -60, -62, -64, -66, -68], 0);
        // Sorted middles are -62 and -64
        assert_eq!(smoother.smoothed(&id, 300), Some(-63));
    }

    #[test]
    fn trimmed_mean_drops_extremes() {
        let mut smoother = SignalSmoother::new(SmootherConfig {
            aggregation: Aggregation::TrimmedMean { trim: TRIM_FRACTION },
            ..SmootherConfig::default()
        });
        let id = beacon(1);

        feed(
            &mut smoother,
            &id,
            &[-60, -60, -60, -60, -60, -60, -60, -60, -20, -95],
            0,
        );
        let value = smoother.smoothed(&id, 500).unwrap();
        assert!(value >= -62 && value <= -58, "got {}", value);
    }

    #[test]
    fn stale_window_not_published() {
        let mut smoother = SignalSmoother::default();
        let id = beacon(1);

        feed(&mut smoother, &id, &[-60, -61, -62, -60, -61], 0);
        assert!(smoother.smoothed(&id, 250).is_some());

        // Oldest retained sample now exceeds the 500ms latency bound
        assert!(smoother.smoothed(&id, 900).is_none());
    }

    #[test]
    fn repeated_reads_identical() {
        let mut smoother = SignalSmoother::default();
        let id = beacon(1);

        feed(&mut smoother, &id, &[-61, -63, -60, -62, -64], 0);
        let first = smoother.smoothed(&id, 250);
        let second = smoother.smoothed(&id, 250);
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[test]
    fn slot_capacity_drops_new_beacons() {
        let mut smoother = SignalSmoother::default();

        for n in 0..MAX_TRACKED_BEACONS as u8 {
            assert!(smoother.accept_sample(&beacon(n), -60, true, 0));
        }
        assert_eq!(smoother.tracked_beacons(), MAX_TRACKED_BEACONS);

        // One more beacon: silently dropped, counted
        assert!(!smoother.accept_sample(&beacon(200), -60, true, 0));
        assert_eq!(smoother.stats().unslotted, 1);

        // Expiry frees slots, the newcomer fits afterwards
        smoother.expire(SMOOTHER_SLOT_TIMEOUT_MS + 1);
        assert_eq!(smoother.tracked_beacons(), 0);
        assert!(smoother.accept_sample(&beacon(200), -60, true, 20_000));
    }

    #[test]
    fn kalman_filter_converges_on_constant_signal() {
        let mut smoother = SignalSmoother::new(SmootherConfig {
            filter: FilterKind::Kalman,
            ..SmootherConfig::default()
        });
        let id = beacon(1);

        for i in 0..40u64 {
            smoother.accept_sample(&id, -60, true, i * 50);
        }

        let filtered = smoother.filtered(&id).unwrap();
        assert!((filtered - (-60.0)).abs() < 1.0, "got {}", filtered);

        let diag = smoother.filter_diagnostics(&id).unwrap();
        assert!(diag.converged);
        assert!(diag.rms_error < 2.0);
    }

    #[test]
    fn iir_tracks_step_gradually() {
        let mut smoother = SignalSmoother::new(SmootherConfig {
            filter: FilterKind::Iir,
            ..SmootherConfig::default()
        });
        let id = beacon(1);

        for i in 0..10u64 {
            smoother.accept_sample(&id, -70, true, i * 50);
        }
        let before = smoother.filtered(&id).unwrap();
        assert!((before - (-70.0)).abs() < 0.01, "got {}", before);

        // Step to -50: the window median shifts as -50s displace -70s,
        // and the filter trails the shifting aggregate
        for i in 0..10u64 {
            smoother.accept_sample(&id, -50, true, 500 + i * 50);
        }
        let after = smoother.filtered(&id).unwrap();

        // Moves toward the step but does not jump all the way
        assert!(after > -60.0, "got {}", after);
        assert!(after < -51.0, "got {}", after);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// The smoothed value always lies within the retained window's
            /// min/max, for any accepted sample sequence.
            #[test]
            fn smoothed_within_window_bounds(
                samples in proptest::collection::vec(-94i16..=-20, 5..40)
            ) {
                let mut smoother = SignalSmoother::default();
                let id = beacon(1);

                for (i, &rssi) in samples.iter().enumerate() {
                    smoother.accept_sample(&id, rssi, true, i as u64 * 10);
                }

                let now = samples.len() as u64 * 10;
                if let Some(value) = smoother.smoothed(&id, now) {
                    let window: std::vec::Vec<i16> = samples
                        .iter()
                        .copied()
                        .rev()
                        .take(SAMPLE_WINDOW)
                        .collect();
                    let min = *window.iter().min().unwrap();
                    let max = *window.iter().max().unwrap();
                    prop_assert!(value >= min && value <= max);
                }
            }
        }
    }
}
