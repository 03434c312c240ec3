//! Lock-Free Sample Queue Between Radio Callback and Cooperative Tick
//!
//! ## Overview
//!
//! Raw samples arrive from the radio driver in an interrupt-like context;
//! everything else runs on the cooperative tick. This queue is the single
//! cross-context structure: the callback does one non-blocking push, the
//! tick drains.
//!
//! ```text
//! Radio callback (ISR/task)           Cooperative tick
//!        ↓                                  ↓
//!   Atomic push ────→ Ring Buffer ←──── Atomic pop
//!        ↓                                  ↓
//!   Never blocks                       Never blocks
//! ```
//!
//! ## Overflow Policy: Drop-Oldest
//!
//! When the tick falls behind, the *newest* sample is the one worth keeping -
//! a stale RSSI reading is worthless for positioning. On overflow the
//! producer reclaims the oldest slot by advancing the tail, so a push always
//! succeeds and the dropped counter records the loss.
//!
//! Because both producer (overflow path) and consumer move the tail, tail
//! updates are compare-exchange; the head stays producer-owned.
//!
//! ## Memory Ordering
//!
//! - **Acquire** loads ensure slot writes from the other side are visible
//! - **Release** stores publish slot writes before the pointer moves
//! - **Relaxed** for statistics, which do not affect correctness
//!
//! Capacity must be a power of two so index wrap is a mask, not a divide.

#![allow(unsafe_code)] // Required for the lock-free ring storage

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr;
use core::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::events::RawSample;

/// Lock-free single-producer single-consumer sample queue
///
/// ## Example
///
/// ```rust
/// use proxizone_core::queue::SampleQueue;
/// use proxizone_core::events::{BeaconId, RawSample};
///
/// static QUEUE: SampleQueue<64> = SampleQueue::new();
///
/// // Producer (radio callback)
/// fn on_advertisement(rssi: i16, now: u64) {
///     let sample = RawSample {
///         beacon: BeaconId::new("AA:BB:CC:DD:EE:FF").unwrap(),
///         rssi_dbm: rssi,
///         timestamp: now,
///         quality_valid: true,
///     };
///     QUEUE.push(sample);
/// }
///
/// // Consumer (tick)
/// fn drain() {
///     while let Some(sample) = QUEUE.pop() {
///         // feed the smoother
///         let _ = sample;
///     }
/// }
/// ```
pub struct SampleQueue<const N: usize> {
    /// Ring storage; UnsafeCell for interior mutability with atomics
    buffer: UnsafeCell<[MaybeUninit<RawSample>; N]>,

    /// Next write position (producer owned)
    head: AtomicUsize,

    /// Next read position (moved by consumer, and by producer on overflow)
    tail: AtomicUsize,

    /// Queue statistics
    stats: QueueStats,
}

/// Queue health counters, updated with relaxed atomics
pub struct QueueStats {
    /// Samples pushed
    pub pushed: AtomicU32,
    /// Samples popped
    pub popped: AtomicU32,
    /// Oldest samples discarded on overflow
    pub dropped: AtomicU32,
}

impl QueueStats {
    const fn new() -> Self {
        Self {
            pushed: AtomicU32::new(0),
            popped: AtomicU32::new(0),
            dropped: AtomicU32::new(0),
        }
    }
}

impl<const N: usize> SampleQueue<N> {
    /// Create an empty queue; usable in static context
    pub const fn new() -> Self {
        assert!(N.is_power_of_two(), "queue capacity must be a power of 2");

        Self {
            buffer: UnsafeCell::new(unsafe { MaybeUninit::uninit().assume_init() }),
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
            stats: QueueStats::new(),
        }
    }

    /// Push a sample (single producer, radio callback context)
    ///
    /// Always succeeds; on overflow the oldest queued sample is discarded
    /// first. Returns `false` when that happened so the driver can count
    /// back-pressure.
    pub fn push(&self, sample: RawSample) -> bool {
        let head = self.head.load(Ordering::Acquire);
        let next_head = (head + 1) & (N - 1);
        let mut clean = true;

        // Full: reclaim the oldest slot. If the consumer races us and pops
        // it first, the queue is no longer full and we proceed either way.
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            if next_head != tail {
                break;
            }

            let next_tail = (tail + 1) & (N - 1);
            match self.tail.compare_exchange(
                tail,
                next_tail,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                    clean = false;
                    break;
                }
                Err(_) => core::hint::spin_loop(),
            }
        }

        // Safe: we are the only producer and the slot at `head` is free
        unsafe {
            let buffer = &mut *self.buffer.get();
            buffer[head].write(sample);
        }

        self.head.store(next_head, Ordering::Release);
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);

        clean
    }

    /// Pop the oldest sample (single consumer, tick context)
    pub fn pop(&self) -> Option<RawSample> {
        loop {
            let tail = self.tail.load(Ordering::Acquire);
            let head = self.head.load(Ordering::Acquire);

            if tail == head {
                return None;
            }

            // Read before claiming; discarded on CAS failure (samples are POD)
            let sample = unsafe {
                let buffer = &*self.buffer.get();
                ptr::read(&buffer[tail]).assume_init()
            };

            let next_tail = (tail + 1) & (N - 1);
            match self.tail.compare_exchange(
                tail,
                next_tail,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.stats.popped.fetch_add(1, Ordering::Relaxed);
                    return Some(sample);
                }
                Err(_) => {
                    // Producer reclaimed this slot on overflow; retry
                    core::hint::spin_loop();
                }
            }
        }
    }

    /// Current queue depth
    pub fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);

        if head >= tail {
            head - tail
        } else {
            N - tail + head
        }
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.head.load(Ordering::Acquire) == self.tail.load(Ordering::Acquire)
    }

    /// Queue statistics
    pub fn stats(&self) -> &QueueStats {
        &self.stats
    }
}

// The queue synchronizes all cross-thread access itself
unsafe impl<const N: usize> Send for SampleQueue<N> {}
unsafe impl<const N: usize> Sync for SampleQueue<N> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::BeaconId;

    fn sample(rssi: i16, ts: u64) -> RawSample {
        RawSample {
            beacon: BeaconId::new("AA:BB:CC:DD:EE:01").unwrap(),
            rssi_dbm: rssi,
            timestamp: ts,
            quality_valid: true,
        }
    }

    #[test]
    fn push_pop_fifo() {
        let queue = SampleQueue::<8>::new();

        assert!(queue.push(sample(-60, 1)));
        assert!(queue.push(sample(-61, 2)));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop().unwrap().timestamp, 1);
        assert_eq!(queue.pop().unwrap().timestamp, 2);
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn overflow_drops_oldest() {
        let queue = SampleQueue::<4>::new();

        // Ring holds capacity - 1
        for ts in 0..3 {
            assert!(queue.push(sample(-60, ts)));
        }

        // Overflow: oldest (ts=0) is reclaimed, newest kept
        assert!(!queue.push(sample(-60, 3)));
        assert_eq!(queue.stats().dropped.load(Ordering::Relaxed), 1);

        let first = queue.pop().unwrap();
        assert_eq!(first.timestamp, 1);

        let remaining: heapless::Vec<u64, 4> =
            core::iter::from_fn(|| queue.pop()).map(|s| s.timestamp).collect();
        assert_eq!(remaining.as_slice(), &[2, 3]);
    }

    #[test]
    fn depth_tracks_wraparound() {
        let queue = SampleQueue::<4>::new();

        for round in 0..10u64 {
            queue.push(sample(-70, round));
            assert_eq!(queue.pop().unwrap().timestamp, round);
        }
        assert_eq!(queue.len(), 0);
    }
}
