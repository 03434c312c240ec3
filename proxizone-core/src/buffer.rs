//! Fixed-Size Overwrite Ring for Bounded Histories
//!
//! ## Overview
//!
//! Several stages keep a sliding window of recent data: the smoother's raw
//! sample windows, the estimator's position history, the zone engine's
//! transition log. All of them want the same thing - a fixed-capacity buffer
//! that silently discards the oldest entry when full, with zero heap
//! allocation.
//!
//! ## Why not `heapless::Vec`?
//!
//! `heapless::Vec` errors when full; here recent data is strictly more
//! valuable than old data, so overwrite-on-full is the correct policy and
//! callers should never have to handle a push failure.
//!
//! ## Invariants
//!
//! - `write_pos < N`
//! - `len <= N`
//! - iteration yields elements oldest to newest
//!
//! Not thread-safe; the cross-context structure is `queue::SampleQueue`.

/// Fixed-size ring buffer that overwrites the oldest element when full
#[derive(Debug, Clone)]
pub struct Ring<T: Copy, const N: usize> {
    data: [Option<T>; N],
    write_pos: usize,
    len: usize,
}

impl<T: Copy, const N: usize> Ring<T, N> {
    /// Creates an empty ring; usable in const/static contexts
    pub const fn new() -> Self {
        Self {
            data: [None; N],
            write_pos: 0,
            len: 0,
        }
    }

    /// Add an element, overwriting the oldest when full
    pub fn push(&mut self, value: T) {
        self.data[self.write_pos] = Some(value);
        self.write_pos = (self.write_pos + 1) % N;

        if self.len < N {
            self.len += 1;
        }
    }

    /// Number of stored elements
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Check if at capacity
    pub fn is_full(&self) -> bool {
        self.len == N
    }

    /// Most recently pushed element
    pub fn last(&self) -> Option<&T> {
        if self.is_empty() {
            return None;
        }

        let idx = if self.write_pos == 0 { N - 1 } else { self.write_pos - 1 };
        self.data[idx].as_ref()
    }

    /// Element by logical index (0 = oldest)
    ///
    /// When the ring is full the oldest element sits at `write_pos`, so
    /// logical indices are offset by it; before that they match physical
    /// indices directly.
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }

        let actual = if self.len < N {
            index
        } else {
            (self.write_pos + index) % N
        };

        self.data[actual].as_ref()
    }

    /// Iterate oldest to newest
    pub fn iter(&self) -> RingIter<'_, T, N> {
        RingIter {
            ring: self,
            index: 0,
        }
    }

    /// Drop all elements
    pub fn clear(&mut self) {
        self.data = [None; N];
        self.write_pos = 0;
        self.len = 0;
    }

    /// Drop elements failing the predicate, preserving order
    ///
    /// Used to age out stale history entries. O(n) rebuild; the rings in
    /// this crate are all small.
    pub fn retain(&mut self, mut keep: impl FnMut(&T) -> bool) {
        let mut kept: [Option<T>; N] = [None; N];
        let mut count = 0;

        for i in 0..self.len {
            if let Some(item) = self.get(i) {
                if keep(item) {
                    kept[count] = Some(*item);
                    count += 1;
                }
            }
        }

        self.data = kept;
        self.write_pos = count % N;
        self.len = count;
    }
}

impl<T: Copy, const N: usize> Default for Ring<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over ring contents, oldest first
pub struct RingIter<'a, T: Copy, const N: usize> {
    ring: &'a Ring<T, N>,
    index: usize,
}

impl<'a, T: Copy, const N: usize> Iterator for RingIter<'a, T, N> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.ring.get(self.index)?;
        self.index += 1;
        Some(item)
    }
}
