//! Fixed-capacity round-robin rollup used for the per-source packet and
//! packet-size history exposed over the HTTP surface.
//!
//! This is intentionally a small in-memory ring, not a time-series database —
//! log formats and device-specific schemas are out of scope for this
//! subsystem (see Non-goals).

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// A ring buffer of the last `N` per-second sample counts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rrd<const N: usize> {
    samples: VecDeque<u64>,
}

impl<const N: usize> Rrd<N> {
    pub fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(N),
        }
    }

    /// Push a new sample, evicting the oldest if at capacity.
    pub fn push(&mut self, value: u64) {
        if self.samples.len() == N {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    pub fn last(&self) -> Option<u64> {
        self.samples.back().copied()
    }

    pub fn sum(&self) -> u64 {
        self.samples.iter().sum()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &u64> {
        self.samples.iter()
    }
}

impl<const N: usize> Default for Rrd<N> {
    fn default() -> Self {
        Self::new()
    }
}
