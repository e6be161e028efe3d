//! Bounded pre-open report buffer (spec §9 open question: reports can
//! arrive from a capture helper before the open handshake finishes;
//! buffer them up to a byte cap rather than drop or grow unbounded).

use std::collections::VecDeque;

use crate::types::DataReport;

pub struct PreOpenBuffer {
    reports: VecDeque<DataReport>,
    bytes: usize,
    cap_bytes: usize,
    dropped: u64,
}

impl PreOpenBuffer {
    pub fn new(cap_bytes: usize) -> Self {
        Self {
            reports: VecDeque::new(),
            bytes: 0,
            cap_bytes,
            dropped: 0,
        }
    }

    /// Push a report, estimating its size via its JSON encoding. Drops
    /// (and counts) the report instead of growing past the cap.
    pub fn push(&mut self, report: DataReport) {
        let size = serde_json::to_vec(&report).map(|v| v.len()).unwrap_or(0);
        if self.bytes + size > self.cap_bytes {
            self.dropped += 1;
            return;
        }
        self.bytes += size;
        self.reports.push_back(report);
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }

    /// Drain all buffered reports in arrival order.
    pub fn drain(&mut self) -> Vec<DataReport> {
        self.bytes = 0;
        self.reports.drain(..).collect()
    }
}
