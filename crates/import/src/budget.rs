//! Download budget.
//!
//! Two caps, checked only between items: a transfer that is already under
//! way always completes, so the byte total may overshoot `max_bytes` by at
//! most one artifact. The item count never overshoots `max_count`.

use derive_more::Display;

/// Which cap ended the run.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    #[display("byte cap")]
    Bytes,
    #[display("count cap")]
    Count,
}

#[derive(Debug, Clone)]
pub struct Budget {
    max_bytes: u64,
    max_count: u64,
    bytes: u64,
    count: u64,
}

impl Budget {
    pub fn new(max_bytes: u64, max_count: u64) -> Self {
        Self { max_bytes, max_count, bytes: 0, count: 0 }
    }

    pub fn should_continue(&self) -> bool {
        self.exhausted_by().is_none()
    }

    /// Account for one successful download.
    pub fn record(&mut self, bytes: u64) {
        self.bytes = self.bytes.saturating_add(bytes);
        self.count = self.count.saturating_add(1);
    }

    pub fn exhausted_by(&self) -> Option<Limit> {
        if self.bytes >= self.max_bytes {
            Some(Limit::Bytes)
        } else if self.count >= self.max_count {
            Some(Limit::Count)
        } else {
            None
        }
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn max_count(&self) -> u64 {
        self.max_count
    }
}
