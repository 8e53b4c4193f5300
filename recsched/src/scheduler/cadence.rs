//! Tick counting for periodic checks.

/// Ticks between query scans when a single query is registered.
pub const CHECK_QUERY_INTERVAL: u32 = 150;

/// Ticks between follow-up runs.
pub const FOLLOW_UP_INTERVAL: u32 = 5;

/// Ticks between scans so that every query is visited about once per
/// `CHECK_QUERY_INTERVAL` ticks.
pub fn query_period(queries: usize) -> u32 {
    let divisor = u32::try_from(queries).unwrap_or(u32::MAX).saturating_add(1);
    (CHECK_QUERY_INTERVAL / divisor).max(1)
}

#[derive(Debug, Clone, Default)]
pub struct Cadence {
    count: u32,
}

impl Cadence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one tick. Returns true every `period` ticks.
    pub fn due(&mut self, period: u32) -> bool {
        self.count += 1;
        if self.count >= period.max(1) {
            self.count = 0;
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }
}
