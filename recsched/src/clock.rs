//! Broadcast-aligned clock.
//!
//! The local clock of a recording PC usually drifts, and recordings that start
//! a few seconds late lose the beginning of a program. [`ClockAdjuster`]
//! keeps an "adjusted now" that follows the broadcaster's time signal
//! (TOT/TDT) while it is being received, and falls back to local time when it
//! is not.
//!
//! Samples arrive on the stream-observation thread through a
//! [`TimeSignalSink`]; the poll thread calls [`ClockAdjuster::advance`] once
//! per tick. The only shared state is the last sample, held under a
//! `parking_lot::Mutex`.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Local, NaiveDateTime};
use log::debug;
use parking_lot::Mutex;

use crate::tot::TimeSignalSink;

/// A sample older than this is ignored.
pub const SAMPLE_TIMEOUT_MS: u64 = 60_000;

/// Receiver buffering delay subtracted from every sample.
pub const SIGNAL_LATENCY_MS: i64 = 2_000;

/// Largest backward correction per advance.
const MAX_BACKWARD_STEP_MS: i64 = 1_000;

/// Largest forward correction per advance.
const MAX_FORWARD_STEP_MS: i64 = 4_000;

/// Wall clock plus a monotonic millisecond counter.
pub trait TimeSource: Send + Sync {
    /// Local wall-clock time (JST on a correctly configured receiver).
    fn local_now(&self) -> NaiveDateTime;

    /// Monotonic milliseconds.
    fn tick_ms(&self) -> u64;
}

/// Real system clock.
#[derive(Debug)]
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for SystemTimeSource {
    fn local_now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn tick_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Last decoded time signal.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SignalSample {
    /// Signal time with latency compensation applied.
    pub time: NaiveDateTime,
    /// Tick at which it was decoded.
    pub tick: u64,
    pub valid: bool,
}

/// Drift-corrected "now".
pub struct ClockAdjuster {
    source: Arc<dyn TimeSource>,
    sample: Arc<Mutex<SignalSample>>,
    adjusted: NaiveDateTime,
    adjusted_tick: u64,
    /// Maximum divergence from local time in minutes; 0 disables correction.
    max_minutes: u32,
}

impl ClockAdjuster {
    pub fn new(source: Arc<dyn TimeSource>, max_minutes: u32) -> Self {
        let now = source.local_now();
        let tick = source.tick_ms();
        Self {
            sample: Arc::new(Mutex::new(SignalSample {
                time: now,
                tick,
                valid: false,
            })),
            source,
            adjusted: now,
            adjusted_tick: tick,
            max_minutes,
        }
    }

    /// Handle for the stream-observation thread.
    pub fn sink(&self) -> TimeSignalSink {
        TimeSignalSink::new(Arc::clone(&self.sample), Arc::clone(&self.source))
    }

    /// Record a decoded time signal.
    pub fn sample(&self, signal: NaiveDateTime) {
        self.sink().sample(signal);
    }

    /// Re-seed from local time and drop any sample.
    pub fn reset(&mut self) {
        self.adjusted = self.source.local_now();
        self.adjusted_tick = self.source.tick_ms();
        self.sample.lock().valid = false;
    }

    pub fn set_max_minutes(&mut self, max_minutes: u32) {
        self.max_minutes = max_minutes;
    }

    pub fn max_minutes(&self) -> u32 {
        self.max_minutes
    }

    /// Adjusted time as of the last [`advance`](Self::advance).
    pub fn now(&self) -> NaiveDateTime {
        self.adjusted
    }

    pub fn local_now(&self) -> NaiveDateTime {
        self.source.local_now()
    }

    /// Whether a fresh sample from the configured device is being followed.
    pub fn is_synchronized(&self) -> bool {
        self.sample.lock().valid
    }

    /// Move adjusted time forward by one poll.
    ///
    /// `tuned_to_device` is false while the host uses a driver other than the
    /// configured ones; samples are then ignored.
    pub fn advance(&mut self, tuned_to_device: bool) -> NaiveDateTime {
        let local = self.source.local_now();
        let tick = self.source.tick_ms();

        if self.max_minutes == 0 {
            self.adjusted = local;
            self.adjusted_tick = tick;
            return self.adjusted;
        }

        let elapsed = tick.saturating_sub(self.adjusted_tick);
        self.adjusted += Duration::milliseconds(elapsed as i64);
        self.adjusted_tick = tick;

        let target_diff = {
            let mut sample = self.sample.lock();
            let age = tick.saturating_sub(sample.tick);
            sample.valid = sample.valid && tuned_to_device && age < SAMPLE_TIMEOUT_MS;
            if sample.valid {
                sample.time - self.adjusted + Duration::milliseconds(age as i64)
            } else {
                local - self.adjusted
            }
        };

        let step = target_diff.num_milliseconds().clamp(-MAX_BACKWARD_STEP_MS, MAX_FORWARD_STEP_MS);
        self.adjusted += Duration::milliseconds(step);

        let max = Duration::minutes(self.max_minutes as i64);
        if self.adjusted - local > max {
            self.adjusted = local + max;
        } else if local - self.adjusted > max {
            self.adjusted = local - max;
        }

        if step.abs() >= MAX_BACKWARD_STEP_MS {
            debug!(
                "Clock: correcting target_diff={}ms local_diff={}ms",
                target_diff.num_milliseconds(),
                (self.adjusted - local).num_milliseconds()
            );
        }
        self.adjusted
    }
}


#[cfg(test)]
mod tests {
    use super::manual::ManualTimeSource;
    use super::*;
    use crate::host::testing::at;

    fn clock(max: u32) -> (Arc<ManualTimeSource>, ClockAdjuster) {
        let source = Arc::new(ManualTimeSource::new(at(12, 0, 0)));
        let clock = ClockAdjuster::new(source.clone(), max);
        (source, clock)
    }

    #[test]
    fn test_disabled_tracks_local() {
        let (source, mut clock) = clock(0);
        clock.sample(at(12, 3, 0));
        for _ in 0..5 {
            source.advance_ms(2000);
            source.skew_ms(700);
            assert_eq!(clock.advance(true), source.local_now());
        }
    }

    #[test]
    fn test_follows_signal_with_bounded_steps() {
        let (source, mut clock) = clock(5);
        // Broadcast is 12 s ahead of the local clock.
        clock.sample(at(12, 0, 12));

        let mut previous = clock.now();
        for _ in 0..5 {
            source.advance_ms(2000);
            let now = clock.advance(true);
            let step = (now - previous).num_milliseconds() - 2000;
            assert!((-1000..=4000).contains(&step));
            previous = now;
        }
        // 12 s minus the 2 s latency.
        assert_eq!(clock.now() - source.local_now(), Duration::seconds(10));
        assert!(clock.is_synchronized());
    }

    #[test]
    fn test_backward_correction_is_slow() {
        let (source, mut clock) = clock(5);
        clock.sample(at(11, 59, 57));
        source.advance_ms(2000);
        let now = clock.advance(true);
        assert_eq!(now, source.local_now() - Duration::seconds(1));
    }

    #[test]
    fn test_stale_or_foreign_sample_falls_back_to_local() {
        let (source, mut clock) = clock(5);
        clock.sample(at(12, 0, 12));
        source.advance_ms(2000);
        clock.advance(false);
        assert!(!clock.is_synchronized());

        // Invalid stays invalid until the next sample.
        source.advance_ms(2000);
        let now = clock.advance(true);
        assert!(now - source.local_now() < Duration::seconds(4));

        clock.sample(source.local_now() + Duration::seconds(30));
        source.advance_ms(SAMPLE_TIMEOUT_MS);
        clock.advance(true);
        assert!(!clock.is_synchronized());
    }

    #[test]
    fn test_divergence_capped() {
        let (source, mut clock) = clock(1);
        for _ in 0..100 {
            clock.sample(source.local_now() + Duration::minutes(10));
            source.advance_ms(2000);
            let now = clock.advance(true);
            assert!(now - source.local_now() <= Duration::minutes(1));
        }
        assert_eq!(clock.now() - source.local_now(), Duration::minutes(1));

        // Local jumps forward: adjusted is dragged along.
        source.skew_ms(5 * 60 * 1000);
        source.advance_ms(2000);
        let now = clock.advance(false);
        assert!(source.local_now() - now <= Duration::minutes(1));
    }

    #[test]
    fn test_reset_reseeds() {
        let (source, mut clock) = clock(5);
        clock.sample(at(12, 0, 30));
        source.skew_ms(60_000);
        clock.reset();
        assert_eq!(clock.now(), source.local_now());
        assert!(!clock.is_synchronized());
    }
}
