//! Periodic tick driver.
//!
//! Runs [`Scheduler::tick`] on a tokio interval. The scheduler and the host
//! sit behind async mutexes so user operations from other tasks never run
//! concurrently with a tick. Ticks themselves run on the blocking pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};
use tokio::sync::{Mutex, Notify};
use tokio::time::{interval, MissedTickBehavior};

use super::{Scheduler, TickReport};
use crate::host::Host;

/// Tick driver state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    /// Ticks are delivered.
    Running,
    /// Ticks are skipped.
    Paused,
    /// The loop exits at the next wake-up.
    Stopped,
}

pub struct TickDriver<H> {
    scheduler: Arc<Mutex<Scheduler>>,
    host: Arc<Mutex<H>>,
    period: Duration,
    state: Arc<Mutex<DriverState>>,
    trigger: Notify,
    ticks: AtomicU64,
}

impl<H> TickDriver<H>
where
    H: Host + Send + 'static,
{
    pub fn new(scheduler: Arc<Mutex<Scheduler>>, host: Arc<Mutex<H>>, period: Duration) -> Self {
        Self {
            scheduler,
            host,
            period,
            state: Arc::new(Mutex::new(DriverState::Running)),
            trigger: Notify::new(),
            ticks: AtomicU64::new(0),
        }
    }

    /// Start the driver background task.
    pub fn start(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&self) {
        info!("TickDriver: Starting with interval {} ms", self.period.as_millis());

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {
                    debug!("TickDriver: Triggered");
                }
            }

            let state = *self.state.lock().await;
            match state {
                DriverState::Stopped => {
                    info!("TickDriver: Stopped");
                    break;
                }
                DriverState::Paused => {
                    debug!("TickDriver: Paused, skipping tick");
                    continue;
                }
                DriverState::Running => {}
            }

            self.tick_once().await;
        }
    }

    /// Run one tick now, regardless of state.
    ///
    /// The tick runs on the blocking pool since a recorder start retry sleeps.
    pub async fn tick_once(&self) -> TickReport {
        let mut scheduler = self.scheduler.clone().lock_owned().await;
        let mut host = self.host.clone().lock_owned().await;
        let report = match tokio::task::spawn_blocking(move || scheduler.tick(&mut *host)).await {
            Ok(report) => report,
            Err(e) => {
                error!("TickDriver: Tick task failed: {}", e);
                return TickReport::default();
            }
        };
        self.ticks.fetch_add(1, Ordering::SeqCst);
        for (from, to) in &report.transitions {
            debug!("TickDriver: {} -> {}", from, to);
        }
        report
    }

    /// Number of ticks delivered so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    /// Wake the loop for an immediate tick.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub async fn state(&self) -> DriverState {
        *self.state.lock().await
    }

    pub async fn pause(&self) {
        let mut state = self.state.lock().await;
        if *state == DriverState::Running {
            *state = DriverState::Paused;
            info!("TickDriver: Paused");
        }
    }

    pub async fn resume(&self) {
        let mut state = self.state.lock().await;
        if *state == DriverState::Paused {
            *state = DriverState::Running;
            info!("TickDriver: Resumed");
        }
    }

    pub async fn stop(&self) {
        *self.state.lock().await = DriverState::Stopped;
        self.trigger.notify_one();
    }
}
