//! The scheduler and its periodic driver.
//!
//! [`Scheduler`] owns every piece of scheduling state and is advanced one
//! tick at a time by [`TickDriver`] (or directly by a host adapter). All
//! host interaction goes through the [`Host`] collaborator.

pub mod cadence;
pub mod driver;

use std::sync::Arc;

use chrono::NaiveDateTime;
use log::{debug, info, warn};
use recsched_model::{EventKey, Query, Reservation};

use crate::clock::{ClockAdjuster, TimeSource};
use crate::config::SchedulerConfig;
use crate::error::{HostError, Result, SchedulerError};
use crate::follow_up::{ChangeSummary, FollowUpTracker};
use crate::host::{same_driver, Host, HostEvent, Notice, NotifyLevel, Notices};
use crate::keep_awake::KeepAwake;
use crate::query::QueryList;
use crate::recording::{PostStop, RecordingMachine, RecordingState};
use crate::store::ReservationStore;
use crate::tot::TimeSignalSink;

pub use cadence::{query_period, Cadence, CHECK_QUERY_INTERVAL, FOLLOW_UP_INTERVAL};
pub use driver::{DriverState, TickDriver};

/// What happened during one tick.
#[derive(Debug, Default)]
pub struct TickReport {
    /// Adjusted time the tick ran at; `None` while the scheduler is inactive.
    pub now: Option<NaiveDateTime>,
    pub state: RecordingState,
    pub transitions: Vec<(RecordingState, RecordingState)>,
    /// Names of reservations created by queries.
    pub created: Vec<String>,
    pub changes: ChangeSummary,
    pub notices: Vec<Notice>,
}

pub struct Scheduler {
    config: SchedulerConfig,
    clock: ClockAdjuster,
    store: ReservationStore,
    queries: QueryList,
    follow_up: FollowUpTracker,
    machine: RecordingMachine,
    post_stop: PostStop,
    keep_awake: Option<KeepAwake>,
    query_cadence: Cadence,
    follow_up_cadence: Cadence,
    last_state: RecordingState,
    reload_reservations: bool,
    reload_queries: bool,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig, time_source: Arc<dyn TimeSource>) -> Self {
        let clock = ClockAdjuster::new(time_source, config.tot_adjust_max);
        let store = ReservationStore::new(config.defaults.clone());
        Self {
            config,
            clock,
            store,
            queries: QueryList::default(),
            follow_up: FollowUpTracker::new(),
            machine: RecordingMachine::new(),
            post_stop: PostStop::new(),
            keep_awake: None,
            query_cadence: Cadence::new(),
            follow_up_cadence: Cadence::new(),
            last_state: RecordingState::Idle,
            reload_reservations: false,
            reload_queries: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.keep_awake.is_some()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SchedulerConfig) {
        self.clock.set_max_minutes(config.tot_adjust_max);
        self.store.set_defaults(config.defaults.clone());
        self.config = config;
    }

    /// Writer for time signals decoded on the stream thread.
    pub fn time_signal_sink(&self) -> TimeSignalSink {
        self.clock.sink()
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    pub fn state(&self) -> RecordingState {
        self.machine.state()
    }

    pub fn is_keeping_awake(&self) -> bool {
        self.keep_awake.as_ref().map_or(false, KeepAwake::is_asserted)
    }

    fn uses_configured_driver(&self, driver: Option<&str>) -> bool {
        match driver {
            Some(name) => {
                same_driver(name, &self.config.driver_name)
                    || (!self.config.sub_driver_name.is_empty() && same_driver(name, &self.config.sub_driver_name))
            }
            None => false,
        }
    }

    /// Check the host and load stored reservations and queries.
    ///
    /// On error the scheduler stays inactive.
    pub fn enable<H: Host + ?Sized>(&mut self, host: &mut H) -> Result<()> {
        if self.is_enabled() {
            return Ok(());
        }
        if self.config.driver_name.is_empty() {
            return Err(SchedulerError::NoDriverConfigured);
        }
        let current = host.driver_name();
        if !self.uses_configured_driver(current.as_deref()) {
            return Err(SchedulerError::DriverMismatch {
                current,
                main: self.config.driver_name.clone(),
                sub: self.config.sub_driver_name.clone(),
            });
        }

        let reservations = host.load_reservations().map_err(SchedulerError::LoadReservations)?;
        let queries = host.load_queries().map_err(SchedulerError::LoadQueries)?;
        let keep_awake = KeepAwake::with_system_sink().map_err(SchedulerError::KeepAwake)?;

        self.store.replace_all(reservations);
        self.queries.replace_all(queries);
        self.clock.reset();
        self.machine.reset();
        self.follow_up.reset();
        self.post_stop.reset();
        self.query_cadence.reset();
        self.follow_up_cadence.reset();
        self.last_state = RecordingState::Idle;
        self.reload_reservations = false;
        self.reload_queries = false;
        self.keep_awake = Some(keep_awake);

        info!(
            "Scheduler: Enabled with {} reservation(s), {} query(ies)",
            self.store.len(),
            self.queries.len()
        );
        Ok(())
    }

    pub fn disable(&mut self) {
        if let Some(mut keep_awake) = self.keep_awake.take() {
            keep_awake.set(false);
            keep_awake.shutdown();
            info!("Scheduler: Disabled");
        }
        self.machine.reset();
        self.post_stop.reset();
        self.last_state = RecordingState::Idle;
    }

    /// Record a host notification; effects apply on the next tick.
    pub fn handle_event(&mut self, event: HostEvent) {
        debug!("Scheduler: host event {:?}", event);
        match event {
            HostEvent::RecordStatusChanged(status) => self.machine.on_record_status(status),
            HostEvent::ChannelChanged | HostEvent::ServiceChanged => self.machine.on_channel_changed(),
            HostEvent::StandbyChanged(false) => self.post_stop.clear_postponed(),
            HostEvent::StandbyChanged(true) => {}
            HostEvent::StatusReset => self.machine.on_status_reset(),
            HostEvent::ReservationsReloaded => self.reload_reservations = true,
            HostEvent::QueriesReloaded => self.reload_queries = true,
        }
    }

    pub fn reservations(&self) -> &ReservationStore {
        &self.store
    }

    pub fn queries(&self) -> &QueryList {
        &self.queries
    }

    /// Add or replace a reservation and persist. Returns false if nothing
    /// changed.
    pub fn reserve<H: Host + ?Sized>(&mut self, host: &mut H, reservation: Reservation) -> std::result::Result<bool, HostError> {
        if !self.store.upsert(reservation) {
            return Ok(false);
        }
        host.save_reservations(&self.store.to_vec())?;
        Ok(true)
    }

    pub fn cancel<H: Host + ?Sized>(&mut self, host: &mut H, key: &EventKey) -> std::result::Result<Option<Reservation>, HostError> {
        let removed = self.store.delete(key);
        if removed.is_some() {
            host.save_reservations(&self.store.to_vec())?;
        }
        Ok(removed)
    }

    pub fn set_queries<H: Host + ?Sized>(&mut self, host: &mut H, queries: Vec<Query>) -> std::result::Result<(), HostError> {
        host.save_queries(&queries)?;
        self.queries.replace_all(queries);
        self.query_cadence.reset();
        Ok(())
    }

    fn reload<H: Host + ?Sized>(&mut self, host: &mut H, notices: &mut Notices) {
        if std::mem::take(&mut self.reload_reservations) {
            match host.load_reservations() {
                Ok(reservations) => {
                    self.store.replace_all(reservations);
                    self.follow_up_cadence.reset();
                    self.query_cadence.reset();
                    info!("Scheduler: Reloaded {} reservation(s)", self.store.len());
                }
                Err(e) => {
                    warn!("Scheduler: Failed to reload reservations: {}", e);
                    notices.error("予約の読み込みエラーが発生しました。");
                }
            }
        }
        if std::mem::take(&mut self.reload_queries) {
            match host.load_queries() {
                Ok(queries) => {
                    self.queries.replace_all(queries);
                    info!("Scheduler: Reloaded {} query(ies)", self.queries.len());
                }
                Err(e) => {
                    warn!("Scheduler: Failed to reload queries: {}", e);
                    notices.error("予約の読み込みエラーが発生しました。");
                }
            }
        }
    }

    /// Run one poll. A no-op while the scheduler is inactive.
    pub fn tick<H: Host + ?Sized>(&mut self, host: &mut H) -> TickReport {
        let mut report = TickReport {
            state: self.machine.state(),
            ..Default::default()
        };
        if !self.is_enabled() {
            return report;
        }

        let mut notices = Notices::new();
        let mut store_dirty = false;

        if self.reload_reservations || self.reload_queries {
            self.reload(host, &mut notices);
        }

        let tuned = self.uses_configured_driver(host.driver_name().as_deref());
        let now = self.clock.advance(tuned);
        report.now = Some(now);

        if !self.queries.is_empty() && self.query_cadence.due(query_period(self.queries.len())) {
            let created = self.queries.scan(&*host, &mut self.store, now);
            if !created.is_empty() {
                store_dirty = true;
                notices.detail(format!("クエリから新しい予約が生成されました:{}", created.join(", ")));
                report.created = created;
            }
        }

        if self.follow_up.is_fast() || self.follow_up_cadence.due(FOLLOW_UP_INTERVAL) {
            let active = self.machine.active_key().copied();
            let summary = self
                .follow_up
                .run(&*host, &mut self.store, now, active.as_ref(), self.config.event_relay);
            if !summary.is_empty() {
                store_dirty = true;
                if let Some(message) = summary.message() {
                    notices.detail(message);
                }
            }
            report.changes = summary;
        }

        let outcome = self
            .machine
            .step(host, &mut self.store, &self.config, &mut self.post_stop, now, &mut notices);
        if outcome.store_changed {
            store_dirty = true;
        }

        if store_dirty {
            if let Err(e) = host.save_reservations(&self.store.to_vec()) {
                warn!("Scheduler: Failed to save reservations: {}", e);
                notices.error("予約の書き込みエラーが発生しました。");
            }
        }

        let state = self.machine.state();
        if let Some(keep_awake) = self.keep_awake.as_ref() {
            if let Some(action) = outcome.post_stop {
                info!("Scheduler: Running post-stop action: {}", action.description());
                self.post_stop
                    .after_session(host, &self.config, action, outcome.offset_secs(), keep_awake, &mut notices);
            }
            self.post_stop
                .watch(host, &self.config, self.config.tick_secs(), keep_awake, &mut notices);

            let busy = state != RecordingState::Idle
                || self.last_state != RecordingState::Idle
                || self.post_stop.is_busy();
            keep_awake.set(busy);
        }
        self.last_state = state;

        for notice in notices.take() {
            match notice.level {
                NotifyLevel::Error => warn!("Scheduler: {}", notice.message),
                _ => info!("Scheduler: {}", notice.message),
            }
            if notice.level.value() <= self.config.notify_level {
                host.notify(notice.level, &notice.message);
            }
            report.notices.push(notice);
        }

        report.state = state;
        report.transitions = outcome.transitions;
        report
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.disable();
    }
}
