//! Recording state machine.
//!
//! ```text
//! ┌───────────────┐
//! │               ↓
//! │        ┌── Idle
//! │        │     ↓
//! │        │  Standby ───────┐
//! │        │     ↓           │
//! │        └→ Ready ─────────┤
//! │           ↓      ↓       │
//! │      Active  ActiveViewOnly
//! │           ↓      ↓       ↓
//! │          Ended      Canceled
//! └───────────┴──────────┘
//! ```
//!
//! `Ended` and `Canceled` fall back to `Idle` in the step that entered
//! them, after their one-time effects. At most one recording session exists
//! at a time.

pub mod info;
pub mod naming;
pub mod post_stop;
pub mod spin_up;

use std::fmt;
use std::path::Path;
use std::thread;
use std::time::Duration as StdDuration;

use chrono::{Duration, NaiveDateTime};
use log::{debug, info, warn};
use recsched_model::{EventKey, PostStopAction, RecorderStatus, Reservation, ResolvedOption, ServiceKey};

use crate::config::SchedulerConfig;
use crate::error::HostError;
use crate::host::{find_channel, same_driver, Host, Notices, PowerControl, RecorderControl, TunerControl};
use crate::store::ReservationStore;

pub use info::{HookKind, RecordingInfo};
pub use post_stop::PostStop;

/// Seconds before start at which the machine gets ready.
pub const READY_OFFSET_SECS: i64 = 60;

/// Extra slack for joining an adjacent event.
const JOIN_GRACE_SECS: i64 = 2;

/// Stream counters settle a few seconds after the recorder starts.
pub const START_STATS_DELAY_SECS: i64 = 5;

const START_RETRY_DELAY: StdDuration = StdDuration::from_millis(200);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum RecordingState {
    #[default]
    Idle,
    Standby,
    Ready,
    Active,
    ActiveViewOnly,
    Ended,
    Canceled,
}

impl RecordingState {
    pub fn is_active(self) -> bool {
        matches!(self, RecordingState::Active | RecordingState::ActiveViewOnly)
    }
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecordingState::Idle => "Idle",
            RecordingState::Standby => "Standby",
            RecordingState::Ready => "Ready",
            RecordingState::Active => "Rec",
            RecordingState::ActiveViewOnly => "View",
            RecordingState::Ended => "End",
            RecordingState::Canceled => "Cancel",
        };
        write!(f, "{}", s)
    }
}

/// What one step did.
#[derive(Debug, Default)]
pub struct StepOutcome {
    pub transitions: Vec<(RecordingState, RecordingState)>,
    /// The store was modified and must be saved.
    pub store_changed: bool,
    /// Post-stop action to run now.
    pub post_stop: Option<PostStopAction>,
    /// Milliseconds to the next reservation's trimmed start after the step.
    pub offset_ms: Option<i64>,
}

impl StepOutcome {
    pub fn offset_secs(&self) -> Option<i64> {
        self.offset_ms.map(|ms| ms.div_euclid(1000))
    }
}

fn below(offset_ms: Option<i64>, threshold_ms: i64) -> bool {
    offset_ms.map_or(false, |offset| offset < threshold_ms)
}

#[derive(Debug, Default)]
pub struct RecordingMachine {
    state: RecordingState,
    /// Nearest reservation as of the previous step.
    nearest: Option<EventKey>,
    on_stopped: PostStopAction,
    ch_changed: bool,
    spun_up: bool,
    stop_requested: bool,
    session: Option<RecordingInfo>,
    start_stats_due: Option<NaiveDateTime>,
}

impl RecordingMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RecordingState {
        self.state
    }

    pub fn nearest(&self) -> Option<&EventKey> {
        self.nearest.as_ref()
    }

    /// The reservation being recorded or watched right now.
    pub fn active_key(&self) -> Option<&EventKey> {
        if self.state.is_active() {
            self.nearest.as_ref()
        } else {
            None
        }
    }

    pub fn on_stopped(&self) -> PostStopAction {
        self.on_stopped
    }

    pub fn session(&self) -> Option<&RecordingInfo> {
        self.session.as_ref()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// The host recorder changed state. Stopping while recording, or any
    /// change while watching, counts as a user stop.
    pub fn on_record_status(&mut self, status: RecorderStatus) {
        if (status == RecorderStatus::Idle && self.state == RecordingState::Active)
            || self.state == RecordingState::ActiveViewOnly
        {
            self.stop_requested = true;
        }
    }

    /// Channel or service switched; ends a view-only session.
    pub fn on_channel_changed(&mut self) {
        if self.state == RecordingState::ActiveViewOnly {
            self.stop_requested = true;
        }
    }

    pub fn on_status_reset(&mut self) {
        if let Some(session) = self.session.as_mut() {
            session.start_stats = None;
        }
    }

    fn enter<H: Host + ?Sized>(&mut self, next: RecordingState, host: &mut H, outcome: &mut StepOutcome) {
        if next == self.state {
            return;
        }
        debug!("Recording: {} -> {}", self.state, next);
        outcome.transitions.push((self.state, next));
        self.state = next;
        host.state_changed(next);
    }

    /// Evaluate the machine once.
    pub fn step<H>(
        &mut self,
        host: &mut H,
        store: &mut ReservationStore,
        config: &SchedulerConfig,
        post_stop: &mut PostStop,
        now: NaiveDateTime,
        notices: &mut Notices,
    ) -> StepOutcome
    where
        H: Host + ?Sized,
    {
        let mut outcome = StepOutcome::default();
        self.sample_start_stats(host, now);

        if store.purge_expired(now) > 0 {
            outcome.store_changed = true;
        }
        let defaults = store.defaults().clone();
        let nearest: Option<Reservation> = store.nearest(now, true).cloned();
        let offset = nearest
            .as_ref()
            .map(|r| (r.trimmed_start(&defaults) - now).num_milliseconds());

        let key = nearest.as_ref().map(|r| r.key);
        let service_changed = key.map(|k| k.service) != self.nearest.map(|k| k.service);
        let event_changed = key != self.nearest;
        self.nearest = key;

        let resolved = nearest.as_ref().map(|r| r.resolved(&defaults));
        let view_only = resolved.as_ref().map_or(false, |o| o.view_only);
        let option_on_stopped = resolved.as_ref().map(|o| o.on_stopped);
        let default_on_stopped = defaults.on_stopped.unwrap_or_default();

        let wake_ms = config.wake_window_secs() * 1000;
        let ready_ms = READY_OFFSET_SECS * 1000;

        match self.state {
            RecordingState::Idle | RecordingState::Standby => {
                if self.state == RecordingState::Standby {
                    if !below(offset, wake_ms) {
                        self.enter(RecordingState::Canceled, host, &mut outcome);
                        self.on_stopped = default_on_stopped;
                        notices.info("直近の予約時刻に変更がありました。");
                    }
                } else if below(offset, wake_ms) {
                    self.enter(RecordingState::Standby, host, &mut outcome);
                    leave_postponed(host, post_stop);
                }

                if let Some(res) = nearest.as_ref().filter(|_| below(offset, ready_ms)) {
                    self.enter(RecordingState::Ready, host, &mut outcome);
                    leave_postponed(host, post_stop);
                    if host.recorder_status().is_idle() {
                        tune(host, config, res.key.service, notices);
                        self.ch_changed = true;
                    }
                    let kind = if view_only { "見るだけ予約" } else { "録画" };
                    notices.info(format!("{}が始まります:\n{}", kind, res.name));
                }

                if let Some(res) = nearest.as_ref() {
                    if below(offset, config.ch_change_before as i64 * 1000) {
                        if !self.ch_changed && host.recorder_status().is_idle() {
                            tune(host, config, res.key.service, notices);
                            self.ch_changed = true;
                        }
                    } else {
                        self.ch_changed = false;
                    }

                    if below(offset, config.spin_up_before as i64 * 1000) {
                        if !self.spun_up && config.spin_up_before != 0 && !view_only {
                            if let Some(option) = resolved.as_ref() {
                                spin_up_disk(&option.save_dir);
                            }
                            self.spun_up = true;
                        }
                    } else {
                        self.spun_up = false;
                    }
                } else {
                    self.ch_changed = false;
                    self.spun_up = false;
                }
            }
            RecordingState::Ready => {
                let trigger_ms = config.tick_interval_ms as i64;
                match (nearest.as_ref(), resolved.as_ref()) {
                    (Some(res), Some(option)) if below(offset, trigger_ms) && host.recorder_status().is_idle() => {
                        self.on_stopped = option.on_stopped;
                        if (config.set_preview && option.view_only)
                            || (config.set_preview_no_view_only && !option.view_only)
                        {
                            switch_preview_on(host);
                        }
                        tune(host, config, res.key.service, notices);
                        if option.view_only {
                            self.enter(RecordingState::ActiveViewOnly, host, &mut outcome);
                        } else {
                            self.enter(RecordingState::Active, host, &mut outcome);
                            let name = naming::recording_file_name(
                                &option.save_name,
                                res.key.event_id,
                                res.start,
                                &res.name,
                                &config.event_name_translate,
                                &config.event_name_remove,
                            );
                            let path = option.save_dir.join(name);
                            if let Err(e) = start_recorder(host, &path) {
                                warn!("Recording: failed to start {}: {}", path.display(), e);
                                notices.error("録画の開始に失敗しました。");
                            }
                        }
                        self.begin_session(host, res, option.clone(), now, notices);
                    }
                    _ => {
                        if !below(offset, ready_ms) {
                            self.enter(RecordingState::Canceled, host, &mut outcome);
                            self.on_stopped = default_on_stopped;
                            notices.info("直近の予約時刻に変更がありました。");
                        }
                    }
                }
            }
            RecordingState::Active => {
                if config.join_events
                    && event_changed
                    && !service_changed
                    && below(offset, (READY_OFFSET_SECS + JOIN_GRACE_SECS) * 1000)
                    && !view_only
                {
                    info!("Recording: joining adjacent event {:?}", key);
                    self.on_stopped = option_on_stopped.unwrap_or_default();
                } else if event_changed || !below(offset, ready_ms) {
                    self.enter(RecordingState::Ended, host, &mut outcome);
                    if let Err(e) = host.stop_recording() {
                        warn!("Recording: failed to stop recorder: {}", e);
                    }
                } else if self.stop_requested {
                    self.enter(RecordingState::Ended, host, &mut outcome);
                    if let Some(removed) = store.delete_nearest(now, true) {
                        info!("Recording: stopped by user, removed \"{}\"", removed.name);
                    }
                    outcome.store_changed = true;
                } else if let Some(on_stopped) = option_on_stopped {
                    self.on_stopped = on_stopped;
                }
                if self.state == RecordingState::Ended {
                    notices.info("録画が終了しました。");
                }
            }
            RecordingState::ActiveViewOnly => {
                if event_changed || !below(offset, ready_ms) {
                    self.enter(RecordingState::Ended, host, &mut outcome);
                } else if self.stop_requested {
                    self.enter(RecordingState::Ended, host, &mut outcome);
                    self.on_stopped = PostStopAction::None;
                    if let Some(removed) = store.delete_nearest(now, true) {
                        info!("Recording: viewing stopped by user, removed \"{}\"", removed.name);
                    }
                    outcome.store_changed = true;
                } else if let Some(on_stopped) = option_on_stopped {
                    self.on_stopped = on_stopped;
                }
                if self.state == RecordingState::Ended {
                    notices.info("見るだけ予約が終了しました。");
                }
            }
            RecordingState::Ended | RecordingState::Canceled => {}
        }

        outcome.offset_ms = offset;
        if matches!(self.state, RecordingState::Ended | RecordingState::Canceled) {
            if self.state == RecordingState::Ended {
                self.end_session(host, notices);
            }
            self.enter(RecordingState::Idle, host, &mut outcome);

            let offset = if outcome.store_changed {
                let next = store
                    .nearest(now, true)
                    .map(|r| (r.trimmed_start(&defaults) - now).num_milliseconds());
                outcome.offset_ms = next;
                next
            } else {
                offset
            };
            if !below(offset, wake_ms) && host.recorder_status().is_idle() && self.on_stopped != PostStopAction::None {
                outcome.post_stop = Some(self.on_stopped);
            }
            self.ch_changed = false;
            self.spun_up = false;
            self.stop_requested = false;
        }
        outcome
    }

    fn begin_session<H: Host + ?Sized>(
        &mut self,
        host: &mut H,
        res: &Reservation,
        option: ResolvedOption,
        now: NaiveDateTime,
        notices: &mut Notices,
    ) {
        let view_only = option.view_only;
        let mut info = RecordingInfo::new(res.clone(), option);
        if !view_only {
            info.file_path = host.recording_path();
        }
        info.service_name = find_channel(&host.channels(), res.key.service.network_id, res.key.service.service_id)
            .map(|ch| ch.name.clone());
        info.event = host.event(&res.key);

        if let Err(e) = host.on_start(&info) {
            warn!("Recording: start hook failed: {}", e);
            notices.error("コマンドラインの起動に失敗しました。");
        }
        self.start_stats_due = Some(now + Duration::seconds(START_STATS_DELAY_SECS));
        self.session = Some(info);
    }

    fn sample_start_stats<H: Host + ?Sized>(&mut self, host: &H, now: NaiveDateTime) {
        match self.start_stats_due {
            Some(due) if now >= due => {
                self.start_stats_due = None;
                if let Some(session) = self.session.as_mut() {
                    session.start_stats = host.stream_stats();
                }
            }
            _ => {}
        }
    }

    fn end_session<H: Host + ?Sized>(&mut self, host: &mut H, notices: &mut Notices) {
        self.start_stats_due = None;
        let mut info = match self.session.take() {
            Some(info) => info,
            None => return,
        };
        info.end_stats = host.stream_stats();
        if let Err(e) = host.on_end(&info) {
            warn!("Recording: end hook failed: {}", e);
            notices.error("コマンドラインの起動に失敗しました。");
        }
    }
}

fn leave_postponed<H: PowerControl + ?Sized>(host: &mut H, post_stop: &mut PostStop) {
    if post_stop.is_postponed() {
        post_stop.clear_postponed();
        if let Err(e) = host.set_standby(false) {
            warn!("Recording: failed to leave standby: {}", e);
        }
    }
}

fn switch_preview_on<H: PowerControl + ?Sized>(host: &mut H) {
    let result = if host.is_standby() {
        host.set_standby(false)
    } else {
        host.set_preview(true)
    };
    if let Err(e) = result {
        warn!("Recording: failed to switch preview on: {}", e);
    }
}

fn spin_up_disk(dir: &Path) {
    if let Err(e) = spin_up::touch(dir) {
        warn!("Recording: spin-up of {} failed: {}", dir.display(), e);
    }
}

/// Start the recorder, retrying once after a short delay.
fn start_recorder<H: RecorderControl + ?Sized>(host: &mut H, path: &Path) -> Result<(), HostError> {
    match host.start_recording(path) {
        Ok(()) => {
            info!("Recording: started {}", path.display());
            Ok(())
        }
        Err(e) => {
            debug!("Recording: start failed ({}), retrying", e);
            thread::sleep(START_RETRY_DELAY);
            info!("Recording: retrying start of {}", path.display());
            host.start_recording(path)
        }
    }
}

/// Tune to a service, switching to the sub driver when the main one does
/// not carry it. Failures are reported and swallowed.
pub fn tune<H>(host: &mut H, config: &SchedulerConfig, service: ServiceKey, notices: &mut Notices)
where
    H: TunerControl + PowerControl + ?Sized,
{
    if let Err(e) = try_tune(host, config, service, notices) {
        warn!("Recording: tuning to {} failed: {}", service, e);
        notices.error(format!("チャンネルの変更に失敗しました: {}", service));
    }
}

fn try_tune<H>(host: &mut H, config: &SchedulerConfig, service: ServiceKey, notices: &mut Notices) -> Result<(), HostError>
where
    H: TunerControl + PowerControl + ?Sized,
{
    let mut target = config.driver_name.as_str();
    if !config.sub_driver_name.is_empty() {
        if let Some(list) = host.driver_channels(&config.driver_name) {
            if find_channel(&list, service.network_id, service.service_id).is_none() {
                target = config.sub_driver_name.as_str();
            }
        }
    }

    if !target.is_empty() {
        let current = host.driver_name();
        if current.as_deref().map_or(true, |name| !same_driver(name, target)) {
            notices.detail("ドライバを変更します。");
            host.set_driver(target)?;
        }
    }
    host.set_standby(false)?;

    let channel = find_channel(&host.channels(), service.network_id, service.service_id)
        .cloned()
        .ok_or(HostError::ChannelNotFound(service))?;
    host.set_channel(channel.space, channel.channel, service.service_id)
}
