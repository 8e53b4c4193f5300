//! What happens once a recording is over.
//!
//! A settle-first action first puts the host into standby so it can finish
//! collecting program data, and only runs the plain action once a watchdog
//! decides the collection is done.

use log::{debug, info, warn};
use recsched_model::PostStopAction;

use crate::config::SchedulerConfig;
use crate::host::{Notices, PowerControl, SuspendRequest, TunerControl};
use crate::keep_awake::KeepAwake;

/// Watchdog budget when standby begins and whenever the tuner is lost.
pub const SETTLE_INITIAL_SECS: i64 = 30;

/// Watchdog budget after the collecting tuner moved to another channel.
pub const SETTLE_CHANNEL_SECS: i64 = 60;

#[derive(Debug)]
struct SettleWatchdog {
    remaining: i64,
    elapsed: i64,
    channel: Option<(u32, u32)>,
}

#[derive(Debug, Default)]
pub struct PostStop {
    postponed: bool,
    /// Plain action to run when the watchdog finishes.
    pending: PostStopAction,
    confirming: bool,
    watchdog: Option<SettleWatchdog>,
}

impl PostStop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_postponed(&self) -> bool {
        self.postponed
    }

    /// Postponed or waiting on the user; the machine must stay awake.
    pub fn is_busy(&self) -> bool {
        self.postponed || self.confirming
    }

    pub fn is_watching(&self) -> bool {
        self.watchdog.is_some()
    }

    pub fn clear_postponed(&mut self) {
        self.postponed = false;
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Run the action chosen for a finished session.
    ///
    /// `offset_secs` is the time to the next reservation's trimmed start,
    /// `None` when there is none.
    pub fn after_session<H>(
        &mut self,
        host: &mut H,
        config: &SchedulerConfig,
        action: PostStopAction,
        offset_secs: Option<i64>,
        keep_awake: &KeepAwake,
        notices: &mut Notices,
    ) where
        H: PowerControl + ?Sized,
    {
        let mut mode = action;
        if action.is_settle_first() {
            self.pending = action.settled();
            let room = config.app_suspend_timeout_secs() + config.wake_window_secs();
            if offset_secs.map_or(true, |o| o >= room) && !host.is_standby() {
                self.postponed = true;
                debug!("PostStop: postponing {:?}", self.pending);
            } else {
                mode = self.pending;
            }
        }
        self.execute(host, config, mode, keep_awake, notices);
    }

    /// Carry out one action. Returns false if nothing was done.
    pub fn execute<H>(
        &mut self,
        host: &mut H,
        config: &SchedulerConfig,
        mode: PostStopAction,
        keep_awake: &KeepAwake,
        notices: &mut Notices,
    ) -> bool
    where
        H: PowerControl + ?Sized,
    {
        if mode == PostStopAction::None {
            return false;
        }

        if !mode.is_settle_first() || config.show_dialog_on_app_suspend {
            self.confirming = true;
            keep_awake.set(true);
            let accepted = host.confirm(mode);
            self.confirming = false;
            if !accepted {
                info!("PostStop: {} declined", mode.description());
                self.postponed = false;
                return false;
            }
        }

        match mode {
            PostStopAction::SettleNone
            | PostStopAction::SettleClose
            | PostStopAction::SettleSuspend
            | PostStopAction::SettleHibernate => {
                self.watchdog = Some(SettleWatchdog {
                    remaining: SETTLE_INITIAL_SECS,
                    elapsed: 0,
                    channel: None,
                });
                match host.set_standby(true) {
                    Ok(()) => notices.info(format!(
                        "待機状態にしました({}分以内に復帰)。",
                        config.app_suspend_timeout
                    )),
                    Err(e) => warn!("PostStop: failed to enter standby: {}", e),
                }
            }
            PostStopAction::Suspend | PostStopAction::Hibernate => {
                let request = SuspendRequest {
                    wait_secs: config.suspend_wait,
                    hibernate: mode == PostStopAction::Hibernate,
                    force: config.force_suspend,
                };
                if let Err(e) = host.request_suspend(request) {
                    warn!("PostStop: suspend request failed: {}", e);
                    return false;
                }
                info!("PostStop: {}", mode.description());
                host.close();
            }
            PostStopAction::Close => {
                info!("PostStop: closing host");
                host.close();
            }
            PostStopAction::None => return false,
        }
        true
    }

    /// Advance the settle watchdog by `elapsed_secs`.
    pub fn watch<H>(
        &mut self,
        host: &mut H,
        config: &SchedulerConfig,
        elapsed_secs: i64,
        keep_awake: &KeepAwake,
        notices: &mut Notices,
    ) where
        H: PowerControl + TunerControl + ?Sized,
    {
        let watchdog = match self.watchdog.as_mut() {
            Some(watchdog) => watchdog,
            None => return,
        };
        watchdog.remaining -= elapsed_secs;
        watchdog.elapsed += elapsed_secs;

        let done = !self.postponed
            || watchdog.remaining <= 0
            || watchdog.elapsed >= config.app_suspend_timeout_secs();
        if !done {
            match host.current_channel() {
                None => {
                    if watchdog.channel.take().is_some() {
                        watchdog.remaining = SETTLE_INITIAL_SECS;
                    }
                }
                Some(ch) => {
                    if watchdog.channel != Some((ch.space, ch.channel)) {
                        debug!("PostStop: collecting on {}", ch.name);
                        watchdog.channel = Some((ch.space, ch.channel));
                        watchdog.remaining = SETTLE_CHANNEL_SECS;
                    }
                }
            }
            return;
        }

        self.watchdog = None;
        if self.postponed {
            self.postponed = false;
            notices.info("EPG取得が完了(または中断)しました。");
            let pending = self.pending;
            if !self.execute(host, config, pending, keep_awake, notices) {
                if let Err(e) = host.set_standby(false) {
                    warn!("PostStop: failed to leave standby: {}", e);
                }
            }
        }
    }
}
