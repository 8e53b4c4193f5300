//! Configuration file loading and normalization.
//!
//! The file is TOML with four optional sections:
//!
//! ```toml
//! [scheduler]
//! driver = "BonDriver_PT3-T.dll"
//! sub_driver = "BonDriver_PT3-S.dll"
//! tot_adjust_max = 5
//! ch_change_before = 120
//!
//! [recording]
//! start_margin = 30
//! save_dir = "D:/rec"
//! on_stopped = "SettleSuspend"
//!
//! [logging]
//! log_dir = "logs"
//! retention_days = 7
//! level = "info"
//!
//! [database]
//! path = "recsched.db"
//! ```
//!
//! Every value is optional. Out-of-range values are clamped, never rejected.

use std::path::{Path, PathBuf};

use recsched_model::RecordingOption;
use serde::Deserialize;
use thiserror::Error;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "recsched.toml";

/// Upper bound of the clock correction, in minutes.
pub const TOT_ADJUST_MAX_LIMIT: i64 = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Configuration file format.
#[derive(Debug, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub scheduler: SchedulerSection,
    /// Default recording option.
    #[serde(default)]
    pub recording: RecordingOption,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub database: DatabaseSection,
}

#[derive(Debug, Deserialize, Default)]
pub struct SchedulerSection {
    pub driver: Option<String>,
    pub sub_driver: Option<String>,
    pub tot_adjust_max: Option<i64>,
    pub resume_margin: Option<i64>,
    pub suspend_margin: Option<i64>,
    pub ch_change_before: Option<i64>,
    pub spin_up_before: Option<i64>,
    pub suspend_wait: Option<i64>,
    pub force_suspend: Option<bool>,
    pub app_suspend_timeout: Option<i64>,
    pub show_dialog_on_app_suspend: Option<bool>,
    pub set_preview: Option<bool>,
    pub set_preview_no_view_only: Option<bool>,
    pub join_events: Option<bool>,
    pub event_relay: Option<bool>,
    pub notify_level: Option<i64>,
    pub event_name_translate: Option<String>,
    pub event_name_remove: Option<String>,
    pub tick_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingSection {
    pub log_dir: Option<String>,
    pub retention_days: Option<u64>,
    pub level: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct DatabaseSection {
    pub path: Option<String>,
}

/// Normalized scheduler settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Main tuner driver; the scheduler stays inactive when empty.
    pub driver_name: String,
    /// Fallback driver for channels missing on the main one.
    pub sub_driver_name: String,
    /// Maximum clock correction in minutes (0 disables).
    pub tot_adjust_max: u32,
    /// Minutes the system needs to resume from sleep.
    pub resume_margin: u32,
    /// Minutes kept awake before a reservation.
    pub suspend_margin: u32,
    /// Seconds before start to pre-tune (0 disables).
    pub ch_change_before: u32,
    /// Seconds before start to touch the destination disk (0 disables).
    pub spin_up_before: u32,
    /// Seconds the delayed suspend waits.
    pub suspend_wait: u32,
    pub force_suspend: bool,
    /// Minutes the host may stay in standby capturing EPG.
    pub app_suspend_timeout: u32,
    pub show_dialog_on_app_suspend: bool,
    /// Switch preview on when a view-only reservation starts.
    pub set_preview: bool,
    /// Switch preview on when a recording starts.
    pub set_preview_no_view_only: bool,
    /// Keep recording across adjacent events of one service.
    pub join_events: bool,
    pub event_relay: bool,
    /// Highest notification level shown to the user (0 = none).
    pub notify_level: u8,
    /// Delimiter-led character pairs applied to event names.
    pub event_name_translate: String,
    /// Keyword patterns removed from event names.
    pub event_name_remove: String,
    pub tick_interval_ms: u64,
    pub defaults: RecordingOption,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            driver_name: String::new(),
            sub_driver_name: String::new(),
            tot_adjust_max: 5,
            resume_margin: 5,
            suspend_margin: 5,
            ch_change_before: 120,
            spin_up_before: 20,
            suspend_wait: 10,
            force_suspend: false,
            app_suspend_timeout: 20,
            show_dialog_on_app_suspend: true,
            set_preview: true,
            set_preview_no_view_only: false,
            join_events: false,
            event_relay: false,
            notify_level: 1,
            event_name_translate: String::new(),
            event_name_remove: String::new(),
            tick_interval_ms: 2000,
            defaults: RecordingOption::default(),
        }
    }
}

impl SchedulerConfig {
    /// Seconds before a reservation at which the machine must be awake.
    pub fn wake_window_secs(&self) -> i64 {
        (self.suspend_margin as i64 + self.resume_margin as i64) * 60
    }

    pub fn app_suspend_timeout_secs(&self) -> i64 {
        self.app_suspend_timeout as i64 * 60
    }

    pub fn tick_secs(&self) -> i64 {
        (self.tick_interval_ms as i64 / 1000).max(1)
    }
}

/// A lead time of 0 disables the action; anything else is at least 15 s.
fn clamp_lead(value: i64) -> u32 {
    if value <= 0 {
        0
    } else {
        value.clamp(15, u32::MAX as i64) as u32
    }
}

fn clamp_u32(value: i64, min: i64, max: i64) -> u32 {
    value.clamp(min, max) as u32
}

impl SchedulerSection {
    /// Apply defaults and clamps.
    pub fn normalize(&self, defaults: RecordingOption) -> SchedulerConfig {
        let base = SchedulerConfig::default();
        let upper = u32::MAX as i64;
        SchedulerConfig {
            driver_name: self.driver.clone().unwrap_or_default(),
            sub_driver_name: self.sub_driver.clone().unwrap_or_default(),
            tot_adjust_max: self
                .tot_adjust_max
                .map_or(base.tot_adjust_max, |v| clamp_u32(v, 0, TOT_ADJUST_MAX_LIMIT)),
            resume_margin: self
                .resume_margin
                .map_or(base.resume_margin, |v| clamp_u32(v, 0, upper)),
            suspend_margin: self
                .suspend_margin
                .map_or(base.suspend_margin, |v| clamp_u32(v, 0, upper)),
            ch_change_before: self.ch_change_before.map_or(base.ch_change_before, clamp_lead),
            spin_up_before: self.spin_up_before.map_or(base.spin_up_before, clamp_lead),
            suspend_wait: self
                .suspend_wait
                .map_or(base.suspend_wait, |v| clamp_u32(v, 0, 120)),
            force_suspend: self.force_suspend.unwrap_or(base.force_suspend),
            app_suspend_timeout: self
                .app_suspend_timeout
                .map_or(base.app_suspend_timeout, |v| clamp_u32(v, 1, upper)),
            show_dialog_on_app_suspend: self
                .show_dialog_on_app_suspend
                .unwrap_or(base.show_dialog_on_app_suspend),
            set_preview: self.set_preview.unwrap_or(base.set_preview),
            set_preview_no_view_only: self
                .set_preview_no_view_only
                .unwrap_or(base.set_preview_no_view_only),
            join_events: self.join_events.unwrap_or(base.join_events),
            event_relay: self.event_relay.unwrap_or(base.event_relay),
            notify_level: self
                .notify_level
                .map_or(base.notify_level, |v| v.clamp(0, 3) as u8),
            event_name_translate: self.event_name_translate.clone().unwrap_or_default(),
            event_name_remove: self.event_name_remove.clone().unwrap_or_default(),
            tick_interval_ms: self
                .tick_interval_ms
                .map_or(base.tick_interval_ms, |v| v.max(100)),
            defaults,
        }
    }
}

impl ConfigFile {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        self.scheduler.normalize(self.recording.clone())
    }
}

/// Read and parse a configuration file.
pub fn load_config(path: &Path) -> Result<ConfigFile, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> Result<ConfigFile, ConfigError> {
    Ok(toml::from_str(contents)?)
}

/// Explicit path first, then `recsched.toml` in the working directory.
pub fn locate_config(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
    default_path.exists().then_some(default_path)
}
