//! Host application boundary.
//!
//! The scheduler never talks to the TV application directly. Everything it
//! needs (program data, tuning, the recorder, power management, persistence
//! and user notification) is reached through the collaborator traits below,
//! and everything the host tells the scheduler arrives as a [`HostEvent`].
//!
//! A host adapter implements all traits on one type; [`Host`] is implemented
//! for it automatically.

use std::fmt;
use std::path::{Path, PathBuf};

use recsched_model::{
    EpgEvent, EventKey, PostStopAction, ProgramInfo, Query, RecorderStatus, Reservation,
    ServiceKey, StreamStats, TunerChannel,
};

use crate::error::HostError;
use crate::recording::{RecordingInfo, RecordingState};

#[cfg(test)]
pub mod testing;

/// Notifications the host raises into the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    /// The recorder status changed (user stop shows up as `Idle`).
    RecordStatusChanged(RecorderStatus),
    ChannelChanged,
    ServiceChanged,
    /// The host entered (`true`) or left standby.
    StandbyChanged(bool),
    /// Stream counters were reset by the user.
    StatusReset,
    /// Reservations were edited outside the scheduler.
    ReservationsReloaded,
    /// Queries were edited outside the scheduler.
    QueriesReloaded,
}

/// Severity of a user-visible notification (lower is more important).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NotifyLevel {
    Error = 1,
    Info = 2,
    Detail = 3,
}

impl NotifyLevel {
    pub fn value(self) -> u8 {
        self as u8
    }
}

/// A notification produced during a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NotifyLevel,
    pub message: String,
}

/// Notices collected during one tick, delivered to the host afterwards.
#[derive(Debug, Default)]
pub struct Notices {
    items: Vec<Notice>,
}

impl Notices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, level: NotifyLevel, message: impl Into<String>) {
        self.items.push(Notice {
            level,
            message: message.into(),
        });
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.push(NotifyLevel::Error, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.push(NotifyLevel::Info, message);
    }

    pub fn detail(&mut self, message: impl Into<String>) {
        self.push(NotifyLevel::Detail, message);
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Notice> {
        self.items.iter()
    }

    pub fn take(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.items)
    }
}

/// Parameters of a delayed system suspend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspendRequest {
    /// Seconds to wait before suspending.
    pub wait_secs: u32,
    pub hibernate: bool,
    pub force: bool,
}

/// Program guide access.
pub trait EpgProvider {
    /// Schedule lookup by identity.
    fn event(&self, key: &EventKey) -> Option<EpgEvent>;

    /// All known schedule events of a service, ordered by start.
    fn events(&self, service: &ServiceKey) -> Option<Vec<EpgEvent>>;

    /// Present program of the tuned service.
    fn present(&self) -> Option<ProgramInfo>;

    /// Following program of the tuned service.
    fn following(&self) -> Option<ProgramInfo>;
}

/// Tuner and driver selection.
pub trait TunerControl {
    /// File name of the driver currently loaded, if any.
    fn driver_name(&self) -> Option<String>;

    /// Channels of the loaded driver's tuning spaces.
    fn channels(&self) -> Vec<TunerChannel>;

    /// Channels of another driver, without loading it.
    fn driver_channels(&self, driver: &str) -> Option<Vec<TunerChannel>>;

    fn current_channel(&self) -> Option<TunerChannel>;

    fn set_driver(&mut self, driver: &str) -> Result<(), HostError>;

    fn set_channel(&mut self, space: u32, channel: u32, service_id: u16) -> Result<(), HostError>;
}

/// The host's recorder.
pub trait RecorderControl {
    fn start_recording(&mut self, path: &Path) -> Result<(), HostError>;

    fn stop_recording(&mut self) -> Result<(), HostError>;

    fn recorder_status(&self) -> RecorderStatus;

    /// Path the recorder actually writes to (after its own token expansion).
    fn recording_path(&self) -> Option<PathBuf>;

    fn stream_stats(&self) -> Option<StreamStats>;
}

/// Standby, preview and system power.
pub trait PowerControl {
    fn is_standby(&self) -> bool;

    fn set_standby(&mut self, standby: bool) -> Result<(), HostError>;

    fn set_preview(&mut self, enable: bool) -> Result<(), HostError>;

    /// Exit the host application.
    fn close(&mut self);

    /// Hand a delayed suspend over to an external process.
    fn request_suspend(&mut self, request: SuspendRequest) -> Result<(), HostError>;

    /// Ask the user whether the post-stop action may run.
    fn confirm(&mut self, action: PostStopAction) -> bool;
}

/// User-visible messages and status display.
pub trait Notifier {
    fn notify(&mut self, level: NotifyLevel, message: &str);

    fn state_changed(&mut self, _state: RecordingState) {}
}

/// Pre-/post-recording command launch.
pub trait RecordingHooks {
    fn on_start(&mut self, _info: &RecordingInfo) -> Result<(), HostError> {
        Ok(())
    }

    fn on_end(&mut self, _info: &RecordingInfo) -> Result<(), HostError> {
        Ok(())
    }
}

/// Storage of reservations and queries.
pub trait Persistence {
    fn load_reservations(&mut self) -> Result<Vec<Reservation>, HostError>;

    fn save_reservations(&mut self, reservations: &[Reservation]) -> Result<(), HostError>;

    fn load_queries(&mut self) -> Result<Vec<Query>, HostError>;

    fn save_queries(&mut self, queries: &[Query]) -> Result<(), HostError>;
}

/// Everything the scheduler needs from its host.
pub trait Host:
    EpgProvider + TunerControl + RecorderControl + PowerControl + Notifier + RecordingHooks + Persistence
{
}

impl<T> Host for T where
    T: EpgProvider
        + TunerControl
        + RecorderControl
        + PowerControl
        + Notifier
        + RecordingHooks
        + Persistence
{
}

/// Compare driver names by file name, ignoring case.
pub fn same_driver(a: &str, b: &str) -> bool {
    fn file_name(path: &str) -> &str {
        path.rsplit(['/', '\\']).next().unwrap_or(path)
    }
    !a.is_empty() && file_name(a).eq_ignore_ascii_case(file_name(b))
}

/// Find the tuning space and channel carrying a service.
///
/// Networks outside the valid ARIB ranges are never looked up.
pub fn find_channel(channels: &[TunerChannel], network_id: u16, service_id: u16) -> Option<&TunerChannel> {
    if !ServiceKey::new(network_id, 0, service_id).is_valid_network() {
        return None;
    }
    channels
        .iter()
        .find(|ch| ch.network_id == network_id && ch.service_id == service_id)
}

impl fmt::Display for NotifyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotifyLevel::Error => write!(f, "error"),
            NotifyLevel::Info => write!(f, "info"),
            NotifyLevel::Detail => write!(f, "detail"),
        }
    }
}
