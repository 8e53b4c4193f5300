//! Reservation, query and identity types.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Genre filter value meaning "any".
pub const GENRE_WILDCARD: u8 = 0xFF;

/// Seconds in a day; the upper bound of a daily search window.
const DAY_SECS: u32 = 24 * 60 * 60;

/// Service identity (ONID/TSID/SID).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServiceKey {
    pub network_id: u16,
    pub transport_stream_id: u16,
    pub service_id: u16,
}

impl ServiceKey {
    pub fn new(network_id: u16, transport_stream_id: u16, service_id: u16) -> Self {
        Self {
            network_id,
            transport_stream_id,
            service_id,
        }
    }

    /// Whether the network ID is one a tuner can plausibly carry.
    ///
    /// Satellite networks are 0x0001-0x000B, terrestrial 0x7880-0x7FEF
    /// (ARIB TR-B14). Anything else is treated as garbage from the EPG.
    pub fn is_valid_network(&self) -> bool {
        (0x0001..=0x000B).contains(&self.network_id) || (0x7880..=0x7FEF).contains(&self.network_id)
    }

    /// Whether both services share one multiplex.
    pub fn same_transport(&self, other: &ServiceKey) -> bool {
        self.network_id == other.network_id && self.transport_stream_id == other.transport_stream_id
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NID=0x{:04X} TSID=0x{:04X} SID={}",
            self.network_id, self.transport_stream_id, self.service_id
        )
    }
}

/// Program identity; the unique key of a reservation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    pub service: ServiceKey,
    pub event_id: u16,
}

impl EventKey {
    pub fn new(service: ServiceKey, event_id: u16) -> Self {
        Self { service, event_id }
    }
}

impl fmt::Display for EventKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} EID=0x{:04X}", self.service, self.event_id)
    }
}

/// How a reservation tracks schedule and live program data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FollowMode {
    /// Follow schedule data, then present/following data.
    #[default]
    Default,
    /// Never re-time; only schedule-derived renames apply.
    Fixed,
    /// Extended while the current program has no known end.
    FollowingCurrent,
    /// Re-timed from present/following data at least once.
    UpdatedOnce,
}

impl FollowMode {
    pub fn code(self) -> u8 {
        match self {
            FollowMode::Default => 0,
            FollowMode::Fixed => 1,
            FollowMode::FollowingCurrent => 2,
            FollowMode::UpdatedOnce => 3,
        }
    }

    /// Whether schedule (EIT[schedule]) lookups still apply.
    pub fn uses_schedule(self) -> bool {
        matches!(self, FollowMode::Default | FollowMode::Fixed)
    }
}

impl TryFrom<u8> for FollowMode {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(FollowMode::Default),
            1 => Ok(FollowMode::Fixed),
            2 => Ok(FollowMode::FollowingCurrent),
            3 => Ok(FollowMode::UpdatedOnce),
            other => Err(ModelError::UnknownFollowMode(other)),
        }
    }
}

/// Where a reservation's display name came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NameOrigin {
    /// Copied from EPG data; renamed when the EPG changes.
    Schedule,
    /// Entered by the user; never renamed.
    #[default]
    User,
}

/// Action taken after a recording ends or is canceled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PostStopAction {
    #[default]
    None,
    Close,
    Suspend,
    Hibernate,
    /// Enter host standby and let EPG capture settle, then do nothing.
    SettleNone,
    SettleClose,
    SettleSuspend,
    SettleHibernate,
}

impl PostStopAction {
    pub fn code(self) -> u8 {
        match self {
            PostStopAction::None => 0,
            PostStopAction::Close => 1,
            PostStopAction::Suspend => 2,
            PostStopAction::Hibernate => 3,
            PostStopAction::SettleNone => 4,
            PostStopAction::SettleClose => 5,
            PostStopAction::SettleSuspend => 6,
            PostStopAction::SettleHibernate => 7,
        }
    }

    pub fn is_settle_first(self) -> bool {
        matches!(
            self,
            PostStopAction::SettleNone
                | PostStopAction::SettleClose
                | PostStopAction::SettleSuspend
                | PostStopAction::SettleHibernate
        )
    }

    /// The plain action a settle-first variant ends with.
    pub fn settled(self) -> Self {
        match self {
            PostStopAction::SettleNone => PostStopAction::None,
            PostStopAction::SettleClose => PostStopAction::Close,
            PostStopAction::SettleSuspend => PostStopAction::Suspend,
            PostStopAction::SettleHibernate => PostStopAction::Hibernate,
            plain => plain,
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            PostStopAction::None => "何もしない",
            PostStopAction::Close => "終了",
            PostStopAction::Suspend => "終了してシステムをサスペンド",
            PostStopAction::Hibernate => "終了してシステムを休止状態に",
            PostStopAction::SettleNone => "待機状態に",
            PostStopAction::SettleClose => "待機→終了",
            PostStopAction::SettleSuspend => "待機→終了してサスペンド",
            PostStopAction::SettleHibernate => "待機→終了して休止状態に",
        }
    }
}

impl TryFrom<u8> for PostStopAction {
    type Error = ModelError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PostStopAction::None),
            1 => Ok(PostStopAction::Close),
            2 => Ok(PostStopAction::Suspend),
            3 => Ok(PostStopAction::Hibernate),
            4 => Ok(PostStopAction::SettleNone),
            5 => Ok(PostStopAction::SettleClose),
            6 => Ok(PostStopAction::SettleSuspend),
            7 => Ok(PostStopAction::SettleHibernate),
            other => Err(ModelError::UnknownPostStopAction(other)),
        }
    }
}

/// Per-reservation recording options.
///
/// Every field is optional; unset fields fall back to the scheduler's default
/// option when resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordingOption {
    /// Seconds to start early (negative starts late).
    pub start_margin: Option<i32>,
    /// Seconds to end late (negative ends early).
    pub end_margin: Option<i32>,
    pub priority: Option<i32>,
    pub on_stopped: Option<PostStopAction>,
    /// Tune and show only; do not record.
    pub view_only: Option<bool>,
    pub save_dir: Option<PathBuf>,
    /// File name pattern, see `recsched::recording::naming`.
    pub save_name: Option<String>,
}

impl RecordingOption {
    /// Fill unset fields from `defaults`, then from built-in values.
    pub fn resolve(&self, defaults: &RecordingOption) -> ResolvedOption {
        let builtin = ResolvedOption::default();
        ResolvedOption {
            start_margin: self
                .start_margin
                .or(defaults.start_margin)
                .unwrap_or(builtin.start_margin),
            end_margin: self
                .end_margin
                .or(defaults.end_margin)
                .unwrap_or(builtin.end_margin),
            priority: self.priority.or(defaults.priority).unwrap_or(builtin.priority),
            on_stopped: self
                .on_stopped
                .or(defaults.on_stopped)
                .unwrap_or(builtin.on_stopped),
            view_only: self
                .view_only
                .or(defaults.view_only)
                .unwrap_or(builtin.view_only),
            save_dir: self
                .save_dir
                .clone()
                .or_else(|| defaults.save_dir.clone())
                .unwrap_or(builtin.save_dir),
            save_name: self
                .save_name
                .clone()
                .or_else(|| defaults.save_name.clone())
                .unwrap_or(builtin.save_name),
        }
    }
}

/// A recording option with every field decided.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOption {
    pub start_margin: i32,
    pub end_margin: i32,
    pub priority: i32,
    pub on_stopped: PostStopAction,
    pub view_only: bool,
    pub save_dir: PathBuf,
    pub save_name: String,
}

impl Default for ResolvedOption {
    fn default() -> Self {
        Self {
            start_margin: 0,
            end_margin: 0,
            priority: 0,
            on_stopped: PostStopAction::None,
            view_only: false,
            save_dir: PathBuf::new(),
            save_name: "%date%_%time%_%event-name%.ts".to_string(),
        }
    }
}

/// A scheduled recording (or viewing) of one program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub enabled: bool,
    pub key: EventKey,
    /// Program start in broadcast wall-clock time.
    pub start: NaiveDateTime,
    /// Program duration in seconds.
    pub duration: u32,
    pub follow_mode: FollowMode,
    pub option: RecordingOption,
    pub name: String,
    pub name_origin: NameOrigin,
}

impl Reservation {
    /// Create an enabled, user-named reservation with default options.
    pub fn new(key: EventKey, start: NaiveDateTime, duration: u32, name: impl Into<String>) -> Self {
        Self {
            enabled: true,
            key,
            start,
            duration,
            follow_mode: FollowMode::Default,
            option: RecordingOption::default(),
            name: name.into(),
            name_origin: NameOrigin::User,
        }
    }

    /// Create a reservation whose name tracks the EPG.
    pub fn from_schedule(key: EventKey, start: NaiveDateTime, duration: u32, name: impl Into<String>) -> Self {
        Self {
            name_origin: NameOrigin::Schedule,
            ..Self::new(key, start, duration, name)
        }
    }

    pub fn end(&self) -> NaiveDateTime {
        self.start + Duration::seconds(self.duration as i64)
    }

    pub fn resolved(&self, defaults: &RecordingOption) -> ResolvedOption {
        self.option.resolve(defaults)
    }

    pub fn is_view_only(&self, defaults: &RecordingOption) -> bool {
        self.option.view_only.or(defaults.view_only).unwrap_or(false)
    }

    pub fn trimmed_start(&self, defaults: &RecordingOption) -> NaiveDateTime {
        let margin = self.option.start_margin.or(defaults.start_margin).unwrap_or(0);
        self.start - Duration::seconds(margin as i64)
    }

    /// Duration in seconds after margins, never negative.
    pub fn trimmed_duration(&self, defaults: &RecordingOption) -> i64 {
        let start_margin = self.option.start_margin.or(defaults.start_margin).unwrap_or(0) as i64;
        let end_margin = self.option.end_margin.or(defaults.end_margin).unwrap_or(0) as i64;
        (self.duration as i64 + start_margin + end_margin).max(0)
    }

    pub fn trimmed_end(&self, defaults: &RecordingOption) -> NaiveDateTime {
        self.trimmed_start(defaults) + Duration::seconds(self.trimmed_duration(defaults))
    }

    /// Whether the trimmed window has fully elapsed at `now`.
    pub fn is_expired(&self, now: NaiveDateTime, defaults: &RecordingOption) -> bool {
        now >= self.trimmed_end(defaults)
    }
}

/// Genre filter on content descriptor nibbles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenreFilter {
    pub level1: u8,
    pub level2: u8,
}

impl GenreFilter {
    pub const ANY: GenreFilter = GenreFilter {
        level1: GENRE_WILDCARD,
        level2: GENRE_WILDCARD,
    };
}

impl Default for GenreFilter {
    fn default() -> Self {
        Self::ANY
    }
}

/// Weekday flags, index 0 = Sunday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Weekdays(pub [bool; 7]);

impl Weekdays {
    pub const ALL: Weekdays = Weekdays([true; 7]);

    /// Whether the weekday (days from Sunday) is set.
    pub fn contains(&self, day_from_sunday: u32) -> bool {
        self.0[(day_from_sunday % 7) as usize]
    }
}

impl FromStr for Weekdays {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let chars: Vec<char> = s.chars().collect();
        if chars.len() != 7 {
            return Err(ModelError::InvalidWeekdays(s.to_string()));
        }
        let mut flags = [false; 7];
        for (flag, c) in flags.iter_mut().zip(chars) {
            *flag = match c {
                '0' => false,
                '1' => true,
                _ => return Err(ModelError::InvalidWeekdays(s.to_string())),
            };
        }
        Ok(Weekdays(flags))
    }
}

impl fmt::Display for Weekdays {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for flag in self.0 {
            f.write_str(if flag { "1" } else { "0" })?;
        }
        Ok(())
    }
}

/// A standing rule that turns matching EPG events into reservations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    pub enabled: bool,
    pub service: ServiceKey,
    pub genre: GenreFilter,
    pub weekdays: Weekdays,
    /// Window start in seconds since midnight.
    pub window_start: u32,
    /// Window length in seconds; may run past midnight.
    pub window_duration: u32,
    /// Title pattern, see `recsched::query::KeywordPattern`.
    pub keyword: String,
    /// Options inherited by synthesized reservations.
    pub option: RecordingOption,
}

impl Query {
    /// A query matching every event on the service.
    pub fn new(service: ServiceKey, keyword: impl Into<String>) -> Self {
        Self {
            enabled: true,
            service,
            genre: GenreFilter::ANY,
            weekdays: Weekdays::ALL,
            window_start: 0,
            window_duration: DAY_SECS,
            keyword: keyword.into(),
            option: RecordingOption::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.window_start >= DAY_SECS || self.window_duration > DAY_SECS {
            return Err(ModelError::InvalidWindow {
                start: self.window_start,
                duration: self.window_duration,
            });
        }
        Ok(())
    }

    /// Build the reservation this query makes for one event.
    pub fn create_reservation(
        &self,
        event_id: u16,
        name: &str,
        start: NaiveDateTime,
        duration: u32,
    ) -> Reservation {
        let mut res = Reservation::from_schedule(EventKey::new(self.service, event_id), start, duration, name);
        res.option = self.option.clone();
        res
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, 1)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn test_network_validity() {
        assert!(ServiceKey::new(0x0004, 16625, 211).is_valid_network());
        assert!(ServiceKey::new(0x7FE8, 0x7FE8, 1024).is_valid_network());
        assert!(!ServiceKey::new(0x0000, 1, 1).is_valid_network());
        assert!(!ServiceKey::new(0x7FF0, 1, 1).is_valid_network());
        assert!(!ServiceKey::new(0xFFFE, 1, 1).is_valid_network());
    }

    #[test]
    fn test_resolve_prefers_own_then_defaults() {
        let defaults = RecordingOption {
            start_margin: Some(60),
            end_margin: Some(30),
            save_dir: Some(PathBuf::from("/rec")),
            ..Default::default()
        };
        let option = RecordingOption {
            start_margin: Some(10),
            view_only: Some(true),
            ..Default::default()
        };

        let resolved = option.resolve(&defaults);
        assert_eq!(resolved.start_margin, 10);
        assert_eq!(resolved.end_margin, 30);
        assert!(resolved.view_only);
        assert_eq!(resolved.save_dir, PathBuf::from("/rec"));
        assert_eq!(resolved.save_name, ResolvedOption::default().save_name);
    }

    #[test]
    fn test_trimmed_duration_floors_at_zero() {
        let key = EventKey::new(ServiceKey::new(4, 16625, 211), 1);
        let mut res = Reservation::new(key, at(21, 0), 60, "short");
        res.option.start_margin = Some(-30);
        res.option.end_margin = Some(-60);

        let defaults = RecordingOption::default();
        assert_eq!(res.trimmed_start(&defaults), at(21, 0) + Duration::seconds(30));
        assert_eq!(res.trimmed_duration(&defaults), 0);
        assert!(res.is_expired(at(21, 0) + Duration::seconds(30), &defaults));
    }

    #[test]
    fn test_post_stop_codes() {
        for code in 0..8u8 {
            let action = PostStopAction::try_from(code).unwrap();
            assert_eq!(action.code(), code);
        }
        assert!(PostStopAction::try_from(8).is_err());
        assert_eq!(PostStopAction::SettleSuspend.settled(), PostStopAction::Suspend);
        assert_eq!(PostStopAction::Close.settled(), PostStopAction::Close);
        assert!(!PostStopAction::Hibernate.is_settle_first());
    }

    #[test]
    fn test_weekdays_parse() {
        let days: Weekdays = "0111110".parse().unwrap();
        assert!(!days.contains(0));
        assert!(days.contains(1));
        assert!(!days.contains(6));
        assert!(days.contains(8));
        assert_eq!(days.to_string(), "0111110");
        assert!("01111".parse::<Weekdays>().is_err());
        assert!("01x1110".parse::<Weekdays>().is_err());
    }

    #[test]
    fn test_query_creates_schedule_named_reservation() {
        let mut query = Query::new(ServiceKey::new(4, 16625, 211), "ニュース");
        query.option.priority = Some(3);

        let res = query.create_reservation(0x10, "ニュース7", at(19, 0), 1800);
        assert_eq!(res.key.event_id, 0x10);
        assert_eq!(res.name_origin, NameOrigin::Schedule);
        assert_eq!(res.option.priority, Some(3));
        assert_eq!(res.follow_mode, FollowMode::Default);
        assert!(res.enabled);
    }

    #[test]
    fn test_query_validate() {
        let mut query = Query::new(ServiceKey::new(4, 16625, 211), "");
        assert!(query.validate().is_ok());
        query.window_start = DAY_SECS;
        assert!(query.validate().is_err());
    }

    #[test]
    fn test_reservation_serde() {
        let key = EventKey::new(ServiceKey::new(4, 16625, 211), 0x1234);
        let res = Reservation::new(key, at(21, 0), 3600, "News");
        let json = serde_json::to_string(&res).unwrap();
        let back: Reservation = serde_json::from_str(&json).unwrap();
        assert_eq!(back, res);
    }
}
