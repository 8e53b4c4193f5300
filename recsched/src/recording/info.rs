//! What a recording hook gets to see.

use std::path::PathBuf;

use chrono::{Duration, NaiveDateTime};
use recsched_model::{EpgEvent, Reservation, ResolvedOption, StreamStats};

/// Prefix of every hook environment variable.
pub const ENV_PREFIX: &str = "RECSCHED_";

const TIME_FORMAT: &str = "%Y/%m/%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    StartRec,
    EndRec,
}

impl HookKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HookKind::StartRec => "StartRec",
            HookKind::EndRec => "EndRec",
        }
    }
}

/// One recording session.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordingInfo {
    pub reservation: Reservation,
    /// The reservation's options with defaults applied.
    pub option: ResolvedOption,
    /// Absent for view-only sessions.
    pub file_path: Option<PathBuf>,
    pub service_name: Option<String>,
    /// Program guide entry at start, if the guide had one.
    pub event: Option<EpgEvent>,
    /// Counters sampled shortly after start.
    pub start_stats: Option<StreamStats>,
    pub end_stats: Option<StreamStats>,
}

impl RecordingInfo {
    pub fn new(reservation: Reservation, option: ResolvedOption) -> Self {
        Self {
            reservation,
            option,
            file_path: None,
            service_name: None,
            event: None,
            start_stats: None,
            end_stats: None,
        }
    }

    pub fn trimmed_start(&self) -> NaiveDateTime {
        self.reservation.start - Duration::seconds(self.option.start_margin as i64)
    }

    pub fn trimmed_duration(&self) -> i64 {
        (self.reservation.duration as i64 + self.option.start_margin as i64 + self.option.end_margin as i64).max(0)
    }

    /// Counter growth over the session; `None` unless both samples exist.
    pub fn deltas(&self) -> Option<StreamStats> {
        match (&self.start_stats, &self.end_stats) {
            (Some(start), Some(end)) => Some(end.since(start)),
            _ => None,
        }
    }

    /// Environment for a hook process.
    ///
    /// Host adapters pass this to the start/end command; `recsched hook`
    /// prints it for a stored reservation.
    pub fn env_vars(&self, kind: HookKind) -> Vec<(String, String)> {
        let key = &self.reservation.key;
        let mut vars = vec![
            ("Exec", kind.as_str().to_string()),
            ("StartTime", self.trimmed_start().format(TIME_FORMAT).to_string()),
            ("Duration", format_span(self.trimmed_duration())),
            ("ONID", key.service.network_id.to_string()),
            ("TSID", key.service.transport_stream_id.to_string()),
            ("SID", key.service.service_id.to_string()),
            ("EID", key.event_id.to_string()),
        ];

        let deltas = self.deltas();
        let count = |f: fn(&StreamStats) -> u64| match &deltas {
            Some(d) => f(d).to_string(),
            None => "-1".to_string(),
        };
        vars.push(("Errors", count(|d| d.error_packets)));
        vars.push(("Scrambles", count(|d| d.scramble_packets)));
        vars.push(("Drops", count(|d| d.drop_packets)));

        if let Some(path) = &self.file_path {
            vars.push(("FilePath", path.display().to_string()));
        }
        if let Some(name) = self.service_name.as_ref().filter(|n| !n.is_empty()) {
            vars.push(("ServiceName", name.clone()));
        }
        if let Some(event) = &self.event {
            vars.push(("EventStartTime", event.start.format(TIME_FORMAT).to_string()));
            vars.push(("EventDuration", format_span(event.duration as i64)));
            vars.push(("EventName", event.name.clone()));
            vars.push(("EventText", event.text.clone()));
            vars.push(("EventExText", event.extended_text.clone()));
        }

        vars.into_iter()
            .map(|(name, value)| (format!("{}{}", ENV_PREFIX, name), value))
            .collect()
    }
}

fn format_span(secs: i64) -> String {
    format!("{}:{:02}:{:02}", secs / 3600, secs / 60 % 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{at, nhk};
    use recsched_model::{EventKey, RecordingOption};

    fn info() -> RecordingInfo {
        let mut res = Reservation::new(EventKey::new(nhk(), 0x1234), at(20, 0, 0), 3600, "ドラマ");
        res.option.start_margin = Some(30);
        let defaults = RecordingOption {
            end_margin: Some(15),
            ..Default::default()
        };
        let option = res.resolved(&defaults);
        RecordingInfo::new(res, option)
    }

    fn var<'a>(vars: &'a [(String, String)], name: &str) -> Option<&'a str> {
        vars.iter()
            .find(|(k, _)| k == &format!("{}{}", ENV_PREFIX, name))
            .map(|(_, v)| v.as_str())
    }

    #[test]
    fn test_env_without_stats() {
        let vars = info().env_vars(HookKind::StartRec);
        assert_eq!(var(&vars, "Exec"), Some("StartRec"));
        assert_eq!(var(&vars, "StartTime"), Some("2024/04/01 19:59:30"));
        assert_eq!(var(&vars, "Duration"), Some("1:00:45"));
        assert_eq!(var(&vars, "ONID"), Some("32744"));
        assert_eq!(var(&vars, "EID"), Some("4660"));
        assert_eq!(var(&vars, "Errors"), Some("-1"));
        assert_eq!(var(&vars, "FilePath"), None);
        assert_eq!(var(&vars, "EventName"), None);
    }

    #[test]
    fn test_env_with_session_data() {
        let mut info = info();
        info.file_path = Some(PathBuf::from("/rec/ドラマ.ts"));
        info.service_name = Some("NHK総合".to_string());
        info.event = Some(EpgEvent::new(0x1234, at(20, 0, 0), 3600, "ドラマ 第1話"));
        info.start_stats = Some(StreamStats { error_packets: 3, scramble_packets: 0, drop_packets: 1 });
        info.end_stats = Some(StreamStats { error_packets: 10, scramble_packets: 2, drop_packets: 1 });

        let vars = info.env_vars(HookKind::EndRec);
        assert_eq!(var(&vars, "Exec"), Some("EndRec"));
        assert_eq!(var(&vars, "Errors"), Some("7"));
        assert_eq!(var(&vars, "Scrambles"), Some("2"));
        assert_eq!(var(&vars, "Drops"), Some("0"));
        assert_eq!(var(&vars, "FilePath"), Some("/rec/ドラマ.ts"));
        assert_eq!(var(&vars, "ServiceName"), Some("NHK総合"));
        assert_eq!(var(&vars, "EventDuration"), Some("1:00:00"));
        assert_eq!(var(&vars, "EventName"), Some("ドラマ 第1話"));
    }
}
