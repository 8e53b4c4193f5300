//! Program guide and live stream records supplied by the host.
//!
//! The scheduler never acquires EPG data itself; the host hands these views
//! over on request. A duration of `0` means the program end is not yet known.

use chrono::{Duration, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::types::{EventKey, ServiceKey};

/// Event group type: relay to another service on the same network.
pub const GROUP_TYPE_RELAY: u8 = 2;
/// Event group type: relay to a service on another network.
pub const GROUP_TYPE_RELAY_OTHER_NETWORK: u8 = 4;

/// Content descriptor entry (content_nibble_level_1 / level_2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Genre {
    pub level1: u8,
    pub level2: u8,
}

impl Genre {
    pub fn new(level1: u8, level2: u8) -> Self {
        Self { level1, level2 }
    }
}

/// One target of an event group descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupEvent {
    /// Zero for same-network relays; taken from the source event.
    pub network_id: u16,
    pub transport_stream_id: u16,
    pub service_id: u16,
    pub event_id: u16,
}

/// Event group descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventGroup {
    pub group_type: u8,
    pub events: Vec<GroupEvent>,
}

impl EventGroup {
    pub fn is_relay(&self) -> bool {
        self.group_type == GROUP_TYPE_RELAY || self.group_type == GROUP_TYPE_RELAY_OTHER_NETWORK
    }

    /// Resolve the targets to full identities, filling same-network
    /// relays from `source`.
    pub fn relay_targets(&self, source: &ServiceKey) -> Vec<EventKey> {
        if !self.is_relay() {
            return Vec::new();
        }
        self.events
            .iter()
            .map(|e| {
                let service = if self.group_type == GROUP_TYPE_RELAY {
                    ServiceKey::new(source.network_id, source.transport_stream_id, e.service_id)
                } else {
                    ServiceKey::new(e.network_id, e.transport_stream_id, e.service_id)
                };
                EventKey::new(service, e.event_id)
            })
            .collect()
    }
}

/// A schedule (EIT[schedule]) event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EpgEvent {
    pub event_id: u16,
    pub start: NaiveDateTime,
    /// Seconds; `0` when the end is undecided.
    pub duration: u32,
    pub name: String,
    pub text: String,
    pub extended_text: String,
    pub genres: Vec<Genre>,
    pub groups: Vec<EventGroup>,
}

impl EpgEvent {
    pub fn new(event_id: u16, start: NaiveDateTime, duration: u32, name: impl Into<String>) -> Self {
        Self {
            event_id,
            start,
            duration,
            name: name.into(),
            text: String::new(),
            extended_text: String::new(),
            genres: Vec::new(),
            groups: Vec::new(),
        }
    }

    pub fn has_known_duration(&self) -> bool {
        self.duration != 0
    }

    pub fn end(&self) -> Option<NaiveDateTime> {
        self.has_known_duration()
            .then(|| self.start + Duration::seconds(self.duration as i64))
    }
}

/// Present/following (EIT[p/f]) entry for the tuned service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramInfo {
    pub service_id: u16,
    pub event_id: u16,
    pub start: NaiveDateTime,
    /// Seconds; `0` when the end is undecided.
    pub duration: u32,
}

impl ProgramInfo {
    /// Whether this entry describes the given program.
    pub fn is_event(&self, key: &EventKey) -> bool {
        self.service_id == key.service.service_id && self.event_id == key.event_id
    }
}

/// A channel the tuner can select.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunerChannel {
    pub space: u32,
    pub channel: u32,
    pub network_id: u16,
    pub transport_stream_id: u16,
    pub service_id: u16,
    pub name: String,
}

impl TunerChannel {
    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(self.network_id, self.transport_stream_id, self.service_id)
    }
}

/// Packet counters of the received stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStats {
    pub error_packets: u64,
    pub scramble_packets: u64,
    pub drop_packets: u64,
}

impl StreamStats {
    /// Counter growth since `earlier`; counters reset by the host saturate at 0.
    pub fn since(&self, earlier: &StreamStats) -> StreamStats {
        StreamStats {
            error_packets: self.error_packets.saturating_sub(earlier.error_packets),
            scramble_packets: self.scramble_packets.saturating_sub(earlier.scramble_packets),
            drop_packets: self.drop_packets.saturating_sub(earlier.drop_packets),
        }
    }
}

/// Host recorder status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecorderStatus {
    #[default]
    Idle,
    Recording,
    Paused,
}

impl RecorderStatus {
    pub fn is_idle(self) -> bool {
        self == RecorderStatus::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_relay_targets_fill_source_network() {
        let source = ServiceKey::new(0x7FE8, 0x7FE8, 1024);
        let group = EventGroup {
            group_type: GROUP_TYPE_RELAY,
            events: vec![GroupEvent {
                network_id: 0,
                transport_stream_id: 0,
                service_id: 1025,
                event_id: 0x20,
            }],
        };
        let targets = group.relay_targets(&source);
        assert_eq!(
            targets,
            vec![EventKey::new(ServiceKey::new(0x7FE8, 0x7FE8, 1025), 0x20)]
        );
    }

    #[test]
    fn test_relay_targets_other_network() {
        let source = ServiceKey::new(0x7FE8, 0x7FE8, 1024);
        let group = EventGroup {
            group_type: GROUP_TYPE_RELAY_OTHER_NETWORK,
            events: vec![GroupEvent {
                network_id: 4,
                transport_stream_id: 16625,
                service_id: 211,
                event_id: 0x30,
            }],
        };
        assert_eq!(group.relay_targets(&source)[0].service, ServiceKey::new(4, 16625, 211));

        let shared = EventGroup {
            group_type: 1,
            events: group.events.clone(),
        };
        assert!(shared.relay_targets(&source).is_empty());
    }

    #[test]
    fn test_event_end() {
        let start = NaiveDate::from_ymd_opt(2024, 4, 1)
            .unwrap()
            .and_hms_opt(23, 30, 0)
            .unwrap();
        let mut event = EpgEvent::new(1, start, 3600, "深夜");
        assert_eq!(
            event.end(),
            Some(NaiveDate::from_ymd_opt(2024, 4, 2).unwrap().and_hms_opt(0, 30, 0).unwrap())
        );
        event.duration = 0;
        assert_eq!(event.end(), None);
    }

    #[test]
    fn test_stream_stats_since() {
        let start = StreamStats {
            error_packets: 10,
            scramble_packets: 5,
            drop_packets: 0,
        };
        let end = StreamStats {
            error_packets: 15,
            scramble_packets: 2,
            drop_packets: 3,
        };
        let delta = end.since(&start);
        assert_eq!(delta.error_packets, 5);
        assert_eq!(delta.scramble_packets, 0);
        assert_eq!(delta.drop_packets, 3);
    }
}
