//! Follow-up of reservation timing against the program guide.
//!
//! Broadcast schedules move: programs are extended, shifted or renamed, and
//! live events often run with an undecided end. Each run looks at the
//! [`FOLLOW_UP_MAX`] soonest reservations plus one more from a rotating
//! cursor, so the cost per run stays bounded however large the store grows.

use chrono::{Duration, NaiveDateTime};
use log::{debug, info};
use recsched_model::{EventKey, FollowMode, NameOrigin, ProgramInfo, Reservation};

use crate::host::{find_channel, EpgProvider, TunerControl};
use crate::store::ReservationStore;

/// Reservations always checked per run.
pub const FOLLOW_UP_MAX: usize = 4;

/// Extension step for a live program whose end is undecided (seconds).
pub const UNDEFINED_DURATION_STEP: u32 = 300;

/// Relay targets are created this long before the source ends (seconds).
pub const EVENT_RELAY_LEAD: i64 = 120;

/// Duration of a relay placeholder (seconds).
pub const EVENT_RELAY_DURATION: u32 = 300;

/// Event ids get reused; lookups further out than this are ignored.
const EVENT_ID_GUARD_HOURS: i64 = 12;

fn within_guard(event_start: NaiveDateTime, stored_start: NaiveDateTime) -> bool {
    event_start - stored_start < Duration::hours(EVENT_ID_GUARD_HOURS)
}

/// What one follow-up run changed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSummary {
    pub time_changed: bool,
    pub renamed: bool,
    pub relayed: bool,
    pub titles: Vec<String>,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        !self.time_changed && !self.renamed && !self.relayed
    }

    /// Batched user notification, `None` when nothing changed.
    pub fn message(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut text = String::new();
        if self.time_changed {
            text.push_str("予約時刻");
        }
        if self.renamed {
            if self.time_changed {
                text.push_str("および");
            }
            text.push_str("イベント名");
        }
        if self.relayed {
            if self.time_changed || self.renamed {
                text.push_str("および");
            }
            text.push_str("イベントリレー");
        }
        text.push_str("に変更がありました:");
        for title in &self.titles {
            text.push('\n');
            text.push_str(title);
        }
        Some(text)
    }
}

/// Live (present/following) timing decided for one reservation.
struct LiveUpdate {
    start: NaiveDateTime,
    duration: u32,
    mode: FollowMode,
    skip_channel_check: bool,
}

#[derive(Debug)]
pub struct FollowUpTracker {
    cursor: usize,
    fast: bool,
}

impl Default for FollowUpTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl FollowUpTracker {
    pub fn new() -> Self {
        Self {
            cursor: FOLLOW_UP_MAX,
            fast: false,
        }
    }

    /// Whether a followed live program has an undecided end.
    ///
    /// The scheduler then runs the tracker every tick.
    pub fn is_fast(&self) -> bool {
        self.fast
    }

    pub fn reset(&mut self) {
        self.cursor = FOLLOW_UP_MAX;
        self.fast = false;
    }

    #[cfg(test)]
    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    /// Reconcile a bounded window of reservations.
    ///
    /// `active` is the reservation being recorded right now; it is never
    /// renamed.
    pub fn run<H>(
        &mut self,
        host: &H,
        store: &mut ReservationStore,
        now: NaiveDateTime,
        active: Option<&EventKey>,
        event_relay: bool,
    ) -> ChangeSummary
    where
        H: EpgProvider + TunerControl + ?Sized,
    {
        let mut summary = ChangeSummary::default();
        let mut present: Option<ProgramInfo> = None;
        let mut following: Option<ProgramInfo> = None;
        self.fast = false;

        for i in 0..=FOLLOW_UP_MAX {
            let index = if i == FOLLOW_UP_MAX {
                let index = self.cursor;
                self.cursor += 1;
                index
            } else {
                i
            };
            let res = match store.get_at(index) {
                Some(res) => res.clone(),
                None => {
                    self.cursor = FOLLOW_UP_MAX;
                    break;
                }
            };
            if i == 0 {
                present = host.present();
                following = host.following();
            }

            if res.follow_mode.uses_schedule()
                && self.follow_schedule(host, store, &res, active, &mut summary)
            {
                continue;
            }
            if res.follow_mode == FollowMode::Fixed {
                continue;
            }

            let update = self.follow_live(&res, present.as_ref(), following.as_ref(), now);
            if event_relay {
                if let Some(pf) = present.filter(|pf| pf.is_event(&res.key) && pf.duration != 0) {
                    self.relay(host, store, &res, &pf, now, &mut summary);
                }
            }
            let update = match update {
                Some(update) => update,
                None => continue,
            };

            let on_transport = update.skip_channel_check
                || host
                    .current_channel()
                    .map(|ch| ch.service_key().same_transport(&res.key.service))
                    .unwrap_or(false);
            if !on_transport {
                continue;
            }

            let mut updated = res.clone();
            updated.start = update.start;
            updated.duration = update.duration;
            updated.follow_mode = update.mode;
            if store.upsert(updated) {
                info!(
                    "FollowUp: \"{}\" now {} for {}s ({:?})",
                    res.name, update.start, update.duration, update.mode
                );
                summary.titles.push(res.name.clone());
                summary.time_changed = true;
            }
        }
        summary
    }

    /// Schedule pass for `Default` and `Fixed`. Returns true if the
    /// reservation was rewritten.
    fn follow_schedule<H>(
        &self,
        host: &H,
        store: &mut ReservationStore,
        res: &Reservation,
        active: Option<&EventKey>,
        summary: &mut ChangeSummary,
    ) -> bool
    where
        H: EpgProvider + ?Sized,
    {
        let event = match host.event(&res.key) {
            Some(event) if event.has_known_duration() && within_guard(event.start, res.start) => event,
            _ => return false,
        };

        let update_time = res.follow_mode == FollowMode::Default
            && (event.start != res.start || event.duration != res.duration);
        let rename = res.name_origin == NameOrigin::Schedule
            && res.name != event.name
            && active != Some(&res.key);
        if !update_time && !rename {
            return false;
        }

        let mut updated = res.clone();
        if update_time {
            updated.start = event.start;
            updated.duration = event.duration;
        }
        if rename {
            updated.name = event.name.clone();
        }
        let title = updated.name.clone();
        if !store.upsert(updated) {
            return false;
        }
        debug!("FollowUp: schedule update of {} (time={} rename={})", res.key, update_time, rename);
        summary.titles.push(title);
        summary.time_changed |= update_time;
        summary.renamed |= rename;
        true
    }

    fn follow_live(
        &mut self,
        res: &Reservation,
        present: Option<&ProgramInfo>,
        following: Option<&ProgramInfo>,
        now: NaiveDateTime,
    ) -> Option<LiveUpdate> {
        if res.follow_mode == FollowMode::FollowingCurrent {
            if present.map_or(false, |pf| !pf.is_event(&res.key)) {
                debug!("FollowUp: {} left the air", res.key);
                let elapsed = (now - res.start).num_seconds().max(1);
                return Some(LiveUpdate {
                    start: res.start,
                    duration: u32::try_from(elapsed).unwrap_or(u32::MAX),
                    mode: FollowMode::UpdatedOnce,
                    skip_channel_check: true,
                });
            }
        }

        if let Some(pf) = present.filter(|pf| pf.is_event(&res.key) && within_guard(pf.start, res.start)) {
            if pf.duration == 0 {
                self.fast = true;
                let elapsed = (now - pf.start).num_seconds().max(0);
                let threshold = u32::try_from(elapsed).unwrap_or(u32::MAX).saturating_add(UNDEFINED_DURATION_STEP);
                if res.duration < threshold {
                    return Some(LiveUpdate {
                        start: pf.start,
                        duration: threshold + UNDEFINED_DURATION_STEP,
                        mode: FollowMode::FollowingCurrent,
                        skip_channel_check: false,
                    });
                }
                return None;
            }
            if pf.start != res.start || pf.duration != res.duration {
                return Some(LiveUpdate {
                    start: pf.start,
                    duration: pf.duration,
                    mode: FollowMode::UpdatedOnce,
                    skip_channel_check: false,
                });
            }
            return None;
        }

        if let Some(pf) = following.filter(|pf| pf.is_event(&res.key) && within_guard(pf.start, res.start)) {
            if pf.duration != 0 && (pf.start != res.start || pf.duration != res.duration) {
                return Some(LiveUpdate {
                    start: pf.start,
                    duration: pf.duration,
                    mode: FollowMode::UpdatedOnce,
                    skip_channel_check: false,
                });
            }
        }
        None
    }

    /// Reserve the continuation of a program that is about to end.
    fn relay<H>(
        &self,
        host: &H,
        store: &mut ReservationStore,
        res: &Reservation,
        present: &ProgramInfo,
        now: NaiveDateTime,
        summary: &mut ChangeSummary,
    ) where
        H: EpgProvider + TunerControl + ?Sized,
    {
        if !within_guard(present.start, res.start) {
            return;
        }
        let source_end = present.start + Duration::seconds(present.duration as i64);
        if now - present.start <= Duration::seconds(present.duration as i64 - EVENT_RELAY_LEAD) {
            return;
        }
        let event = match host.event(&res.key) {
            Some(event) => event,
            None => return,
        };
        let channels = host.channels();

        let target = event
            .groups
            .iter()
            .flat_map(|group| group.relay_targets(&res.key.service))
            .find(|target| {
                find_channel(&channels, target.service.network_id, target.service.service_id).is_some()
            });
        let target = match target {
            Some(target) if !store.contains(&target) => target,
            _ => return,
        };

        let placeholder = Reservation {
            enabled: res.enabled,
            key: target,
            start: source_end,
            duration: EVENT_RELAY_DURATION,
            follow_mode: FollowMode::UpdatedOnce,
            option: res.option.clone(),
            name: res.name.clone(),
            name_origin: res.name_origin,
        };
        if store.upsert(placeholder) {
            info!("FollowUp: relay of \"{}\" to {} at {}", res.name, target, source_end);
            summary.titles.push(res.name.clone());
            summary.relayed = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{at, bs, etv, nhk, nhk_sub, FakeHost};
    use recsched_model::{EpgEvent, EventGroup, GroupEvent};

    fn res(eid: u16, start: NaiveDateTime, duration: u32) -> Reservation {
        Reservation::from_schedule(EventKey::new(nhk(), eid), start, duration, format!("番組{}", eid))
    }

    fn pf(eid: u16, start: NaiveDateTime, duration: u32) -> ProgramInfo {
        ProgramInfo {
            service_id: nhk().service_id,
            event_id: eid,
            start,
            duration,
        }
    }

    fn store_with(items: Vec<Reservation>) -> ReservationStore {
        let mut store = ReservationStore::default();
        for r in items {
            store.upsert(r);
        }
        store
    }

    fn key(eid: u16) -> EventKey {
        EventKey::new(nhk(), eid)
    }

    #[test]
    fn test_schedule_update_and_rename() {
        let mut host = FakeHost::new();
        host.add_event(nhk(), EpgEvent::new(1, at(20, 5, 0), 3600, "ニュース拡大版"));
        let mut store = store_with(vec![res(1, at(20, 0, 0), 1800)]);
        let mut tracker = FollowUpTracker::new();

        let summary = tracker.run(&host, &mut store, at(18, 0, 0), None, false);
        let updated = store.get(&key(1)).unwrap();
        assert_eq!(updated.start, at(20, 5, 0));
        assert_eq!(updated.duration, 3600);
        assert_eq!(updated.name, "ニュース拡大版");
        assert_eq!(updated.follow_mode, FollowMode::Default);
        assert!(summary.time_changed && summary.renamed && !summary.relayed);
        assert_eq!(
            summary.message().unwrap(),
            "予約時刻およびイベント名に変更がありました:\nニュース拡大版"
        );

        // Nothing left to change.
        assert!(tracker.run(&host, &mut store, at(18, 0, 2), None, false).is_empty());
    }

    #[test]
    fn test_user_names_and_active_recording_are_not_renamed() {
        let mut host = FakeHost::new();
        host.add_event(nhk(), EpgEvent::new(1, at(20, 0, 0), 1800, "新タイトル"));
        host.add_event(nhk(), EpgEvent::new(2, at(21, 0, 0), 1800, "新タイトル2"));
        let mut user = res(1, at(20, 0, 0), 1800);
        user.name_origin = NameOrigin::User;
        let mut store = store_with(vec![user, res(2, at(21, 0, 0), 1800)]);

        let summary = FollowUpTracker::new().run(&host, &mut store, at(20, 10, 0), Some(&key(2)), false);
        assert!(summary.is_empty());
        assert_eq!(store.get(&key(1)).unwrap().name, "番組1");
        assert_eq!(store.get(&key(2)).unwrap().name, "番組2");
    }

    #[test]
    fn test_fixed_keeps_timing() {
        let mut host = FakeHost::new();
        host.add_event(nhk(), EpgEvent::new(1, at(20, 30, 0), 1800, "番組1"));
        host.tune_to(nhk());
        host.present = Some(pf(1, at(20, 30, 0), 600));
        let mut fixed = res(1, at(20, 0, 0), 1800);
        fixed.follow_mode = FollowMode::Fixed;
        let mut store = store_with(vec![fixed.clone()]);

        assert!(FollowUpTracker::new().run(&host, &mut store, at(20, 31, 0), None, false).is_empty());
        assert_eq!(store.get(&key(1)), Some(&fixed));
    }

    #[test]
    fn test_twelve_hour_guard() {
        let mut host = FakeHost::new();
        host.add_event(nhk(), EpgEvent::new(1, at(20, 0, 0) + Duration::hours(13), 1800, "別番組"));
        host.tune_to(nhk());
        host.following = Some(pf(1, at(20, 0, 0) + Duration::hours(12), 1800));
        let original = res(1, at(20, 0, 0), 1800);
        let mut store = store_with(vec![original.clone()]);

        assert!(FollowUpTracker::new().run(&host, &mut store, at(19, 0, 0), None, false).is_empty());
        assert_eq!(store.get(&key(1)), Some(&original));
    }

    #[test]
    fn test_undecided_end_extends_then_freezes() {
        let mut host = FakeHost::new();
        host.tune_to(nhk());
        host.present = Some(pf(1, at(20, 0, 0), 0));
        let mut store = store_with(vec![res(1, at(20, 0, 0), 1800)]);
        let mut tracker = FollowUpTracker::new();

        let summary = tracker.run(&host, &mut store, at(20, 28, 0), None, false);
        assert!(summary.time_changed);
        assert!(tracker.is_fast());
        let extended = store.get(&key(1)).unwrap();
        assert_eq!(extended.follow_mode, FollowMode::FollowingCurrent);
        assert_eq!(extended.duration, 28 * 60 + 600);

        // Still undecided but inside the extension: no change.
        assert!(tracker.run(&host, &mut store, at(20, 29, 0), None, false).is_empty());
        assert!(tracker.is_fast());

        // The program is over and the tuner moved elsewhere.
        host.present = Some(pf(2, at(20, 40, 0), 1800));
        host.tune_to(bs());
        let summary = tracker.run(&host, &mut store, at(20, 40, 0), None, false);
        assert!(summary.time_changed);
        assert!(!tracker.is_fast());
        let frozen = store.get(&key(1)).unwrap();
        assert_eq!(frozen.follow_mode, FollowMode::UpdatedOnce);
        assert_eq!(frozen.duration, 40 * 60);
        assert_eq!(frozen.start, at(20, 0, 0));
    }

    #[test]
    fn test_live_update_requires_tuned_transport() {
        let mut host = FakeHost::new();
        host.tune_to(etv());
        host.following = Some(pf(1, at(20, 2, 0), 1800));
        let original = res(1, at(20, 0, 0), 1800);
        let mut store = store_with(vec![original.clone()]);
        let mut tracker = FollowUpTracker::new();

        assert!(tracker.run(&host, &mut store, at(19, 50, 0), None, false).is_empty());
        assert_eq!(store.get(&key(1)), Some(&original));

        host.tune_to(nhk_sub());
        let summary = tracker.run(&host, &mut store, at(19, 50, 0), None, false);
        assert!(summary.time_changed);
        let updated = store.get(&key(1)).unwrap();
        assert_eq!(updated.start, at(20, 2, 0));
        assert_eq!(updated.follow_mode, FollowMode::UpdatedOnce);
    }

    #[test]
    fn test_event_relay_creates_exactly_one() {
        let mut host = FakeHost::new();
        let mut event = EpgEvent::new(1, at(20, 0, 0), 1800, "中継");
        event.groups = vec![
            EventGroup {
                group_type: 2,
                events: vec![
                    GroupEvent { network_id: 0, transport_stream_id: 0, service_id: 9999, event_id: 7 },
                    GroupEvent { network_id: 0, transport_stream_id: 0, service_id: nhk_sub().service_id, event_id: 0x200 },
                ],
            },
            EventGroup {
                group_type: 4,
                events: vec![GroupEvent {
                    network_id: etv().network_id,
                    transport_stream_id: etv().transport_stream_id,
                    service_id: etv().service_id,
                    event_id: 0x300,
                }],
            },
        ];
        host.add_event(nhk(), event);
        host.tune_to(nhk());
        host.present = Some(pf(1, at(20, 0, 0), 1800));
        let mut source = res(1, at(20, 0, 0), 1800);
        source.name = "中継".to_string();
        source.option.priority = Some(3);
        let mut store = store_with(vec![source]);
        let mut tracker = FollowUpTracker::new();

        // Too early.
        assert!(tracker.run(&host, &mut store, at(20, 27, 0), None, true).is_empty());

        let summary = tracker.run(&host, &mut store, at(20, 29, 0), None, true);
        assert!(summary.relayed && !summary.time_changed);
        assert_eq!(store.len(), 2);
        let relay = store.get(&EventKey::new(nhk_sub(), 0x200)).unwrap();
        assert_eq!(relay.start, at(20, 30, 0));
        assert_eq!(relay.duration, EVENT_RELAY_DURATION);
        assert_eq!(relay.follow_mode, FollowMode::UpdatedOnce);
        assert_eq!(relay.option.priority, Some(3));
        assert_eq!(relay.name, "中継");
        assert_eq!(summary.message().unwrap(), "イベントリレーに変更がありました:\n中継");

        assert!(tracker.run(&host, &mut store, at(20, 29, 30), None, true).is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_rotating_cursor() {
        let host = FakeHost::new();
        let items = (1..=6).map(|i| res(i, at(12 + i as u32, 0, 0), 1800)).collect();
        let mut store = store_with(items);
        let mut tracker = FollowUpTracker::new();

        tracker.run(&host, &mut store, at(10, 0, 0), None, false);
        assert_eq!(tracker.cursor(), 5);
        tracker.run(&host, &mut store, at(10, 0, 0), None, false);
        assert_eq!(tracker.cursor(), 6);
        tracker.run(&host, &mut store, at(10, 0, 0), None, false);
        assert_eq!(tracker.cursor(), FOLLOW_UP_MAX);
    }
}
