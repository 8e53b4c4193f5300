//! Reservation store.
//!
//! Reservations are kept ordered by trimmed start (start minus the resolved
//! start margin). Entries with equal trimmed start keep their store order.
//! Every mutation replaces a whole record keyed by [`EventKey`].

use chrono::NaiveDateTime;
use log::debug;
use recsched_model::{EventKey, RecordingOption, Reservation};

#[derive(Debug, Default, Clone)]
pub struct ReservationStore {
    entries: Vec<Reservation>,
    defaults: RecordingOption,
}

impl ReservationStore {
    pub fn new(defaults: RecordingOption) -> Self {
        Self {
            entries: Vec::new(),
            defaults,
        }
    }

    pub fn defaults(&self) -> &RecordingOption {
        &self.defaults
    }

    /// Change the default option; trimmed starts may move.
    pub fn set_defaults(&mut self, defaults: RecordingOption) {
        self.defaults = defaults;
        self.sort();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<Reservation> {
        self.entries.clone()
    }

    pub fn get(&self, key: &EventKey) -> Option<&Reservation> {
        self.entries.iter().find(|r| r.key == *key)
    }

    pub fn get_at(&self, index: usize) -> Option<&Reservation> {
        self.entries.get(index)
    }

    pub fn contains(&self, key: &EventKey) -> bool {
        self.get(key).is_some()
    }

    pub fn position(&self, key: &EventKey) -> Option<usize> {
        self.entries.iter().position(|r| r.key == *key)
    }

    /// Insert or replace by identity. Returns false if an identical record
    /// was already stored.
    pub fn upsert(&mut self, reservation: Reservation) -> bool {
        if let Some(index) = self.position(&reservation.key) {
            if self.entries[index] == reservation {
                return false;
            }
            self.entries.remove(index);
        }
        debug!("Store: upsert {} \"{}\"", reservation.key, reservation.name);
        let start = reservation.trimmed_start(&self.defaults);
        let at = self
            .entries
            .partition_point(|r| r.trimmed_start(&self.defaults) <= start);
        self.entries.insert(at, reservation);
        true
    }

    pub fn delete(&mut self, key: &EventKey) -> Option<Reservation> {
        let index = self.position(key)?;
        self.delete_at(index)
    }

    pub fn delete_at(&mut self, index: usize) -> Option<Reservation> {
        if index < self.entries.len() {
            let removed = self.entries.remove(index);
            debug!("Store: delete {} \"{}\"", removed.key, removed.name);
            Some(removed)
        } else {
            None
        }
    }

    fn nearest_index(&self, now: NaiveDateTime, exclude_disabled: bool) -> Option<usize> {
        self.entries.iter().position(|r| {
            (r.enabled || !exclude_disabled) && !r.is_expired(now, &self.defaults)
        })
    }

    /// The reservation with the smallest trimmed start whose trimmed window
    /// has not fully elapsed.
    pub fn nearest(&self, now: NaiveDateTime, exclude_disabled: bool) -> Option<&Reservation> {
        self.nearest_index(now, exclude_disabled)
            .map(|index| &self.entries[index])
    }

    pub fn delete_nearest(&mut self, now: NaiveDateTime, exclude_disabled: bool) -> Option<Reservation> {
        let index = self.nearest_index(now, exclude_disabled)?;
        self.delete_at(index)
    }

    /// Remove every reservation whose trimmed window has fully elapsed.
    pub fn purge_expired(&mut self, now: NaiveDateTime) -> usize {
        let before = self.entries.len();
        let defaults = &self.defaults;
        self.entries.retain(|r| !r.is_expired(now, defaults));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!("Store: purged {} expired reservation(s)", removed);
        }
        removed
    }

    /// Replace the whole collection (after a load). Later duplicates win.
    pub fn replace_all(&mut self, reservations: Vec<Reservation>) {
        self.entries.clear();
        for reservation in reservations {
            if let Some(index) = self.position(&reservation.key) {
                self.entries[index] = reservation;
            } else {
                self.entries.push(reservation);
            }
        }
        self.sort();
    }

    fn sort(&mut self) {
        let defaults = &self.defaults;
        self.entries.sort_by_key(|r| r.trimmed_start(defaults));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::{at, bs, nhk};
    use chrono::Duration;

    fn res(eid: u16, start: NaiveDateTime, duration: u32) -> Reservation {
        Reservation::new(EventKey::new(nhk(), eid), start, duration, format!("番組{}", eid))
    }

    #[test]
    fn test_nearest_independent_of_insertion_order() {
        let items = vec![
            res(1, at(21, 0, 0), 1800),
            res(2, at(19, 0, 0), 1800),
            res(3, at(20, 0, 0), 1800),
        ];
        let mut forward = ReservationStore::default();
        let mut backward = ReservationStore::default();
        for r in items.iter().cloned() {
            forward.upsert(r);
        }
        for r in items.into_iter().rev() {
            backward.upsert(r);
        }
        let now = at(18, 0, 0);
        assert_eq!(forward.nearest(now, true).unwrap().key.event_id, 2);
        assert_eq!(backward.nearest(now, true).unwrap().key.event_id, 2);
    }

    #[test]
    fn test_nearest_skips_expired_and_disabled() {
        let mut store = ReservationStore::default();
        store.upsert(res(1, at(18, 0, 0), 1800));
        let mut disabled = res(2, at(19, 0, 0), 1800);
        disabled.enabled = false;
        store.upsert(disabled);
        store.upsert(res(3, at(20, 0, 0), 1800));

        let now = at(18, 30, 0);
        assert_eq!(store.nearest(now, true).unwrap().key.event_id, 3);
        assert_eq!(store.nearest(now, false).unwrap().key.event_id, 2);
        // Still within its window.
        assert_eq!(store.nearest(at(18, 29, 59), true).unwrap().key.event_id, 1);
    }

    #[test]
    fn test_margins_order_by_trimmed_start() {
        let mut store = ReservationStore::default();
        store.upsert(res(1, at(20, 0, 0), 1800));
        let mut early = res(2, at(20, 1, 0), 1800);
        early.option.start_margin = Some(120);
        store.upsert(early);
        assert_eq!(store.nearest(at(19, 0, 0), true).unwrap().key.event_id, 2);

        // Moving the default margin reorders.
        store.set_defaults(RecordingOption {
            start_margin: Some(0),
            ..Default::default()
        });
        assert_eq!(store.get_at(0).unwrap().key.event_id, 2);
    }

    #[test]
    fn test_ties_keep_store_order() {
        let mut store = ReservationStore::default();
        store.upsert(res(1, at(20, 0, 0), 1800));
        let mut other = res(2, at(20, 0, 0), 600);
        other.key.service = bs();
        store.upsert(other);
        assert_eq!(store.nearest(at(19, 0, 0), true).unwrap().key.event_id, 1);
    }

    #[test]
    fn test_upsert_round_trip_and_noop() {
        let mut store = ReservationStore::default();
        let r = res(1, at(20, 0, 0), 1800);
        assert!(store.upsert(r.clone()));
        assert_eq!(store.get(&r.key), Some(&r));
        assert!(!store.upsert(r.clone()));
        assert_eq!(store.len(), 1);

        let mut moved = r.clone();
        moved.start = moved.start + Duration::minutes(5);
        assert!(store.upsert(moved.clone()));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&r.key).unwrap().start, moved.start);
    }

    #[test]
    fn test_delete_variants() {
        let mut store = ReservationStore::default();
        store.upsert(res(1, at(20, 0, 0), 1800));
        store.upsert(res(2, at(21, 0, 0), 1800));
        store.upsert(res(3, at(22, 0, 0), 1800));

        assert_eq!(store.delete_nearest(at(19, 0, 0), true).unwrap().key.event_id, 1);
        assert_eq!(store.delete(&EventKey::new(nhk(), 3)).unwrap().key.event_id, 3);
        assert!(store.delete(&EventKey::new(nhk(), 3)).is_none());
        assert!(store.delete_at(5).is_none());
        assert_eq!(store.delete_at(0).unwrap().key.event_id, 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let mut store = ReservationStore::default();
        store.upsert(res(1, at(18, 0, 0), 1800));
        let mut disabled = res(2, at(18, 0, 0), 600);
        disabled.enabled = false;
        store.upsert(disabled);
        store.upsert(res(3, at(20, 0, 0), 1800));

        assert_eq!(store.purge_expired(at(18, 30, 0)), 2);
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(at(18, 30, 0)), 0);
    }

    #[test]
    fn test_replace_all_dedupes() {
        let mut store = ReservationStore::default();
        let first = res(1, at(20, 0, 0), 1800);
        let mut second = first.clone();
        second.name = "改題".to_string();
        store.replace_all(vec![res(2, at(19, 0, 0), 60), first, second]);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&EventKey::new(nhk(), 1)).unwrap().name, "改題");
        assert_eq!(store.get_at(0).unwrap().key.event_id, 2);
    }
}
