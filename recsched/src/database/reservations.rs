//! Reservation database operations.

use recsched_model::{EventKey, FollowMode, NameOrigin, RecordingOption, Reservation, ServiceKey};
use rusqlite::{params, Row};

use super::{format_time, parse_time, Database, DatabaseError, Result};

fn name_origin_code(origin: NameOrigin) -> i64 {
    match origin {
        NameOrigin::Schedule => 0,
        NameOrigin::User => 1,
    }
}

fn name_origin_from_code(code: i64) -> NameOrigin {
    if code == 0 {
        NameOrigin::Schedule
    } else {
        NameOrigin::User
    }
}

/// Raw row before conversion into the model.
struct ReservationRow {
    enabled: bool,
    nid: u16,
    tsid: u16,
    sid: u16,
    eid: u16,
    start_time: String,
    duration: u32,
    follow_mode: u8,
    name: String,
    name_origin: i64,
    options: String,
}

impl ReservationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            enabled: row.get::<_, i64>(0)? != 0,
            nid: row.get(1)?,
            tsid: row.get(2)?,
            sid: row.get(3)?,
            eid: row.get(4)?,
            start_time: row.get(5)?,
            duration: row.get(6)?,
            follow_mode: row.get(7)?,
            name: row.get(8)?,
            name_origin: row.get(9)?,
            options: row.get(10)?,
        })
    }

    fn into_reservation(self) -> Result<Reservation> {
        let option: RecordingOption = serde_json::from_str(&self.options)?;
        Ok(Reservation {
            enabled: self.enabled,
            key: EventKey::new(ServiceKey::new(self.nid, self.tsid, self.sid), self.eid),
            start: parse_time(&self.start_time)?,
            duration: self.duration,
            follow_mode: FollowMode::try_from(self.follow_mode).map_err(DatabaseError::Model)?,
            option,
            name: self.name,
            name_origin: name_origin_from_code(self.name_origin),
        })
    }
}

impl Database {
    /// Get all reservations in store order.
    pub fn get_reservations(&self) -> Result<Vec<Reservation>> {
        let mut stmt = self.conn.prepare(
            "SELECT enabled, nid, tsid, sid, eid, start_time, duration, follow_mode, name, name_origin, options
             FROM reservations ORDER BY position",
        )?;
        let rows = stmt
            .query_map([], ReservationRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ReservationRow::into_reservation).collect()
    }

    /// Replace every stored reservation.
    pub fn replace_reservations(&mut self, reservations: &[Reservation]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM reservations", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO reservations
                 (position, enabled, nid, tsid, sid, eid, start_time, duration, follow_mode, name, name_origin, options)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for (position, res) in reservations.iter().enumerate() {
                let options = serde_json::to_string(&res.option)?;
                stmt.execute(params![
                    position as i64,
                    res.enabled as i64,
                    res.key.service.network_id,
                    res.key.service.transport_stream_id,
                    res.key.service.service_id,
                    res.key.event_id,
                    format_time(res.start),
                    res.duration,
                    res.follow_mode.code(),
                    res.name,
                    name_origin_code(res.name_origin),
                    options,
                ])?;
            }
        }
        tx.commit()?;
        log::debug!("Database: saved {} reservation(s)", reservations.len());
        Ok(())
    }

    /// Get the total number of stored reservations.
    pub fn get_reservation_count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM reservations", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}
