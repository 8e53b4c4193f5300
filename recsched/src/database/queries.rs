//! Query database operations.

use recsched_model::{GenreFilter, Query, RecordingOption, ServiceKey, Weekdays};
use rusqlite::params;

use super::{Database, Result};

impl Database {
    /// Get all queries in list order.
    pub fn get_queries(&self) -> Result<Vec<Query>> {
        let mut stmt = self.conn.prepare(
            "SELECT enabled, nid, tsid, sid, genre1, genre2, weekdays, window_start, window_duration, keyword, options
             FROM queries ORDER BY position",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)? != 0,
                    ServiceKey::new(row.get(1)?, row.get(2)?, row.get(3)?),
                    GenreFilter {
                        level1: row.get(4)?,
                        level2: row.get(5)?,
                    },
                    row.get::<_, String>(6)?,
                    row.get::<_, u32>(7)?,
                    row.get::<_, u32>(8)?,
                    row.get::<_, String>(9)?,
                    row.get::<_, String>(10)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut queries = Vec::with_capacity(rows.len());
        for (enabled, service, genre, weekdays, window_start, window_duration, keyword, options) in rows {
            let weekdays: Weekdays = weekdays.parse()?;
            let option: RecordingOption = serde_json::from_str(&options)?;
            let query = Query {
                enabled,
                service,
                genre,
                weekdays,
                window_start,
                window_duration,
                keyword,
                option,
            };
            query.validate()?;
            queries.push(query);
        }
        Ok(queries)
    }

    /// Replace every stored query.
    pub fn replace_queries(&mut self, queries: &[Query]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM queries", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO queries
                 (position, enabled, nid, tsid, sid, genre1, genre2, weekdays, window_start, window_duration, keyword, options)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for (position, query) in queries.iter().enumerate() {
                stmt.execute(params![
                    position as i64,
                    query.enabled as i64,
                    query.service.network_id,
                    query.service.transport_stream_id,
                    query.service.service_id,
                    query.genre.level1,
                    query.genre.level2,
                    query.weekdays.to_string(),
                    query.window_start,
                    query.window_duration,
                    query.keyword,
                    serde_json::to_string(&query.option)?,
                ])?;
            }
        }
        tx.commit()?;
        log::debug!("Database: saved {} query(ies)", queries.len());
        Ok(())
    }
}
