//! Database schema definitions.

/// SQL schema for reservations and queries.
///
/// `position` keeps the in-memory order, which breaks ties between
/// reservations starting at the same time.
pub const SCHEMA_SQL: &str = r#"
-- Reservation table
CREATE TABLE IF NOT EXISTS reservations (
    position INTEGER PRIMARY KEY,
    enabled INTEGER NOT NULL DEFAULT 1,
    -- Event identity
    nid INTEGER NOT NULL,
    tsid INTEGER NOT NULL,
    sid INTEGER NOT NULL,
    eid INTEGER NOT NULL,
    -- Timing in broadcast wall-clock time (%Y-%m-%dT%H:%M:%S)
    start_time TEXT NOT NULL,
    duration INTEGER NOT NULL,
    follow_mode INTEGER NOT NULL DEFAULT 0,
    -- Display name and whether it tracks the EPG (0=schedule, 1=user)
    name TEXT NOT NULL,
    name_origin INTEGER NOT NULL DEFAULT 1,
    -- Recording option overrides (JSON)
    options TEXT NOT NULL DEFAULT '{}',
    UNIQUE(nid, tsid, sid, eid)
);

-- Query table
CREATE TABLE IF NOT EXISTS queries (
    position INTEGER PRIMARY KEY,
    enabled INTEGER NOT NULL DEFAULT 1,
    nid INTEGER NOT NULL,
    tsid INTEGER NOT NULL,
    sid INTEGER NOT NULL,
    -- Content nibbles, 255 = any
    genre1 INTEGER NOT NULL DEFAULT 255,
    genre2 INTEGER NOT NULL DEFAULT 255,
    -- Sunday first, e.g. "0111110"
    weekdays TEXT NOT NULL DEFAULT '1111111',
    -- Daily window in seconds from midnight
    window_start INTEGER NOT NULL DEFAULT 0,
    window_duration INTEGER NOT NULL DEFAULT 86400,
    keyword TEXT NOT NULL DEFAULT '',
    options TEXT NOT NULL DEFAULT '{}'
);
"#;
