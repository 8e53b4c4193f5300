//! Standing queries that turn EPG events into reservations.
//!
//! # Keyword patterns
//!
//! A pattern starts with optional flag characters, `!` (negate) and `~`
//! (case-insensitive), followed by alternatives separated by `|`. Each
//! alternative matches as a substring, with `*` standing for any run of
//! characters and `?` for exactly one:
//!
//! ```rust
//! use recsched::query::KeywordPattern;
//!
//! let pattern = KeywordPattern::parse("~news|ニュース?").unwrap();
//! assert!(pattern.is_match("BS NEWS 24"));
//! assert!(pattern.is_match("ニュース7"));
//! assert!(!pattern.is_match("ニュース"));
//!
//! let negated = KeywordPattern::parse("!再放送").unwrap();
//! assert!(negated.is_match("ドラマ 第1話"));
//! assert!(!negated.is_match("ドラマ 第1話(再放送)"));
//! ```
//!
//! An empty pattern matches every title.

use chrono::{Datelike, NaiveDateTime, Timelike};
use log::{debug, info, warn};
use recsched_model::{EpgEvent, EventKey, Query, GENRE_WILDCARD};
use regex::{Regex, RegexBuilder};

use crate::host::EpgProvider;
use crate::store::ReservationStore;

const DAY_SECS: u32 = 24 * 60 * 60;

/// Compiled title pattern.
#[derive(Debug, Clone)]
pub struct KeywordPattern {
    negate: bool,
    /// `None` matches everything.
    regex: Option<Regex>,
}

impl KeywordPattern {
    pub fn parse(pattern: &str) -> Result<Self, regex::Error> {
        let mut negate = false;
        let mut case_insensitive = false;
        let mut body = pattern;
        loop {
            if let Some(rest) = body.strip_prefix('!') {
                negate = true;
                body = rest;
            } else if let Some(rest) = body.strip_prefix('~') {
                case_insensitive = true;
                body = rest;
            } else {
                break;
            }
        }

        let alternatives: Vec<String> = body
            .split('|')
            .filter(|alt| !alt.is_empty())
            .map(wildcard_to_regex)
            .collect();
        if alternatives.is_empty() {
            return Ok(Self {
                negate: false,
                regex: None,
            });
        }

        let regex = RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(case_insensitive)
            .dot_matches_new_line(true)
            .build()?;
        Ok(Self {
            negate,
            regex: Some(regex),
        })
    }

    pub fn is_match(&self, title: &str) -> bool {
        match &self.regex {
            Some(regex) => regex.is_match(title) != self.negate,
            None => true,
        }
    }

    /// Delete every match from `text`. The negate flag has no effect here.
    pub fn remove_matches(&self, text: &str) -> String {
        match &self.regex {
            Some(regex) => regex.replace_all(text, "").into_owned(),
            None => text.to_string(),
        }
    }
}

fn wildcard_to_regex(alternative: &str) -> String {
    let mut out = String::with_capacity(alternative.len() * 2);
    let mut buf = [0u8; 4];
    for c in alternative.chars() {
        match c {
            '*' => out.push_str(".*?"),
            '?' => out.push('.'),
            _ => out.push_str(&regex::escape(c.encode_utf8(&mut buf))),
        }
    }
    out
}

/// Whether an event satisfies a query.
pub fn evaluate(event: &EpgEvent, query: &Query) -> bool {
    match KeywordPattern::parse(&query.keyword) {
        Ok(pattern) => evaluate_with(event, query, &pattern),
        Err(e) => {
            warn!("Query: invalid keyword {:?}: {}", query.keyword, e);
            false
        }
    }
}

/// [`evaluate`] with a precompiled keyword, checked cheapest first.
pub fn evaluate_with(event: &EpgEvent, query: &Query, pattern: &KeywordPattern) -> bool {
    let weekday = event.start.weekday().num_days_from_sunday();
    let previous = (weekday + 6) % 7;
    let today = query.weekdays.contains(weekday);
    let yesterday = query.weekdays.contains(previous);
    if !today && !yesterday {
        return false;
    }

    if query.genre.level1 != GENRE_WILDCARD {
        let found = event.genres.iter().any(|g| {
            g.level1 == query.genre.level1
                && (query.genre.level2 == GENRE_WILDCARD || g.level2 == query.genre.level2)
        });
        if !found {
            return false;
        }
    }

    let secs = event.start.num_seconds_from_midnight();
    let window_end = query.window_start + query.window_duration;
    let in_window = (today && query.window_start <= secs && secs < window_end)
        || (yesterday && window_end > DAY_SECS && secs < window_end - DAY_SECS);
    if !in_window {
        return false;
    }

    pattern.is_match(&event.name)
}

#[derive(Debug, Clone)]
struct QueryEntry {
    query: Query,
    pattern: Option<KeywordPattern>,
}

impl QueryEntry {
    fn new(query: Query) -> Self {
        let pattern = match KeywordPattern::parse(&query.keyword) {
            Ok(p) => Some(p),
            Err(e) => {
                warn!("Query: invalid keyword {:?}: {}", query.keyword, e);
                None
            }
        };
        Self { query, pattern }
    }
}

/// Queries with a round-robin scan cursor.
#[derive(Debug, Clone, Default)]
pub struct QueryList {
    entries: Vec<QueryEntry>,
    cursor: usize,
}

impl QueryList {
    pub fn new(queries: Vec<Query>) -> Self {
        let mut list = Self::default();
        list.replace_all(queries);
        list
    }

    pub fn replace_all(&mut self, queries: Vec<Query>) {
        self.entries = queries.into_iter().map(QueryEntry::new).collect();
        self.cursor = 0;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Query> {
        self.entries.get(index).map(|e| &e.query)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Query> {
        self.entries.iter().map(|e| &e.query)
    }

    pub fn to_vec(&self) -> Vec<Query> {
        self.iter().cloned().collect()
    }

    pub fn push(&mut self, query: Query) {
        self.entries.push(QueryEntry::new(query));
    }

    pub fn remove(&mut self, index: usize) -> Option<Query> {
        if index >= self.entries.len() {
            return None;
        }
        let removed = self.entries.remove(index);
        if self.cursor >= self.entries.len() {
            self.cursor = 0;
        }
        Some(removed.query)
    }

    /// Check the query under the cursor and advance it.
    ///
    /// Matching future events that are not reserved yet become reservations.
    /// Returns the names of the new reservations.
    pub fn scan<E: EpgProvider + ?Sized>(
        &mut self,
        epg: &E,
        store: &mut ReservationStore,
        now: NaiveDateTime,
    ) -> Vec<String> {
        let index = self.cursor;
        self.cursor += 1;
        if self.cursor >= self.entries.len() {
            self.cursor = 0;
        }

        let entry = match self.entries.get(index) {
            Some(entry) if entry.query.enabled => entry,
            _ => return Vec::new(),
        };
        let pattern = match &entry.pattern {
            Some(p) => p,
            None => return Vec::new(),
        };
        let query = &entry.query;
        let events = match epg.events(&query.service) {
            Some(events) => events,
            None => return Vec::new(),
        };
        debug!("Query: checking #{} on {} ({} events)", index, query.service, events.len());

        let mut created = Vec::new();
        for event in events.iter().filter(|e| e.start > now) {
            if event.duration == 0
                || store.contains(&EventKey::new(query.service, event.event_id))
                || !evaluate_with(event, query, pattern)
            {
                continue;
            }
            let reservation =
                query.create_reservation(event.event_id, &event.name, event.start, event.duration);
            if store.upsert(reservation) {
                info!("Query: reserved \"{}\" at {}", event.name, event.start);
                created.push(event.name.clone());
            }
        }
        created
    }
}
