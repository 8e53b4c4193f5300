//! Recording file names.
//!
//! Only the tokens that depend on the reservation are expanded here; the
//! host recorder expands whatever is left (`%channel-name%` and friends).

use chrono::{Datelike, NaiveDateTime, Timelike};
use log::warn;

use crate::query::KeywordPattern;

/// Characters that cannot appear in a file name on Windows.
const FORBIDDEN: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Character translation table of the form `!from!to!from!to`.
///
/// The first character is the delimiter. Each `from` character maps to the
/// character at the same position in `to`; a `from` character without a
/// counterpart is deleted.
///
/// ```rust
/// use recsched::recording::naming::translate;
///
/// assert_eq!(translate("前編/後編", "!/!-!"), "前編-後編");
/// assert_eq!(translate("[字][再]", "![]!()!"), "(字)(再)");
/// ```
pub fn translate(text: &str, table: &str) -> String {
    let mut chars = table.chars();
    let delimiter = match chars.next() {
        Some(d) => d,
        None => return text.to_string(),
    };
    let parts: Vec<&str> = chars.as_str().split(delimiter).collect();
    let mut map: Vec<(char, Option<char>)> = Vec::new();
    for pair in parts.chunks(2) {
        if pair.len() < 2 {
            break;
        }
        let to: Vec<char> = pair[1].chars().collect();
        for (i, from) in pair[0].chars().enumerate() {
            map.push((from, to.get(i).copied()));
        }
    }

    text.chars()
        .filter_map(|c| match map.iter().find(|(from, _)| *from == c) {
            Some((_, to)) => *to,
            None => Some(c),
        })
        .collect()
}

/// Strip every match of a keyword pattern.
pub fn remove(text: &str, pattern: &str) -> String {
    if pattern.is_empty() {
        return text.to_string();
    }
    match KeywordPattern::parse(pattern) {
        Ok(p) => p.remove_matches(text),
        Err(e) => {
            warn!("Naming: invalid removal pattern {:?}: {}", pattern, e);
            text.to_string()
        }
    }
}

/// Replace characters that file systems reject.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if FORBIDDEN.contains(&c) || c.is_control() { '_' } else { c })
        .collect()
}

/// Expand the reservation tokens of a file-name pattern.
pub fn format_file_name(pattern: &str, event_id: u16, start: NaiveDateTime, event_name: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + event_name.len());
    let mut rest = pattern;
    while let Some(open) = rest.find('%') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = match after.find('%') {
            Some(close) => close,
            None => {
                rest = &rest[open..];
                break;
            }
        };
        let token = &after[..close];
        match expand(token, event_id, start, event_name) {
            Some(value) => {
                out.push_str(&value);
                rest = &after[close + 1..];
            }
            None => {
                // Unknown: keep the opening '%' and rescan from the closing one.
                out.push('%');
                out.push_str(token);
                rest = &after[close..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn expand(token: &str, event_id: u16, start: NaiveDateTime, event_name: &str) -> Option<String> {
    let value = match token {
        "event-name" => event_name.to_string(),
        "event-id" => format!("{:04X}", event_id),
        "date" => format!("{:04}{:02}{:02}", start.year(), start.month(), start.day()),
        "time" => format!("{:02}{:02}{:02}", start.hour(), start.minute(), start.second()),
        "year" => format!("{:04}", start.year()),
        "month" => format!("{:02}", start.month()),
        "day" => format!("{:02}", start.day()),
        "hour" => format!("{:02}", start.hour()),
        "minute" => format!("{:02}", start.minute()),
        "second" => format!("{:02}", start.second()),
        _ => return None,
    };
    Some(value)
}

/// File name for a reservation: event name cleaned up, then the pattern
/// expanded.
pub fn recording_file_name(
    pattern: &str,
    event_id: u16,
    start: NaiveDateTime,
    event_name: &str,
    translate_table: &str,
    remove_pattern: &str,
) -> String {
    let name = translate(event_name, translate_table);
    let name = remove(&name, remove_pattern);
    format_file_name(pattern, event_id, start, &sanitize(&name))
}
