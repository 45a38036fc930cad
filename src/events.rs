//! Period event filtering and normalization.
//!
//! Raw period rows are string maps keyed by column name. Normalization drops
//! administrative events, parses `#event_time`, derives the calendar date and
//! fractional hour, and sorts the stream by `(user, time)`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ACCOUNT_ID_COLUMN: &str = "#account_id";
pub const EVENT_NAME_COLUMN: &str = "#event_name";
pub const EVENT_TIME_COLUMN: &str = "#event_time";

const REQUIRED_COLUMNS: [&str; 3] = [ACCOUNT_ID_COLUMN, EVENT_NAME_COLUMN, EVENT_TIME_COLUMN];

const DATETIME_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
];
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Administrative event names shared by every preset.
pub const ADMIN_EVENTS: [&str; 6] = [
    "push_send",
    "xs_user_online",
    "ta_app_start",
    APP_END_EVENT,
    "new_grade",
    "skilled_player",
];

/// App exit event. Carries the session `#duration`.
pub const APP_END_EVENT: &str = "ta_app_end";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventError {
    #[error("event row is missing required column {column}")]
    MissingColumn { column: &'static str },
    #[error("unparseable event time '{value}'")]
    InvalidTimestamp { value: String },
}

/// One row of a period file, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    fields: BTreeMap<String, String>,
}

impl RawEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            fields: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn with(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(column.into(), value.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventRecord {
    pub user_id: Option<String>,
    pub event_name: String,
    pub event_time: NaiveDateTime,
    pub date: NaiveDate,
    /// Fractional hour of day in `[0, 24)`.
    pub time_of_day: f64,
    pub attributes: BTreeMap<String, String>,
}

impl EventRecord {
    pub fn user(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn is(&self, event_name: &str) -> bool {
        self.event_name == event_name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    /// Numeric attribute. Non-finite or unparseable values read as absent.
    pub fn attr_f64(&self, name: &str) -> Option<f64> {
        self.attr(name)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    pub fn attr_flag(&self, name: &str) -> Option<bool> {
        self.attr(name).and_then(parse_flag)
    }
}

/// Normalizes one period's raw rows.
///
/// Rows whose event name is in `exclusions` are dropped before the time is
/// parsed. Null-user rows are kept and sort ahead of every user.
pub fn normalize_events<'a>(
    rows: impl IntoIterator<Item = &'a RawEvent>,
    exclusions: &BTreeSet<String>,
) -> Result<Vec<EventRecord>, EventError> {
    let mut out = Vec::new();

    for row in rows {
        for column in REQUIRED_COLUMNS {
            if row.get(column).is_none() {
                return Err(EventError::MissingColumn { column });
            }
        }

        let event_name = row.get(EVENT_NAME_COLUMN).unwrap_or_default().trim();
        if exclusions.contains(event_name) {
            continue;
        }

        let raw_time = row.get(EVENT_TIME_COLUMN).unwrap_or_default();
        let event_time = parse_timestamp(raw_time).ok_or_else(|| EventError::InvalidTimestamp {
            value: raw_time.to_string(),
        })?;

        let user_id = row
            .get(ACCOUNT_ID_COLUMN)
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        let attributes = row
            .fields
            .iter()
            .filter(|(k, v)| !REQUIRED_COLUMNS.contains(&k.as_str()) && !v.trim().is_empty())
            .map(|(k, v)| (k.clone(), v.trim().to_string()))
            .collect();

        out.push(EventRecord {
            user_id,
            event_name: event_name.to_string(),
            event_time,
            date: event_time.date(),
            time_of_day: fractional_hour(event_time),
            attributes,
        });
    }

    out.sort_by(|a, b| {
        a.user_id
            .cmp(&b.user_id)
            .then_with(|| a.event_time.cmp(&b.event_time))
    });

    Ok(out)
}

/// Candidate user id set: distinct non-null ids in the stream.
pub fn distinct_user_ids(events: &[EventRecord]) -> BTreeSet<String> {
    events
        .iter()
        .filter_map(|e| e.user_id.clone())
        .collect()
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    for format in DATETIME_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(ts);
        }
    }
    NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
}

fn fractional_hour(ts: NaiveDateTime) -> f64 {
    ts.hour() as f64 + ts.minute() as f64 / 60.0 + ts.second() as f64 / 3_600.0
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "1.0" | "true" | "yes" => Some(true),
        "0" | "0.0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(user: &str, name: &str, time: &str) -> RawEvent {
        RawEvent::new()
            .with(ACCOUNT_ID_COLUMN, user)
            .with(EVENT_NAME_COLUMN, name)
            .with(EVENT_TIME_COLUMN, time)
    }

    fn admin() -> BTreeSet<String> {
        ADMIN_EVENTS.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn drops_admin_events_and_sorts_by_user_then_time() {
        let rows = vec![
            row("b", "click", "2021-03-01 10:00:00"),
            row("a", "push_send", "2021-03-01 09:00:00"),
            row("a", "page_view", "2021-03-01 12:30:00"),
            row("a", "click", "2021-03-01 08:15:00"),
            row("", "click", "2021-03-01 23:00:00"),
        ];

        let events = normalize_events(&rows, &admin()).expect("normalizes");

        let order: Vec<(Option<&str>, &str)> = events
            .iter()
            .map(|e| (e.user(), e.event_name.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                (None, "click"),
                (Some("a"), "click"),
                (Some("a"), "page_view"),
                (Some("b"), "click"),
            ]
        );
        assert_eq!(events[1].date, NaiveDate::from_ymd_opt(2021, 3, 1).unwrap());
        assert!((events[1].time_of_day - 8.25).abs() < 1e-12);
    }

    #[test]
    fn sort_is_stable_for_equal_timestamps() {
        let rows = vec![
            row("a", "first", "2021-03-01 10:00:00"),
            row("a", "second", "2021-03-01 10:00:00"),
        ];
        let events = normalize_events(&rows, &BTreeSet::new()).unwrap();
        assert_eq!(events[0].event_name, "first");
        assert_eq!(events[1].event_name, "second");
    }

    #[test]
    fn bad_timestamp_fails_the_period() {
        let rows = vec![
            row("a", "click", "2021-03-01 10:00:00"),
            row("a", "click", "yesterday"),
        ];
        let err = normalize_events(&rows, &admin()).unwrap_err();
        assert_eq!(
            err,
            EventError::InvalidTimestamp {
                value: "yesterday".to_string()
            }
        );
    }

    #[test]
    fn excluded_rows_are_not_time_parsed() {
        let rows = vec![row("a", "push_send", "not a time")];
        let events = normalize_events(&rows, &admin()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn missing_required_column_is_a_schema_error() {
        let rows = vec![RawEvent::new()
            .with(ACCOUNT_ID_COLUMN, "a")
            .with(EVENT_TIME_COLUMN, "2021-03-01 10:00:00")];
        let err = normalize_events(&rows, &admin()).unwrap_err();
        assert_eq!(
            err,
            EventError::MissingColumn {
                column: EVENT_NAME_COLUMN
            }
        );
    }

    #[test]
    fn accepts_iso_and_date_only_times() {
        assert!(parse_timestamp("2021-03-01T10:00:00.250").is_some());
        assert!(parse_timestamp("2021/03/01 10:00:00").is_some());
        let midnight = parse_timestamp("2021-03-01").unwrap();
        assert_eq!(midnight.hour(), 0);
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn attributes_drop_empty_values_and_parse_numbers_and_flags() {
        let rows = vec![row("a", "exit_room", "2021-03-01 10:00:00")
            .with("#duration", "42.5")
            .with("room_type", "")
            .with("is_success", "True")];
        let events = normalize_events(&rows, &admin()).unwrap();
        let e = &events[0];
        assert_eq!(e.attr_f64("#duration"), Some(42.5));
        assert_eq!(e.attr("room_type"), None);
        assert_eq!(e.attr_flag("is_success"), Some(true));
        assert!(!e.attributes.contains_key(ACCOUNT_ID_COLUMN));
    }

    #[test]
    fn candidate_ids_skip_null_users() {
        let rows = vec![
            row("a", "click", "2021-03-01 10:00:00"),
            row("", "click", "2021-03-01 10:00:00"),
            row("a", "click", "2021-03-01 11:00:00"),
            row("c", "click", "2021-03-01 11:00:00"),
        ];
        let events = normalize_events(&rows, &admin()).unwrap();
        let ids: Vec<String> = distinct_user_ids(&events).into_iter().collect();
        assert_eq!(ids, vec!["a".to_string(), "c".to_string()]);
    }
}
