//! Per-user static attribute snapshots.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::events::{parse_timestamp, EventRecord};

pub const REGISTER_TIME_COLUMN: &str = "register_time";
pub const REGISTER_DAYS_COLUMN: &str = "register_days";

const DEVICE_COLUMNS: [&str; 9] = [
    "#province",
    "#city",
    "#manufacturer",
    "#app_version",
    "#os",
    "#carrier",
    "#screen_width",
    "#screen_height",
    "#network_type",
];

/// Which snapshot attributes a profile carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSchema {
    pub attributes: Vec<String>,
    pub register_days: bool,
}

impl ProfileSchema {
    /// Device columns plus `birthday`, `register_time` and `channel.1`.
    pub fn baseline() -> Self {
        let mut attributes: Vec<String> = DEVICE_COLUMNS.iter().map(|c| c.to_string()).collect();
        attributes.push("birthday".to_string());
        attributes.push(REGISTER_TIME_COLUMN.to_string());
        attributes.push("channel.1".to_string());
        Self {
            attributes,
            register_days: false,
        }
    }

    /// Drops `birthday`, reads the channel from `channel` and derives
    /// `register_days`.
    pub fn extended() -> Self {
        let mut attributes: Vec<String> = DEVICE_COLUMNS.iter().map(|c| c.to_string()).collect();
        attributes.push(REGISTER_TIME_COLUMN.to_string());
        attributes.push("channel".to_string());
        Self {
            attributes,
            register_days: true,
        }
    }

    /// Output column names in order.
    pub fn columns(&self) -> Vec<String> {
        let mut columns = self.attributes.clone();
        if self.register_days {
            columns.push(REGISTER_DAYS_COLUMN.to_string());
        }
        columns
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub attributes: BTreeMap<String, String>,
    pub register_days: Option<i64>,
}

impl UserProfile {
    /// Cell value for an output column of `schema`.
    pub fn value(&self, column: &str) -> Option<String> {
        if column == REGISTER_DAYS_COLUMN {
            return self.register_days.map(|d| d.to_string());
        }
        self.attributes.get(column).cloned()
    }
}

/// Snapshot of each non-null user's last row in the sorted stream.
///
/// `register_days` is measured from that same row, so it is the day gap
/// between the user's latest event in the period and registration.
pub fn extract_profiles(
    events: &[EventRecord],
    schema: &ProfileSchema,
) -> BTreeMap<String, UserProfile> {
    let mut last_row: BTreeMap<&str, &EventRecord> = BTreeMap::new();
    for event in events {
        if let Some(user) = event.user() {
            last_row.insert(user, event);
        }
    }

    last_row
        .into_iter()
        .map(|(user, event)| (user.to_string(), snapshot(event, schema)))
        .collect()
}

fn snapshot(event: &EventRecord, schema: &ProfileSchema) -> UserProfile {
    let attributes = schema
        .attributes
        .iter()
        .filter_map(|column| {
            event
                .attr(column)
                .map(|value| (column.clone(), value.to_string()))
        })
        .collect();

    let register_days = if schema.register_days {
        event
            .attr(REGISTER_TIME_COLUMN)
            .and_then(parse_timestamp)
            .map(|registered| (event.date - registered.date()).num_days())
    } else {
        None
    };

    UserProfile {
        attributes,
        register_days,
    }
}
