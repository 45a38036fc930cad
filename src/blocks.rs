//! Feature block registry, the activity/timing blocks and the composer.
//!
//! Every block is a pure `&[EventRecord] -> FeatureFrame`. A user appears in
//! a block's frame only if they have at least one event the block looks at.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::behavior;
use crate::events::EventRecord;
use crate::frame::{
    count_by_user, distinct_by_user, stats_by_user, user_events, CategoryTally, FeatureFrame,
    Stats,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureBlock {
    UniqueEventCount,
    TotalEventCount,
    PerEventCount,
    SessionTimeRange,
    PerEventTimeRange,
    ScriptedGuide,
    UiClicks,
    PageViews,
    RoomFunnel,
    InRoomBehavior,
    GameMatchFunnel,
    AppSessionDuration,
}

pub const ALL_BLOCKS: [FeatureBlock; 12] = [
    FeatureBlock::UniqueEventCount,
    FeatureBlock::TotalEventCount,
    FeatureBlock::PerEventCount,
    FeatureBlock::SessionTimeRange,
    FeatureBlock::PerEventTimeRange,
    FeatureBlock::ScriptedGuide,
    FeatureBlock::UiClicks,
    FeatureBlock::PageViews,
    FeatureBlock::RoomFunnel,
    FeatureBlock::InRoomBehavior,
    FeatureBlock::GameMatchFunnel,
    FeatureBlock::AppSessionDuration,
];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FeatureError {
    #[error("unknown feature block: {0}")]
    UnknownBlock(String),
}

impl FeatureBlock {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UniqueEventCount => "unique_event_count",
            Self::TotalEventCount => "total_event_count",
            Self::PerEventCount => "per_event_count",
            Self::SessionTimeRange => "session_time_range",
            Self::PerEventTimeRange => "per_event_time_range",
            Self::ScriptedGuide => "scripted_guide",
            Self::UiClicks => "ui_clicks",
            Self::PageViews => "page_views",
            Self::RoomFunnel => "room_funnel",
            Self::InRoomBehavior => "in_room_behavior",
            Self::GameMatchFunnel => "game_match_funnel",
            Self::AppSessionDuration => "app_session_duration",
        }
    }

    pub fn compute(self, events: &[EventRecord]) -> FeatureFrame {
        match self {
            Self::UniqueEventCount => unique_event_count(events),
            Self::TotalEventCount => total_event_count(events),
            Self::PerEventCount => per_event_count(events),
            Self::SessionTimeRange => session_time_range(events),
            Self::PerEventTimeRange => per_event_time_range(events),
            Self::ScriptedGuide => behavior::scripted_guide(events),
            Self::UiClicks => behavior::ui_clicks(events),
            Self::PageViews => behavior::page_views(events),
            Self::RoomFunnel => behavior::room_funnel(events),
            Self::InRoomBehavior => behavior::in_room_behavior(events),
            Self::GameMatchFunnel => behavior::game_match_funnel(events),
            Self::AppSessionDuration => behavior::app_session_duration(events),
        }
    }
}

impl fmt::Display for FeatureBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FeatureBlock {
    type Err = FeatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        ALL_BLOCKS
            .iter()
            .copied()
            .find(|block| block.as_str() == wanted)
            .ok_or_else(|| FeatureError::UnknownBlock(wanted.to_string()))
    }
}

/// Parses a list of block names, failing on the first unknown one.
pub fn parse_blocks<I, S>(names: I) -> Result<Vec<FeatureBlock>, FeatureError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    names
        .into_iter()
        .map(|name| name.as_ref().parse())
        .collect()
}

/// Computes the requested blocks and aligns them onto `candidates`.
///
/// Columns are the union in request order. Every candidate gets a row, even
/// when no block produced a cell for it.
pub fn compose_features(
    events: &[EventRecord],
    blocks: &[FeatureBlock],
    candidates: &BTreeSet<String>,
) -> FeatureFrame {
    let mut seen = BTreeSet::new();
    let mut composed = FeatureFrame::new();

    for block in blocks {
        if !seen.insert(*block) {
            debug!(
                component = "blocks",
                event = "blocks.duplicate_skipped",
                block = block.as_str()
            );
            continue;
        }

        let frame = block.compute(events);
        debug!(
            component = "blocks",
            event = "blocks.computed",
            block = block.as_str(),
            users = frame.len(),
            columns = frame.columns().len()
        );
        composed.outer_join(frame);
    }

    composed.align_rows(candidates);

    info!(
        component = "blocks",
        event = "blocks.composed",
        blocks = seen.len(),
        users = composed.len(),
        columns = composed.columns().len()
    );

    composed
}

fn unique_event_count(events: &[EventRecord]) -> FeatureFrame {
    let mut frame = FeatureFrame::new();
    for (user, names) in distinct_by_user(events, |_| true, |e| Some(e.event_name.as_str())) {
        frame.set(user, "event_cnt_unique", names.len() as f64);
    }
    frame
}

fn total_event_count(events: &[EventRecord]) -> FeatureFrame {
    let mut frame = FeatureFrame::new();
    for (user, n) in count_by_user(events, |_| true) {
        frame.set(user, "event_cnt_total", n as f64);
    }
    frame
}

fn per_event_count(events: &[EventRecord]) -> FeatureFrame {
    let tally = CategoryTally::collect(events, |_| true, |e| Some(e.event_name.as_str()));
    let mut frame = FeatureFrame::new();
    for (user, _) in user_events(events) {
        frame.add_row(user);
    }
    tally.write_counts(&mut frame, "event_cnt_EVENT_");
    frame
}

fn session_time_range(events: &[EventRecord]) -> FeatureFrame {
    let mut frame = FeatureFrame::new();
    for (user, stats) in stats_by_user(events, |_| true, |e| Some(e.time_of_day)) {
        frame.set(user, "time_min", stats.min);
        frame.set(user, "time_max", stats.max);
        frame.set(user, "time_range", stats.max - stats.min);
    }
    frame
}

fn per_event_time_range(events: &[EventRecord]) -> FeatureFrame {
    let mut by_event: BTreeMap<&str, BTreeMap<&str, Stats>> = BTreeMap::new();
    for (user, event) in user_events(events) {
        by_event
            .entry(event.event_name.as_str())
            .or_default()
            .entry(user)
            .or_default()
            .push(event.time_of_day);
    }

    let mut frame = FeatureFrame::new();
    // Grouped by statistic first, then event, so all mins come before maxes.
    for stat in ["time_min", "time_max", "time_range"] {
        for (event_name, per_user) in &by_event {
            let column = format!("{stat}_{event_name}");
            frame.add_column(&column);
            for (user, stats) in per_user {
                let value = match stat {
                    "time_min" => stats.min,
                    "time_max" => stats.max,
                    _ => stats.max - stats.min,
                };
                frame.set(user, &column, value);
            }
        }
    }
    frame
}
