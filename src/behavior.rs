//! Product-behavior feature blocks: guides, clicks, page views, room and
//! game funnels, in-room activity and app session duration.
//!
//! Count columns fill to 0 for users inside a block. Duration statistics and
//! rates are only written where they are defined, except that a zero funnel
//! denominator writes NaN.

use std::collections::{BTreeMap, BTreeSet};

use crate::events::{EventRecord, APP_END_EVENT};
use crate::frame::{
    count_by_user, distinct_by_user, ratio, stats_by_user, user_events, CategoryTally,
    FeatureFrame, Stats,
};

pub const DURATION_ATTR: &str = "#duration";

pub const GUIDE_EVENT: &str = "script_guide";
pub const CLICK_EVENT: &str = "click";
pub const PAGE_VIEW_EVENT: &str = "page_view";
pub const ROOM_VIEW_EVENT: &str = "room_view";
pub const ROOM_CLICK_EVENT: &str = "room_click";
pub const ENTER_ROOM_EVENT: &str = "enter_room";
pub const EXIT_ROOM_EVENT: &str = "exit_room";
pub const MESSAGE_EVENT: &str = "send_message";
pub const MIC_EVENT: &str = "mic_up";
pub const INVITE_EVENT: &str = "invite_friend";
pub const MATCH_EVENT: &str = "game_match";
pub const MATCH_SUCCESS_EVENT: &str = "game_match_success";
pub const GAME_END_EVENT: &str = "game_end";

/// A tab counts as "scrolled" once a user views more than this many distinct
/// rooms in it.
pub const SLIDE_THRESHOLD: usize = 5;

pub fn app_session_duration(events: &[EventRecord]) -> FeatureFrame {
    let mut frame = FeatureFrame::new();
    let stats = stats_by_user(events, |e| e.is(APP_END_EVENT), duration);
    for (user, s) in &stats {
        frame.set(user, "app_duration_cnt", s.count as f64);
        frame.set(user, "app_duration_sum", s.sum);
        if let Some(mean) = s.mean() {
            frame.set(user, "app_duration_mean", mean);
        }
        frame.set(user, "app_duration_min", s.min);
        frame.set(user, "app_duration_max", s.max);
    }
    frame
}

pub fn scripted_guide(events: &[EventRecord]) -> FeatureFrame {
    let is_guide = |e: &EventRecord| e.is(GUIDE_EVENT);
    let mut frame = FeatureFrame::new();

    for (user, n) in count_by_user(events, is_guide) {
        frame.set(user, "guide_cnt", n as f64);
    }
    for (user, n) in count_by_user(events, |e| {
        is_guide(e) && e.attr_flag("is_success") == Some(true)
    }) {
        frame.set(user, "guide_success_cnt", n as f64);
    }
    for (user, n) in count_by_user(events, |e| {
        is_guide(e) && e.attr_flag("is_success") == Some(false)
    }) {
        frame.set(user, "guide_fail_cnt", n as f64);
    }
    if frame.is_empty() {
        return frame;
    }
    frame.fill_missing("guide_success_cnt", 0.0);
    frame.fill_missing("guide_fail_cnt", 0.0);

    CategoryTally::collect(events, is_guide, |e| e.attr("guide_id"))
        .write_counts(&mut frame, "guide_GUIDE_");
    frame
}

pub fn ui_clicks(events: &[EventRecord]) -> FeatureFrame {
    let is_click = |e: &EventRecord| e.is(CLICK_EVENT);
    let mut frame = FeatureFrame::new();

    for (user, n) in count_by_user(events, is_click) {
        frame.set(user, "click_cnt", n as f64);
    }
    if frame.is_empty() {
        return frame;
    }
    for (user, names) in distinct_by_user(events, is_click, |e| e.attr("click_name")) {
        frame.set(user, "click_unique", names.len() as f64);
    }
    frame.fill_missing("click_unique", 0.0);

    CategoryTally::collect(events, is_click, |e| e.attr("click_name"))
        .write_counts(&mut frame, "click_NAME_");
    frame
}

pub fn page_views(events: &[EventRecord]) -> FeatureFrame {
    let is_view = |e: &EventRecord| e.is(PAGE_VIEW_EVENT);
    let mut frame = FeatureFrame::new();

    for (user, n) in count_by_user(events, is_view) {
        frame.set(user, "page_view_cnt", n as f64);
    }
    if frame.is_empty() {
        return frame;
    }
    for (user, pages) in distinct_by_user(events, is_view, |e| e.attr("page_name")) {
        frame.set(user, "page_view_unique", pages.len() as f64);
    }
    frame.fill_missing("page_view_unique", 0.0);
    frame.add_column("page_stay_sum");
    for (user, s) in stats_by_user(events, is_view, duration) {
        frame.set(user, "page_stay_sum", s.sum);
    }

    CategoryTally::collect(events, is_view, |e| e.attr("page_name"))
        .write_counts(&mut frame, "page_view_PAGE_");
    frame
}

/// Room list browsing → room click funnel, overall and per tab.
pub fn room_funnel(events: &[EventRecord]) -> FeatureFrame {
    let is_view = |e: &EventRecord| e.is(ROOM_VIEW_EVENT);
    let is_click = |e: &EventRecord| e.is(ROOM_CLICK_EVENT);

    let mut frame = FeatureFrame::new();
    for (user, event) in user_events(events) {
        if is_view(event) || is_click(event) {
            frame.add_row(user);
        }
    }
    if frame.is_empty() {
        return frame;
    }

    let views = count_by_user(events, is_view);
    let clicks = count_by_user(events, is_click);
    let unique_views = distinct_by_user(events, is_view, |e| e.attr("room_id"));
    let unique_clicks = distinct_by_user(events, is_click, |e| e.attr("room_id"));

    let users: Vec<String> = frame.users().map(str::to_string).collect();
    for user in &users {
        let view_n = views.get(user.as_str()).copied().unwrap_or(0) as f64;
        let click_n = clicks.get(user.as_str()).copied().unwrap_or(0) as f64;
        frame.set(user, "room_view_cnt", view_n);
        frame.set(user, "room_view_unique", set_len(&unique_views, user));
        frame.set(user, "room_click_cnt", click_n);
        frame.set(user, "room_click_unique", set_len(&unique_clicks, user));
        frame.set(user, "room_click_rate", ratio(click_n, view_n));
    }

    let view_tabs = CategoryTally::collect(events, is_view, |e| e.attr("tab"));
    let click_tabs = CategoryTally::collect(events, is_click, |e| e.attr("tab"));
    let unique_by_tab = unique_rooms_by_tab(events);
    let tabs: BTreeSet<&str> = view_tabs.categories().chain(click_tabs.categories()).collect();

    for tab in tabs {
        let view_col = format!("room_view_TAB_{tab}");
        let unique_col = format!("room_view_unique_TAB_{tab}");
        let click_col = format!("room_click_TAB_{tab}");
        let rate_col = format!("room_click_rate_TAB_{tab}");
        let slide_col = format!("is_slide_TAB_{tab}");
        for user in &users {
            let view_n = view_tabs.count(user, tab) as f64;
            let click_n = click_tabs.count(user, tab) as f64;
            let unique_n = unique_by_tab.count(user, tab);
            frame.set(user, &view_col, view_n);
            frame.set(user, &unique_col, unique_n as f64);
            frame.set(user, &click_col, click_n);
            frame.set(user, &rate_col, ratio(click_n, view_n));
            frame.set(user, &slide_col, is_slide(unique_n));
        }
    }
    frame
}

pub fn in_room_behavior(events: &[EventRecord]) -> FeatureFrame {
    let is_enter = |e: &EventRecord| e.is(ENTER_ROOM_EVENT);
    let is_exit = |e: &EventRecord| e.is(EXIT_ROOM_EVENT);
    let is_message = |e: &EventRecord| e.is(MESSAGE_EVENT);
    let is_mic = |e: &EventRecord| e.is(MIC_EVENT);
    let is_invite = |e: &EventRecord| e.is(INVITE_EVENT);

    let mut frame = FeatureFrame::new();
    for (user, event) in user_events(events) {
        if is_enter(event)
            || is_exit(event)
            || is_message(event)
            || is_mic(event)
            || is_invite(event)
        {
            frame.add_row(user);
        }
    }
    if frame.is_empty() {
        return frame;
    }

    let counts = [
        ("room_enter_cnt", count_by_user(events, is_enter)),
        ("room_exit_cnt", count_by_user(events, is_exit)),
        ("chat_cnt", count_by_user(events, is_message)),
        ("mic_cnt", count_by_user(events, is_mic)),
        ("invite_cnt", count_by_user(events, is_invite)),
    ];
    for (column, per_user) in &counts {
        for (user, n) in per_user {
            frame.set(user, column, *n as f64);
        }
        frame.fill_missing(column, 0.0);
    }

    CategoryTally::collect(events, is_enter, |e| e.attr("room_type"))
        .write_counts(&mut frame, "room_enter_TYPE_");

    for (user, s) in stats_by_user(events, is_exit, duration) {
        write_duration_stats(&mut frame, user, &s, "room_stay");
    }

    CategoryTally::collect(events, is_message, |e| e.attr("message_type"))
        .write_counts(&mut frame, "chat_MSG_");
    frame
}

/// Matchmaking → match success funnel, overall and per game type, plus
/// played-game duration.
pub fn game_match_funnel(events: &[EventRecord]) -> FeatureFrame {
    let is_match = |e: &EventRecord| e.is(MATCH_EVENT);
    let is_success = |e: &EventRecord| e.is(MATCH_SUCCESS_EVENT);
    let is_end = |e: &EventRecord| e.is(GAME_END_EVENT);

    let mut frame = FeatureFrame::new();
    for (user, event) in user_events(events) {
        if is_match(event) || is_success(event) || is_end(event) {
            frame.add_row(user);
        }
    }
    if frame.is_empty() {
        return frame;
    }

    let matches = count_by_user(events, is_match);
    let successes = count_by_user(events, is_success);
    let users: Vec<String> = frame.users().map(str::to_string).collect();
    for user in &users {
        let match_n = matches.get(user.as_str()).copied().unwrap_or(0) as f64;
        let success_n = successes.get(user.as_str()).copied().unwrap_or(0) as f64;
        frame.set(user, "match_cnt", match_n);
        frame.set(user, "match_success_cnt", success_n);
        frame.set(user, "match_success_rate", ratio(success_n, match_n));
    }

    let match_games = CategoryTally::collect(events, is_match, |e| e.attr("game_type"));
    let success_games = CategoryTally::collect(events, is_success, |e| e.attr("game_type"));
    let games: BTreeSet<&str> = match_games
        .categories()
        .chain(success_games.categories())
        .collect();
    for game in games {
        let match_col = format!("match_GAME_{game}");
        let success_col = format!("match_success_GAME_{game}");
        let rate_col = format!("match_success_rate_GAME_{game}");
        for user in &users {
            let match_n = match_games.count(user, game) as f64;
            let success_n = success_games.count(user, game) as f64;
            frame.set(user, &match_col, match_n);
            frame.set(user, &success_col, success_n);
            frame.set(user, &rate_col, ratio(success_n, match_n));
        }
    }

    for (user, s) in stats_by_user(events, is_end, duration) {
        write_duration_stats(&mut frame, user, &s, "game_duration");
    }
    frame
}

pub fn is_slide(unique_room_views: usize) -> f64 {
    if unique_room_views > SLIDE_THRESHOLD {
        1.0
    } else {
        0.0
    }
}

fn duration(event: &EventRecord) -> Option<f64> {
    event.attr_f64(DURATION_ATTR)
}

fn set_len(sets: &BTreeMap<&str, BTreeSet<&str>>, user: &str) -> f64 {
    sets.get(user).map(BTreeSet::len).unwrap_or(0) as f64
}

/// Distinct room ids viewed per `(user, tab)`.
fn unique_rooms_by_tab(events: &[EventRecord]) -> CategoryTally<'_> {
    let mut seen = BTreeSet::new();
    let mut tally = CategoryTally::default();
    for (user, event) in user_events(events) {
        if !event.is(ROOM_VIEW_EVENT) {
            continue;
        }
        let (Some(tab), Some(room)) = (event.attr("tab"), event.attr("room_id")) else {
            continue;
        };
        if seen.insert((user, tab, room)) {
            tally.add(user, tab);
        }
    }
    tally
}

/// `<prefix>_sum`, `<prefix>_mean` and `<prefix>_max`.
fn write_duration_stats(frame: &mut FeatureFrame, user: &str, stats: &Stats, prefix: &str) {
    frame.set(user, &format!("{prefix}_sum"), stats.sum);
    if let Some(mean) = stats.mean() {
        frame.set(user, &format!("{prefix}_mean"), mean);
    }
    frame.set(user, &format!("{prefix}_max"), stats.max);
}
