//! Wide per-user feature frames and the group-by helpers blocks build on.

use std::collections::{BTreeMap, BTreeSet};

use crate::events::EventRecord;

/// User id → column → value, with an ordered column list.
///
/// An absent cell is "missing". A present NaN cell is an undefined rate.
#[derive(Debug, Clone, Default)]
pub struct FeatureFrame {
    columns: Vec<String>,
    rows: BTreeMap<String, BTreeMap<String, f64>>,
}

impl FeatureFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn users(&self) -> impl Iterator<Item = &str> {
        self.rows.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains_user(&self, user: &str) -> bool {
        self.rows.contains_key(user)
    }

    pub fn row(&self, user: &str) -> Option<&BTreeMap<String, f64>> {
        self.rows.get(user)
    }

    pub fn get(&self, user: &str, column: &str) -> Option<f64> {
        self.rows.get(user).and_then(|row| row.get(column)).copied()
    }

    pub fn add_column(&mut self, column: &str) {
        if !self.columns.iter().any(|c| c == column) {
            self.columns.push(column.to_string());
        }
    }

    pub fn add_row(&mut self, user: &str) {
        if !self.rows.contains_key(user) {
            self.rows.insert(user.to_string(), BTreeMap::new());
        }
    }

    pub fn set(&mut self, user: &str, column: &str, value: f64) {
        self.add_column(column);
        self.add_row(user);
        if let Some(row) = self.rows.get_mut(user) {
            row.insert(column.to_string(), value);
        }
    }

    /// Writes `value` into every existing row that has no cell for `column`.
    pub fn fill_missing(&mut self, column: &str, value: f64) {
        self.add_column(column);
        for row in self.rows.values_mut() {
            row.entry(column.to_string()).or_insert(value);
        }
    }

    /// Outer union of columns (appending unseen ones in order) and rows.
    pub fn outer_join(&mut self, other: FeatureFrame) {
        for column in &other.columns {
            self.add_column(column);
        }
        for (user, cells) in other.rows {
            self.rows.entry(user).or_default().extend(cells);
        }
    }

    /// Keeps exactly the rows in `users`, adding empty rows where needed.
    pub fn align_rows<'a>(&mut self, users: impl IntoIterator<Item = &'a String>) {
        let mut aligned = BTreeMap::new();
        for user in users {
            let cells = self.rows.remove(user.as_str()).unwrap_or_default();
            aligned.insert(user.clone(), cells);
        }
        self.rows = aligned;
    }

    pub fn into_rows(self) -> (Vec<String>, BTreeMap<String, BTreeMap<String, f64>>) {
        (self.columns, self.rows)
    }
}

/// `numerator / denominator`, NaN when the denominator is zero.
pub fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        f64::NAN
    } else {
        numerator / denominator
    }
}

/// Running min/max/sum/count of one numeric attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub count: usize,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
}

impl Default for Stats {
    fn default() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl Stats {
    pub fn push(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }

    pub fn range(&self) -> Option<f64> {
        (self.count > 0).then(|| self.max - self.min)
    }
}

/// Events with a non-null user paired with that user.
pub fn user_events<'a>(
    events: &'a [EventRecord],
) -> impl Iterator<Item = (&'a str, &'a EventRecord)> + 'a {
    events
        .iter()
        .filter_map(|event| event.user().map(|user| (user, event)))
}

/// Per-user row counts of events matching `pred`.
pub fn count_by_user<'a>(
    events: &'a [EventRecord],
    pred: impl Fn(&EventRecord) -> bool,
) -> BTreeMap<&'a str, usize> {
    let mut counts = BTreeMap::new();
    for (user, event) in user_events(events) {
        if pred(event) {
            *counts.entry(user).or_insert(0) += 1;
        }
    }
    counts
}

/// Per-user distinct values of an attribute, over events matching `pred`.
pub fn distinct_by_user<'a>(
    events: &'a [EventRecord],
    pred: impl Fn(&EventRecord) -> bool,
    value: impl Fn(&'a EventRecord) -> Option<&'a str>,
) -> BTreeMap<&'a str, BTreeSet<&'a str>> {
    let mut out: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for (user, event) in user_events(events) {
        if !pred(event) {
            continue;
        }
        if let Some(v) = value(event) {
            out.entry(user).or_default().insert(v);
        }
    }
    out
}

/// Per-user statistics of a numeric attribute over events matching `pred`.
/// Users with matching events but no value are absent.
pub fn stats_by_user<'a>(
    events: &'a [EventRecord],
    pred: impl Fn(&EventRecord) -> bool,
    value: impl Fn(&EventRecord) -> Option<f64>,
) -> BTreeMap<&'a str, Stats> {
    let mut out: BTreeMap<&str, Stats> = BTreeMap::new();
    for (user, event) in user_events(events) {
        if !pred(event) {
            continue;
        }
        if let Some(v) = value(event) {
            out.entry(user).or_default().push(v);
        }
    }
    out
}

/// Row counts per `(user, category)`, plus every category seen in the period.
#[derive(Debug, Clone, Default)]
pub struct CategoryTally<'a> {
    categories: BTreeSet<&'a str>,
    counts: BTreeMap<&'a str, BTreeMap<&'a str, usize>>,
}

impl<'a> CategoryTally<'a> {
    pub fn collect(
        events: &'a [EventRecord],
        pred: impl Fn(&EventRecord) -> bool,
        category: impl Fn(&'a EventRecord) -> Option<&'a str>,
    ) -> Self {
        let mut tally = Self::default();
        for (user, event) in user_events(events) {
            if !pred(event) {
                continue;
            }
            if let Some(cat) = category(event) {
                tally.add(user, cat);
            }
        }
        tally
    }

    pub fn add(&mut self, user: &'a str, category: &'a str) {
        self.categories.insert(category);
        *self
            .counts
            .entry(user)
            .or_default()
            .entry(category)
            .or_insert(0) += 1;
    }

    pub fn categories(&self) -> impl Iterator<Item = &'a str> + '_ {
        self.categories.iter().copied()
    }

    pub fn count(&self, user: &str, category: &str) -> usize {
        self.counts
            .get(user)
            .and_then(|by_cat| by_cat.get(category))
            .copied()
            .unwrap_or(0)
    }

    /// Writes one count column per category, `prefix` + category, for
    /// every user already in `frame`. Absent combinations are 0.
    pub fn write_counts(&self, frame: &mut FeatureFrame, prefix: &str) {
        for category in &self.categories {
            let column = format!("{prefix}{category}");
            for (user, by_cat) in &self.counts {
                if let Some(n) = by_cat.get(category) {
                    frame.set(user, &column, *n as f64);
                }
            }
            frame.fill_missing(&column, 0.0);
        }
    }
}
