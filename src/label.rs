//! Churn labels and the labeled per-period table.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::events::{distinct_user_ids, EventRecord};
use crate::frame::FeatureFrame;
use crate::profile::UserProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChurnLabel {
    Retained,
    Churned,
}

impl ChurnLabel {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::Retained => 0,
            Self::Churned => 1,
        }
    }
}

/// Ids that show up in the following period's stream.
pub fn next_period_ids(next_events: &[EventRecord]) -> BTreeSet<String> {
    distinct_user_ids(next_events)
}

/// Absent next period ⇒ churned, regardless of how active the user was.
pub fn assign_label(user_id: &str, next_ids: &BTreeSet<String>) -> ChurnLabel {
    if next_ids.contains(user_id) {
        ChurnLabel::Retained
    } else {
        ChurnLabel::Churned
    }
}

#[derive(Debug, Clone)]
pub struct LabeledRow {
    pub period_key: u64,
    pub user_id: String,
    pub profile: UserProfile,
    pub features: BTreeMap<String, f64>,
    pub label: ChurnLabel,
}

/// One labeled row per candidate user of a period.
#[derive(Debug, Clone)]
pub struct LabeledTable {
    pub period_key: u64,
    pub next_period_key: u64,
    pub feature_columns: Vec<String>,
    pub rows: Vec<LabeledRow>,
}

impl LabeledTable {
    pub fn churned(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.label == ChurnLabel::Churned)
            .count()
    }

    /// Fraction of churned rows. NaN for an empty table.
    pub fn churn_rate(&self) -> f64 {
        if self.rows.is_empty() {
            return f64::NAN;
        }
        self.churned() as f64 / self.rows.len() as f64
    }
}

/// Joins candidates, their profiles and features, and labels each one
/// against `next_ids`.
pub fn build_labeled_table(
    period_key: u64,
    next_period_key: u64,
    candidates: &BTreeSet<String>,
    mut profiles: BTreeMap<String, UserProfile>,
    features: FeatureFrame,
    next_ids: &BTreeSet<String>,
) -> LabeledTable {
    let (feature_columns, mut feature_rows) = features.into_rows();

    let rows = candidates
        .iter()
        .map(|user| LabeledRow {
            period_key,
            user_id: user.clone(),
            profile: profiles.remove(user).unwrap_or_default(),
            features: feature_rows.remove(user).unwrap_or_default(),
            label: assign_label(user, next_ids),
        })
        .collect();

    LabeledTable {
        period_key,
        next_period_key,
        feature_columns,
        rows,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn absent_next_period_means_churned() {
        let next = ids(&["b", "c", "d"]);
        assert_eq!(assign_label("a", &next), ChurnLabel::Churned);
        assert_eq!(assign_label("b", &next), ChurnLabel::Retained);
        assert_eq!(ChurnLabel::Churned.as_u8(), 1);
        assert_eq!(ChurnLabel::Retained.as_u8(), 0);
    }

    #[test]
    fn table_has_one_row_per_candidate_and_churn_rate() {
        let candidates = ids(&["a", "b", "c"]);
        let mut features = FeatureFrame::new();
        features.set("b", "event_cnt_total", 4.0);

        let table = build_labeled_table(
            1,
            2,
            &candidates,
            BTreeMap::new(),
            features,
            &ids(&["b", "c", "d"]),
        );

        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.churned(), 1);
        assert!((table.churn_rate() - 1.0 / 3.0).abs() < 1e-12);
        assert!(table.rows[0].features.is_empty());
        assert_eq!(table.rows[1].features.get("event_cnt_total"), Some(&4.0));
        assert_eq!(table.feature_columns, vec!["event_cnt_total".to_string()]);
    }

    #[test]
    fn empty_table_churn_rate_is_nan() {
        let table = build_labeled_table(
            1,
            2,
            &BTreeSet::new(),
            BTreeMap::new(),
            FeatureFrame::new(),
            &BTreeSet::new(),
        );
        assert!(table.churn_rate().is_nan());
    }
}
