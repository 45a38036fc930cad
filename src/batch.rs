//! Batch driver: one labeled table per consecutive period pair, concatenated
//! into a single dataset.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::blocks::compose_features;
use crate::config::PipelineConfig;
use crate::events::{
    distinct_user_ids, normalize_events, EventError, RawEvent, ACCOUNT_ID_COLUMN,
};
use crate::label::{build_labeled_table, next_period_ids, LabeledRow, LabeledTable};
use crate::profile::extract_profiles;
use crate::source::{PeriodSource, SourceError};

pub const LABEL_COLUMN: &str = "churn";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("period source error: {0}")]
    Source(#[from] SourceError),
    #[error("period {period}: {source}")]
    Events {
        period: u64,
        #[source]
        source: EventError,
    },
    #[error("need at least two periods to label churn, found {found}")]
    InsufficientPeriods { found: usize },
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodPairSummary {
    pub period_key: u64,
    pub next_period_key: u64,
    pub rows: usize,
    pub churned: usize,
    /// `None` when the period had no candidate users.
    pub churn_rate: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub period_keys: Vec<u64>,
    pub pairs: Vec<PeriodPairSummary>,
}

impl BatchReport {
    /// One rate per consecutive pair, in period order.
    pub fn churn_rates(&self) -> Vec<Option<f64>> {
        self.pairs.iter().map(|p| p.churn_rate).collect()
    }
}

/// Concatenated labeled rows of every period pair.
///
/// Feature columns are the union across periods in first-seen order; a
/// period that never produced a column leaves its cells missing.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub profile_columns: Vec<String>,
    pub feature_columns: Vec<String>,
    pub rows: Vec<LabeledRow>,
}

impl Dataset {
    pub fn new(profile_columns: Vec<String>) -> Self {
        Self {
            profile_columns,
            feature_columns: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn append(&mut self, table: LabeledTable) {
        for column in table.feature_columns {
            if !self.feature_columns.contains(&column) {
                self.feature_columns.push(column);
            }
        }
        self.rows.extend(table.rows);
    }

    pub fn header(&self) -> Vec<String> {
        let mut header = vec![
            "row".to_string(),
            "period".to_string(),
            ACCOUNT_ID_COLUMN.to_string(),
        ];
        header.extend(self.profile_columns.iter().cloned());
        header.extend(self.feature_columns.iter().cloned());
        header.push(LABEL_COLUMN.to_string());
        header
    }

    /// Row index is fresh: 0..n over the concatenated rows.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), PipelineError> {
        let mut out = csv::Writer::from_writer(writer);
        out.write_record(self.header())?;

        for (idx, row) in self.rows.iter().enumerate() {
            let mut record = Vec::with_capacity(
                self.profile_columns.len() + self.feature_columns.len() + 4,
            );
            record.push(idx.to_string());
            record.push(row.period_key.to_string());
            record.push(row.user_id.clone());
            for column in &self.profile_columns {
                record.push(row.profile.value(column).unwrap_or_default());
            }
            for column in &self.feature_columns {
                record.push(format_cell(row.features.get(column).copied()));
            }
            record.push(row.label.as_u8().to_string());
            out.write_record(&record)?;
        }

        out.flush()?;
        Ok(())
    }

    pub fn to_csv_bytes(&self) -> Result<Vec<u8>, PipelineError> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        Ok(buf)
    }

    /// SHA-256 of the CSV rendering. Equal inputs and config give equal
    /// fingerprints.
    pub fn fingerprint(&self) -> Result<String, PipelineError> {
        let mut hasher = Sha256::new();
        hasher.update(self.to_csv_bytes()?);
        Ok(hex::encode(hasher.finalize()))
    }
}

#[derive(Debug, Clone)]
pub struct BatchOutput {
    pub dataset: Dataset,
    pub report: BatchReport,
}

/// Builds the labeled table for `period_key`, using `next_period_key` only
/// for its id set.
pub fn build_period_table(
    period_rows: &[RawEvent],
    next_period_rows: &[RawEvent],
    period_key: u64,
    next_period_key: u64,
    config: &PipelineConfig,
) -> Result<LabeledTable, PipelineError> {
    let events = normalize_events(period_rows, &config.filter.feature_exclusions).map_err(
        |source| PipelineError::Events {
            period: period_key,
            source,
        },
    )?;
    let candidates = distinct_user_ids(&events);
    debug!(
        component = "batch",
        event = "period.normalized",
        period = period_key,
        raw_rows = period_rows.len(),
        events = events.len(),
        users = candidates.len()
    );
    let profiles = extract_profiles(&events, &config.profile);
    let features = compose_features(&events, &config.blocks, &candidates);
    drop(events);

    let next_events = normalize_events(next_period_rows, &config.filter.label_exclusions)
        .map_err(|source| PipelineError::Events {
            period: next_period_key,
            source,
        })?;
    let next_ids = next_period_ids(&next_events);

    Ok(build_labeled_table(
        period_key,
        next_period_key,
        &candidates,
        profiles,
        features,
        &next_ids,
    ))
}

pub fn run_batch(
    source: &dyn PeriodSource,
    config: &PipelineConfig,
) -> Result<BatchOutput, PipelineError> {
    let mut period_keys = source.period_keys()?;
    period_keys.sort_unstable();
    period_keys.dedup();

    if period_keys.len() < 2 {
        return Err(PipelineError::InsufficientPeriods {
            found: period_keys.len(),
        });
    }

    let block_names: Vec<&str> = config.blocks.iter().map(|b| b.as_str()).collect();
    info!(
        component = "batch",
        event = "batch.start",
        preset = config.preset.as_str(),
        periods = period_keys.len(),
        blocks = ?block_names,
        label_filter_aligned = config.filter.is_aligned()
    );

    let mut dataset = Dataset::new(config.profile.columns());
    let mut pairs = Vec::with_capacity(period_keys.len() - 1);

    // Each period is loaded once.
    let mut period_rows = source.load_period(period_keys[0])?;
    for window in period_keys.windows(2) {
        let (period_key, next_period_key) = (window[0], window[1]);
        let next_period_rows = source.load_period(next_period_key)?;

        let table = build_period_table(
            &period_rows,
            &next_period_rows,
            period_key,
            next_period_key,
            config,
        )?;

        let summary = PeriodPairSummary {
            period_key,
            next_period_key,
            rows: table.rows.len(),
            churned: table.churned(),
            churn_rate: (!table.rows.is_empty()).then(|| table.churn_rate()),
        };
        if summary.rows == 0 {
            warn!(
                component = "batch",
                event = "batch.pair.empty",
                period = period_key,
                next_period = next_period_key
            );
        }
        info!(
            component = "batch",
            event = "batch.pair.finish",
            period = period_key,
            next_period = next_period_key,
            rows = summary.rows,
            churned = summary.churned,
            churn_rate = table.churn_rate(),
            feature_columns = table.feature_columns.len()
        );

        pairs.push(summary);
        dataset.append(table);
        period_rows = next_period_rows;
    }

    info!(
        component = "batch",
        event = "batch.finish",
        pairs = pairs.len(),
        rows = dataset.rows.len(),
        feature_columns = dataset.feature_columns.len()
    );

    Ok(BatchOutput {
        dataset,
        report: BatchReport { period_keys, pairs },
    })
}

/// Writes the dataset CSV and the JSON report, creating parent directories.
pub fn write_outputs(
    output: &BatchOutput,
    dataset_path: &Path,
    report_path: &Path,
) -> Result<(), PipelineError> {
    for path in [dataset_path, report_path] {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
    }

    output.dataset.write_csv(fs::File::create(dataset_path)?)?;
    let report = serde_json::to_vec_pretty(&output.report)?;
    fs::write(report_path, report)?;

    info!(
        component = "batch",
        event = "batch.outputs.written",
        dataset_path = %dataset_path.display(),
        report_path = %report_path.display(),
        rows = output.dataset.rows.len()
    );
    Ok(())
}

fn format_cell(value: Option<f64>) -> String {
    match value {
        None => String::new(),
        Some(v) if v.is_nan() => "NaN".to_string(),
        Some(v) => v.to_string(),
    }
}
