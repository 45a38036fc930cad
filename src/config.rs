//! Pipeline presets and run configuration.

use std::collections::BTreeSet;
use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::blocks::{parse_blocks, FeatureBlock, FeatureError, ALL_BLOCKS};
use crate::events::{ADMIN_EVENTS, APP_END_EVENT};
use crate::profile::ProfileSchema;

/// Named bundles of exclusion lists and profile schema. There is no default;
/// callers pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// All administrative events excluded everywhere; profile keeps
    /// `birthday` and `channel.1`.
    Baseline,
    /// Keeps `ta_app_end` for app-session duration, derives `register_days`.
    Extended,
}

impl Preset {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Baseline => "baseline",
            Self::Extended => "extended",
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "baseline" => Ok(Self::Baseline),
            "extended" => Ok(Self::Extended),
            other => Err(ConfigError::InvalidPreset(other.to_string())),
        }
    }
}

/// Event names dropped before feature computation and before computing the
/// next-period id set. The two lists can differ.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    pub feature_exclusions: BTreeSet<String>,
    pub label_exclusions: BTreeSet<String>,
}

impl EventFilter {
    /// Extended keeps `ta_app_end` for features but still drops it when
    /// deciding who is present next period, so a user whose only activity
    /// next period is `ta_app_end` is labeled churned.
    pub fn for_preset(preset: Preset) -> Self {
        let all: BTreeSet<String> = ADMIN_EVENTS.iter().map(|s| s.to_string()).collect();
        match preset {
            Preset::Baseline => Self {
                feature_exclusions: all.clone(),
                label_exclusions: all,
            },
            Preset::Extended => {
                let mut feature_exclusions = all.clone();
                feature_exclusions.remove(APP_END_EVENT);
                Self {
                    feature_exclusions,
                    label_exclusions: all,
                }
            }
        }
    }

    /// Uses the feature exclusion list for labels as well.
    pub fn aligned(mut self) -> Self {
        self.label_exclusions = self.feature_exclusions.clone();
        self
    }

    pub fn is_aligned(&self) -> bool {
        self.feature_exclusions == self.label_exclusions
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub preset: Preset,
    pub filter: EventFilter,
    pub profile: ProfileSchema,
    pub blocks: Vec<FeatureBlock>,
}

impl PipelineConfig {
    pub fn for_preset(preset: Preset, blocks: Vec<FeatureBlock>) -> Self {
        let profile = match preset {
            Preset::Baseline => ProfileSchema::baseline(),
            Preset::Extended => ProfileSchema::extended(),
        };
        Self {
            preset,
            filter: EventFilter::for_preset(preset),
            profile,
            blocks,
        }
    }
}

/// Everything the `churn_dataset` binary needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub data_root: PathBuf,
    pub output_path: PathBuf,
    pub report_path: PathBuf,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    MissingVar(&'static str),
    #[error("invalid preset '{0}', expected baseline or extended")]
    InvalidPreset(String),
    #[error("invalid boolean for {var}: '{value}'")]
    InvalidBool { var: &'static str, value: String },
    #[error(transparent)]
    Block(#[from] FeatureError),
}

pub const DEFAULT_DATA_ROOT: &str = "data/periods";

pub fn run_config_from_env() -> Result<RunConfig, ConfigError> {
    run_config_from_lookup(|key| env::var(key).ok())
}

/// Same as [`run_config_from_env`] but reads variables through `lookup`.
pub fn run_config_from_lookup(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<RunConfig, ConfigError> {
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let data_root = non_empty("CHURN_DATA_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_ROOT));

    let preset: Preset = non_empty("CHURN_PRESET")
        .ok_or(ConfigError::MissingVar("CHURN_PRESET"))?
        .parse()?;

    let blocks = match non_empty("CHURN_FEATURE_BLOCKS") {
        Some(raw) => parse_blocks(raw.split(',').filter(|name| !name.trim().is_empty()))?,
        None => ALL_BLOCKS.to_vec(),
    };

    let align = match non_empty("CHURN_ALIGN_LABEL_FILTER") {
        Some(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidBool {
            var: "CHURN_ALIGN_LABEL_FILTER",
            value: raw,
        })?,
        None => false,
    };

    let mut pipeline = PipelineConfig::for_preset(preset, blocks);
    if align {
        pipeline.filter = pipeline.filter.aligned();
    }

    let output_path = non_empty("CHURN_OUTPUT_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_root.join("dataset.csv"));
    let report_path = non_empty("CHURN_REPORT_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|| data_root.join("report.json"));

    Ok(RunConfig {
        data_root,
        output_path,
        report_path,
        pipeline,
    })
}

pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
