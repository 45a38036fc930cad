//! Churn feature dataset builder.
//!
//! Turns per-period event logs into one labeled feature row per user and
//! period:
//! - event filtering and normalization
//! - per-user profile snapshots
//! - twelve selectable feature blocks composed into a wide table
//! - churn labels from next-period presence
//! - batch driver over all consecutive period pairs

mod batch;
mod behavior;
mod blocks;
mod config;
mod events;
mod frame;
mod label;
mod observability;
mod profile;
mod source;

pub use batch::{
    build_period_table, run_batch, write_outputs, BatchOutput, BatchReport, Dataset,
    PeriodPairSummary, PipelineError, LABEL_COLUMN,
};
pub use behavior::{
    is_slide, CLICK_EVENT, DURATION_ATTR, ENTER_ROOM_EVENT, EXIT_ROOM_EVENT, GAME_END_EVENT,
    GUIDE_EVENT, INVITE_EVENT, MATCH_EVENT, MATCH_SUCCESS_EVENT, MESSAGE_EVENT, MIC_EVENT,
    PAGE_VIEW_EVENT, ROOM_CLICK_EVENT, ROOM_VIEW_EVENT, SLIDE_THRESHOLD,
};
pub use blocks::{compose_features, parse_blocks, FeatureBlock, FeatureError, ALL_BLOCKS};
pub use config::{
    run_config_from_env, run_config_from_lookup, ConfigError, EventFilter, PipelineConfig,
    Preset, RunConfig, DEFAULT_DATA_ROOT,
};
pub use events::{
    distinct_user_ids, normalize_events, parse_timestamp, EventError, EventRecord, RawEvent,
    ACCOUNT_ID_COLUMN, ADMIN_EVENTS, APP_END_EVENT, EVENT_NAME_COLUMN, EVENT_TIME_COLUMN,
};
pub use frame::{ratio, FeatureFrame, Stats};
pub use label::{
    assign_label, build_labeled_table, next_period_ids, ChurnLabel, LabeledRow, LabeledTable,
};
pub use observability::{
    init_logging, log_app_start, logging_config_from_env, LogFormat, LoggingConfig,
    LoggingInitError,
};
pub use profile::{
    extract_profiles, ProfileSchema, UserProfile, REGISTER_DAYS_COLUMN, REGISTER_TIME_COLUMN,
};
pub use source::{
    read_csv, CsvDirectorySource, InMemoryPeriodSource, PeriodFile, PeriodFileKind,
    PeriodSource, SourceError,
};
