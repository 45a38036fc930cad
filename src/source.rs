//! Period file sources.
//!
//! A period file is named by its numeric key (`17.csv`, `18.zip`) and holds a
//! headered CSV of raw event rows. Zip archives carry a single CSV entry.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use zip::ZipArchive;

use crate::events::RawEvent;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("no period file for key {0}")]
    MissingPeriod(u64),
    #[error("period {0} exists as both csv and zip")]
    DuplicatePeriod(u64),
    #[error("archive at {path} has no entries")]
    EmptyZipArchive { path: PathBuf },
    #[error("archive at {path} has no CSV entry")]
    MissingCsvEntry { path: PathBuf },
}

/// Supplies period keys and their raw rows.
pub trait PeriodSource {
    /// Available keys in ascending order.
    fn period_keys(&self) -> Result<Vec<u64>, SourceError>;

    fn load_period(&self, key: u64) -> Result<Vec<RawEvent>, SourceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodFileKind {
    Csv,
    Zip,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodFile {
    pub key: u64,
    pub kind: PeriodFileKind,
    pub path: PathBuf,
}

/// Reads `<key>.csv` / `<key>.zip` files from one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvDirectorySource {
    root: PathBuf,
}

impl CsvDirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Period files in the directory, sorted by key.
    pub fn list_files(&self) -> Result<Vec<PeriodFile>, SourceError> {
        let mut by_key: BTreeMap<u64, PeriodFile> = BTreeMap::new();

        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(file) = period_file(&path) else {
                debug!(
                    component = "source",
                    event = "source.file.ignored",
                    path = %path.display()
                );
                continue;
            };
            if by_key.contains_key(&file.key) {
                return Err(SourceError::DuplicatePeriod(file.key));
            }
            by_key.insert(file.key, file);
        }

        info!(
            component = "source",
            event = "source.listed",
            root = %self.root.display(),
            periods = by_key.len()
        );

        Ok(by_key.into_values().collect())
    }
}

impl PeriodSource for CsvDirectorySource {
    fn period_keys(&self) -> Result<Vec<u64>, SourceError> {
        Ok(self.list_files()?.into_iter().map(|f| f.key).collect())
    }

    fn load_period(&self, key: u64) -> Result<Vec<RawEvent>, SourceError> {
        let file = self
            .list_files()?
            .into_iter()
            .find(|f| f.key == key)
            .ok_or(SourceError::MissingPeriod(key))?;

        let rows = match file.kind {
            PeriodFileKind::Csv => read_csv(fs::File::open(&file.path)?)?,
            PeriodFileKind::Zip => read_csv(Cursor::new(read_zip_csv(&file.path)?))?,
        };

        info!(
            component = "source",
            event = "source.period.loaded",
            period = key,
            path = %file.path.display(),
            rows = rows.len()
        );
        Ok(rows)
    }
}

/// Fixed period data held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPeriodSource {
    periods: BTreeMap<u64, Vec<RawEvent>>,
}

impl InMemoryPeriodSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_period(mut self, key: u64, rows: Vec<RawEvent>) -> Self {
        self.periods.insert(key, rows);
        self
    }
}

impl PeriodSource for InMemoryPeriodSource {
    fn period_keys(&self) -> Result<Vec<u64>, SourceError> {
        Ok(self.periods.keys().copied().collect())
    }

    fn load_period(&self, key: u64) -> Result<Vec<RawEvent>, SourceError> {
        self.periods
            .get(&key)
            .cloned()
            .ok_or(SourceError::MissingPeriod(key))
    }
}

/// Parses a headered CSV into raw rows keyed by header name.
pub fn read_csv(reader: impl Read) -> Result<Vec<RawEvent>, SourceError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);
    let headers = reader.headers()?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push(RawEvent::from_pairs(headers.iter().zip(record.iter())));
    }
    Ok(rows)
}

fn period_file(path: &Path) -> Option<PeriodFile> {
    let stem = path.file_stem()?.to_str()?;
    if stem.is_empty() || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let key = stem.parse::<u64>().ok()?;
    let kind = match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
        "csv" => PeriodFileKind::Csv,
        "zip" => PeriodFileKind::Zip,
        _ => return None,
    };
    Some(PeriodFile {
        key,
        kind,
        path: path.to_path_buf(),
    })
}

fn read_zip_csv(path: &Path) -> Result<Vec<u8>, SourceError> {
    let file = fs::File::open(path)?;
    let mut zip = ZipArchive::new(file)?;
    if zip.is_empty() {
        return Err(SourceError::EmptyZipArchive {
            path: path.to_path_buf(),
        });
    }

    for idx in 0..zip.len() {
        let mut entry = zip.by_index(idx)?;
        if entry.is_dir() || !entry.name().to_ascii_lowercase().ends_with(".csv") {
            continue;
        }
        let mut buf = Vec::new();
        entry.read_to_end(&mut buf)?;
        return Ok(buf);
    }

    Err(SourceError::MissingCsvEntry {
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ACCOUNT_ID_COLUMN, EVENT_NAME_COLUMN};

    #[test]
    fn period_file_names_must_be_numeric() {
        let csv = period_file(Path::new("/data/17.csv")).expect("numeric csv");
        assert_eq!(csv.key, 17);
        assert_eq!(csv.kind, PeriodFileKind::Csv);
        assert_eq!(
            period_file(Path::new("/data/003.ZIP")).map(|f| (f.key, f.kind)),
            Some((3, PeriodFileKind::Zip))
        );
        assert!(period_file(Path::new("/data/report.json")).is_none());
        assert!(period_file(Path::new("/data/17a.csv")).is_none());
        assert!(period_file(Path::new("/data/17.txt")).is_none());
    }

    #[test]
    fn read_csv_maps_headers_to_values() {
        let body = "#account_id,#event_name,#event_time,tab\n\
                    u1,room_view,2021-03-01 10:00:00,wolf\n\
                    ,click,2021-03-01 10:00:01,\n";
        let rows = read_csv(body.as_bytes()).expect("csv parses");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get(ACCOUNT_ID_COLUMN), Some("u1"));
        assert_eq!(rows[0].get("tab"), Some("wolf"));
        assert_eq!(rows[1].get(ACCOUNT_ID_COLUMN), Some(""));
        assert_eq!(rows[1].get(EVENT_NAME_COLUMN), Some("click"));
    }

    #[test]
    fn in_memory_source_reports_missing_periods() {
        let source = InMemoryPeriodSource::new().with_period(2, Vec::new());
        assert_eq!(source.period_keys().unwrap(), vec![2]);
        assert!(matches!(
            source.load_period(3).unwrap_err(),
            SourceError::MissingPeriod(3)
        ));
    }
}
