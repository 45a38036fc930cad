use std::fs;
use std::io::Write;
use std::path::Path;

use churn_features::{
    run_batch, write_outputs, BatchReport, CsvDirectorySource, FeatureBlock, PeriodFileKind,
    PeriodSource, PipelineConfig, Preset, SourceError, ACCOUNT_ID_COLUMN,
};
use tempfile::tempdir;
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

const PERIOD_ONE: &str = "#account_id,#event_name,#event_time,#city,click_name\n\
                          a,click,2021-03-01 09:00:00,Hangzhou,shop\n\
                          a,push_send,2021-03-01 09:01:00,Hangzhou,\n\
                          b,click,2021-03-01 10:00:00,Wuhan,rank\n";

const PERIOD_TWO: &str = "#account_id,#event_name,#event_time,#city,click_name\n\
                          b,click,2021-03-08 09:00:00,Wuhan,shop\n\
                          c,click,2021-03-08 11:00:00,,shop\n";

fn write_zip(path: &Path, entry: &str, body: &str) {
    let file = fs::File::create(path).expect("zip file should be created");
    let mut zip = ZipWriter::new(file);
    zip.start_file(entry, SimpleFileOptions::default())
        .expect("zip entry should start");
    zip.write_all(body.as_bytes())
        .expect("zip entry should be written");
    zip.finish().expect("zip should finalize");
}

#[test]
fn lists_numeric_csv_and_zip_files_in_key_order() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("10.csv"), PERIOD_TWO).expect("write csv");
    write_zip(&dir.path().join("9.zip"), "period_9.csv", PERIOD_ONE);
    fs::write(dir.path().join("notes.csv"), "ignored").expect("write notes");
    fs::write(dir.path().join("11.json"), "{}").expect("write json");

    let source = CsvDirectorySource::new(dir.path());
    let files = source.list_files().expect("listing succeeds");

    let keys: Vec<(u64, PeriodFileKind)> = files.iter().map(|f| (f.key, f.kind)).collect();
    assert_eq!(
        keys,
        vec![(9, PeriodFileKind::Zip), (10, PeriodFileKind::Csv)]
    );
    assert_eq!(source.period_keys().expect("keys"), vec![9, 10]);

    let rows = source.load_period(9).expect("zip period loads");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get(ACCOUNT_ID_COLUMN), Some("a"));
    assert_eq!(rows[2].get("#city"), Some("Wuhan"));
}

#[test]
fn duplicate_and_missing_periods_are_errors() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("3.csv"), PERIOD_ONE).expect("write csv");

    let source = CsvDirectorySource::new(dir.path());
    assert!(matches!(
        source.load_period(4).unwrap_err(),
        SourceError::MissingPeriod(4)
    ));

    write_zip(&dir.path().join("3.zip"), "3.csv", PERIOD_ONE);
    assert!(matches!(
        source.period_keys().unwrap_err(),
        SourceError::DuplicatePeriod(3)
    ));
}

#[test]
fn zip_without_csv_entry_is_rejected() {
    let dir = tempdir().expect("tempdir");
    write_zip(&dir.path().join("1.zip"), "readme.txt", "not a period");

    let source = CsvDirectorySource::new(dir.path());
    assert!(matches!(
        source.load_period(1).unwrap_err(),
        SourceError::MissingCsvEntry { .. }
    ));
}

#[test]
fn directory_batch_writes_dataset_and_report() {
    let dir = tempdir().expect("tempdir");
    fs::write(dir.path().join("1.csv"), PERIOD_ONE).expect("write csv");
    write_zip(&dir.path().join("2.zip"), "2.csv", PERIOD_TWO);

    let source = CsvDirectorySource::new(dir.path());
    let config = PipelineConfig::for_preset(
        Preset::Baseline,
        vec![FeatureBlock::TotalEventCount, FeatureBlock::UiClicks],
    );
    let output = run_batch(&source, &config).expect("batch runs");

    let dataset_path = dir.path().join("out").join("dataset.csv");
    let report_path = dir.path().join("out").join("report.json");
    write_outputs(&output, &dataset_path, &report_path).expect("outputs written");

    let csv_text = fs::read_to_string(&dataset_path).expect("dataset readable");
    let lines: Vec<&str> = csv_text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains(",event_cnt_total,click_cnt,click_unique,"));
    assert!(lines[0].ends_with(",churn"));
    assert!(lines[1].starts_with("0,1,a,,Hangzhou,"));
    assert!(lines[1].ends_with(",1"));
    assert!(lines[2].starts_with("1,1,b,,Wuhan,"));
    assert!(lines[2].ends_with(",0"));
    assert_eq!(
        csv_text.as_bytes(),
        output.dataset.to_csv_bytes().expect("csv renders").as_slice()
    );

    let report: BatchReport =
        serde_json::from_slice(&fs::read(&report_path).expect("report readable"))
            .expect("report parses");
    assert_eq!(report, output.report);
    assert_eq!(report.period_keys, vec![1, 2]);
    assert_eq!(report.pairs[0].churned, 1);
}
