use churn_features::{
    init_logging, log_app_start, logging_config_from_env, run_batch, run_config_from_env,
    write_outputs, CsvDirectorySource,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;

    let run_cfg = run_config_from_env()?;
    log_app_start(&logging_cfg, &run_cfg);

    let source = CsvDirectorySource::new(&run_cfg.data_root);
    let output = run_batch(&source, &run_cfg.pipeline)?;
    write_outputs(&output, &run_cfg.output_path, &run_cfg.report_path)?;

    println!(
        "Wrote {} rows from {} period pairs to {}",
        output.dataset.rows.len(),
        output.report.pairs.len(),
        run_cfg.output_path.display()
    );
    for pair in &output.report.pairs {
        let churn_rate = match pair.churn_rate {
            Some(rate) => format!("{rate:.4}"),
            None => "n/a".to_string(),
        };
        println!(
            "  {} -> {} | rows={} churned={} churn_rate={}",
            pair.period_key, pair.next_period_key, pair.rows, pair.churned, churn_rate
        );
    }

    Ok(())
}
