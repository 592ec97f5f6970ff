use apex_survival::{
    init_logging, log_app_start, log_run_configured, logging_config_from_env,
    pipeline_config_from_env, run_pipeline,
};

const DEFAULT_RAW_FILE: &str = "Apex_Game_History_Season15S1.csv";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logging_cfg = logging_config_from_env();
    init_logging(&logging_cfg)?;
    log_app_start(&logging_cfg);

    let cfg = pipeline_config_from_env();
    let raw_file = std::env::var("APEX_RAW_FILE")
        .ok()
        .filter(|raw| !raw.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_RAW_FILE.to_string());

    log_run_configured(
        &cfg.raw_dir.join(&raw_file),
        &cfg.output_path(),
        &cfg.target_column,
    );

    let summary = run_pipeline(&cfg, &raw_file)?;
    println!("{summary}");

    Ok(())
}
