use anyhow::{bail, Context, Result};
use std::env;
use std::fs;
use std::path::Path;
use tracing_subscriber::EnvFilter;

use deal_timeline::{
    load_entities_csv, load_history_csv, write_kpis_csv, write_movements_csv, AnalysisEngine,
    EngineConfig, MonthKey,
};

const USAGE: &str =
    "usage: deal-timeline <config.json> <entities.csv> <history.csv> <from YYYY-MM> <to YYYY-MM> [out_dir]";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 6 || args.len() > 7 {
        bail!("{}", USAGE);
    }

    run(&args[1..])
}

fn run(args: &[String]) -> Result<()> {
    let config = EngineConfig::from_file(&args[0])?;
    let engine = AnalysisEngine::from_config(&config)?;

    let from: MonthKey = args[3].parse().context("Invalid <from> month")?;
    let to: MonthKey = args[4].parse().context("Invalid <to> month")?;
    let windows = engine.windows(from, to)?;

    // 1. Load
    let load = load_entities_csv(Path::new(&args[1]))?;
    for warning in &load.warnings {
        tracing::warn!("{}", warning.summary());
    }
    let records = load_history_csv(Path::new(&args[2]))?;

    // 2. Analyze
    let report = engine.analyze(&load.entities, records, &windows);

    for month in &report.months {
        let kpi = &month.kpi;
        tracing::info!(
            month = %kpi.month,
            movements = month.movements.len(),
            created = kpi.deals_created_count,
            won = kpi.deals_won_count,
            lost = kpi.deals_lost_count,
            pipeline = %kpi.pipeline_generated_total,
            revenue = %kpi.revenue_won_total,
            win_rate = kpi.win_rate,
            "monthly summary"
        );
    }
    for failure in &report.failures {
        tracing::error!(entity_id = %failure.entity_id, month = %failure.month, "{}", failure.error);
    }

    // 3. Export
    if let Some(out_dir) = args.get(5) {
        let out_dir = Path::new(out_dir);
        fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create output directory: {}", out_dir.display()))?;

        let rows = write_movements_csv(&out_dir.join("movements.csv"), &report.months)?;
        write_kpis_csv(&out_dir.join("kpis.csv"), &report.months)?;
        tracing::info!(rows, dir = %out_dir.display(), "results written");
    }

    tracing::info!("{}", report.summary());
    Ok(())
}
