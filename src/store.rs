// 💾 CSV Store - Entity summaries and change history in, movements and KPIs out
//
// entities.csv: entity_id,name,created_at,stage,amount,close_date,probability
// history.csv:  entity_id,property,value,changed_at,source   (row order = ingestion order)

use crate::engine::MonthReport;
use crate::error::{Warning, WarningKind};
use crate::history::RawChangeRecord;
use crate::movement::MovementCategory;
use crate::snapshot::{parse_amount, parse_probability, CurrentState, EntitySummary};
use crate::timestamps::{parse_date, parse_instant};
use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

// ============================================================================
// LOADING
// ============================================================================

#[derive(Debug, Deserialize)]
struct EntityRow {
    #[serde(default)]
    entity_id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    created_at: String,
    #[serde(default)]
    stage: String,
    #[serde(default)]
    amount: String,
    #[serde(default)]
    close_date: String,
    #[serde(default)]
    probability: String,
}

/// Parsed entity file plus the values that had to be discarded
#[derive(Debug, Default)]
pub struct EntityLoad {
    pub entities: Vec<EntitySummary>,
    pub warnings: Vec<Warning>,
}

/// Parse an optional column, warning when a non-empty value does not parse
fn optional<T>(
    raw: &str,
    column: &str,
    entity_id: &str,
    parse: impl Fn(&str) -> Option<T>,
    warnings: &mut Vec<Warning>,
) -> Option<T> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let parsed = parse(raw);
    if parsed.is_none() {
        warnings.push(Warning::new(
            WarningKind::UnparseableValue,
            Some(entity_id),
            format!("{} '{}' could not be parsed", column, raw),
        ));
    }
    parsed
}

pub fn read_entities<R: Read>(reader: R) -> Result<EntityLoad> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut load = EntityLoad::default();

    for (line_num, result) in rdr.deserialize().enumerate() {
        let row: EntityRow = result
            .with_context(|| format!("Failed to parse entity CSV line {}", line_num + 2))?;

        if row.entity_id.is_empty() {
            load.warnings.push(Warning::new(
                WarningKind::MalformedRecord,
                None,
                format!("entity row at line {} has no entity_id", line_num + 2),
            ));
            continue;
        }

        let id = row.entity_id.as_str();
        let warnings = &mut load.warnings;
        let created_at = optional(&row.created_at, "created_at", id, parse_instant, warnings);
        let current = CurrentState {
            stage: Some(row.stage.clone()).filter(|s| !s.is_empty()),
            amount: optional(&row.amount, "amount", id, parse_amount, warnings),
            close_date: optional(&row.close_date, "close_date", id, parse_date, warnings),
            probability: optional(&row.probability, "probability", id, parse_probability, warnings),
        };

        load.entities.push(EntitySummary {
            entity_id: row.entity_id,
            name: row.name,
            created_at,
            current,
        });
    }

    Ok(load)
}

pub fn read_history<R: Read>(reader: R) -> Result<Vec<RawChangeRecord>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(reader);

    let mut records = Vec::new();
    for (line_num, result) in rdr.deserialize().enumerate() {
        let record: RawChangeRecord = result
            .with_context(|| format!("Failed to parse history CSV line {}", line_num + 2))?;
        records.push(record);
    }

    Ok(records)
}

pub fn load_entities_csv(path: &Path) -> Result<EntityLoad> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let load = read_entities(file)?;
    tracing::info!(path = %path.display(), entities = load.entities.len(), "entities loaded");
    Ok(load)
}

pub fn load_history_csv(path: &Path) -> Result<Vec<RawChangeRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file: {}", path.display()))?;
    let records = read_history(file)?;
    tracing::info!(path = %path.display(), records = records.len(), "history loaded");
    Ok(records)
}

// ============================================================================
// WRITING
// ============================================================================

#[derive(Debug, Serialize)]
struct MovementRow<'a> {
    month: String,
    entity_id: &'a str,
    entity_name: &'a str,
    movement: &'static str,
    rule: &'a str,
    start_stage: Option<&'a str>,
    end_stage: Option<&'a str>,
    start_amount: Option<String>,
    end_amount: Option<String>,
    amount_delta: Option<String>,
    amount_delta_pct: Option<String>,
    start_close_date: Option<String>,
    end_close_date: Option<String>,
    days_in_current_stage: i64,
    days_pushed: Option<i64>,
    comment: &'a str,
}

#[derive(Debug, Serialize)]
struct KpiRow {
    month: String,
    pipeline_generated_total: String,
    revenue_won_total: String,
    deals_created_count: usize,
    deals_won_count: usize,
    deals_lost_count: usize,
    win_rate: String,
    new: usize,
    won: usize,
    lost: usize,
    pushed: usize,
    advanced: usize,
    regressed: usize,
    stalled: usize,
    closed_prior: usize,
}

pub fn write_movements<W: Write>(writer: W, months: &[MonthReport]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);
    let mut rows = 0;

    for month in months {
        for record in &month.movements {
            let m = &record.movement;
            wtr.serialize(MovementRow {
                month: record.month.to_string(),
                entity_id: &record.entity_id,
                entity_name: &record.entity_name,
                movement: m.category.as_str(),
                rule: &m.rule_id,
                start_stage: record.start.stage.as_deref(),
                end_stage: record.end.stage.as_deref(),
                start_amount: m.start_amount.map(|d| d.to_string()),
                end_amount: m.end_amount.map(|d| d.to_string()),
                amount_delta: m.amount_delta.map(|d| d.to_string()),
                amount_delta_pct: m.amount_delta_pct.map(|d| d.to_string()),
                start_close_date: m.start_close_date.map(|d| d.to_string()),
                end_close_date: m.end_close_date.map(|d| d.to_string()),
                days_in_current_stage: m.days_in_current_stage,
                days_pushed: m.days_pushed,
                comment: &m.comment,
            })
            .context("Failed to write movement row")?;
            rows += 1;
        }
    }

    wtr.flush().context("Failed to flush movements")?;
    Ok(rows)
}

pub fn write_kpis<W: Write>(writer: W, months: &[MonthReport]) -> Result<usize> {
    let mut wtr = csv::Writer::from_writer(writer);

    for month in months {
        let kpi = &month.kpi;
        wtr.serialize(KpiRow {
            month: kpi.month.to_string(),
            pipeline_generated_total: kpi.pipeline_generated_total.to_string(),
            revenue_won_total: kpi.revenue_won_total.to_string(),
            deals_created_count: kpi.deals_created_count,
            deals_won_count: kpi.deals_won_count,
            deals_lost_count: kpi.deals_lost_count,
            win_rate: format!("{:.2}", kpi.win_rate),
            new: kpi.count(MovementCategory::New),
            won: kpi.count(MovementCategory::Won),
            lost: kpi.count(MovementCategory::Lost),
            pushed: kpi.count(MovementCategory::Pushed),
            advanced: kpi.count(MovementCategory::Advanced),
            regressed: kpi.count(MovementCategory::Regressed),
            stalled: kpi.count(MovementCategory::Stalled),
            closed_prior: kpi.count(MovementCategory::ClosedPrior),
        })
        .context("Failed to write KPI row")?;
    }

    wtr.flush().context("Failed to flush KPIs")?;
    Ok(months.len())
}

pub fn write_movements_csv(path: &Path, months: &[MonthReport]) -> Result<usize> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    write_movements(file, months)
}

pub fn write_kpis_csv(path: &Path, months: &[MonthReport]) -> Result<usize> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create file: {}", path.display()))?;
    write_kpis(file, months)
}

// ============================================================================
// TESTS
// ============================================================================
