// 📊 KPI Aggregator - Monthly pipeline figures
//
// A fold over per-entity contributions. `add` and `merge` are commutative and
// associative (exact decimal sums, integer counts), so the result never depends
// on entity order or on how a parallel run split the work.

use crate::movement::MovementCategory;
use crate::window::MonthKey;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyKpi {
    pub month: MonthKey,

    /// Sum of current amounts of entities created this month
    pub pipeline_generated_total: Decimal,

    /// Sum of end-of-month amounts of entities classified WON
    pub revenue_won_total: Decimal,

    pub deals_created_count: usize,
    pub deals_won_count: usize,
    pub deals_lost_count: usize,

    /// won / created × 100; 0 when nothing was created
    pub win_rate: f64,

    pub movement_counts: BTreeMap<MovementCategory, usize>,
}

impl MonthlyKpi {
    pub fn count(&self, category: MovementCategory) -> usize {
        self.movement_counts.get(&category).copied().unwrap_or(0)
    }
}

/// One entity's contribution to a month
#[derive(Debug, Clone, PartialEq)]
pub struct KpiInput {
    pub created_in_month: bool,

    /// Amount credited to pipeline generation when created this month
    pub created_amount: Option<Decimal>,

    /// None when the entity has no movement this month (skipped as unchanged)
    pub category: Option<MovementCategory>,

    pub end_amount: Option<Decimal>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KpiAccumulator {
    pipeline_generated_total: Decimal,
    revenue_won_total: Decimal,
    created: usize,
    won: usize,
    lost: usize,
    movement_counts: BTreeMap<MovementCategory, usize>,
}

impl KpiAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_created(&mut self, amount: Option<Decimal>) {
        self.created += 1;
        self.pipeline_generated_total += amount.unwrap_or(Decimal::ZERO);
    }

    pub fn add_movement(&mut self, category: MovementCategory, end_amount: Option<Decimal>) {
        *self.movement_counts.entry(category).or_insert(0) += 1;
        match category {
            MovementCategory::Won => {
                self.won += 1;
                self.revenue_won_total += end_amount.unwrap_or(Decimal::ZERO);
            }
            MovementCategory::Lost => self.lost += 1,
            _ => {}
        }
    }

    pub fn add(&mut self, input: &KpiInput) {
        if input.created_in_month {
            self.add_created(input.created_amount);
        }
        if let Some(category) = input.category {
            self.add_movement(category, input.end_amount);
        }
    }

    /// Combine two partial folds
    pub fn merge(mut self, other: KpiAccumulator) -> KpiAccumulator {
        self.pipeline_generated_total += other.pipeline_generated_total;
        self.revenue_won_total += other.revenue_won_total;
        self.created += other.created;
        self.won += other.won;
        self.lost += other.lost;
        for (category, count) in other.movement_counts {
            *self.movement_counts.entry(category).or_insert(0) += count;
        }
        self
    }

    pub fn finish(self, month: MonthKey) -> MonthlyKpi {
        let win_rate = if self.created == 0 {
            0.0
        } else {
            self.won as f64 / self.created as f64 * 100.0
        };

        MonthlyKpi {
            month,
            pipeline_generated_total: self.pipeline_generated_total,
            revenue_won_total: self.revenue_won_total,
            deals_created_count: self.created,
            deals_won_count: self.won,
            deals_lost_count: self.lost,
            win_rate,
            movement_counts: self.movement_counts,
        }
    }
}

/// Fold a month's contributions into its KPI record
pub fn aggregate<'a, I>(month: MonthKey, inputs: I) -> MonthlyKpi
where
    I: IntoIterator<Item = &'a KpiInput>,
{
    let mut acc = KpiAccumulator::new();
    for input in inputs {
        acc.add(input);
    }
    acc.finish(month)
}

// ============================================================================
// TESTS
// ============================================================================
