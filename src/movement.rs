// 🏷️ Movement Classifier - Rules as Data
//
// (start_state, end_state) → one movement category. The cascade is an ordered
// list of predicate → category rules; the first rule that matches wins and no
// later rule is evaluated. The rule list itself is inspectable and testable.

use crate::snapshot::EntityState;
use crate::topology::StageTopology;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// CATEGORY
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementCategory {
    New,
    Won,
    Lost,
    Pushed,
    Advanced,
    Regressed,
    Stalled,
    ClosedPrior,
}

impl MovementCategory {
    pub const ALL: [MovementCategory; 8] = [
        MovementCategory::New,
        MovementCategory::Won,
        MovementCategory::Lost,
        MovementCategory::Pushed,
        MovementCategory::Advanced,
        MovementCategory::Regressed,
        MovementCategory::Stalled,
        MovementCategory::ClosedPrior,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MovementCategory::New => "NEW",
            MovementCategory::Won => "WON",
            MovementCategory::Lost => "LOST",
            MovementCategory::Pushed => "PUSHED",
            MovementCategory::Advanced => "ADVANCED",
            MovementCategory::Regressed => "REGRESSED",
            MovementCategory::Stalled => "STALLED",
            MovementCategory::ClosedPrior => "CLOSED_PRIOR",
        }
    }
}

impl fmt::Display for MovementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// MOVEMENT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Movement {
    pub category: MovementCategory,

    /// Id of the rule that produced the category
    pub rule_id: String,

    /// end.amount − start.amount; an absent start counts as 0 for entities
    /// that did not exist at window start
    pub amount_delta: Option<Decimal>,

    /// amount_delta / start.amount × 100, None when start is absent or zero
    pub amount_delta_pct: Option<Decimal>,

    pub days_in_current_stage: i64,

    /// Whole days the target close date slipped into the future
    pub days_pushed: Option<i64>,

    pub comment: String,

    pub start_amount: Option<Decimal>,
    pub end_amount: Option<Decimal>,
    pub start_close_date: Option<chrono::NaiveDate>,
    pub end_close_date: Option<chrono::NaiveDate>,
}

// ============================================================================
// RULES
// ============================================================================

/// What every rule predicate sees
pub struct RuleInput<'a> {
    pub start: &'a EntityState,
    pub end: &'a EntityState,
    pub topology: &'a StageTopology,
}

impl<'a> RuleInput<'a> {
    fn start_stage(&self) -> Option<&'a str> {
        self.start.stage.as_deref()
    }

    fn end_stage(&self) -> Option<&'a str> {
        self.end.stage.as_deref()
    }

    fn is_won(&self, stage: Option<&str>) -> bool {
        stage.map_or(false, |s| self.topology.is_won(s))
    }

    fn is_lost(&self, stage: Option<&str>) -> bool {
        stage.map_or(false, |s| self.topology.is_lost(s))
    }

    /// Pipeline positions of both stages when both are open
    fn open_positions(&self) -> Option<(usize, usize)> {
        let (start, end) = (self.start_stage()?, self.end_stage()?);
        if !self.topology.is_open(start) || !self.topology.is_open(end) {
            return None;
        }
        Some((self.topology.position(start)?, self.topology.position(end)?))
    }

    fn days_pushed(&self) -> Option<i64> {
        let (start, end) = (self.start.target_close_date?, self.end.target_close_date?);
        (end > start).then(|| (end - start).num_days())
    }
}

#[derive(Clone)]
pub struct MovementRule {
    /// Rule ID for tracking
    pub id: &'static str,

    pub category: MovementCategory,

    pub description: &'static str,

    pub matches: fn(&RuleInput) -> bool,
}

impl fmt::Debug for MovementRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MovementRule")
            .field("id", &self.id)
            .field("category", &self.category)
            .finish()
    }
}

/// The standard cascade, highest priority first
pub fn default_rules() -> Vec<MovementRule> {
    vec![
        MovementRule {
            id: "won",
            category: MovementCategory::Won,
            description: "ends in a won stage it was not already in",
            matches: |i| i.is_won(i.end_stage()) && !i.is_won(i.start_stage()),
        },
        MovementRule {
            id: "lost",
            category: MovementCategory::Lost,
            description: "ends in a lost stage it was not already in",
            matches: |i| i.is_lost(i.end_stage()) && !i.is_lost(i.start_stage()),
        },
        MovementRule {
            id: "new",
            category: MovementCategory::New,
            description: "did not exist at window start",
            matches: |i| i.start_stage().is_none(),
        },
        MovementRule {
            id: "closed_prior",
            category: MovementCategory::ClosedPrior,
            description: "stage unresolvable at window end",
            matches: |i| i.end_stage().is_none(),
        },
        MovementRule {
            id: "pushed",
            category: MovementCategory::Pushed,
            description: "target close date moved later",
            matches: |i| i.days_pushed().is_some(),
        },
        MovementRule {
            id: "advanced",
            category: MovementCategory::Advanced,
            description: "moved forward between open pipeline stages",
            matches: |i| i.open_positions().map_or(false, |(s, e)| e > s),
        },
        MovementRule {
            id: "regressed",
            category: MovementCategory::Regressed,
            description: "moved backward between open pipeline stages",
            matches: |i| i.open_positions().map_or(false, |(s, e)| e < s),
        },
        MovementRule {
            id: "stalled",
            category: MovementCategory::Stalled,
            description: "same stage at both instants",
            matches: |i| i.start_stage() == i.end_stage(),
        },
        MovementRule {
            id: "reopened",
            category: MovementCategory::ClosedPrior,
            description: "left a terminal stage for another stage",
            matches: |i| i.start_stage().map_or(false, |s| i.topology.is_terminal(s)),
        },
        MovementRule {
            id: "unpositioned_change",
            category: MovementCategory::Stalled,
            description: "stage changed but has no comparable pipeline position",
            matches: |_| true,
        },
    ]
}

// ============================================================================
// CLASSIFIER
// ============================================================================

#[derive(Debug, Clone)]
pub struct MovementClassifier {
    rules: Vec<MovementRule>,
}

impl Default for MovementClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl MovementClassifier {
    pub fn new() -> Self {
        MovementClassifier { rules: default_rules() }
    }

    pub fn rules(&self) -> &[MovementRule] {
        &self.rules
    }

    /// First matching rule, or None when the rule list is exhausted
    pub fn first_match(&self, input: &RuleInput) -> Option<&MovementRule> {
        self.rules.iter().find(|rule| (rule.matches)(input))
    }

    /// Classify one entity's month. Total over valid states.
    pub fn classify(
        &self,
        start: &EntityState,
        end: &EntityState,
        topology: &StageTopology,
    ) -> Movement {
        let input = RuleInput { start, end, topology };

        let (category, rule_id) = match self.first_match(&input) {
            Some(rule) => (rule.category, rule.id),
            None => (MovementCategory::Stalled, "unpositioned_change"),
        };

        let days_in_current_stage = days_in_stage(end.stage_since, end.as_of);
        let days_pushed = input.days_pushed();
        let (amount_delta, amount_delta_pct) = amount_change(start, end);

        Movement {
            category,
            rule_id: rule_id.to_string(),
            amount_delta,
            amount_delta_pct,
            days_in_current_stage,
            days_pushed,
            comment: comment(&input, category, rule_id, days_in_current_stage, days_pushed),
            start_amount: start.amount,
            end_amount: end.amount,
            start_close_date: start.target_close_date,
            end_close_date: end.target_close_date,
        }
    }
}

// ============================================================================
// DERIVED FIELDS
// ============================================================================

fn days_in_stage(stage_since: Option<DateTime<Utc>>, as_of: DateTime<Utc>) -> i64 {
    stage_since.map_or(0, |since| (as_of - since).num_days().max(0))
}

fn amount_change(start: &EntityState, end: &EntityState) -> (Option<Decimal>, Option<Decimal>) {
    let delta = if start.is_absent() {
        Some(end.amount.unwrap_or(Decimal::ZERO) - start.amount.unwrap_or(Decimal::ZERO))
    } else {
        match (start.amount, end.amount) {
            (Some(s), Some(e)) => Some(e - s),
            _ => None,
        }
    };

    let pct = match (delta, start.amount) {
        (Some(delta), Some(base)) if !base.is_zero() => delta
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|scaled| scaled.checked_div(base))
            .map(|pct| pct.round_dp(2)),
        _ => None,
    };

    (delta, pct)
}

fn comment(
    input: &RuleInput,
    category: MovementCategory,
    rule_id: &str,
    days_in_stage: i64,
    days_pushed: Option<i64>,
) -> String {
    let name = |stage: Option<&str>| match stage {
        Some(s) => input.topology.stage_name(s),
        None => "(none)".to_string(),
    };
    let from = name(input.start_stage());
    let to = name(input.end_stage());
    let created = input.start_stage().is_none();

    match category {
        MovementCategory::Won if created => format!("created and won: {}", to),
        MovementCategory::Lost if created => format!("created and lost: {}", to),
        MovementCategory::Won | MovementCategory::Lost | MovementCategory::Advanced => {
            format!("{} → {}", from, to)
        }
        MovementCategory::New => match input.end_stage() {
            Some(_) => format!("created in stage {}", to),
            None => "created, stage unknown at month end".to_string(),
        },
        MovementCategory::ClosedPrior if input.end_stage().is_none() => {
            "stage unresolvable at month end".to_string()
        }
        MovementCategory::ClosedPrior => format!("reopened: {} → {}", from, to),
        MovementCategory::Pushed => format!(
            "close date pushed {} days, {} days in stage '{}'",
            days_pushed.unwrap_or(0),
            days_in_stage,
            to
        ),
        MovementCategory::Regressed => format!("regressed: {} → {}", from, to),
        MovementCategory::Stalled if rule_id == "unpositioned_change" => {
            format!("{} → {} (no pipeline position)", from, to)
        }
        MovementCategory::Stalled => {
            format!("no movement, {} days in stage '{}'", days_in_stage, to)
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
