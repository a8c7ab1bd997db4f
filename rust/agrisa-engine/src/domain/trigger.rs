//! Trigger and condition definitions
//!
//! A trigger is the boolean expression over conditions that, when true,
//! yields a claim. Each condition is a measurement-aggregation-threshold
//! tuple tied to one data source.

use crate::domain::ids::{BasePolicyId, ConditionId, DataSourceId, TriggerId};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};

/// Boolean combination across conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogicalOperator {
    And,
    Or,
}

/// Monitoring cadence unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalUnit {
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl IntervalUnit {
    /// Duration of `count` units, in seconds
    ///
    /// Months and years use the civil approximations 30 and 365 days.
    pub fn seconds(&self, count: u32) -> i64 {
        let unit = match self {
            IntervalUnit::Hour => 3_600,
            IntervalUnit::Day => 86_400,
            IntervalUnit::Week => 7 * 86_400,
            IntervalUnit::Month => 30 * 86_400,
            IntervalUnit::Year => 365 * 86_400,
        };
        unit * i64::from(count)
    }
}

/// Calendar interval during which triggers do not evaluate
///
/// Endpoints are "MM-DD" strings and the interval may wrap the year end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutPeriod {
    pub start: String,
    pub end: String,
}

impl BlackoutPeriod {
    /// Whether the given "MM-DD" day falls inside the period
    ///
    /// Non-wrapping: start <= day <= end. Wrapping (start > end):
    /// day >= start or day <= end. "MM-DD" strings compare correctly
    /// lexicographically because both fields are zero-padded.
    pub fn contains(&self, month_day: &str) -> bool {
        if self.start <= self.end {
            self.start.as_str() <= month_day && month_day <= self.end.as_str()
        } else {
            month_day >= self.start.as_str() || month_day <= self.end.as_str()
        }
    }

    /// Validate both endpoints as zero-padded "MM-DD"
    pub fn validate(&self) -> EngineResult<()> {
        for endpoint in [&self.start, &self.end] {
            let valid = endpoint.len() == 5
                && endpoint.as_bytes()[2] == b'-'
                && endpoint[..2].parse::<u32>().map_or(false, |m| (1..=12).contains(&m))
                && endpoint[3..].parse::<u32>().map_or(false, |d| (1..=31).contains(&d));
            if !valid {
                return Err(EngineError::Validation(format!(
                    "blackout endpoint {:?} is not MM-DD",
                    endpoint
                )));
            }
        }
        Ok(())
    }
}

/// Monitoring trigger attached to a base policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyTrigger {
    pub id: TriggerId,
    pub base_policy_id: BasePolicyId,
    pub logical_operator: LogicalOperator,
    /// Positive monitoring interval count
    pub monitor_interval: u32,
    pub interval_unit: IntervalUnit,
    pub blackout_periods: Vec<BlackoutPeriod>,
}

impl PolicyTrigger {
    /// Monitoring cadence in seconds
    pub fn cadence_seconds(&self) -> i64 {
        self.interval_unit.seconds(self.monitor_interval)
    }

    /// Validate interval and blackout endpoints
    pub fn validate(&self) -> EngineResult<()> {
        if self.monitor_interval == 0 {
            return Err(EngineError::Validation(
                "monitor_interval must be positive".to_string(),
            ));
        }
        for period in &self.blackout_periods {
            period.validate()?;
        }
        Ok(())
    }

    /// Whether the given "MM-DD" day is blacked out
    pub fn in_blackout(&self, month_day: &str) -> bool {
        self.blackout_periods.iter().any(|p| p.contains(month_day))
    }
}

/// Comparison applied to (aggregated value, threshold)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdOperator {
    Lt,
    Lte,
    Gt,
    Gte,
    Eq,
    Ne,
    /// Change since baseline greater than threshold
    ChangeGt,
    /// Change since baseline less than threshold
    ChangeLt,
}

impl ThresholdOperator {
    /// Apply the comparison
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            ThresholdOperator::Lt | ThresholdOperator::ChangeLt => value < threshold,
            ThresholdOperator::Lte => value <= threshold,
            ThresholdOperator::Gt | ThresholdOperator::ChangeGt => value > threshold,
            ThresholdOperator::Gte => value >= threshold,
            ThresholdOperator::Eq => (value - threshold).abs() < f64::EPSILON,
            ThresholdOperator::Ne => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    /// How far past the threshold the measurement landed, in the
    /// operator's direction; 0 for equality operators
    pub fn overshoot(&self, measured: f64, threshold: f64) -> f64 {
        match self {
            ThresholdOperator::Gt | ThresholdOperator::Gte | ThresholdOperator::ChangeGt => {
                measured - threshold
            }
            ThresholdOperator::Lt | ThresholdOperator::Lte | ThresholdOperator::ChangeLt => {
                threshold - measured
            }
            ThresholdOperator::Eq | ThresholdOperator::Ne => 0.0,
        }
    }

    /// Whether the operator measures change relative to a baseline
    pub fn is_change(&self) -> bool {
        matches!(self, ThresholdOperator::ChangeGt | ThresholdOperator::ChangeLt)
    }
}

/// Aggregation applied over a window of measurements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregateFunction {
    Sum,
    Avg,
    Min,
    Max,
    /// Last minus first; 0 with fewer than 2 points
    Change,
}

impl AggregateFunction {
    /// Aggregate values ordered by ascending timestamp; empty input yields 0
    pub fn apply(&self, values: &[f64]) -> f64 {
        if values.is_empty() {
            return 0.0;
        }
        match self {
            AggregateFunction::Sum => values.iter().sum(),
            AggregateFunction::Avg => values.iter().sum::<f64>() / values.len() as f64,
            AggregateFunction::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            AggregateFunction::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            AggregateFunction::Change => {
                if values.len() < 2 {
                    0.0
                } else {
                    values[values.len() - 1] - values[0]
                }
            }
        }
    }
}

/// Cached cost components copied from the data source at condition creation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConditionCost {
    pub base_cost: f64,
    pub tier_multiplier: f64,
    pub category_multiplier: f64,
    pub calculated_cost: f64,
}

/// One term of a trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerCondition {
    pub id: ConditionId,
    pub trigger_id: TriggerId,
    /// Stable sort key for deterministic evaluation order
    pub condition_order: u32,
    pub data_source_id: DataSourceId,
    pub threshold_value: f64,
    pub threshold_operator: ThresholdOperator,
    pub aggregate_function: AggregateFunction,
    pub aggregation_window_days: u32,
    /// Window within which the aggregated value must be observed; also the
    /// minimum streak length when `consecutive_required` is set
    pub validation_window_days: u32,
    pub consecutive_required: bool,
    pub baseline_window_days: Option<u32>,
    pub baseline_function: Option<AggregateFunction>,
    /// Softer threshold that raises a signal without satisfying the trigger
    pub early_warning_threshold: Option<f64>,
    pub cost: ConditionCost,
}

impl TriggerCondition {
    /// Validate structural invariants
    pub fn validate(&self) -> EngineResult<()> {
        if self.aggregation_window_days == 0 {
            return Err(EngineError::Validation(
                "aggregation_window_days must be positive".to_string(),
            ));
        }
        if self.baseline_window_days.is_some() != self.baseline_function.is_some() {
            return Err(EngineError::Validation(
                "baseline window and baseline function must be set together".to_string(),
            ));
        }
        if let Some(days) = self.baseline_window_days {
            if days == 0 {
                return Err(EngineError::Validation(
                    "baseline_window_days must be positive when set".to_string(),
                ));
            }
        }
        if self.cost.base_cost < 0.0 {
            return Err(EngineError::Validation(
                "base_cost cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a baseline is configured
    pub fn has_baseline(&self) -> bool {
        self.baseline_window_days.is_some() && self.baseline_function.is_some()
    }
}
