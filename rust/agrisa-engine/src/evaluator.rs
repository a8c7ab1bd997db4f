//! Trigger evaluation over merged monitoring data
//!
//! Pure computation: takes the trigger, its conditions and the merged
//! historical + freshly fetched record sets, and decides whether the
//! boolean expression holds. No I/O happens here.

use crate::domain::{
    ConditionId, FarmMonitoringData, LogicalOperator, PolicyTrigger, ThresholdOperator,
    TriggerCondition,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

const DAY_SECONDS: i64 = 86_400;
const STREAK_GAP_SECONDS: i64 = 48 * 3_600;

/// One condition that evaluated true (or crossed its early-warning line)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredCondition {
    pub condition_id: ConditionId,
    pub parameter_name: String,
    /// Aggregated value, baseline-adjusted for change operators
    pub measured_value: f64,
    pub threshold_value: f64,
    pub operator: ThresholdOperator,
    /// Latest contributing measurement, unix seconds
    pub timestamp: i64,
    pub baseline_value: Option<f64>,
    pub consecutive_days: u32,
    pub is_early_warning: bool,
    pub early_warning_threshold: Option<f64>,
}

/// Result of evaluating one trigger
#[derive(Debug, Clone, Default)]
pub struct EvaluationOutcome {
    /// Whether the boolean expression over conditions holds
    pub satisfied: bool,
    /// Skipped because the evaluation date fell in a blackout period
    pub blackout: bool,
    /// Satisfied conditions plus early-warning entries, empty unless satisfied
    pub triggered: Vec<TriggeredCondition>,
    /// Early-warning crossings, surfaced even when the trigger is not satisfied
    pub early_warnings: Vec<TriggeredCondition>,
}

/// Stateless trigger evaluator
#[derive(Default, Clone, Copy)]
pub struct TriggerEvaluator;

impl TriggerEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate a trigger against merged record sets
    pub fn evaluate(
        &self,
        trigger: &PolicyTrigger,
        conditions: &[TriggerCondition],
        fetched: &[FarmMonitoringData],
        historical: &[FarmMonitoringData],
        coverage_start: i64,
        now: DateTime<Utc>,
    ) -> EvaluationOutcome {
        let month_day = now.format("%m-%d").to_string();
        if trigger.in_blackout(&month_day) {
            tracing::info!(
                trigger_id = %trigger.id,
                %month_day,
                "trigger evaluation skipped: blackout period"
            );
            return EvaluationOutcome {
                blackout: true,
                ..Default::default()
            };
        }

        // Merge by record id so a record fetched twice counts once
        let mut merged: HashMap<Uuid, &FarmMonitoringData> = HashMap::new();
        for record in historical.iter().chain(fetched.iter()) {
            merged.insert(record.id, record);
        }
        let mut by_condition: HashMap<ConditionId, Vec<&FarmMonitoringData>> = HashMap::new();
        for record in merged.into_values() {
            by_condition
                .entry(record.condition_id)
                .or_default()
                .push(record);
        }
        for records in by_condition.values_mut() {
            records.sort_by_key(|r| r.timestamp);
        }

        let mut ordered: Vec<&TriggerCondition> = conditions.iter().collect();
        ordered.sort_by_key(|c| c.condition_order);

        let mut satisfied_entries = Vec::new();
        let mut early_warnings = Vec::new();
        let mut verdicts = Vec::new();

        for condition in ordered {
            let records = by_condition
                .get(&condition.id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let verdict = self.evaluate_condition(condition, records, coverage_start, now);
            match verdict {
                ConditionVerdict::Satisfied(entry) => {
                    satisfied_entries.push(entry);
                    verdicts.push(true);
                }
                ConditionVerdict::EarlyWarning(entry) => {
                    tracing::warn!(
                        condition_id = %entry.condition_id,
                        parameter = %entry.parameter_name,
                        measured = entry.measured_value,
                        warning_threshold = ?entry.early_warning_threshold,
                        "early warning threshold crossed"
                    );
                    early_warnings.push(entry);
                    verdicts.push(false);
                }
                ConditionVerdict::Unsatisfied => verdicts.push(false),
            }
        }

        // AND/OR over an empty condition list is false
        let satisfied = match trigger.logical_operator {
            LogicalOperator::And => !verdicts.is_empty() && verdicts.iter().all(|v| *v),
            LogicalOperator::Or => verdicts.iter().any(|v| *v),
        };

        let triggered = if satisfied {
            let mut triggered = satisfied_entries;
            triggered.extend(early_warnings.iter().cloned());
            triggered
        } else {
            Vec::new()
        };

        EvaluationOutcome {
            satisfied,
            blackout: false,
            triggered,
            early_warnings,
        }
    }

    fn evaluate_condition(
        &self,
        condition: &TriggerCondition,
        records: &[&FarmMonitoringData],
        coverage_start: i64,
        now: DateTime<Utc>,
    ) -> ConditionVerdict {
        let now_ts = now.timestamp();
        let window_start =
            coverage_start.max(now_ts - i64::from(condition.aggregation_window_days) * DAY_SECONDS);
        let window: Vec<&FarmMonitoringData> = records
            .iter()
            .copied()
            .filter(|r| r.timestamp >= window_start)
            .collect();

        let values: Vec<f64> = window.iter().map(|r| r.value).collect();
        let aggregated = condition.aggregate_function.apply(&values);

        let baseline_value = condition.baseline_window_days.and_then(|baseline_days| {
            let baseline_fn = condition.baseline_function?;
            let agg_secs = i64::from(condition.aggregation_window_days) * DAY_SECONDS;
            let baseline_start = now_ts - agg_secs - i64::from(baseline_days) * DAY_SECONDS;
            let baseline_end = now_ts - agg_secs;
            let baseline_values: Vec<f64> = records
                .iter()
                .filter(|r| r.timestamp >= baseline_start && r.timestamp < baseline_end)
                .map(|r| r.value)
                .collect();
            Some(baseline_fn.apply(&baseline_values))
        });

        // Change operators compare against the shift from baseline
        let effective = match (condition.threshold_operator.is_change(), baseline_value) {
            (true, Some(baseline)) => aggregated - baseline,
            _ => aggregated,
        };

        let latest_ts = window.last().map(|r| r.timestamp).unwrap_or(now_ts);
        let entry = |measured: f64, early: bool, streak: u32| TriggeredCondition {
            condition_id: condition.id,
            parameter_name: window
                .first()
                .map(|r| r.parameter_name.clone())
                .unwrap_or_default(),
            measured_value: measured,
            threshold_value: condition.threshold_value,
            operator: condition.threshold_operator,
            timestamp: latest_ts,
            baseline_value,
            consecutive_days: streak,
            is_early_warning: early,
            early_warning_threshold: condition.early_warning_threshold,
        };

        let main_hit = condition
            .threshold_operator
            .compare(effective, condition.threshold_value);

        if !main_hit {
            if let Some(warning) = condition.early_warning_threshold {
                if condition.threshold_operator.compare(effective, warning) {
                    return ConditionVerdict::EarlyWarning(entry(effective, true, 0));
                }
            }
            return ConditionVerdict::Unsatisfied;
        }

        if condition.consecutive_required {
            let streak = self.consecutive_days(condition, &window);
            if streak < condition.validation_window_days {
                tracing::debug!(
                    condition_id = %condition.id,
                    streak,
                    required = condition.validation_window_days,
                    "threshold held but consecutive-day streak too short"
                );
                return ConditionVerdict::Unsatisfied;
            }
            return ConditionVerdict::Satisfied(entry(effective, false, streak));
        }

        // Without a streak requirement the aggregated value must still be
        // observed recently enough
        if condition.validation_window_days > 0 {
            let freshness_floor =
                now_ts - i64::from(condition.validation_window_days) * DAY_SECONDS;
            match window.last() {
                Some(latest) if latest.timestamp >= freshness_floor => {}
                _ => return ConditionVerdict::Unsatisfied,
            }
        }

        ConditionVerdict::Satisfied(entry(effective, false, 0))
    }

    /// Count consecutive satisfying calendar days from the most recent
    /// backward, breaking on any gap over 48 hours
    fn consecutive_days(
        &self,
        condition: &TriggerCondition,
        window: &[&FarmMonitoringData],
    ) -> u32 {
        let mut by_day: HashMap<NaiveDate, Vec<&FarmMonitoringData>> = HashMap::new();
        for record in window {
            if let Some(dt) = DateTime::from_timestamp(record.timestamp, 0) {
                by_day.entry(dt.date_naive()).or_default().push(record);
            }
        }

        let mut days: Vec<(NaiveDate, f64, i64)> = by_day
            .into_iter()
            .map(|(date, mut records)| {
                records.sort_by_key(|r| r.timestamp);
                let values: Vec<f64> = records.iter().map(|r| r.value).collect();
                let day_value = condition.aggregate_function.apply(&values);
                let latest_ts = records.last().map(|r| r.timestamp).unwrap_or_default();
                (date, day_value, latest_ts)
            })
            .collect();
        days.sort_by_key(|(date, _, _)| std::cmp::Reverse(*date));

        let mut streak = 0;
        let mut previous_ts: Option<i64> = None;
        for (_, day_value, latest_ts) in days {
            if let Some(prev) = previous_ts {
                if prev - latest_ts > STREAK_GAP_SECONDS {
                    break;
                }
            }
            if !condition
                .threshold_operator
                .compare(day_value, condition.threshold_value)
            {
                break;
            }
            streak += 1;
            previous_ts = Some(latest_ts);
        }
        streak
    }
}

enum ConditionVerdict {
    Satisfied(TriggeredCondition),
    EarlyWarning(TriggeredCondition),
    Unsatisfied,
}
