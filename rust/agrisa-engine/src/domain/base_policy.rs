//! Base policy: the product template authored by an insurance provider

use crate::domain::ids::{BasePolicyId, ProviderId};
use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Base policy lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BasePolicyStatus {
    /// Being authored; staged in cache, not yet committed
    Draft,
    /// Open for enrollment and monitoring
    Active,
    /// Enrollment window ended
    Closed,
    /// Permanently retired; no renewals
    Archived,
}

/// Validation state of the uploaded policy documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentValidationStatus {
    Pending,
    Passed,
    Failed,
    Warning,
}

/// Insurance validity window in 1-based day ordinals
///
/// Consecutive windows share no day: day N+1 of the renewed window is
/// day N end + 1 of the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityWindow {
    pub from_day: u32,
    pub to_day: u32,
}

impl ValidityWindow {
    /// Number of days covered, inclusive of both endpoints
    pub fn duration_days(&self) -> u32 {
        self.to_day.saturating_sub(self.from_day) + 1
    }

    /// Check the window against the policy's declared coverage duration
    pub fn validate(&self, coverage_duration_days: u32) -> EngineResult<()> {
        if self.to_day <= self.from_day {
            return Err(EngineError::Validation(format!(
                "validity window to_day {} must exceed from_day {}",
                self.to_day, self.from_day
            )));
        }
        if self.duration_days() != coverage_duration_days {
            return Err(EngineError::Validation(format!(
                "validity window spans {} days, coverage duration is {}",
                self.duration_days(),
                coverage_duration_days
            )));
        }
        Ok(())
    }

    /// The next renewal window: starts the day after this one ends
    pub fn next(&self, coverage_duration_days: u32) -> ValidityWindow {
        let from_day = self.to_day + 1;
        ValidityWindow {
            from_day,
            to_day: from_day + coverage_duration_days - 1,
        }
    }
}

/// Product template for a parametric crop-insurance policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasePolicy {
    pub id: BasePolicyId,
    pub provider_id: ProviderId,
    pub product_name: String,
    pub crop_type: String,
    /// ISO currency code for coverage and premium amounts
    pub currency: String,
    pub coverage_duration_days: u32,
    /// Fixed premium component
    pub fix_premium_amount: f64,
    /// Premium rate applied to coverage
    pub premium_base_rate: f64,
    /// Fixed payout component
    pub fix_payout_amount: f64,
    /// Payout rate applied to the fixed payout
    pub payout_base_rate: f64,
    /// Multiplier applied to the largest threshold overshoot
    pub over_threshold_multiplier: f64,
    /// Hard cap on a single claim total, if set
    pub payout_cap: Option<f64>,
    /// Whether premium and payout scale by farm area
    pub per_hectare: bool,
    /// Enrollment window start, 1-based day ordinal
    pub enrollment_start_day: u32,
    /// Enrollment window end, 1-based day ordinal
    pub enrollment_end_day: u32,
    pub validity: ValidityWindow,
    pub document_tags: BTreeSet<String>,
    pub auto_renewal: bool,
    /// Renewal discount percent; applies only in (0, 100) exclusive
    pub renewal_discount_rate: f64,
    pub status: BasePolicyStatus,
    pub document_validation: DocumentValidationStatus,
}

impl BasePolicy {
    /// Validate template invariants
    pub fn validate(&self) -> EngineResult<()> {
        if self.coverage_duration_days == 0 {
            return Err(EngineError::Validation(
                "coverage_duration_days must be positive".to_string(),
            ));
        }
        self.validity.validate(self.coverage_duration_days)?;
        if self.enrollment_end_day < self.enrollment_start_day {
            return Err(EngineError::Validation(format!(
                "enrollment window end day {} precedes start day {}",
                self.enrollment_end_day, self.enrollment_start_day
            )));
        }
        for (name, value) in [
            ("fix_premium_amount", self.fix_premium_amount),
            ("premium_base_rate", self.premium_base_rate),
            ("fix_payout_amount", self.fix_payout_amount),
            ("payout_base_rate", self.payout_base_rate),
            ("over_threshold_multiplier", self.over_threshold_multiplier),
        ] {
            if value < 0.0 {
                return Err(EngineError::Validation(format!(
                    "{} cannot be negative",
                    name
                )));
            }
        }
        if let Some(cap) = self.payout_cap {
            if cap <= 0.0 {
                return Err(EngineError::Validation(
                    "payout_cap must be positive when set".to_string(),
                ));
            }
        }
        if !(0.0..=100.0).contains(&self.renewal_discount_rate) {
            return Err(EngineError::Validation(format!(
                "renewal_discount_rate {} outside [0, 100]",
                self.renewal_discount_rate
            )));
        }
        Ok(())
    }

    /// Commit a staged draft
    pub fn commit_draft(&mut self) -> EngineResult<()> {
        match self.status {
            BasePolicyStatus::Draft => {
                self.status = BasePolicyStatus::Active;
                Ok(())
            }
            _ => Err(EngineError::StateTransition {
                from: format!("{:?}", self.status),
                to: "Active".to_string(),
            }),
        }
    }

    /// Close enrollment; Archived policies stay archived
    pub fn close_enrollment(&mut self) {
        if self.status != BasePolicyStatus::Archived {
            self.status = BasePolicyStatus::Closed;
        }
    }

    /// Retire the template permanently
    pub fn archive(&mut self) {
        self.status = BasePolicyStatus::Archived;
    }
}
