//! Domain model for parametric crop insurance

pub mod base_policy;
pub mod cancel;
pub mod claim;
pub mod data_source;
pub mod farm;
pub mod ids;
pub mod monitoring;
pub mod registered_policy;
pub mod trigger;

pub use base_policy::{
    BasePolicy, BasePolicyStatus, DocumentValidationStatus, ValidityWindow,
};
pub use cancel::{CancelRequest, CancelRequestStatus, CancelRequestType, Party};
pub use claim::{Claim, ClaimStatus};
pub use data_source::{DataCategory, DataSource, DataTier};
pub use farm::{Farm, FarmBoundary};
pub use ids::{
    BasePolicyId, CancelRequestId, CategoryId, ClaimId, ConditionId, DataSourceId, FarmId,
    FarmerId, ProviderId, RegisteredPolicyId, TierId, TriggerId,
};
pub use monitoring::{DataQuality, FarmMonitoringData};
pub use registered_policy::{
    generate_claim_number, generate_policy_number, PolicyStatus, RegisteredPolicy,
    UnderwritingStatus,
};
pub use trigger::{
    AggregateFunction, BlackoutPeriod, ConditionCost, IntervalUnit, LogicalOperator,
    PolicyTrigger, ThresholdOperator, TriggerCondition,
};
