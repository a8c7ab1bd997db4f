//! Typed identifiers for domain entities

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! entity_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Generate a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Parse from string
            pub fn parse_str(s: &str) -> EngineResult<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| EngineError::Validation(format!("invalid {}: {}", stringify!($name), e)))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

entity_id!(
    /// Base policy (product template) identifier
    BasePolicyId
);
entity_id!(
    /// Registered policy identifier
    RegisteredPolicyId
);
entity_id!(
    /// Insurance provider identifier
    ProviderId
);
entity_id!(
    /// Farmer identifier
    FarmerId
);
entity_id!(
    /// Farm identifier
    FarmId
);
entity_id!(
    /// Policy trigger identifier
    TriggerId
);
entity_id!(
    /// Trigger condition identifier
    ConditionId
);
entity_id!(
    /// Data source identifier
    DataSourceId
);
entity_id!(
    /// Data source tier identifier
    TierId
);
entity_id!(
    /// Data source category identifier
    CategoryId
);
entity_id!(
    /// Claim identifier
    ClaimId
);
entity_id!(
    /// Cancel request identifier
    CancelRequestId
);
