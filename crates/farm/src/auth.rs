//! Operator capability.
//!
//! Operator-only entry points take an [`OperatorCap`] instead of inspecting
//! the caller. A capability is only issued by the farm it belongs to, and
//! only to its operator.

use crate::errors::FarmError;
use farm_types::AccountId;

/// Proof that the holder acts as the operator of one specific farm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorCap {
    farm_id: String,
    operator: AccountId,
}

impl OperatorCap {
    pub(crate) fn issue(farm_id: &str, operator: AccountId) -> Self {
        Self {
            farm_id: farm_id.to_string(),
            operator,
        }
    }

    pub fn farm_id(&self) -> &str {
        &self.farm_id
    }

    pub fn operator(&self) -> &AccountId {
        &self.operator
    }

    pub(crate) fn verify(&self, farm_id: &str, operator: &AccountId) -> Result<(), FarmError> {
        if self.farm_id != farm_id || self.operator != *operator {
            return Err(FarmError::Unauthorized);
        }
        Ok(())
    }
}
