//! Caller identity as delivered by the authentication layer.
//!
//! The engine never authenticates; it only checks the role and ownership
//! annotations the edge attached to the request.

use haulage_core::AccountId;
use serde::{Deserialize, Serialize};

use crate::error::SettlementError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Shipper,
    Courier,
    Admin,
}

impl std::str::FromStr for Role {
    type Err = SettlementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "shipper" => Ok(Self::Shipper),
            "courier" => Ok(Self::Courier),
            "admin" | "system_admin" => Ok(Self::Admin),
            other => Err(SettlementError::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub account: AccountId,
    pub roles: Vec<Role>,
}

impl Caller {
    pub fn new(account: AccountId, roles: Vec<Role>) -> Self {
        Self { account, roles }
    }

    pub fn shipper(account: AccountId) -> Self {
        Self::new(account, vec![Role::Shipper])
    }

    pub fn courier(account: AccountId) -> Self {
        Self::new(account, vec![Role::Courier])
    }

    pub fn admin(account: AccountId) -> Self {
        Self::new(account, vec![Role::Admin])
    }

    pub fn is_admin(&self) -> bool {
        self.roles.contains(&Role::Admin)
    }

    pub fn require_admin(&self, action: &str) -> Result<(), SettlementError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(SettlementError::unauthorized(action))
        }
    }

    /// Pass only if the caller is one of `parties`; the admin role does not
    /// stand in for a party.
    pub fn require_party(&self, parties: &[AccountId], action: &str) -> Result<(), SettlementError> {
        if parties.contains(&self.account) {
            Ok(())
        } else {
            Err(SettlementError::unauthorized(action))
        }
    }

    /// Pass if the caller is one of `parties` or an administrator.
    pub fn require_party_or_admin(
        &self,
        parties: &[AccountId],
        action: &str,
    ) -> Result<(), SettlementError> {
        if self.is_admin() || parties.contains(&self.account) {
            Ok(())
        } else {
            Err(SettlementError::unauthorized(action))
        }
    }
}
