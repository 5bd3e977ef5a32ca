//! Role checks shared by every privileged operation.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::MarketError;
use crate::storage::MarketStorage;
use crate::types::AccountId;

/// Identity a privileged action is reserved for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// The identity that initialized the market.
    MarketOwner,
    /// The identity that deployed the proxy and may swap its logic.
    ProxyAdmin,
    /// The seller of the asset at `index`.
    AssetSeller { index: u64 },
}

/// Privileged action, used to report which check denied a caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    ReadAssetData,
    WithdrawFunds,
    Upgrade,
    ReclaimAsset,
}

impl Action {
    pub fn denial_reason(self) -> &'static str {
        match self {
            Action::ReadAssetData => "Only market owner can call this method!",
            Action::WithdrawFunds => "Only market owner can withdraw money!",
            Action::Upgrade => "Only proxy admin can upgrade the market!",
            Action::ReclaimAsset => "Only the seller can withdraw this asset!",
        }
    }
}

pub struct AccessControl<'a> {
    storage: &'a MarketStorage,
    admin: Option<&'a AccountId>,
}

impl<'a> AccessControl<'a> {
    pub fn new(storage: &'a MarketStorage) -> Self {
        Self {
            storage,
            admin: None,
        }
    }

    pub fn with_admin(mut self, admin: &'a AccountId) -> Self {
        self.admin = Some(admin);
        self
    }

    fn holder(&self, role: Role) -> Result<Option<&'a AccountId>, MarketError> {
        match role {
            Role::MarketOwner => Ok(self.storage.owner.as_ref()),
            Role::ProxyAdmin => Ok(self.admin),
            Role::AssetSeller { index } => self
                .storage
                .asset(index)
                .map(|asset| Some(&asset.seller))
                .ok_or(MarketError::InvalidReference { index }),
        }
    }

    /// Fail with `Unauthorized(action)` unless `caller` holds `role`.
    pub fn require_role(
        &self,
        caller: &AccountId,
        role: Role,
        action: Action,
    ) -> Result<(), MarketError> {
        match self.holder(role)? {
            Some(holder) if holder == caller => Ok(()),
            _ => {
                warn!(caller = %caller, ?role, ?action, "privileged call denied");
                Err(MarketError::Unauthorized(action))
            }
        }
    }
}
